use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use video_analytics::config::{
    CliArgs, Command, ProxyConfig, ServeArgs, WatchArgs, POLL_REQUEST_TIMEOUT_SECS,
};
use video_analytics::dashboard::render::render_snapshot;
use video_analytics::dashboard::source::ProxyClient;
use video_analytics::dashboard::{spawn_poller, Dashboard};
use video_analytics::server;
use video_analytics::state::ProxyState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "video_analytics=info,tower_http=info".into()),
        )
        .init();

    let args = CliArgs::parse();
    info!("Starting video-analytics v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Serve(serve_args) => serve(serve_args).await,
        Command::Watch(watch_args) => watch(watch_args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = ProxyConfig::from_args(&args);
    let port = config.port;
    info!("Upstream: {}", config.upstream_base);
    info!(
        "Upstream timeout: {:?}, retries: {}, cache TTL: {:?}",
        config.upstream_timeout, config.retry.max_retries, config.cache_ttl
    );

    let state = Arc::new(ProxyState::from_config(config)?);
    if let Err(e) = state.credentials.load() {
        warn!("{}; /api/analytics will answer 500 until this is fixed", e);
    }

    let router = server::build_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Analytics proxy listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Analytics proxy shutting down");
    Ok(())
}

async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let interval_secs = args.interval_secs.max(1);
    let client = ProxyClient::new(
        &args.proxy_url,
        Duration::from_secs(POLL_REQUEST_TIMEOUT_SECS),
    )?;
    let dashboard = Dashboard::new(args.public_id.clone(), Arc::new(client));
    if args.demo {
        dashboard.enter_demo();
    }

    let mut changes = dashboard.subscribe();
    let poller = spawn_poller(dashboard.clone(), Duration::from_secs(interval_secs));
    info!(
        "Watching {} via {} (r = refresh, d = demo, l = live, q = quit)",
        args.public_id, args.proxy_url
    );
    print!("{}", render_snapshot(&dashboard.snapshot(), interval_secs));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            changed = changes.recv() => match changed {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    print!("{}", render_snapshot(&dashboard.snapshot(), interval_secs));
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(cmd)) => match cmd.trim() {
                    "r" => {
                        dashboard.refresh();
                    }
                    "d" => dashboard.enter_demo(),
                    "l" => {
                        dashboard.exit_demo();
                    }
                    "q" => break,
                    "" => {}
                    other => warn!("Unknown command {:?} (r, d, l or q)", other),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    poller.shutdown();
    info!("Dashboard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
