use clap::Parser;
use std::time::Duration;

use video_analytics::config::*;

#[test]
fn test_default_constants() {
    assert_eq!(DEFAULT_PROXY_PORT, 3000);
    assert_eq!(UPSTREAM_TIMEOUT_SECS, 10);
    assert_eq!(UPSTREAM_MAX_RETRIES, 2);
    assert_eq!(POLL_INTERVAL_SECS, 15);
    assert_eq!(RESPONSE_CACHE_TTL_SECS, 60);
}

#[test]
fn test_serve_defaults() {
    let args = CliArgs::try_parse_from(["video-analytics", "serve"]).unwrap();
    let Command::Serve(serve) = args.command else {
        panic!("expected serve");
    };

    let config = ProxyConfig::from_args(&serve);
    assert_eq!(config.port, DEFAULT_PROXY_PORT);
    assert_eq!(config.upstream_base, DEFAULT_UPSTREAM_BASE);
    assert_eq!(config.upstream_timeout, Duration::from_secs(10));
    assert_eq!(config.upstream_connect_timeout, Duration::from_secs(5));
    assert!(config.upstream_connect_timeout < config.upstream_timeout);
    assert_eq!(config.retry.max_retries, 2);
    assert_eq!(config.retry.multiplier(), UPSTREAM_BACKOFF_MULTIPLIER);
    assert_eq!(config.retry.base_delay, Duration::from_millis(500));
    assert_eq!(config.max_results, UPSTREAM_MAX_RESULTS);
    assert_eq!(config.cache_ttl, Duration::from_secs(60));
}

#[test]
fn test_serve_overrides() {
    let args = CliArgs::try_parse_from([
        "video-analytics",
        "serve",
        "--port",
        "8088",
        "--upstream-base",
        "http://127.0.0.1:9000/",
        "--timeout-secs",
        "15",
        "--connect-timeout-secs",
        "4",
        "--max-retries",
        "0",
        "--backoff-base-ms",
        "250",
        "--cache-ttl-secs",
        "0",
    ])
    .unwrap();
    let Command::Serve(serve) = args.command else {
        panic!("expected serve");
    };

    let config = ProxyConfig::from_args(&serve);
    assert_eq!(config.port, 8088);
    assert_eq!(config.upstream_base, "http://127.0.0.1:9000");
    assert_eq!(config.upstream_timeout, Duration::from_secs(15));
    assert_eq!(config.upstream_connect_timeout, Duration::from_secs(4));
    assert_eq!(config.retry.max_retries, 0);
    assert_eq!(config.retry.delay_for(0), Duration::from_millis(250));
    assert!(config.cache_ttl.is_zero());
}

#[test]
fn test_watch_defaults() {
    let args = CliArgs::try_parse_from(["video-analytics", "watch"]).unwrap();
    let Command::Watch(watch) = args.command else {
        panic!("expected watch");
    };
    assert_eq!(watch.proxy_url, DEFAULT_PROXY_URL);
    assert_eq!(watch.public_id, DEFAULT_PUBLIC_ID);
    assert_eq!(watch.interval_secs, POLL_INTERVAL_SECS);
    assert!(!watch.demo);
}

#[test]
fn test_subcommand_is_required() {
    assert!(CliArgs::try_parse_from(["video-analytics"]).is_err());
}
