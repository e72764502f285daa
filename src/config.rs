use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::upstream::RetryPolicy;

/// Video analytics: Cloudinary analytics proxy and polling dashboard.
#[derive(Parser, Debug, Clone)]
#[command(name = "video-analytics")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve `GET /api/analytics` in front of the Cloudinary analytics API
    Serve(ServeArgs),
    /// Poll a running proxy and print engagement figures
    Watch(WatchArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// HTTP port for the proxy
    #[arg(long = "port", default_value_t = DEFAULT_PROXY_PORT)]
    pub port: u16,

    /// Base URL of the Cloudinary API
    #[arg(long = "upstream-base", default_value = DEFAULT_UPSTREAM_BASE)]
    pub upstream_base: String,

    /// Per-attempt upstream timeout
    #[arg(long = "timeout-secs", default_value_t = UPSTREAM_TIMEOUT_SECS)]
    pub timeout_secs: u64,

    /// Connect-phase bound, capped at half of --timeout-secs
    #[arg(long = "connect-timeout-secs", default_value_t = UPSTREAM_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,

    /// Additional attempts after a connect-phase timeout
    #[arg(long = "max-retries", default_value_t = UPSTREAM_MAX_RETRIES)]
    pub max_retries: u32,

    /// First backoff delay; doubles on each further retry
    #[arg(long = "backoff-base-ms", default_value_t = UPSTREAM_BACKOFF_BASE_MS)]
    pub backoff_base_ms: u64,

    /// How long a successful upstream body is reused (0 disables)
    #[arg(long = "cache-ttl-secs", default_value_t = RESPONSE_CACHE_TTL_SECS)]
    pub cache_ttl_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Base URL of a running proxy
    #[arg(long = "proxy-url", default_value = DEFAULT_PROXY_URL)]
    pub proxy_url: String,

    /// Video public id to follow
    #[arg(long = "public-id", default_value = DEFAULT_PUBLIC_ID)]
    pub public_id: String,

    /// Poll interval
    #[arg(long = "interval-secs", default_value_t = POLL_INTERVAL_SECS)]
    pub interval_secs: u64,

    /// Start in demo mode with the built-in dataset
    #[arg(long = "demo")]
    pub demo: bool,
}

pub struct ProxyConfig {
    pub port: u16,
    pub upstream_base: String,
    pub upstream_timeout: Duration,
    pub upstream_connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_results: u32,
    pub cache_ttl: Duration,
}

// Port constants
pub const DEFAULT_PROXY_PORT: u16 = 3000;
pub const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:3000";

// Upstream constants
pub const DEFAULT_UPSTREAM_BASE: &str = "https://api.cloudinary.com";
pub const UPSTREAM_TIMEOUT_SECS: u64 = 10;
pub const UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const UPSTREAM_MAX_RETRIES: u32 = 2;
pub const UPSTREAM_BACKOFF_BASE_MS: u64 = 500;
pub const UPSTREAM_BACKOFF_MULTIPLIER: u32 = 2;
pub const UPSTREAM_MAX_RESULTS: u32 = 100;
pub const UPSTREAM_POOL_IDLE_SECS: u64 = 10;
pub const RESPONSE_CACHE_TTL_SECS: u64 = 60;

// Credential environment variables
pub const ENV_CLOUD_NAME: &str = "CLOUDINARY_CLOUD_NAME";
pub const ENV_CLOUD_NAME_PUBLIC: &str = "NEXT_PUBLIC_CLOUDINARY_CLOUD_NAME";
pub const ENV_API_KEY: &str = "CLOUDINARY_API_KEY";
pub const ENV_API_SECRET: &str = "CLOUDINARY_API_SECRET";

// Dashboard constants
pub const POLL_INTERVAL_SECS: u64 = 15;
pub const POLL_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PUBLIC_ID: &str =
    "samples/analytics-demo/024_Automated_Brand_Review_with_Cloudinary_Moderation";
pub const HIGH_DROP_OFF_SECS: u64 = 30;

impl ProxyConfig {
    pub fn from_args(args: &ServeArgs) -> Self {
        ProxyConfig {
            port: args.port,
            upstream_base: args.upstream_base.trim_end_matches('/').to_string(),
            upstream_timeout: Duration::from_secs(args.timeout_secs),
            upstream_connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            retry: RetryPolicy::new(
                args.max_retries,
                Duration::from_millis(args.backoff_base_ms),
                UPSTREAM_BACKOFF_MULTIPLIER,
            ),
            max_results: UPSTREAM_MAX_RESULTS,
            cache_ttl: Duration::from_secs(args.cache_ttl_secs),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PROXY_PORT,
            upstream_base: DEFAULT_UPSTREAM_BASE.to_string(),
            upstream_timeout: Duration::from_secs(UPSTREAM_TIMEOUT_SECS),
            upstream_connect_timeout: Duration::from_secs(UPSTREAM_CONNECT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            max_results: UPSTREAM_MAX_RESULTS,
            cache_ttl: Duration::from_secs(RESPONSE_CACHE_TTL_SECS),
        }
    }
}
