use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub upstream: UpstreamHealth,
    pub proxy: ProxyInfo,
}

#[derive(Serialize)]
pub struct UpstreamHealth {
    pub base: String,
    pub credentials_configured: bool,
    pub missing: Vec<&'static str>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Serialize)]
pub struct ProxyInfo {
    pub version: String,
    pub cache_ttl_secs: u64,
}

/// Overall status string. Pure so it can be tested without a state.
pub fn determine_overall_status(credentials_configured: bool) -> &'static str {
    if credentials_configured {
        "healthy"
    } else {
        "misconfigured"
    }
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(build_health_response(&state))
}

pub fn build_health_response(state: &SharedState) -> HealthResponse {
    let missing = match state.credentials.load() {
        Ok(_) => Vec::new(),
        Err(crate::error::ProxyError::Misconfigured { missing }) => missing,
        Err(_) => Vec::new(),
    };
    let configured = missing.is_empty();

    HealthResponse {
        status: determine_overall_status(configured).to_string(),
        upstream: UpstreamHealth {
            base: state.config.upstream_base.clone(),
            credentials_configured: configured,
            missing,
            timeout_secs: state.config.upstream_timeout.as_secs(),
            max_retries: state.config.retry.max_retries,
        },
        proxy: ProxyInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_ttl_secs: state.config.cache_ttl.as_secs(),
        },
    }
}
