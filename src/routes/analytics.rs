//! `GET /api/analytics?publicId=…`: Cloudinary views proxy.
//!
//! Success passes the upstream JSON through untouched. Every failure is
//! normalized into the `{ error, details?, status?, body? }` envelope by
//! [`ProxyError`]. The number of upstream attempts made for the request is
//! reported in the `x-upstream-attempts` header.

use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::cache::ResponseCache;
use crate::error::ProxyError;
use crate::state::ProxyState;
use crate::state::SharedState;
use crate::upstream::{build_views_url, fetch_with_retry, Outcome, UpstreamRequest};

pub const ATTEMPTS_HEADER: &str = "x-upstream-attempts";

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(rename = "publicId")]
    pub public_id: Option<String>,
}

pub async fn analytics(
    State(state): State<SharedState>,
    Query(query): Query<AnalyticsQuery>,
) -> Response {
    let (result, attempts) = fetch_views(&state, query.public_id.as_deref()).await;

    let mut resp = match result {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response(),
        Err(e) => e.into_response(),
    };
    resp.headers_mut()
        .insert(ATTEMPTS_HEADER, HeaderValue::from(attempts));
    resp
}

/// Resolve one proxy request. Returns the upstream body or the failure,
/// together with the number of upstream attempts made.
pub async fn fetch_views(
    state: &ProxyState,
    public_id: Option<&str>,
) -> (Result<Bytes, ProxyError>, u32) {
    let Some(public_id) = public_id.filter(|id| !id.is_empty()) else {
        return (Err(ProxyError::MissingPublicId), 0);
    };

    let credentials = match state.credentials.load() {
        Ok(creds) => creds,
        Err(e) => {
            error!("Analytics proxy is misconfigured: {}", describe(&e));
            return (Err(e), 0);
        }
    };

    let cache_key = ResponseCache::key(&credentials.cloud_name, public_id);
    if let Some(body) = state.cache.get(&cache_key).await {
        debug!("Serving cached analytics for {}", public_id);
        return (Ok(body), 0);
    }

    let url = match build_views_url(
        &state.config.upstream_base,
        &credentials.cloud_name,
        public_id,
        state.config.max_results,
    ) {
        Ok(url) => url,
        Err(e) => {
            error!("Failed to build upstream URL: {}", e);
            return (Err(e.into()), 0);
        }
    };

    let request = UpstreamRequest {
        url,
        authorization: credentials.auth_header(),
    };

    let report = fetch_with_retry(state.transport.as_ref(), &state.config.retry, &request).await;
    let attempts = report.attempts;

    let result = match report.outcome {
        Outcome::Success(resp) => match serde_json::from_slice::<serde_json::Value>(&resp.body) {
            Ok(_) => {
                info!(
                    "Fetched analytics for {} ({} bytes, {} attempt(s))",
                    public_id,
                    resp.body.len(),
                    attempts
                );
                state.cache.put(cache_key, resp.body.clone()).await;
                Ok(resp.body)
            }
            Err(e) => {
                error!("Upstream returned non-JSON body for {}: {}", public_id, e);
                Err(ProxyError::InvalidUpstreamBody(e.to_string()))
            }
        },
        Outcome::Rejected(resp) => Err(ProxyError::UpstreamRejected {
            status: resp.status,
            body: resp.body,
        }),
        Outcome::Failed(failure) => Err(ProxyError::Transport { failure, attempts }),
    };

    (result, attempts)
}

fn describe(err: &ProxyError) -> String {
    match err {
        ProxyError::Misconfigured { missing } => format!("missing {}", missing.join(", ")),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::server::build_router;
    use crate::state::CredentialSource;
    use crate::upstream::test_support::*;
    use crate::upstream::{FailureKind, RawCredentials};
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const VIEWS: &str = r#"{"data":[{"video_public_id":"clip","view_watch_time":12,"view_ended_at":"2025-03-01T09:00:00Z"}],"next_cursor":null}"#;

    fn credentials() -> CredentialSource {
        CredentialSource::Fixed(RawCredentials {
            cloud_name: Some("demo".to_string()),
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
        })
    }

    fn state_with(
        transport: Arc<ScriptedTransport>,
        credentials: CredentialSource,
        cache_ttl: Duration,
    ) -> SharedState {
        let config = ProxyConfig {
            cache_ttl,
            ..ProxyConfig::default()
        };
        Arc::new(ProxyState::new(config, credentials, transport))
    }

    async fn get(state: SharedState, uri: &str) -> (StatusCode, Option<String>, Value) {
        let resp = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let attempts = resp
            .headers()
            .get(ATTEMPTS_HEADER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap();
        (status, attempts, body)
    }

    #[tokio::test]
    async fn test_missing_public_id_is_400_without_network() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(VIEWS)]));
        let state = state_with(transport.clone(), credentials(), Duration::ZERO);

        let (status, attempts, body) = get(state, "/api/analytics").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Public ID is required");
        assert_eq!(attempts.as_deref(), Some("0"));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_public_id_is_400() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(VIEWS)]));
        let state = state_with(transport.clone(), credentials(), Duration::ZERO);

        let (status, _, _) = get(state, "/api/analytics?publicId=").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_500_without_network() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(VIEWS)]));
        let creds = CredentialSource::Fixed(RawCredentials {
            cloud_name: Some("demo".to_string()),
            ..RawCredentials::default()
        });
        let state = state_with(transport.clone(), creds, Duration::ZERO);

        let (status, _, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
        assert_eq!(
            body["details"]["missing"],
            json!(["CLOUDINARY_API_KEY", "CLOUDINARY_API_SECRET"])
        );
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_passes_body_through() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(VIEWS)]));
        let state = state_with(transport.clone(), credentials(), Duration::ZERO);

        let (status, attempts, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::from_str::<Value>(VIEWS).unwrap());
        assert_eq!(attempts.as_deref(), Some("1"));
        assert_eq!(
            transport.last_authorization.lock().unwrap().as_deref(),
            Some("Basic a2V5OnNlY3JldA==")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeouts_then_success() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            connect_timeout(),
            connect_timeout(),
            ok(VIEWS),
        ]));
        let state = state_with(transport.clone(), credentials(), Duration::ZERO);

        let (status, attempts, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["video_public_id"], "clip");
        assert_eq!(attempts.as_deref(), Some("3"));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_upstream_404_passes_through_without_retry() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(
            404,
            r#"{"error":{"message":"Resource not found"}}"#,
        )]));
        let state = state_with(transport.clone(), credentials(), Duration::ZERO);

        let (status, attempts, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);
        assert_eq!(body["body"]["error"]["message"], "Resource not found");
        assert_eq!(attempts.as_deref(), Some("1"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_is_502_with_cause() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            connect_timeout(),
            connect_timeout(),
            connect_timeout(),
        ]));
        let state = state_with(transport.clone(), credentials(), Duration::ZERO);

        let (status, attempts, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["details"]["kind"], "connect_timeout");
        assert_eq!(body["details"]["code"], "TimedOut");
        assert_eq!(body["details"]["attempts"], 3);
        assert_eq!(attempts.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_502_without_retry() {
        let transport = Arc::new(ScriptedTransport::new(vec![fail(FailureKind::Connect)]));
        let state = state_with(transport.clone(), credentials(), Duration::ZERO);

        let (status, _, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["details"]["kind"], "connect");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_502() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok("<html>maintenance</html>")]));
        let state = state_with(transport, credentials(), Duration::ZERO);

        let (status, _, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_cached_body_skips_upstream() {
        let transport = Arc::new(ScriptedTransport::new(vec![ok(VIEWS)]));
        let state = state_with(transport.clone(), credentials(), Duration::from_secs(60));

        let (first, _, _) = get(state.clone(), "/api/analytics?publicId=clip").await;
        let (second, attempts, body) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(first, StatusCode::OK);
        assert_eq!(second, StatusCode::OK);
        assert_eq!(attempts.as_deref(), Some("0"));
        assert_eq!(body["data"][0]["view_watch_time"], 12);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(500, "oops"),
            ok(VIEWS),
        ]));
        let state = state_with(transport.clone(), credentials(), Duration::from_secs(60));

        let (first, _, body) = get(state.clone(), "/api/analytics?publicId=clip").await;
        let (second, _, _) = get(state, "/api/analytics?publicId=clip").await;

        assert_eq!(first, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["body"], "oops");
        assert_eq!(second, StatusCode::OK);
        assert_eq!(transport.calls(), 2);
    }
}
