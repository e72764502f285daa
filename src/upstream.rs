//! Cloudinary analytics client.
//!
//! One upstream attempt goes through an [`UpstreamTransport`]; failures come
//! back already classified so [`fetch_with_retry`] can decide eligibility
//! without looking at transport internals. Only a connect-phase timeout is
//! retried. An upstream that answers with a non-2xx status is reachable and
//! is never retried.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{
    ENV_API_KEY, ENV_API_SECRET, ENV_CLOUD_NAME, ENV_CLOUD_NAME_PUBLIC, UPSTREAM_BACKOFF_BASE_MS,
    UPSTREAM_BACKOFF_MULTIPLIER, UPSTREAM_MAX_RETRIES, UPSTREAM_POOL_IDLE_SECS,
};
use crate::error::ProxyError;

// --- Credentials ---

/// Credential values as found in the deployment, any of which may be absent.
#[derive(Debug, Clone, Default)]
pub struct RawCredentials {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

#[derive(Clone)]
pub struct Credentials {
    pub cloud_name: String,
    pub api_key: String,
    api_secret: String,
}

impl RawCredentials {
    pub fn from_env() -> Self {
        Self {
            cloud_name: env_value(ENV_CLOUD_NAME).or_else(|| env_value(ENV_CLOUD_NAME_PUBLIC)),
            api_key: env_value(ENV_API_KEY),
            api_secret: env_value(ENV_API_SECRET),
        }
    }

    pub fn resolve(self) -> Result<Credentials, ProxyError> {
        let mut missing = Vec::new();
        if self.cloud_name.is_none() {
            missing.push(ENV_CLOUD_NAME);
        }
        if self.api_key.is_none() {
            missing.push(ENV_API_KEY);
        }
        if self.api_secret.is_none() {
            missing.push(ENV_API_SECRET);
        }

        match (self.cloud_name, self.api_key, self.api_secret) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Ok(Credentials {
                cloud_name,
                api_key,
                api_secret,
            }),
            _ => Err(ProxyError::Misconfigured { missing }),
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Credentials {
    pub fn new(
        cloud_name: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// `Authorization` header value for the admin API.
    pub fn auth_header(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.api_key, self.api_secret));
        format!("Basic {token}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Views query for one video, most recent first, bounded page size.
pub fn build_views_url(
    base: &str,
    cloud_name: &str,
    public_id: &str,
    max_results: u32,
) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&format!(
        "{}/v1_1/{}/video/analytics/views",
        base.trim_end_matches('/'),
        cloud_name
    ))?;
    url.query_pairs_mut()
        .append_pair("expression", &format!("video_public_id={public_id}"))
        .append_pair("max_results", &max_results.to_string())
        .append_pair("sort_by", "view_ended_at")
        .append_pair("direction", "desc");
    Ok(url)
}

// --- Transport ---

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub authorization: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No connection was established before the deadline.
    ConnectTimeout,
    /// Connected, but the response did not arrive or finish in time.
    ResponseTimeout,
    /// Refused, reset, DNS or TLS failure while connecting.
    Connect,
    /// The response body could not be read.
    Body,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectTimeout => "connect_timeout",
            FailureKind::ResponseTimeout => "response_timeout",
            FailureKind::Connect => "connect",
            FailureKind::Body => "body",
            FailureKind::Other => "other",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::ConnectTimeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportFailure {
    pub kind: FailureKind,
    /// Lowest-level cause code reported by the OS or TLS stack, if any.
    pub code: Option<String>,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A single upstream GET. Implementations must bound the attempt in time.
pub trait UpstreamTransport: Send + Sync {
    fn get<'a>(
        &'a self,
        request: &'a UpstreamRequest,
    ) -> BoxFuture<'a, Result<UpstreamResponse, TransportFailure>>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl ReqwestTransport {
    /// `timeout` bounds the whole attempt and starts before connecting, so
    /// the connect bound is held to at most half of it. Otherwise the attempt
    /// deadline fires first and a stalled connect reads as a response timeout.
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Result<Self, reqwest::Error> {
        let connect_timeout = connect_timeout.min(timeout / 2);
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(UPSTREAM_POOL_IDLE_SECS))
            .pool_max_idle_per_host(4)
            .build()?;
        Ok(Self {
            client,
            connect_timeout,
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl UpstreamTransport for ReqwestTransport {
    fn get<'a>(
        &'a self,
        request: &'a UpstreamRequest,
    ) -> BoxFuture<'a, Result<UpstreamResponse, TransportFailure>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(request.url.clone())
                .header(AUTHORIZATION, &request.authorization)
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(classify)?;

            let status = resp.status().as_u16();
            let body = resp.bytes().await.map_err(classify)?;
            Ok(UpstreamResponse { status, body })
        })
    }
}

/// Map a reqwest error onto the retry taxonomy.
pub fn classify(err: reqwest::Error) -> TransportFailure {
    let kind = if err.is_connect() && err.is_timeout() {
        FailureKind::ConnectTimeout
    } else if err.is_timeout() {
        FailureKind::ResponseTimeout
    } else if err.is_connect() {
        FailureKind::Connect
    } else if err.is_body() || err.is_decode() {
        FailureKind::Body
    } else {
        FailureKind::Other
    };

    let failure = TransportFailure::new(kind, err.to_string());
    match root_cause_code(&err) {
        Some(code) => failure.with_code(code),
        None => failure,
    }
}

fn root_cause_code(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return Some(match io.raw_os_error() {
                Some(errno) => format!("{:?} (os error {errno})", io.kind()),
                None => format!("{:?}", io.kind()),
            });
        }
        source = cause.source();
    }
    None
}

// --- Retry ---

/// Smallest multiplier that still makes each backoff longer than the last.
pub const MIN_BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: UPSTREAM_MAX_RETRIES,
            base_delay: Duration::from_millis(UPSTREAM_BACKOFF_BASE_MS),
            multiplier: UPSTREAM_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// A multiplier below [`MIN_BACKOFF_MULTIPLIER`] is raised to it.
    pub fn new(max_retries: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_retries,
            base_delay,
            multiplier: multiplier.max(MIN_BACKOFF_MULTIPLIER),
        }
    }

    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Delay before retry number `retry` (0-based): base × multiplier^retry.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.multiplier.saturating_pow(retry))
    }
}

#[derive(Debug)]
pub enum Outcome {
    Success(UpstreamResponse),
    /// Upstream answered with a non-2xx status.
    Rejected(UpstreamResponse),
    Failed(TransportFailure),
}

#[derive(Debug)]
pub struct RetryReport {
    pub outcome: Outcome,
    pub attempts: u32,
    /// Backoff delays slept, in order.
    pub delays: Vec<Duration>,
}

impl RetryReport {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

enum RetryState {
    Attempting,
    BackoffWait,
    Success(UpstreamResponse),
    ImmediateFailure(Outcome),
    ExhaustedFailure(TransportFailure),
}

pub async fn fetch_with_retry(
    transport: &dyn UpstreamTransport,
    policy: &RetryPolicy,
    request: &UpstreamRequest,
) -> RetryReport {
    let mut attempts: u32 = 0;
    let mut delays = Vec::new();
    let mut state = RetryState::Attempting;

    loop {
        state = match state {
            RetryState::Attempting => {
                attempts += 1;
                match transport.get(request).await {
                    Ok(resp) if resp.is_success() => RetryState::Success(resp),
                    Ok(resp) => {
                        warn!(
                            status = resp.status,
                            attempt = attempts,
                            "Upstream rejected analytics request"
                        );
                        RetryState::ImmediateFailure(Outcome::Rejected(resp))
                    }
                    Err(failure) => {
                        warn!(
                            kind = %failure.kind,
                            attempt = attempts,
                            code = failure.code.as_deref().unwrap_or("-"),
                            cause = %failure.message,
                            "Upstream attempt failed"
                        );
                        if !failure.kind.is_retryable() {
                            RetryState::ImmediateFailure(Outcome::Failed(failure))
                        } else if attempts > policy.max_retries {
                            RetryState::ExhaustedFailure(failure)
                        } else {
                            RetryState::BackoffWait
                        }
                    }
                }
            }
            RetryState::BackoffWait => {
                let delay = policy.delay_for(attempts - 1);
                debug!("Retrying upstream in {:?} (attempt {})", delay, attempts + 1);
                delays.push(delay);
                sleep(delay).await;
                RetryState::Attempting
            }
            RetryState::Success(resp) => {
                return RetryReport {
                    outcome: Outcome::Success(resp),
                    attempts,
                    delays,
                };
            }
            RetryState::ImmediateFailure(outcome) => {
                return RetryReport {
                    outcome,
                    attempts,
                    delays,
                };
            }
            RetryState::ExhaustedFailure(failure) => {
                error!(
                    kind = %failure.kind,
                    attempts,
                    code = failure.code.as_deref().unwrap_or("-"),
                    cause = %failure.message,
                    "Upstream retries exhausted"
                );
                return RetryReport {
                    outcome: Outcome::Failed(failure),
                    attempts,
                    delays,
                };
            }
        };
    }
}
