use futures::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::records::ViewRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("proxy responded with HTTP {0}")]
    Status(u16),

    #[error("proxy unreachable: {0}")]
    Transport(String),

    #[error("proxy returned an unreadable body: {0}")]
    Decode(String),
}

impl PollError {
    /// Status code shown on the dashboard. Failures without one read as 502.
    pub fn status(&self) -> u16 {
        match self {
            PollError::Status(code) => *code,
            PollError::Transport(_) | PollError::Decode(_) => 502,
        }
    }
}

/// Where the dashboard gets view records from.
pub trait AnalyticsSource: Send + Sync {
    fn fetch<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<Vec<ViewRecord>, PollError>>;
}

#[derive(Deserialize)]
struct ViewsEnvelope {
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Pull `data` out of a proxy success body. Anything but an array is empty.
pub fn parse_views(body: &[u8]) -> Result<Vec<ViewRecord>, PollError> {
    let envelope: ViewsEnvelope =
        serde_json::from_slice(body).map_err(|e| PollError::Decode(e.to_string()))?;
    match envelope.data {
        Some(data) if data.is_array() => {
            serde_json::from_value(data).map_err(|e| PollError::Decode(e.to_string()))
        }
        _ => Ok(Vec::new()),
    }
}

/// HTTP client for `GET /api/analytics` on a running proxy.
pub struct ProxyClient {
    client: reqwest::Client,
    base: String,
}

impl ProxyClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, public_id: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &format!("{}/api/analytics", self.base),
            &[("publicId", public_id)],
        )
    }
}

impl AnalyticsSource for ProxyClient {
    fn fetch<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<Vec<ViewRecord>, PollError>> {
        Box::pin(async move {
            let url = self
                .endpoint(public_id)
                .map_err(|e| PollError::Transport(e.to_string()))?;

            let resp = self
                .client
                .get(url)
                .header(reqwest::header::CACHE_CONTROL, "no-store")
                .send()
                .await
                .map_err(|e| PollError::Transport(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(PollError::Status(resp.status().as_u16()));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| PollError::Transport(e.to_string()))?;
            parse_views(&body)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_read_as_502() {
        assert_eq!(PollError::Status(404).status(), 404);
        assert_eq!(PollError::Transport("reset".to_string()).status(), 502);
        assert_eq!(PollError::Decode("eof".to_string()).status(), 502);
    }

    #[test]
    fn test_parse_views_reads_data_array() {
        let records = parse_views(
            br#"{"data":[{"video_public_id":"clip","view_watch_time":4,"view_ended_at":"2025-03-01T09:00:00Z","viewer_location_country_code":"US"}]}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].viewer_location_country_code, "US");
    }

    #[test]
    fn test_parse_views_reads_null_fields_as_defaults() {
        let records = parse_views(
            br#"{"data":[
                {"video_public_id":"clip","view_watch_time":48,"view_ended_at":"2025-03-01T10:00:00Z","viewer_location_country_code":"US"},
                {"video_public_id":"clip","view_watch_time":null,"view_ended_at":"2025-03-01T09:00:00Z","viewer_location_country_code":null,"viewer_os_identifier":null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].view_watch_time, 48.0);
        assert_eq!(records[1].view_watch_time, 0.0);
        assert_eq!(records[1].viewer_location_country_code, "");
        assert_eq!(records[1].viewer_os_identifier, "");
    }

    #[test]
    fn test_parse_views_without_array_is_empty() {
        assert!(parse_views(br#"{"next_cursor":"abc"}"#).unwrap().is_empty());
        assert!(parse_views(br#"{"data":{"oops":1}}"#).unwrap().is_empty());
        assert!(parse_views(br#"{"data":null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_views_rejects_non_json() {
        assert!(matches!(parse_views(b"<html>"), Err(PollError::Decode(_))));
    }

    #[test]
    fn test_endpoint_encodes_public_id() {
        let client = ProxyClient::new("http://127.0.0.1:3000/", Duration::from_secs(1)).unwrap();
        let url = client.endpoint("samples/a b&c").unwrap();
        assert_eq!(url.path(), "/api/analytics");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![("publicId".to_string(), "samples/a b&c".to_string())]);
    }
}
