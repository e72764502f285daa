use std::sync::Arc;

use crate::cache::ResponseCache;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::upstream::{Credentials, RawCredentials, ReqwestTransport, UpstreamTransport};

pub type SharedState = Arc<ProxyState>;

/// Where the proxy finds Cloudinary credentials on each request.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    Environment,
    Fixed(RawCredentials),
}

impl CredentialSource {
    pub fn load(&self) -> Result<Credentials, ProxyError> {
        match self {
            CredentialSource::Environment => RawCredentials::from_env().resolve(),
            CredentialSource::Fixed(raw) => raw.clone().resolve(),
        }
    }
}

pub struct ProxyState {
    pub config: ProxyConfig,
    pub credentials: CredentialSource,
    pub transport: Arc<dyn UpstreamTransport>,
    pub cache: ResponseCache,
}

impl ProxyState {
    pub fn new(
        config: ProxyConfig,
        credentials: CredentialSource,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Self {
        let cache = ResponseCache::new(config.cache_ttl);
        Self {
            config,
            credentials,
            transport,
            cache,
        }
    }

    /// Production wiring: reqwest transport, credentials from the environment.
    pub fn from_config(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(config.upstream_connect_timeout, config.upstream_timeout)?;
        Ok(Self::new(
            config,
            CredentialSource::Environment,
            Arc::new(transport),
        ))
    }
}
