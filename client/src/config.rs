use derive_builder::Builder;
use eyre::Context;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`VidshareClient`](crate::VidshareClient).
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct ClientConfig {
    /// Versioned base path of the API, e.g. `https://videos.example.com/api/v1`.
    #[builder(setter(into), default = "DEFAULT_BASE_URL.to_string()")]
    pub base_url: String,

    /// Timeout applied to every request except binary uploads.
    #[builder(default = "DEFAULT_REQUEST_TIMEOUT")]
    pub request_timeout: Duration,

    /// Directory holding the persisted profile snapshot.
    ///
    /// When unset, the snapshot only lives in memory.
    #[builder(setter(into, strip_option), default)]
    pub state_dir: Option<PathBuf>,

    #[builder(setter(into), default = "DEFAULT_USER_AGENT.to_string()")]
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state_dir: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Reads `VIDSHARE_API_URL`, `VIDSHARE_TIMEOUT_SECS` and `VIDSHARE_STATE_DIR`,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> eyre::Result<Self> {
        let mut builder = Self::builder();
        if let Ok(url) = std::env::var("VIDSHARE_API_URL") {
            builder.base_url(url);
        }
        if let Ok(secs) = std::env::var("VIDSHARE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("parse VIDSHARE_TIMEOUT_SECS={secs:?}"))?;
            builder.request_timeout(Duration::from_secs(secs));
        }
        if let Ok(dir) = std::env::var("VIDSHARE_STATE_DIR") {
            builder.state_dir(dir);
        }
        builder.build().context("build client configuration")
    }
}

impl ClientConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(format!("base url {url:?} must be an http(s) URL"));
        }
        if let Some(timeout) = self.request_timeout
            && timeout.is_zero()
        {
            return Err("request timeout must be non-zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::builder().build().unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert!(config.state_dir.is_none());
        assert!(config.user_agent.starts_with("vidshare-client/"));
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = ClientConfig::builder()
            .base_url("ftp://example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(
            ClientConfig::builder()
                .request_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }
}
