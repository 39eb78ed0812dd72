//! Pipeline configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::{TokenCredential, TokenRequestOptions};
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::policies::{
    BearerTokenPolicy, ClientRequestIdPolicy, LoggingPolicy, RetryOptions, UserAgentPolicy,
};
use crate::token_cache::TokenCache;
use crate::transport::{ReqwestTransport, Transport};

/// Knobs for the standard pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Product token for the User-Agent (e.g., "keyvault-secrets").
    #[serde(default = "default_product")]
    pub product: String,

    /// Product version for the User-Agent.
    #[serde(default = "default_product_version")]
    pub product_version: String,

    /// Per-attempt transport timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryOptions,

    /// Prepended verbatim to the User-Agent.
    #[serde(default)]
    pub user_agent_prefix: Option<String>,

    /// Append `(os; arch)` to the User-Agent.
    #[serde(default = "default_true")]
    pub user_agent_runtime: bool,

    /// Token cache skew window in seconds.
    #[serde(default = "default_refresh_skew")]
    pub token_refresh_skew_secs: u64,
}

fn default_product() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_product_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_refresh_skew() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            product: default_product(),
            product_version: default_product_version(),
            timeout_secs: default_timeout(),
            retry: RetryOptions::default(),
            user_agent_prefix: None,
            user_agent_runtime: default_true(),
            token_refresh_skew_secs: default_refresh_skew(),
        }
    }
}

/// Credential and scopes for the sign anchor.
#[derive(Debug, Clone)]
pub struct PipelineAuth {
    pub credential: Arc<dyn TokenCredential>,
    pub options: TokenRequestOptions,
}

impl PipelineAuth {
    pub fn new<I, S>(credential: Arc<dyn TokenCredential>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            credential,
            options: TokenRequestOptions::new(scopes),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `NIMBUS_HTTP_TIMEOUT` | Per-attempt timeout in seconds |
    /// | `NIMBUS_MAX_ATTEMPTS` | Total attempts including the first |
    /// | `NIMBUS_RETRY_DELAY_MS` | Backoff base delay |
    /// | `NIMBUS_RETRY_MAX_DELAY_MS` | Backoff cap |
    /// | `NIMBUS_USER_AGENT_PREFIX` | Caller prefix for the User-Agent |
    /// | `NIMBUS_TOKEN_REFRESH_SKEW_SECS` | Token refresh skew window |
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut retry = defaults.retry.clone();
        if let Some(v) = env_parse("NIMBUS_MAX_ATTEMPTS") {
            retry.max_attempts = v;
        }
        if let Some(v) = env_parse("NIMBUS_RETRY_DELAY_MS") {
            retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("NIMBUS_RETRY_MAX_DELAY_MS") {
            retry.max_delay = Duration::from_millis(v);
        }

        Self {
            timeout_secs: env_parse("NIMBUS_HTTP_TIMEOUT").unwrap_or(defaults.timeout_secs),
            retry,
            user_agent_prefix: std::env::var("NIMBUS_USER_AGENT_PREFIX")
                .ok()
                .filter(|v| !v.is_empty()),
            token_refresh_skew_secs: env_parse("NIMBUS_TOKEN_REFRESH_SKEW_SECS")
                .unwrap_or(defaults.token_refresh_skew_secs),
            ..defaults
        }
    }

    pub fn with_product(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.product = name.into();
        self.product_version = version.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_user_agent_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.user_agent_prefix = Some(prefix.into());
        self
    }

    pub fn with_token_refresh_skew(mut self, skew: Duration) -> Self {
        self.token_refresh_skew_secs = skew.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn token_refresh_skew(&self) -> Duration {
        Duration::from_secs(self.token_refresh_skew_secs)
    }

    /// Assemble the standard pipeline.
    ///
    /// Without an explicit transport a reqwest client with the configured
    /// timeout is used. Without `auth` the sign anchor is left empty.
    pub fn build_pipeline(
        &self,
        transport: Option<Arc<dyn Transport>>,
        auth: Option<PipelineAuth>,
    ) -> Result<Pipeline> {
        let user_agent = UserAgentPolicy::builder(&self.product, &self.product_version)
            .component("nimbus-core", env!("CARGO_PKG_VERSION"))
            .prefix(self.user_agent_prefix.clone())
            .runtime_tokens(self.user_agent_runtime)
            .build()?;

        let transport: Arc<dyn Transport> = match transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::with_timeout(self.timeout())?),
        };

        let mut builder = Pipeline::builder()
            .per_call(Arc::new(user_agent))
            .per_call(Arc::new(LoggingPolicy))
            .retry(self.retry.clone())
            .per_retry(Arc::new(ClientRequestIdPolicy))
            .transport(transport);

        if let Some(auth) = auth {
            let cache = TokenCache::with_skew(auth.credential, self.token_refresh_skew());
            builder = builder.sign(Arc::new(BearerTokenPolicy::new(
                Arc::new(cache),
                auth.options,
            )));
        }

        Ok(builder.build())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
