//! Options shared by the HTTP-based credentials.

use std::sync::Arc;
use std::time::Duration;

use nimbus_core::{Pipeline, ReqwestTransport, RetryOptions, Transport, UserAgentPolicy};
use tracing::warn;

/// Public cloud authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Per-attempt timeout for identity endpoints.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Common knobs: the authority to talk to and the pipeline used for it.
#[derive(Debug, Clone)]
pub struct CredentialOptions {
    /// Authority base URL, e.g. `https://login.microsoftonline.com`.
    pub authority_host: String,
    pub pipeline: Pipeline,
}

impl Default for CredentialOptions {
    fn default() -> Self {
        Self {
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            pipeline: identity_pipeline(None),
        }
    }
}

impl CredentialOptions {
    /// Reads `AZURE_AUTHORITY_HOST`, keeping the default when unset.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(host) = std::env::var("AZURE_AUTHORITY_HOST")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            options.authority_host = host;
        }
        options
    }

    pub fn with_authority_host(mut self, host: impl Into<String>) -> Self {
        self.authority_host = host.into();
        self
    }

    /// Route identity traffic through `transport` (tests, proxies).
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.pipeline = identity_pipeline(Some(transport));
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }
}

/// Pipeline for identity endpoints: user agent and retry, never bearer auth.
pub(crate) fn identity_pipeline(transport: Option<Arc<dyn Transport>>) -> Pipeline {
    let user_agent = UserAgentPolicy::builder("nimbus-identity", env!("CARGO_PKG_VERSION"))
        .build()
        .unwrap_or_default();

    let mut builder = Pipeline::builder()
        .per_call(Arc::new(user_agent))
        .retry(RetryOptions::default().with_max_attempts(3));

    let transport =
        transport.or_else(|| timed_transport(ReqwestTransport::with_timeout(IDENTITY_TIMEOUT)));
    if let Some(transport) = transport {
        builder = builder.transport(transport);
    }
    builder.build()
}

/// The timed transport, or `None` (pipeline default client) when it could
/// not be built.
fn timed_transport(built: nimbus_core::Result<ReqwestTransport>) -> Option<Arc<dyn Transport>> {
    match built {
        Ok(transport) => Some(Arc::new(transport)),
        Err(e) => {
            warn!(
                error = %e,
                timeout_secs = IDENTITY_TIMEOUT.as_secs(),
                "timed identity transport unavailable, falling back to the default client"
            );
            None
        }
    }
}
