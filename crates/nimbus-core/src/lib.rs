//! Request pipeline shared by generated cloud-service clients.
//!
//! This crate provides:
//!
//! - An ordered policy chain (per-call → retry → per-retry → sign → transport)
//! - Retry with full-jitter exponential backoff and `Retry-After` handling
//! - Deadline and cancellation propagation through every stage
//! - A token cache keyed by scope set and tenant with single-flight refresh
//! - Bearer authentication with one re-authentication on 401
//!
//! Credential implementations live in `nimbus-identity`.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nimbus_core::{Context, PipelineAuth, PipelineConfig, Request, TokenCredential, Url};
//!
//! # async fn example(credential: Arc<dyn TokenCredential>) -> nimbus_core::Result<()> {
//! let pipeline = PipelineConfig::from_env()
//!     .with_product("keyvault-secrets", "4.2.0")
//!     .build_pipeline(
//!         None,
//!         Some(PipelineAuth::new(credential, ["https://vault.example.net/.default"])),
//!     )?;
//!
//! let url = Url::parse("https://myvault.example.net/secrets/db?api-version=7.4")
//!     .map_err(|e| nimbus_core::Error::Config { message: e.to_string() })?;
//! let mut request = Request::get(url);
//! let response = pipeline.send(&Context::new(), &mut request).await?.error_for_status()?;
//! println!("{}", response.text());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `NIMBUS_HTTP_TIMEOUT` | Per-attempt timeout in seconds (default: 30) |
//! | `NIMBUS_MAX_ATTEMPTS` | Total attempts including the first (default: 4) |
//! | `NIMBUS_RETRY_DELAY_MS` | Backoff base delay (default: 800) |
//! | `NIMBUS_RETRY_MAX_DELAY_MS` | Backoff cap (default: 60000) |
//! | `NIMBUS_USER_AGENT_PREFIX` | Caller prefix for the User-Agent |
//! | `NIMBUS_TOKEN_REFRESH_SKEW_SECS` | Refresh window before expiry (default: 300) |

pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod policies;
pub mod policy;
pub mod token_cache;
pub mod transport;

// Re-export main types
pub use config::{PipelineAuth, PipelineConfig};
pub use context::Context;
pub use credentials::{
    ensure_supported, AccessToken, Availability, CacheKey, TokenCredential, TokenRequestOptions,
};
pub use error::{CredentialError, CredentialFailure, Error, Result, TransportErrorKind};
pub use http::{Body, Method, Request, Response, StatusCode, Url};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use policies::{
    BearerTokenPolicy, ClientRequestIdPolicy, LoggingPolicy, RetryOptions, RetryPolicy,
    UserAgentPolicy,
};
pub use policy::{next_send, Policy, Position};
pub use token_cache::{TokenCache, DEFAULT_REFRESH_SKEW};
pub use transport::{ReqwestTransport, Transport};

pub use secrecy::{ExposeSecret, SecretString};
pub use tokio_util::sync::CancellationToken;
