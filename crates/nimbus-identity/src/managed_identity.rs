//! Managed identity for Azure-hosted workloads.
//!
//! Two endpoint flavors are supported:
//!
//! | Host | Detection | Request |
//! |------|-----------|---------|
//! | App Service / Functions | `IDENTITY_ENDPOINT` + `IDENTITY_HEADER` | `api-version=2019-08-01`, `X-IDENTITY-HEADER` |
//! | VM / VMSS / AKS node | fallback | IMDS, `api-version=2018-02-01`, `Metadata: true` |
//!
//! IMDS is a link-local address that simply does not answer off Azure, so
//! reachability is probed once with a short TCP connect before the first
//! request; an unreachable endpoint makes every acquisition fail fast.

use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::http::header::{HeaderName, HeaderValue};
use nimbus_core::{
    ensure_supported, AccessToken, Availability, Context, CredentialError, ExposeSecret, Request,
    SecretString, TokenCredential, TokenRequestOptions, Url,
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::oauth::{parse_token_response, scopes_to_resource};
use crate::options::CredentialOptions;

const NAME: &str = "ManagedIdentityCredential";

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

/// Quick TCP probe timeout for IMDS.
pub const IMDS_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where tokens are requested from.
#[derive(Debug, Clone)]
pub enum ManagedIdentitySource {
    Imds { endpoint: String },
    AppService { endpoint: String, header: SecretString },
}

impl ManagedIdentitySource {
    /// App Service when its variables are set, IMDS otherwise.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("IDENTITY_ENDPOINT").ok().filter(|v| !v.is_empty());
        let header = std::env::var("IDENTITY_HEADER").ok().filter(|v| !v.is_empty());
        match (endpoint, header) {
            (Some(endpoint), Some(header)) => Self::AppService {
                endpoint,
                header: SecretString::from(header),
            },
            _ => Self::Imds {
                endpoint: IMDS_ENDPOINT.to_string(),
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Imds { .. } => "imds",
            Self::AppService { .. } => "app-service",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagedIdentityOptions {
    /// User-assigned identity; system-assigned when `None`.
    pub client_id: Option<String>,
    pub source: ManagedIdentitySource,
    pub probe_timeout: Duration,
    pub credential: CredentialOptions,
}

impl Default for ManagedIdentityOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            source: ManagedIdentitySource::from_env(),
            probe_timeout: IMDS_PROBE_TIMEOUT,
            credential: CredentialOptions::default(),
        }
    }
}

impl ManagedIdentityOptions {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }
}

#[derive(Debug)]
pub struct ManagedIdentityCredential {
    options: ManagedIdentityOptions,
    reachable: OnceCell<bool>,
}

impl ManagedIdentityCredential {
    pub fn new(options: ManagedIdentityOptions) -> Self {
        Self {
            options,
            reachable: OnceCell::new(),
        }
    }

    /// System-assigned identity, endpoint detected from the environment.
    pub fn system_assigned() -> Self {
        Self::new(ManagedIdentityOptions::default())
    }

    pub fn user_assigned(client_id: impl Into<String>) -> Self {
        Self::new(ManagedIdentityOptions::default().with_client_id(client_id))
    }

    async fn ensure_reachable(&self, endpoint: &Url) -> Result<(), CredentialError> {
        let timeout = self.options.probe_timeout;
        let reachable = *self
            .reachable
            .get_or_init(|| async {
                let reachable = probe(endpoint, timeout).await;
                if reachable {
                    debug!("IMDS is reachable");
                } else {
                    info!(timeout = ?timeout, "IMDS not reachable, managed identity unavailable");
                }
                reachable
            })
            .await;

        if reachable {
            Ok(())
        } else {
            Err(CredentialError::unavailable(
                NAME,
                format!("no managed identity endpoint responded within {timeout:?}"),
            ))
        }
    }

    fn build_request(&self, resource: &str) -> Result<Request, CredentialError> {
        let (endpoint, api_version) = match &self.options.source {
            ManagedIdentitySource::Imds { endpoint } => (endpoint, IMDS_API_VERSION),
            ManagedIdentitySource::AppService { endpoint, .. } => {
                (endpoint, APP_SERVICE_API_VERSION)
            }
        };
        let mut url = Url::parse(endpoint).map_err(|e| {
            CredentialError::unavailable(NAME, format!("invalid managed identity endpoint: {e}"))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("api-version", api_version)
                .append_pair("resource", resource);
            if let Some(client_id) = &self.options.client_id {
                query.append_pair("client_id", client_id);
            }
        }

        let mut request = Request::get(url);
        match &self.options.source {
            ManagedIdentitySource::Imds { .. } => {
                request.insert_header(
                    HeaderName::from_static("metadata"),
                    HeaderValue::from_static("true"),
                );
            }
            ManagedIdentitySource::AppService { header, .. } => {
                let mut value = HeaderValue::from_str(header.expose_secret()).map_err(|_| {
                    CredentialError::unavailable(NAME, "IDENTITY_HEADER is not a valid header value")
                })?;
                value.set_sensitive(true);
                request.insert_header(HeaderName::from_static("x-identity-header"), value);
            }
        }
        Ok(request)
    }
}

async fn probe(endpoint: &Url, timeout: Duration) -> bool {
    let Some(host) = endpoint.host_str() else {
        return false;
    };
    let port = endpoint.port_or_known_default().unwrap_or(80);
    tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host, port)))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &str {
        NAME
    }

    fn availability(&self) -> Availability {
        if cfg!(target_family = "wasm") {
            Availability::Unsupported("managed identity endpoints are not reachable from this target".into())
        } else {
            Availability::Available
        }
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        ensure_supported(self)?;
        let resource = scopes_to_resource(NAME, &options.scopes)?;
        let mut request = self.build_request(&resource)?;

        if let ManagedIdentitySource::Imds { .. } = &self.options.source {
            self.ensure_reachable(request.url()).await?;
        }

        debug!(source = self.options.source.kind(), resource = %resource, "requesting managed identity token");
        let response = self
            .options
            .credential
            .pipeline
            .send(ctx, &mut request)
            .await
            .map_err(|e| CredentialError::from_pipeline(NAME, e))?;

        // Only a 401 is a real rejection; IMDS answers 400 when no identity
        // is assigned to the host.
        match parse_token_response(NAME, &response) {
            Err(CredentialError::Denied { message, .. }) if response.status().as_u16() != 401 => {
                Err(CredentialError::unavailable(NAME, message))
            }
            other => other,
        }
    }
}
