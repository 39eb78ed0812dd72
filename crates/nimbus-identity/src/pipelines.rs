//! Azure Pipelines service connections: the job's OIDC token is requested
//! from the pipeline and exchanged as a client assertion.

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::http::header::{HeaderValue, AUTHORIZATION};
use nimbus_core::{
    AccessToken, Context, CredentialError, ExposeSecret, Pipeline, Request, SecretString,
    TokenCredential, TokenRequestOptions, Url,
};
use serde::Deserialize;
use tracing::debug;

use crate::client_assertion::{ClientAssertionCredential, ClientAssertionSource};
use crate::options::CredentialOptions;

const NAME: &str = "AzurePipelinesCredential";
const OIDC_API_VERSION: &str = "7.1";

/// Inputs of a pipelines service connection.
///
/// `oidc_request_uri` defaults to `SYSTEM_OIDCREQUESTURI`; the system access
/// token is usually mapped from `$(System.AccessToken)` by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct AzurePipelinesOptions {
    pub tenant_id: String,
    pub client_id: String,
    pub service_connection_id: String,
    pub system_access_token: Option<SecretString>,
    pub oidc_request_uri: Option<String>,
    pub credential: CredentialOptions,
}

#[derive(Debug, Clone)]
pub struct AzurePipelinesCredential {
    inner: Result<ClientAssertionCredential, CredentialError>,
}

#[derive(Debug)]
struct OidcSource {
    request_url: Url,
    system_access_token: SecretString,
    pipeline: Pipeline,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OidcTokenResponse {
    oidc_token: Option<String>,
}

#[async_trait]
impl ClientAssertionSource for OidcSource {
    async fn assertion(&self, ctx: &Context) -> Result<SecretString, CredentialError> {
        let mut bearer = HeaderValue::from_str(&format!(
            "Bearer {}",
            self.system_access_token.expose_secret()
        ))
        .map_err(|_| CredentialError::unavailable(NAME, "system access token is not a valid header value"))?;
        bearer.set_sensitive(true);

        let mut request = Request::post(self.request_url.clone());
        request.insert_header(AUTHORIZATION, bearer);
        request.insert_header(
            nimbus_core::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        debug!("requesting OIDC token from the pipeline");
        let response = self
            .pipeline
            .send(ctx, &mut request)
            .await
            .map_err(|e| CredentialError::from_pipeline(NAME, e))?;

        let status = response.status().as_u16();
        match status {
            200 => {}
            401 | 403 => {
                return Err(CredentialError::denied(
                    NAME,
                    format!("OIDC token request rejected with HTTP {status}; check the service connection and the system access token"),
                ))
            }
            _ => {
                return Err(CredentialError::unavailable(
                    NAME,
                    format!("OIDC token request failed with HTTP {status}"),
                ))
            }
        }

        let body: OidcTokenResponse = response.json().map_err(|e| {
            CredentialError::unavailable(NAME, format!("malformed OIDC token response: {e}"))
        })?;
        body.oidc_token
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| CredentialError::unavailable(NAME, "OIDC token response has no oidcToken"))
    }
}

impl AzurePipelinesCredential {
    pub fn new(options: AzurePipelinesOptions) -> Self {
        Self {
            inner: Self::build(options),
        }
    }

    fn build(options: AzurePipelinesOptions) -> Result<ClientAssertionCredential, CredentialError> {
        let mut missing = Vec::new();
        if options.tenant_id.trim().is_empty() {
            missing.push("tenant_id");
        }
        if options.client_id.trim().is_empty() {
            missing.push("client_id");
        }
        if options.service_connection_id.trim().is_empty() {
            missing.push("service_connection_id");
        }
        if options.system_access_token.is_none() {
            missing.push("system_access_token");
        }
        let request_uri = options
            .oidc_request_uri
            .clone()
            .or_else(|| std::env::var("SYSTEM_OIDCREQUESTURI").ok())
            .filter(|v| !v.trim().is_empty());
        if request_uri.is_none() {
            missing.push("SYSTEM_OIDCREQUESTURI");
        }
        if !missing.is_empty() {
            return Err(CredentialError::unavailable(
                NAME,
                format!("pipeline service connection not configured, missing {}", missing.join(", ")),
            ));
        }
        let (Some(request_uri), Some(system_access_token)) =
            (request_uri, options.system_access_token)
        else {
            return Err(CredentialError::unavailable(NAME, "pipeline service connection not configured"));
        };

        let mut request_url = Url::parse(&request_uri).map_err(|e| {
            CredentialError::unavailable(NAME, format!("invalid SYSTEM_OIDCREQUESTURI: {e}"))
        })?;
        request_url
            .query_pairs_mut()
            .append_pair("api-version", OIDC_API_VERSION)
            .append_pair("serviceConnectionId", &options.service_connection_id);

        let source = OidcSource {
            request_url,
            system_access_token,
            pipeline: options.credential.pipeline.clone(),
        };
        ClientAssertionCredential::named(
            NAME,
            options.tenant_id,
            options.client_id,
            Arc::new(source),
            options.credential,
        )
    }
}

#[async_trait]
impl TokenCredential for AzurePipelinesCredential {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        match &self.inner {
            Ok(credential) => credential.get_token(ctx, options).await,
            Err(e) => Err(e.clone()),
        }
    }
}
