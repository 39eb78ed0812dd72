//! Client-credentials grant authenticated by a federated assertion.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::{
    AccessToken, Context, CredentialError, ExposeSecret, SecretString, TokenCredential,
    TokenRequestOptions,
};

use crate::oauth::{request_token, resolve_tenant, token_endpoint, validate_tenant_id};
use crate::options::CredentialOptions;

const JWT_BEARER: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Produces the signed assertion presented to the token endpoint.
#[async_trait]
pub trait ClientAssertionSource: Send + Sync + Debug {
    async fn assertion(&self, ctx: &Context) -> Result<SecretString, CredentialError>;
}

/// Exchanges an assertion from `source` for an access token.
#[derive(Debug, Clone)]
pub struct ClientAssertionCredential {
    name: String,
    tenant_id: String,
    client_id: String,
    source: Arc<dyn ClientAssertionSource>,
    options: CredentialOptions,
}

impl ClientAssertionCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        source: Arc<dyn ClientAssertionSource>,
        options: CredentialOptions,
    ) -> Result<Self, CredentialError> {
        Self::named("ClientAssertionCredential", tenant_id, client_id, source, options)
    }

    /// Same grant, reported under the wrapping credential's name.
    pub(crate) fn named(
        name: &str,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        source: Arc<dyn ClientAssertionSource>,
        options: CredentialOptions,
    ) -> Result<Self, CredentialError> {
        let tenant_id = tenant_id.into();
        validate_tenant_id(name, &tenant_id)?;
        Ok(Self {
            name: name.to_string(),
            tenant_id,
            client_id: client_id.into(),
            source,
            options,
        })
    }
}

#[async_trait]
impl TokenCredential for ClientAssertionCredential {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        let tenant = resolve_tenant(&self.name, &self.tenant_id, options.tenant_id.as_deref())?;
        let url = token_endpoint(&self.name, &self.options.authority_host, tenant)?;
        let assertion = self.source.assertion(ctx).await?;
        let scope = options.scopes.join(" ");

        request_token(
            ctx,
            &self.options.pipeline,
            &self.name,
            url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_assertion_type", JWT_BEARER),
                ("client_assertion", assertion.expose_secret()),
                ("scope", scope.as_str()),
            ],
        )
        .await
    }
}
