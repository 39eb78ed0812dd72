//! Service principal authentication with a client secret.

use async_trait::async_trait;
use nimbus_core::{
    AccessToken, Context, CredentialError, ExposeSecret, SecretString, TokenCredential,
    TokenRequestOptions,
};

use crate::oauth::{request_token, resolve_tenant, token_endpoint, validate_tenant_id};
use crate::options::CredentialOptions;

const NAME: &str = "ClientSecretCredential";

/// OAuth2 client-credentials grant against `{authority}/{tenant}/oauth2/v2.0/token`.
#[derive(Debug, Clone)]
pub struct ClientSecretCredential {
    tenant_id: String,
    client_id: String,
    client_secret: SecretString,
    options: CredentialOptions,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        options: CredentialOptions,
    ) -> Result<Self, CredentialError> {
        let tenant_id = tenant_id.into();
        validate_tenant_id(NAME, &tenant_id)?;
        Ok(Self {
            tenant_id,
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            options,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        let tenant = resolve_tenant(NAME, &self.tenant_id, options.tenant_id.as_deref())?;
        let url = token_endpoint(NAME, &self.options.authority_host, tenant)?;
        let scope = options.scopes.join(" ");

        request_token(
            ctx,
            &self.options.pipeline,
            NAME,
            url,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("scope", scope.as_str()),
            ],
        )
        .await
    }
}
