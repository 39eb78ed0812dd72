//! Service principal from `AZURE_*` environment variables.

use async_trait::async_trait;
use nimbus_core::{AccessToken, Context, CredentialError, TokenCredential, TokenRequestOptions};
use tracing::debug;

use crate::client_secret::ClientSecretCredential;
use crate::options::CredentialOptions;

const NAME: &str = "EnvironmentCredential";

/// Reads
///
/// | Variable | Description |
/// |----------|-------------|
/// | `AZURE_TENANT_ID` | Tenant (GUID or domain) |
/// | `AZURE_CLIENT_ID` | Application (client) id |
/// | `AZURE_CLIENT_SECRET` | Client secret |
/// | `AZURE_AUTHORITY_HOST` | Optional authority override |
///
/// Variables are captured at construction. When any is missing every
/// acquisition fails with `Unavailable` naming the missing ones.
#[derive(Debug, Clone)]
pub struct EnvironmentCredential {
    inner: Result<ClientSecretCredential, CredentialError>,
}

impl EnvironmentCredential {
    pub fn new() -> Self {
        Self::with_options(CredentialOptions::from_env())
    }

    pub fn with_options(options: CredentialOptions) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let tenant = var("AZURE_TENANT_ID");
        let client = var("AZURE_CLIENT_ID");
        let secret = var("AZURE_CLIENT_SECRET");

        let inner = match (tenant, client, secret) {
            (Some(tenant), Some(client), Some(secret)) => {
                ClientSecretCredential::new(tenant, client, secret, options).map_err(|e| match e {
                    CredentialError::Unavailable { message, .. } => {
                        CredentialError::unavailable(NAME, message)
                    }
                    other => other,
                })
            }
            (tenant, client, secret) => {
                let missing: Vec<&str> = [
                    ("AZURE_TENANT_ID", tenant.is_none()),
                    ("AZURE_CLIENT_ID", client.is_none()),
                    ("AZURE_CLIENT_SECRET", secret.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                debug!(missing = ?missing, "environment credential not configured");
                Err(CredentialError::unavailable(
                    NAME,
                    format!("environment variables not set: {}", missing.join(", ")),
                ))
            }
        };
        Self { inner }
    }

    /// Whether all required variables were present.
    pub fn is_configured(&self) -> bool {
        self.inner.is_ok()
    }
}

impl Default for EnvironmentCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &str {
        NAME
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        match &self.inner {
            Ok(credential) => credential.get_token(ctx, options).await.map_err(rename),
            Err(e) => Err(e.clone()),
        }
    }
}

/// Report failures under this credential's name.
fn rename(err: CredentialError) -> CredentialError {
    match err {
        CredentialError::Denied { message, .. } => CredentialError::denied(NAME, message),
        CredentialError::Unavailable { message, .. } => CredentialError::unavailable(NAME, message),
        other => other,
    }
}
