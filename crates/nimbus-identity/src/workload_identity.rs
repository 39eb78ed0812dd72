//! Kubernetes workload identity: a projected service account token
//! exchanged as a client assertion.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::{
    AccessToken, Context, CredentialError, SecretString, TokenCredential, TokenRequestOptions,
};

use crate::client_assertion::{ClientAssertionCredential, ClientAssertionSource};
use crate::options::CredentialOptions;

const NAME: &str = "WorkloadIdentityCredential";

/// Reads `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_FEDERATED_TOKEN_FILE`.
///
/// The token file is rotated by the kubelet, so it is re-read on every
/// acquisition.
#[derive(Debug, Clone)]
pub struct WorkloadIdentityCredential {
    inner: Result<ClientAssertionCredential, CredentialError>,
}

/// Explicit inputs, mainly for tests.
#[derive(Debug, Clone, Default)]
pub struct WorkloadIdentityOptions {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub token_file: Option<PathBuf>,
    pub credential: CredentialOptions,
}

impl WorkloadIdentityOptions {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            tenant_id: var("AZURE_TENANT_ID"),
            client_id: var("AZURE_CLIENT_ID"),
            token_file: var("AZURE_FEDERATED_TOKEN_FILE").map(PathBuf::from),
            credential: CredentialOptions::from_env(),
        }
    }
}

#[derive(Debug)]
struct TokenFile(PathBuf);

#[async_trait]
impl ClientAssertionSource for TokenFile {
    async fn assertion(&self, _ctx: &Context) -> Result<SecretString, CredentialError> {
        let raw = tokio::fs::read_to_string(&self.0).await.map_err(|e| {
            CredentialError::unavailable(
                NAME,
                format!("failed to read federated token file {}: {e}", self.0.display()),
            )
        })?;
        let token = raw.trim();
        if token.is_empty() {
            return Err(CredentialError::unavailable(
                NAME,
                format!("federated token file {} is empty", self.0.display()),
            ));
        }
        Ok(SecretString::from(token))
    }
}

impl WorkloadIdentityCredential {
    pub fn new() -> Self {
        Self::with_options(WorkloadIdentityOptions::from_env())
    }

    pub fn with_options(options: WorkloadIdentityOptions) -> Self {
        let inner = match (options.tenant_id, options.client_id, options.token_file) {
            (Some(tenant), Some(client), Some(file)) => ClientAssertionCredential::named(
                NAME,
                tenant,
                client,
                Arc::new(TokenFile(file)),
                options.credential,
            ),
            (tenant, client, file) => {
                let missing: Vec<&str> = [
                    ("AZURE_TENANT_ID", tenant.is_none()),
                    ("AZURE_CLIENT_ID", client.is_none()),
                    ("AZURE_FEDERATED_TOKEN_FILE", file.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(CredentialError::unavailable(
                    NAME,
                    format!("workload identity not configured, missing {}", missing.join(", ")),
                ))
            }
        };
        Self { inner }
    }
}

impl Default for WorkloadIdentityCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for WorkloadIdentityCredential {
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
