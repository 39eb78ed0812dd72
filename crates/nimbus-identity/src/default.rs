//! The default development-to-production credential chain.

use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::{
    AccessToken, Availability, Context, CredentialError, TokenCredential, TokenRequestOptions,
};
use tracing::debug;

use crate::chained::ChainedTokenCredential;
use crate::cli::{AzureCliCredential, AzureCliOptions};
use crate::environment::EnvironmentCredential;
use crate::managed_identity::{ManagedIdentityCredential, ManagedIdentityOptions};
use crate::options::CredentialOptions;
use crate::powershell::{AzurePowerShellCredential, AzurePowerShellOptions};
use crate::workload_identity::{WorkloadIdentityCredential, WorkloadIdentityOptions};

const NAME: &str = "DefaultCredential";

#[derive(Debug, Clone, Default)]
pub struct DefaultCredentialOptions {
    pub exclude_environment: bool,
    pub exclude_workload_identity: bool,
    pub exclude_managed_identity: bool,
    pub exclude_cli: bool,
    pub exclude_powershell: bool,
    /// User-assigned managed identity; defaults to `AZURE_CLIENT_ID`.
    pub managed_identity_client_id: Option<String>,
    /// Tenant passed to the developer tools.
    pub tenant_id: Option<String>,
    pub credential: CredentialOptions,
}

impl DefaultCredentialOptions {
    pub fn from_env() -> Self {
        Self {
            managed_identity_client_id: std::env::var("AZURE_CLIENT_ID")
                .ok()
                .filter(|v| !v.is_empty()),
            tenant_id: std::env::var("AZURE_TENANT_ID").ok().filter(|v| !v.is_empty()),
            credential: CredentialOptions::from_env(),
            ..Self::default()
        }
    }
}

/// Environment → WorkloadIdentity → ManagedIdentity → AzureCli → AzurePowerShell.
///
/// Excluded variants and variants unsupported on this host are left out of
/// the chain when it is composed.
#[derive(Debug)]
pub struct DefaultCredential {
    chain: ChainedTokenCredential,
}

impl DefaultCredential {
    pub fn new() -> Self {
        Self::with_options(DefaultCredentialOptions::from_env())
    }

    pub fn with_options(options: DefaultCredentialOptions) -> Self {
        let mut candidates: Vec<Arc<dyn TokenCredential>> = Vec::new();

        if !options.exclude_environment {
            candidates.push(Arc::new(EnvironmentCredential::with_options(
                options.credential.clone(),
            )));
        }
        if !options.exclude_workload_identity {
            let mut wi = WorkloadIdentityOptions::from_env();
            wi.credential = options.credential.clone();
            candidates.push(Arc::new(WorkloadIdentityCredential::with_options(wi)));
        }
        if !options.exclude_managed_identity {
            let mi = ManagedIdentityOptions {
                client_id: options.managed_identity_client_id.clone(),
                credential: options.credential.clone(),
                ..ManagedIdentityOptions::default()
            };
            candidates.push(Arc::new(ManagedIdentityCredential::new(mi)));
        }
        if !options.exclude_cli {
            candidates.push(Arc::new(AzureCliCredential::new(AzureCliOptions {
                tenant_id: options.tenant_id.clone(),
                ..AzureCliOptions::default()
            })));
        }
        if !options.exclude_powershell {
            candidates.push(Arc::new(AzurePowerShellCredential::new(
                AzurePowerShellOptions {
                    tenant_id: options.tenant_id.clone(),
                    ..AzurePowerShellOptions::default()
                },
            )));
        }

        Self::compose(candidates)
    }

    /// Build from explicit sources, dropping any unsupported on this host.
    pub fn compose(candidates: Vec<Arc<dyn TokenCredential>>) -> Self {
        let sources: Vec<Arc<dyn TokenCredential>> = candidates
            .into_iter()
            .filter(|c| match c.availability() {
                Availability::Available => true,
                Availability::Unsupported(reason) => {
                    debug!(credential = c.name(), reason = %reason, "excluding unsupported credential");
                    false
                }
            })
            .collect();
        Self {
            chain: ChainedTokenCredential::named(NAME, sources),
        }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.chain.source_names()
    }
}

impl Default for DefaultCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for DefaultCredential {
    fn name(&self) -> &str {
        NAME
    }

    fn availability(&self) -> Availability {
        self.chain.availability()
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        self.chain.get_token(ctx, options).await
    }
}
