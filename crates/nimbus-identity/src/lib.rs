//! Token credentials for `nimbus-core` pipelines.
//!
//! Every credential implements [`nimbus_core::TokenCredential`] and fails
//! with a typed [`nimbus_core::CredentialError`]:
//!
//! - `Unsupported`: the variant cannot work on this host at all
//! - `Unavailable`: its ambient inputs are missing or unreachable
//! - `Denied`: the identity provider rejected the request
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nimbus_core::{PipelineAuth, PipelineConfig};
//! use nimbus_identity::DefaultCredential;
//!
//! # fn example() -> nimbus_core::Result<()> {
//! let credential = Arc::new(DefaultCredential::new());
//! let pipeline = PipelineConfig::from_env().build_pipeline(
//!     None,
//!     Some(PipelineAuth::new(credential, ["https://vault.azure.net/.default"])),
//! )?;
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```
//!
//! # Ambient inputs
//!
//! | Credential | Reads |
//! |------------|-------|
//! | [`EnvironmentCredential`] | `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`, `AZURE_AUTHORITY_HOST` |
//! | [`WorkloadIdentityCredential`] | `AZURE_TENANT_ID`, `AZURE_CLIENT_ID`, `AZURE_FEDERATED_TOKEN_FILE` |
//! | [`ManagedIdentityCredential`] | `IDENTITY_ENDPOINT`, `IDENTITY_HEADER`, else IMDS |
//! | [`AzurePipelinesCredential`] | `SYSTEM_OIDCREQUESTURI` |
//! | [`AzureCliCredential`] | `az` on `PATH` |
//! | [`AzurePowerShellCredential`] | `pwsh` with `Az.Accounts` |

mod chained;
mod cli;
mod client_assertion;
mod client_secret;
mod default;
mod environment;
mod managed_identity;
mod oauth;
mod options;
mod pipelines;
mod powershell;
mod process;
mod workload_identity;

pub use chained::ChainedTokenCredential;
pub use cli::{AzureCliCredential, AzureCliOptions, DEFAULT_CLI_TIMEOUT};
pub use client_assertion::{ClientAssertionCredential, ClientAssertionSource};
pub use client_secret::ClientSecretCredential;
pub use default::{DefaultCredential, DefaultCredentialOptions};
pub use environment::EnvironmentCredential;
pub use managed_identity::{
    ManagedIdentityCredential, ManagedIdentityOptions, ManagedIdentitySource, IMDS_ENDPOINT,
    IMDS_PROBE_TIMEOUT,
};
pub use options::{CredentialOptions, DEFAULT_AUTHORITY_HOST};
pub use pipelines::{AzurePipelinesCredential, AzurePipelinesOptions};
pub use powershell::{AzurePowerShellCredential, AzurePowerShellOptions};
pub use workload_identity::{WorkloadIdentityCredential, WorkloadIdentityOptions};
