//! Tokens from the signed-in Azure CLI session.

use std::time::Duration;

use async_trait::async_trait;
use nimbus_core::{
    ensure_supported, AccessToken, Availability, Context, CredentialError, TokenCredential,
    TokenRequestOptions,
};
use serde::Deserialize;
use tracing::debug;

use crate::oauth::{parse_tool_expiry, scopes_to_resource, validate_resource, validate_tenant_id};
use crate::process::{process_support, run_tool};

const NAME: &str = "AzureCliCredential";

/// Default time allowed for `az account get-access-token`.
pub const DEFAULT_CLI_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AzureCliOptions {
    /// Tenant used when the request carries no tenant hint.
    pub tenant_id: Option<String>,
    /// Executable to run; `az` from `PATH` by default.
    pub program: String,
    pub timeout: Duration,
}

impl Default for AzureCliOptions {
    fn default() -> Self {
        Self {
            tenant_id: None,
            program: "az".to_string(),
            timeout: DEFAULT_CLI_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AzureCliCredential {
    options: AzureCliOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    /// Epoch seconds, emitted by CLI 2.54 and later.
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
}

impl AzureCliCredential {
    pub fn new(options: AzureCliOptions) -> Self {
        Self { options }
    }

    fn args(&self, resource: &str, tenant: Option<&str>) -> Vec<String> {
        let mut args: Vec<String> = ["account", "get-access-token", "--output", "json", "--resource"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(resource.to_string());
        if let Some(tenant) = tenant {
            args.push("--tenant".to_string());
            args.push(tenant.to_string());
        }
        args
    }
}

/// Classify a failed `az` run from its stderr.
fn classify_failure(stderr: &str) -> CredentialError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("az login") || lowered.contains("az account set") {
        CredentialError::unavailable(NAME, "Azure CLI is not signed in; run 'az login'")
    } else if lowered.contains("not recognized") || lowered.contains("command not found") {
        CredentialError::unavailable(NAME, "Azure CLI is not installed")
    } else {
        let first = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("no output");
        CredentialError::unavailable(NAME, format!("az account get-access-token failed: {}", first.trim()))
    }
}

fn parse_output(stdout: &str) -> Result<AccessToken, CredentialError> {
    let parsed: CliTokenResponse = serde_json::from_str(stdout).map_err(|e| {
        CredentialError::unavailable(NAME, format!("unexpected Azure CLI output: {e}"))
    })?;
    let expires_on = parsed
        .expires_on_epoch
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .or_else(|| parsed.expires_on.as_deref().and_then(parse_tool_expiry))
        .ok_or_else(|| CredentialError::unavailable(NAME, "Azure CLI output has no expiry"))?;
    Ok(AccessToken::new(parsed.access_token, expires_on))
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &str {
        NAME
    }

    fn availability(&self) -> Availability {
        match process_support() {
            Ok(()) => Availability::Available,
            Err(reason) => Availability::Unsupported(reason),
        }
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        ensure_supported(self)?;
        let resource = scopes_to_resource(NAME, &options.scopes)?;
        validate_resource(NAME, &resource)?;
        let tenant = options
            .tenant_id
            .as_deref()
            .or(self.options.tenant_id.as_deref());
        if let Some(tenant) = tenant {
            validate_tenant_id(NAME, tenant)?;
        }

        let mut args = self.args(&resource, tenant);
        let program = if cfg!(windows) {
            args.insert(0, self.options.program.clone());
            args.insert(0, "/C".to_string());
            "cmd"
        } else {
            self.options.program.as_str()
        };

        debug!(resource = %resource, "requesting token from Azure CLI");
        let output = run_tool(ctx, program, &args, self.options.timeout)
            .await
            .map_err(|e| e.into_credential_error(NAME))?;

        if !output.success {
            return Err(classify_failure(&output.stderr));
        }
        parse_output(&output.stdout)
    }
}
