//! Tokens from an Azure PowerShell session (`Connect-AzAccount`).

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

const NAME: &str = "AzurePowerShellCredential";
const NO_MODULE_MARKER: &str = "NoAzAccountModule";

#[derive(Debug, Clone)]
pub struct AzurePowerShellOptions {
    pub tenant_id: Option<String>,
    /// `pwsh` by default; `powershell` for Windows PowerShell 5.1.
    pub program: String,
    pub timeout: Duration,
}

impl Default for AzurePowerShellOptions {
    fn default() -> Self {
        Self {
            tenant_id: None,
            program: "pwsh".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AzurePowerShellCredential {
    options: AzurePowerShellOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PowerShellToken {
    token: String,
    expires_on: serde_json::Value,
}

impl AzurePowerShellCredential {
    pub fn new(options: AzurePowerShellOptions) -> Self {
        Self { options }
    }
}

/// The resource is interpolated into a single-quoted PowerShell string.
fn script(resource: &str, tenant: Option<&str>) -> String {
    let tenant_param = tenant
        .map(|t| format!("$params['TenantId'] = '{t}'\n"))
        .unwrap_or_default();
    format!(
        r#"$ErrorActionPreference = 'Stop'
if (-not (Get-Module -ListAvailable -Name Az.Accounts)) {{
    Write-Output '{NO_MODULE_MARKER}'
    exit
}}
Import-Module Az.Accounts -ErrorAction Stop
$params = @{{ ResourceUrl = '{resource}' }}
{tenant_param}$token = Get-AzAccessToken @params
$value = $token.Token
if ($value -is [System.Security.SecureString]) {{
    $value = ConvertFrom-SecureString -SecureString $value -AsPlainText
}}
[PSCustomObject]@{{ Token = $value; ExpiresOn = $token.ExpiresOn.ToUnixTimeSeconds() }} | ConvertTo-Json -Compress
"#
    )
}

fn parse_output(stdout: &str) -> Result<AccessToken, CredentialError> {
    if stdout.contains(NO_MODULE_MARKER) {
        return Err(CredentialError::unavailable(
            NAME,
            "Az.Accounts module is not installed; run 'Install-Module Az.Accounts'",
        ));
    }
    let parsed: PowerShellToken = serde_json::from_str(stdout.trim()).map_err(|e| {
        CredentialError::unavailable(NAME, format!("unexpected Azure PowerShell output: {e}"))
    })?;
    let expires_on = match &parsed.expires_on {
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
        serde_json::Value::String(s) => parse_tool_expiry(s),
        _ => None,
    }
    .ok_or_else(|| CredentialError::unavailable(NAME, "Azure PowerShell output has no expiry"))?;
    Ok(AccessToken::new(parsed.token, expires_on))
}

fn classify_failure(stderr: &str) -> CredentialError {
    if stderr.contains("Connect-AzAccount") {
        CredentialError::unavailable(NAME, "Azure PowerShell is not signed in; run 'Connect-AzAccount'")
    } else {
        let first = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("no output");
        CredentialError::unavailable(NAME, format!("Get-AzAccessToken failed: {}", first.trim()))
    }
}

#[async_trait]
impl TokenCredential for AzurePowerShellCredential {
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

        let args = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            script(&resource, tenant),
        ];

        debug!(resource = %resource, "requesting token from Azure PowerShell");
        let output = run_tool(ctx, &self.options.program, &args, self.options.timeout)
            .await
            .map_err(|e| e.into_credential_error(NAME))?;

        if !output.success {
            return Err(classify_failure(&output.stderr));
        }
        parse_output(&output.stdout)
    }
}
