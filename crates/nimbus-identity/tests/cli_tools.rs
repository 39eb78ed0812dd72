//! Developer-tool credentials driven by fake executables.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nimbus_core::{
    CancellationToken, Context, CredentialError, ExposeSecret, TokenCredential, TokenRequestOptions,
};
use nimbus_identity::{
    AzureCliCredential, AzureCliOptions, AzurePowerShellCredential, AzurePowerShellOptions,
};

fn fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn cli(program: PathBuf, tenant: Option<&str>) -> AzureCliCredential {
    AzureCliCredential::new(AzureCliOptions {
        tenant_id: tenant.map(String::from),
        program: program.to_string_lossy().into_owned(),
        timeout: Duration::from_secs(5),
    })
}

fn scopes() -> TokenRequestOptions {
    TokenRequestOptions::new(["https://vault.azure.net/.default"])
}

#[tokio::test]
async fn test_cli_token_and_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args");
    let az = fake_tool(
        dir.path(),
        "az",
        &format!(
            r#"echo "$@" > {}
echo '{{"accessToken":"cli-token","expiresOn":"2030-01-01 00:00:00.000000","expires_on":1900000000,"tenant":"contoso","tokenType":"Bearer"}}'"#,
            args_file.display()
        ),
    );

    let token = cli(az, Some("contoso"))
        .get_token(&Context::new(), &scopes())
        .await
        .unwrap();

    assert_eq!(token.token.expose_secret(), "cli-token");
    assert_eq!(token.expires_on.timestamp(), 1_900_000_000);
    let args = std::fs::read_to_string(args_file).unwrap();
    assert_eq!(
        args.trim(),
        "account get-access-token --output json --resource https://vault.azure.net --tenant contoso"
    );
}

#[tokio::test]
async fn test_cli_not_logged_in_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let az = fake_tool(
        dir.path(),
        "az",
        "echo \"ERROR: Please run 'az login' to setup account.\" >&2; exit 1",
    );

    let err = cli(az, None)
        .get_token(&Context::new(), &scopes())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unavailable");
    assert!(err.to_string().contains("az login"));
}

#[tokio::test]
async fn test_cli_missing_executable_is_unavailable() {
    let err = cli(PathBuf::from("/nonexistent/bin/az"), None)
        .get_token(&Context::new(), &scopes())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "unavailable");
}

#[tokio::test]
async fn test_cli_rejects_tenant_with_shell_characters() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let az = fake_tool(dir.path(), "az", &format!("touch {}", marker.display()));

    let err = cli(az, None)
        .get_token(&Context::new(), &scopes().with_tenant("contoso; rm -rf ~"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "unavailable");
    assert!(!marker.exists(), "the tool must not run for an invalid tenant");
}

#[tokio::test]
async fn test_cli_rejects_scope_with_shell_metacharacters() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ran");
    let az = fake_tool(dir.path(), "az", &format!("touch {}", marker.display()));
    let credential = cli(az, None);

    for scope in ["https://x&calc/.default", "https://x|calc", "https://x\"calc"] {
        let err = credential
            .get_token(&Context::new(), &TokenRequestOptions::new([scope]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unavailable");
        assert!(err.to_string().contains("not allowed in a scope"), "{scope}: {err}");
    }
    assert!(!marker.exists(), "the tool must not run for an unsafe scope");
}

#[tokio::test]
async fn test_cli_cancellation_kills_the_wait() {
    let dir = tempfile::tempdir().unwrap();
    let az = fake_tool(dir.path(), "az", "sleep 30");
    let token = CancellationToken::new();
    let ctx = Context::new().with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = cli(az, None).get_token(&ctx, &scopes()).await.unwrap_err();
    canceller.await.unwrap();
    assert_eq!(err, CredentialError::Cancelled);
}

#[tokio::test]
async fn test_powershell_token() {
    let dir = tempfile::tempdir().unwrap();
    let pwsh = fake_tool(
        dir.path(),
        "pwsh",
        r#"echo '{"Token":"ps-token","ExpiresOn":1900000000}'"#,
    );

    let credential = AzurePowerShellCredential::new(AzurePowerShellOptions {
        tenant_id: None,
        program: pwsh.to_string_lossy().into_owned(),
        timeout: Duration::from_secs(5),
    });
    let token = credential.get_token(&Context::new(), &scopes()).await.unwrap();
    assert_eq!(token.token.expose_secret(), "ps-token");
}

#[tokio::test]
async fn test_powershell_without_module_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let pwsh = fake_tool(dir.path(), "pwsh", "echo NoAzAccountModule");

    let credential = AzurePowerShellCredential::new(AzurePowerShellOptions {
        tenant_id: None,
        program: pwsh.to_string_lossy().into_owned(),
        timeout: Duration::from_secs(5),
    });
    let err = credential.get_token(&Context::new(), &scopes()).await.unwrap_err();
    assert_eq!(err.kind(), "unavailable");
    assert!(err.to_string().contains("Az.Accounts"));
}
