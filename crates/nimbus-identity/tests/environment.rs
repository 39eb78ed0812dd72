//! Environment-driven credentials. Tests mutate process env, so they run serially.

use nimbus_core::{
    Context, ExposeSecret, Pipeline, RetryOptions, TokenCredential, TokenRequestOptions,
};
use nimbus_identity::{
    CredentialOptions, DefaultCredential, DefaultCredentialOptions, EnvironmentCredential,
};
use serial_test::serial;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VARS: [&str; 5] = [
    "AZURE_TENANT_ID",
    "AZURE_CLIENT_ID",
    "AZURE_CLIENT_SECRET",
    "AZURE_AUTHORITY_HOST",
    "AZURE_FEDERATED_TOKEN_FILE",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

fn scopes() -> TokenRequestOptions {
    TokenRequestOptions::new(["https://management.azure.com/.default"])
}

#[tokio::test]
#[serial]
async fn test_missing_variables_are_named() {
    clear_env();
    std::env::set_var("AZURE_TENANT_ID", "contoso");

    let credential = EnvironmentCredential::new();
    clear_env();

    assert!(!credential.is_configured());
    let err = credential.get_token(&Context::new(), &scopes()).await.unwrap_err();
    assert_eq!(err.kind(), "unavailable");
    let text = err.to_string();
    assert!(text.contains("AZURE_CLIENT_ID"));
    assert!(text.contains("AZURE_CLIENT_SECRET"));
    assert!(!text.contains("AZURE_TENANT_ID"));
}

#[tokio::test]
#[serial]
async fn test_environment_uses_authority_host() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/contoso/oauth2/v2.0/token"))
        .and(body_string_contains("client_id=env-app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "env-token",
            "expires_in": 3600,
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&server)
        .await;

    clear_env();
    std::env::set_var("AZURE_TENANT_ID", "contoso");
    std::env::set_var("AZURE_CLIENT_ID", "env-app");
    std::env::set_var("AZURE_CLIENT_SECRET", "env-secret");
    std::env::set_var("AZURE_AUTHORITY_HOST", server.uri());

    let credential = EnvironmentCredential::new();
    clear_env();

    assert!(credential.is_configured());
    let token = credential.get_token(&Context::new(), &scopes()).await.unwrap();
    assert_eq!(token.token.expose_secret(), "env-token");
}

#[tokio::test]
#[serial]
async fn test_environment_denial_is_reported_under_its_own_name() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "unauthorized_client",
            "error_description": "AADSTS700016: Application not found in the directory.",
        })))
        .mount(&server)
        .await;

    clear_env();
    std::env::set_var("AZURE_TENANT_ID", "contoso");
    std::env::set_var("AZURE_CLIENT_ID", "env-app");
    std::env::set_var("AZURE_CLIENT_SECRET", "env-secret");
    let options = CredentialOptions::default()
        .with_authority_host(server.uri())
        .with_pipeline(
            Pipeline::builder()
                .retry(RetryOptions::default().with_max_attempts(1))
                .build(),
        );
    let credential = EnvironmentCredential::with_options(options);
    clear_env();

    let err = credential.get_token(&Context::new(), &scopes()).await.unwrap_err();
    assert_eq!(err.kind(), "denied");
    assert!(err.to_string().starts_with("EnvironmentCredential"));
    assert!(!err.to_string().contains("env-secret"));
}

#[test]
#[serial]
fn test_default_credential_exclusions() {
    clear_env();
    let credential = DefaultCredential::with_options(DefaultCredentialOptions {
        exclude_managed_identity: true,
        exclude_powershell: true,
        ..DefaultCredentialOptions::from_env()
    });

    assert_eq!(
        credential.source_names(),
        vec![
            "EnvironmentCredential",
            "WorkloadIdentityCredential",
            "AzureCliCredential"
        ]
    );
}

#[test]
#[serial]
fn test_default_credential_full_order() {
    clear_env();
    let credential = DefaultCredential::new();
    assert_eq!(
        credential.source_names(),
        vec![
            "EnvironmentCredential",
            "WorkloadIdentityCredential",
            "ManagedIdentityCredential",
            "AzureCliCredential",
            "AzurePowerShellCredential"
        ]
    );
}

#[tokio::test]
#[serial]
async fn test_default_credential_aggregates_when_nothing_is_configured() {
    clear_env();
    let credential = DefaultCredential::with_options(DefaultCredentialOptions {
        exclude_managed_identity: true,
        exclude_cli: true,
        exclude_powershell: true,
        ..DefaultCredentialOptions::from_env()
    });

    let err = credential.get_token(&Context::new(), &scopes()).await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("1. EnvironmentCredential [unavailable]"));
    assert!(text.contains("2. WorkloadIdentityCredential [unavailable]"));
}
