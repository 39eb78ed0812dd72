//! Token cache: single-flight acquisition, skew refresh and failure handling.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::CountingCredential;
use nimbus_core::{
    AccessToken, CancellationToken, Context, CredentialError, ExposeSecret, TokenCache,
    TokenCredential, TokenRequestOptions,
};

fn options() -> TokenRequestOptions {
    TokenRequestOptions::new(["https://vault.example.net/.default"])
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cold_callers_share_one_acquisition() {
    let credential =
        CountingCredential::with_delay(Duration::from_secs(3600), Duration::from_millis(50));
    let cache = TokenCache::new(credential.clone());
    let ctx = Context::new();
    let (opts_a, opts_b) = (options(), options());

    let (a, b) = tokio::join!(
        cache.get_token(&ctx, &opts_a),
        cache.get_token(&ctx, &opts_b)
    );

    assert_eq!(credential.calls(), 1);
    assert_eq!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn test_fresh_token_is_served_from_cache() {
    let credential = CountingCredential::new(Duration::from_secs(3600));
    let cache = TokenCache::new(credential.clone());

    let first = cache.get_token(&Context::new(), &options()).await.unwrap();
    let second = cache.get_token(&Context::new(), &options()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(credential.calls(), 1);
    assert_eq!(cache.cached(&options()), Some(first));
}

#[tokio::test]
async fn test_scope_order_shares_an_entry_and_tenant_does_not() {
    let credential = CountingCredential::new(Duration::from_secs(3600));
    let cache = TokenCache::new(credential.clone());

    let ab = TokenRequestOptions::new(["a", "b"]);
    let ba = TokenRequestOptions::new(["b", "a"]);
    let tenant = TokenRequestOptions::new(["a", "b"]).with_tenant("contoso");

    cache.get_token(&Context::new(), &ab).await.unwrap();
    cache.get_token(&Context::new(), &ba).await.unwrap();
    assert_eq!(credential.calls(), 1);

    cache.get_token(&Context::new(), &tenant).await.unwrap();
    assert_eq!(credential.calls(), 2);
}

#[tokio::test]
async fn test_token_inside_skew_window_is_refreshed() {
    // Every issued token lives 200s, inside the default 300s window.
    let credential = CountingCredential::new(Duration::from_secs(200));
    let cache = TokenCache::new(credential.clone());

    let first = cache.get_token(&Context::new(), &options()).await.unwrap();
    let second = cache.get_token(&Context::new(), &options()).await.unwrap();

    assert_eq!(credential.calls(), 2);
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_custom_skew() {
    let credential = CountingCredential::new(Duration::from_secs(200));
    let cache = TokenCache::with_skew(credential.clone(), Duration::from_secs(60));

    cache.get_token(&Context::new(), &options()).await.unwrap();
    cache.get_token(&Context::new(), &options()).await.unwrap();

    assert_eq!(credential.calls(), 1);
}

#[tokio::test]
async fn test_failure_is_not_replayed() {
    // Inside the skew window, so every lookup acquires.
    let credential = CountingCredential::new(Duration::from_secs(60));
    let cache = TokenCache::new(credential.clone());

    cache.get_token(&Context::new(), &options()).await.unwrap();
    credential.fail_next(CredentialError::unavailable("CountingCredential", "endpoint down"));

    let err = cache.get_token(&Context::new(), &options()).await.unwrap_err();
    assert!(matches!(err, CredentialError::Unavailable { .. }));
    assert_eq!(cache.cached(&options()), None);

    // The next lookup starts a new acquisition rather than replaying the failure.
    let token = cache.get_token(&Context::new(), &options()).await.unwrap();
    assert_eq!(token.token.expose_secret(), "token-3");
}

#[tokio::test]
async fn test_expired_token_from_credential_is_an_error() {
    let credential = CountingCredential::new(Duration::ZERO);
    let cache = TokenCache::new(credential.clone());

    let err = cache.get_token(&Context::new(), &options()).await.unwrap_err();
    assert_eq!(err.kind(), "unavailable");
    assert!(err.to_string().contains("expired token"));
    assert_eq!(cache.cached(&options()), None);

    // Nothing was stored, so the next lookup asks the credential again.
    assert!(cache.get_token(&Context::new(), &options()).await.is_err());
    assert_eq!(credential.calls(), 2);
}

/// Panics on its first acquisition, then behaves.
#[derive(Debug, Default)]
struct PanicsOnce {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenCredential for PanicsOnce {
    fn name(&self) -> &str {
        "PanicsOnce"
    }

    async fn get_token(
        &self,
        _ctx: &Context,
        _options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("credential blew up");
        }
        Ok(AccessToken::expiring_in("recovered", Duration::from_secs(3600)))
    }
}

#[tokio::test]
async fn test_panicking_credential_does_not_wedge_the_key() {
    let credential = Arc::new(PanicsOnce::default());
    let cache = TokenCache::new(credential.clone());

    let err = cache.get_token(&Context::new(), &options()).await.unwrap_err();
    assert_eq!(err.kind(), "unavailable");

    let token = cache.get_token(&Context::new(), &options()).await.unwrap();
    assert_eq!(token.token.expose_secret(), "recovered");
    assert_eq!(credential.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_does_not_abort_shared_acquisition() {
    let credential =
        CountingCredential::with_delay(Duration::from_secs(3600), Duration::from_millis(100));
    let cache = Arc::new(TokenCache::new(credential.clone()));

    let token = CancellationToken::new();
    let cancelled_ctx = Context::new().with_cancellation(token.clone());

    let impatient = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_token(&cancelled_ctx, &options()).await })
    };
    let patient = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_token(&Context::new(), &options()).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    assert!(matches!(
        impatient.await.unwrap(),
        Err(CredentialError::Cancelled)
    ));
    let token = patient.await.unwrap().unwrap();
    assert_eq!(token.token.expose_secret(), "token-1");
    assert_eq!(credential.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_the_wait() {
    let credential =
        CountingCredential::with_delay(Duration::from_secs(3600), Duration::from_secs(10));
    let cache = TokenCache::new(credential.clone());
    let ctx = Context::new().with_timeout(Duration::from_millis(50));

    let err = cache.get_token(&ctx, &options()).await.unwrap_err();
    assert_eq!(err, CredentialError::Cancelled);
}

#[tokio::test]
async fn test_invalidate_forces_reacquisition() {
    let credential = CountingCredential::new(Duration::from_secs(3600));
    let cache = TokenCache::new(credential.clone());

    let first = cache.get_token(&Context::new(), &options()).await.unwrap();
    cache.invalidate(&options());
    let second = cache.get_token(&Context::new(), &options()).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(credential.calls(), 2);
}

#[tokio::test]
async fn test_cache_is_itself_a_credential() {
    let credential = CountingCredential::new(Duration::from_secs(3600));
    let cache: Arc<dyn TokenCredential> = Arc::new(TokenCache::new(credential));
    assert_eq!(cache.name(), "CountingCredential");
    cache.get_token(&Context::new(), &options()).await.unwrap();
}
