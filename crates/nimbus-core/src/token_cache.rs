//! In-memory token cache with single-flight refresh.
//!
//! Entries are keyed by the normalized scope set plus tenant hint. A lookup
//! returns the cached token while its remaining lifetime exceeds the skew
//! window; otherwise exactly one acquisition runs per key and every
//! concurrent caller awaits that same acquisition.
//!
//! The acquisition runs on its own task. A caller that cancels stops
//! waiting but does not abort the acquisition other callers share.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::credentials::{AccessToken, Availability, CacheKey, TokenCredential, TokenRequestOptions};
use crate::error::CredentialError;

/// Default pre-expiry refresh window.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(300);

type SharedAcquisition = Shared<BoxFuture<'static, Result<AccessToken, CredentialError>>>;

#[derive(Default)]
struct Entry {
    token: Option<AccessToken>,
    in_flight: Option<SharedAcquisition>,
}

type Entries = Arc<Mutex<HashMap<CacheKey, Entry>>>;

/// Caching wrapper around a [`TokenCredential`].
pub struct TokenCache {
    credential: Arc<dyn TokenCredential>,
    skew: Duration,
    entries: Entries,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("credential", &self.credential.name())
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

impl TokenCache {
    pub fn new(credential: Arc<dyn TokenCredential>) -> Self {
        Self::with_skew(credential, DEFAULT_REFRESH_SKEW)
    }

    pub fn with_skew(credential: Arc<dyn TokenCredential>, skew: Duration) -> Self {
        Self {
            credential,
            skew,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// The cached token for `options` if it is outside the skew window.
    pub fn cached(&self, options: &TokenRequestOptions) -> Option<AccessToken> {
        let entries = self.lock().ok()?;
        entries
            .get(&options.cache_key())
            .and_then(|e| e.token.as_ref())
            .filter(|t| !t.needs_refresh(self.skew))
            .cloned()
    }

    /// Drop the cached token for `options` unconditionally.
    pub fn invalidate(&self, options: &TokenRequestOptions) {
        if let Ok(mut entries) = self.lock() {
            if let Some(entry) = entries.get_mut(&options.cache_key()) {
                entry.token = None;
            }
        }
    }

    /// Drop the cached token only if it is still `rejected`.
    ///
    /// A token another caller refreshed in the meantime stays in place.
    pub fn invalidate_token(&self, options: &TokenRequestOptions, rejected: &AccessToken) {
        if let Ok(mut entries) = self.lock() {
            if let Some(entry) = entries.get_mut(&options.cache_key()) {
                let same = entry.token.as_ref().is_some_and(|current| {
                    current.token.expose_secret() == rejected.token.expose_secret()
                });
                if same {
                    debug!(key = %options.cache_key(), "invalidating rejected token");
                    entry.token = None;
                }
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<CacheKey, Entry>>, CredentialError> {
        self.entries
            .lock()
            .map_err(|_| CredentialError::unavailable(self.credential.name(), "token cache lock poisoned"))
    }

    /// Return the cached token, or join/start the single acquisition for the key.
    pub async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        let key = options.cache_key();

        let acquisition = {
            let mut entries = self.lock()?;
            let entry = entries.entry(key.clone()).or_default();

            if let Some(token) = &entry.token {
                if !token.needs_refresh(self.skew) {
                    debug!(key = %key, "using cached token");
                    return Ok(token.clone());
                }
            }

            match &entry.in_flight {
                Some(shared) => {
                    debug!(key = %key, "joining in-flight token acquisition");
                    shared.clone()
                }
                None => {
                    let shared = self.start_acquisition(key.clone(), options.clone());
                    entry.in_flight = Some(shared.clone());
                    shared
                }
            }
        };

        ctx.run(async move { Ok(acquisition.await) })
            .await
            .map_err(|_| CredentialError::Cancelled)?
    }

    fn start_acquisition(&self, key: CacheKey, options: TokenRequestOptions) -> SharedAcquisition {
        let credential = Arc::clone(&self.credential);
        let name = credential.name().to_string();
        let slot = InFlight {
            entries: Arc::clone(&self.entries),
            key,
            settled: false,
        };

        debug!(key = %slot.key, credential = %name, "starting token acquisition");

        let task = tokio::spawn(async move {
            let result = credential
                .get_token(&Context::new(), &options)
                .await
                .and_then(|token| {
                    if token.is_expired() {
                        Err(CredentialError::unavailable(
                            credential.name(),
                            "credential returned an expired token",
                        ))
                    } else {
                        Ok(token)
                    }
                });
            slot.settle(credential.name(), &result);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(CredentialError::unavailable(
                    name,
                    format!("token acquisition task failed: {e}"),
                ))
            })
        }
        .boxed()
        .shared()
    }
}

/// Marks a key as having an acquisition in flight.
///
/// Dropping it unsettled (the credential panicked or the runtime shut down)
/// still clears the in-flight slot so the next caller starts afresh.
struct InFlight {
    entries: Entries,
    key: CacheKey,
    settled: bool,
}

impl InFlight {
    fn settle(mut self, credential: &str, result: &Result<AccessToken, CredentialError>) {
        self.settled = true;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = entries.get_mut(&self.key) else {
            return;
        };
        entry.in_flight = None;
        match result {
            Ok(token) => {
                info!(
                    key = %self.key,
                    credential = %credential,
                    expires_on = %token.expires_on,
                    "acquired access token"
                );
                entry.token = Some(token.clone());
            }
            Err(e) => {
                warn!(
                    key = %self.key,
                    credential = %credential,
                    error = %e,
                    "token acquisition failed"
                );
                if entry.token.as_ref().is_some_and(AccessToken::is_expired) {
                    entry.token = None;
                }
            }
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(key = %self.key, "token acquisition aborted");
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.in_flight = None;
        }
    }
}

#[async_trait]
impl TokenCredential for TokenCache {
    fn name(&self) -> &str {
        self.credential.name()
    }

    fn availability(&self) -> Availability {
        self.credential.availability()
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        TokenCache::get_token(self, ctx, options).await
    }
}
