//! Ordered fallback over several credentials.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use nimbus_core::{
    AccessToken, Availability, Context, CredentialError, CredentialFailure, TokenCredential,
    TokenRequestOptions,
};
use tracing::{debug, info};

const NO_SUCCESS: usize = usize::MAX;

/// Tries each source in order and returns the first token.
///
/// Sources that report themselves unsupported on this host are recorded and
/// skipped without being called. Cancellation stops the chain at once. When
/// every source fails the error lists each failure in configured order.
///
/// With `remember_success` (the default) the source that last succeeded is
/// tried first; the rest follow in configured order if it fails.
#[derive(Debug)]
pub struct ChainedTokenCredential {
    name: String,
    sources: Vec<Arc<dyn TokenCredential>>,
    remember_success: bool,
    last_success: AtomicUsize,
}

impl ChainedTokenCredential {
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self::named("ChainedTokenCredential", sources)
    }

    pub(crate) fn named(name: &str, sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            name: name.to_string(),
            sources,
            remember_success: true,
            last_success: AtomicUsize::new(NO_SUCCESS),
        }
    }

    pub fn with_remember_success(mut self, remember: bool) -> Self {
        self.remember_success = remember;
        self
    }

    /// Names of the constituents in configured order.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    fn attempt_order(&self) -> Vec<usize> {
        let preferred = self.last_success.load(Ordering::Acquire);
        let mut order = Vec::with_capacity(self.sources.len());
        if self.remember_success && preferred < self.sources.len() {
            order.push(preferred);
        }
        let rest: Vec<usize> = (0..self.sources.len())
            .filter(|&i| !order.contains(&i))
            .collect();
        order.extend(rest);
        order
    }
}

#[async_trait]
impl TokenCredential for ChainedTokenCredential {
    fn name(&self) -> &str {
        &self.name
    }

    fn availability(&self) -> Availability {
        if self
            .sources
            .iter()
            .any(|s| s.availability() == Availability::Available)
        {
            Availability::Available
        } else {
            Availability::Unsupported("no credential in the chain is supported on this host".into())
        }
    }

    async fn get_token(
        &self,
        ctx: &Context,
        options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        if self.sources.is_empty() {
            return Err(CredentialError::unavailable(&self.name, "the chain has no credentials"));
        }

        let mut failures: Vec<(usize, CredentialFailure)> = Vec::new();

        for index in self.attempt_order() {
            if ctx.is_cancelled() {
                return Err(CredentialError::Cancelled);
            }
            let source = &self.sources[index];

            if let Availability::Unsupported(reason) = source.availability() {
                debug!(chain = %self.name, credential = source.name(), "skipping unsupported credential");
                failures.push((
                    index,
                    CredentialFailure {
                        credential: source.name().to_string(),
                        error: CredentialError::unsupported(source.name(), reason),
                    },
                ));
                continue;
            }

            match source.get_token(ctx, options).await {
                Ok(token) => {
                    info!(chain = %self.name, credential = source.name(), "authenticated");
                    if self.remember_success {
                        self.last_success.store(index, Ordering::Release);
                    }
                    return Ok(token);
                }
                Err(CredentialError::Cancelled) => return Err(CredentialError::Cancelled),
                Err(error) => {
                    debug!(
                        chain = %self.name,
                        credential = source.name(),
                        kind = error.kind(),
                        error = %error,
                        "credential failed, trying next"
                    );
                    failures.push((
                        index,
                        CredentialFailure {
                            credential: source.name().to_string(),
                            error,
                        },
                    ));
                }
            }
        }

        failures.sort_by_key(|(index, _)| *index);
        Err(CredentialError::Aggregate(
            failures.into_iter().map(|(_, failure)| failure).collect(),
        ))
    }
}
