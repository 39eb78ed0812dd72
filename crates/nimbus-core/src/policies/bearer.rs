//! Bearer token authentication (the sign anchor).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::context::Context;
use crate::credentials::{AccessToken, TokenCredential, TokenRequestOptions};
use crate::error::{Error, Result};
use crate::http::{Request, Response};
use crate::policy::{next_send, Policy};
use crate::token_cache::TokenCache;

/// Attaches `Authorization: Bearer <token>` from a cached credential.
///
/// On a 401 the rejected token is invalidated and the request is re-sent
/// with a fresh token, at most once per logical call; a second 401 is
/// returned as-is.
#[derive(Debug, Clone)]
pub struct BearerTokenPolicy {
    cache: Arc<TokenCache>,
    options: TokenRequestOptions,
}

impl BearerTokenPolicy {
    pub fn new(cache: Arc<TokenCache>, options: TokenRequestOptions) -> Self {
        Self { cache, options }
    }

    /// Wrap `credential` in a fresh cache.
    pub fn from_credential<I, S>(credential: Arc<dyn TokenCredential>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            Arc::new(TokenCache::new(credential)),
            TokenRequestOptions::new(scopes),
        )
    }

    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }

    async fn authorize(&self, ctx: &Context, request: &mut Request) -> Result<AccessToken> {
        let token = self.cache.get_token(ctx, &self.options).await?;
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.token.expose_secret()))
            .map_err(|_| Error::Policy {
                message: "access token contains characters not allowed in a header".to_string(),
            })?;
        value.set_sensitive(true);
        request.insert_header(AUTHORIZATION, value);
        Ok(token)
    }
}

#[async_trait]
impl Policy for BearerTokenPolicy {
    fn name(&self) -> &str {
        "bearer"
    }

    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: &[Arc<dyn Policy>],
    ) -> Result<Response> {
        let token = self.authorize(ctx, request).await?;
        let response = next_send(ctx, request, next).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if !request.body().is_replayable() {
            warn!("401 on a single-read body, cannot re-authenticate");
            return Ok(response);
        }

        if !ctx.claim_reauthentication() {
            debug!("401 after re-authentication, surfacing response");
            return Ok(response);
        }

        debug!(scopes = ?self.options.scopes, "401 received, refreshing token once");
        self.cache.invalidate_token(&self.options, &token);
        self.authorize(ctx, request).await?;
        next_send(ctx, request, next).await
    }
}
