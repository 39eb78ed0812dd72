//! The policy capability: one interceptor in the chain.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::http::{Request, Response};

/// Where a caller-registered policy runs relative to the retry anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Once per logical operation, outside the retry loop.
    PerCall,
    /// Once per attempt, inside the retry loop and before signing.
    PerRetry,
}

/// A request/response interceptor.
///
/// `next` is the remainder of the chain; the last element is always the
/// transport adapter. Implementations forward with [`next_send`].
#[async_trait]
pub trait Policy: Send + Sync + Debug {
    /// Stable identifier used for removal and logging.
    fn name(&self) -> &str;

    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: &[Arc<dyn Policy>],
    ) -> Result<Response>;
}

/// Invoke the head of `next` with the rest of the chain.
pub async fn next_send(
    ctx: &Context,
    request: &mut Request,
    next: &[Arc<dyn Policy>],
) -> Result<Response> {
    match next.split_first() {
        Some((head, rest)) => head.send(ctx, request, rest).await,
        None => Err(Error::Policy {
            message: "policy chain ended without reaching a transport".to_string(),
        }),
    }
}
