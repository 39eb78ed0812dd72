//! Request/response tracing.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::Result;
use crate::http::{Request, Response, Url};
use crate::policy::{next_send, Policy};

/// Logs method, sanitized URL, status and latency of each call.
///
/// Query strings and header values are never logged; they may carry
/// signatures or tokens.
#[derive(Debug, Clone, Default)]
pub struct LoggingPolicy;

pub(crate) fn redact_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    let _ = clean.set_password(None);
    let _ = clean.set_username("");
    clean.to_string()
}

#[async_trait]
impl Policy for LoggingPolicy {
    fn name(&self) -> &str {
        "logging"
    }

    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: &[Arc<dyn Policy>],
    ) -> Result<Response> {
        let url = redact_url(request.url());
        let method = request.method().clone();
        debug!(method = %method, url = %url, "sending request");

        let started = Instant::now();
        let outcome = next_send(ctx, request, next).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(response) if response.status().is_success() => {
                info!(method = %method, url = %url, status = response.status().as_u16(), elapsed_ms, "request completed");
            }
            Ok(response) => {
                warn!(method = %method, url = %url, status = response.status().as_u16(), elapsed_ms, "request completed with error status");
            }
            Err(e) => {
                warn!(method = %method, url = %url, error = %e, elapsed_ms, "request failed");
            }
        }
        outcome
    }
}
