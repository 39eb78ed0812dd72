//! Ordered policy chain terminating in a transport.
//!
//! Linearization is fixed:
//!
//! ```text
//! per-call policies (registration order)
//!   -> retry
//!     -> per-retry policies (registration order)
//!       -> sign (bearer auth)
//!         -> transport
//! ```
//!
//! Everything after the retry anchor re-runs on every attempt, so signing
//! and per-retry headers are recomputed for each resend.

use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::policies::{RetryOptions, RetryPolicy};
use crate::policy::{next_send, Policy, Position};
use crate::transport::{ReqwestTransport, Transport, TransportPolicy};

/// Shared, immutable request pipeline. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Send a request through every policy and the transport.
    pub async fn send(&self, ctx: &Context, request: &mut Request) -> Result<Response> {
        ctx.check()?;
        let ctx = ctx.for_call();
        debug!(
            method = %request.method(),
            path = request.url().path(),
            "pipeline send"
        );
        next_send(&ctx, request, &self.policies).await
    }

    /// Names of the linearized chain, transport last.
    pub fn policy_names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }
}

/// Builder for [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    per_call: Vec<Arc<dyn Policy>>,
    per_retry: Vec<Arc<dyn Policy>>,
    retry: Option<Arc<dyn Policy>>,
    sign: Option<Arc<dyn Policy>>,
    transport: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    /// Register a policy at the given position.
    pub fn policy(self, position: Position, policy: Arc<dyn Policy>) -> Self {
        match position {
            Position::PerCall => self.per_call(policy),
            Position::PerRetry => self.per_retry(policy),
        }
    }

    pub fn per_call(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_call.push(policy);
        self
    }

    pub fn per_retry(mut self, policy: Arc<dyn Policy>) -> Self {
        self.per_retry.push(policy);
        self
    }

    /// Install the retry anchor with the given options.
    pub fn retry(mut self, options: RetryOptions) -> Self {
        self.retry = Some(Arc::new(RetryPolicy::new(options)));
        self
    }

    /// Replace the retry anchor with a custom policy.
    pub fn retry_policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Install the sign anchor (innermost before the transport).
    pub fn sign(mut self, policy: Arc<dyn Policy>) -> Self {
        self.sign = Some(policy);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Drop every registered policy with this name; others keep their order.
    pub fn without_policy(mut self, name: &str) -> Self {
        self.per_call.retain(|p| p.name() != name);
        self.per_retry.retain(|p| p.name() != name);
        if self.retry.as_ref().is_some_and(|p| p.name() == name) {
            self.retry = None;
        }
        if self.sign.as_ref().is_some_and(|p| p.name() == name) {
            self.sign = None;
        }
        self
    }

    pub fn build(self) -> Pipeline {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::default()));

        let mut chain: Vec<Arc<dyn Policy>> = Vec::with_capacity(
            self.per_call.len() + self.per_retry.len() + 3,
        );
        chain.extend(self.per_call);
        chain.extend(self.retry);
        chain.extend(self.per_retry);
        chain.extend(self.sign);
        chain.push(Arc::new(TransportPolicy::new(transport)));

        Pipeline {
            policies: chain.into(),
        }
    }
}
