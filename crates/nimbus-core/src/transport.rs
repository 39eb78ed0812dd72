//! Transport: performs the network I/O for one attempt.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result, TransportErrorKind};
use crate::http::{Body, Request, Response};
use crate::policy::Policy;

/// Pluggable network backend. Stateless per call.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(&self, ctx: &Context, request: &mut Request) -> Result<Response>;
}

/// Default transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Build a client with a per-attempt timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, ctx: &Context, request: &mut Request) -> Result<Response> {
        let head = request.head();
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());

        builder = match request.body() {
            Body::Empty => builder,
            Body::Bytes(bytes) => builder.body(bytes.clone()),
            Body::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream.take()?)),
        };

        // Dropping this future on cancellation aborts the connection.
        ctx.run(async move {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                Error::transport(
                    TransportErrorKind::Io,
                    format!("failed to read response body: {}", e.without_url()),
                )
            })?;
            debug!(status = status.as_u16(), bytes = body.len(), "transport response");
            Ok(Response::new(status, headers, body, head))
        })
        .await
    }
}

/// Terminal policy adapting a [`Transport`] into the chain.
#[derive(Debug, Clone)]
pub(crate) struct TransportPolicy {
    transport: Arc<dyn Transport>,
}

impl TransportPolicy {
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Policy for TransportPolicy {
    fn name(&self) -> &str {
        "transport"
    }

    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        _next: &[Arc<dyn Policy>],
    ) -> Result<Response> {
        ctx.check()?;
        self.transport.send(ctx, request).await
    }
}
