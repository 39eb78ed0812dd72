use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

use crate::context::Context;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::policy::{next_send, Policy};

pub const CLIENT_REQUEST_ID: HeaderName = HeaderName::from_static("x-ms-client-request-id");

/// Per-retry policy stamping a fresh request id on every attempt.
///
/// An id already present when the call starts belongs to the caller and is
/// sent unchanged on every attempt.
#[derive(Debug, Clone, Default)]
pub struct ClientRequestIdPolicy;

#[async_trait]
impl Policy for ClientRequestIdPolicy {
    fn name(&self) -> &str {
        "client-request-id"
    }

    async fn send(
        &self,
        ctx: &Context,
        request: &mut Request,
        next: &[Arc<dyn Policy>],
    ) -> Result<Response> {
        let caller_owned =
            ctx.caller_request_id(|| request.headers().contains_key(&CLIENT_REQUEST_ID));
        if !caller_owned {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request.insert_header(CLIENT_REQUEST_ID, value);
            }
        }
        next_send(ctx, request, next).await
    }
}
