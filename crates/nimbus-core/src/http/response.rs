//! Buffered response model.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

use super::request::RequestHead;
use crate::error::{Error, Result};

/// A complete response. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    request: RequestHead,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, request: RequestHead) -> Self {
        Self {
            status,
            headers,
            body,
            request,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The request that produced this response.
    pub fn request(&self) -> &RequestHead {
        &self.request
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::InvalidResponse {
            message: format!("failed to parse response body: {}", e),
        })
    }

    /// Map non-success statuses to errors.
    pub fn error_for_status(self) -> Result<Self> {
        match self.status.as_u16() {
            200..=299 | 304 => Ok(self),

            401 => Err(Error::Unauthorized {
                message: "invalid or expired token".to_string(),
            }),

            429 => Err(Error::RateLimited {
                retry_after: self
                    .header_str(reqwest::header::RETRY_AFTER.as_str())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs),
            }),

            status => {
                let body = self.text();
                let message = if body.is_empty() {
                    self.status.to_string()
                } else {
                    body.chars().take(200).collect()
                };
                Err(Error::HttpStatus { status, message })
            }
        }
    }
}
