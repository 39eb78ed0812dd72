//! Scripted transport and credential doubles shared by integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use nimbus_core::http::header::{HeaderMap, HeaderName, HeaderValue};
use nimbus_core::{
    AccessToken, Body, Context, CredentialError, Error, Request, Response, StatusCode,
    TokenCredential, TokenRequestOptions, Transport,
};

/// One canned transport outcome.
#[derive(Debug)]
pub enum Step {
    Status(u16, Vec<(&'static str, &'static str)>),
    Fail(Error),
}

/// Route `tracing` output through the test harness; `RUST_LOG` filters it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn status(code: u16) -> Step {
    Step::Status(code, Vec::new())
}

/// What the transport saw for one attempt.
#[derive(Debug, Clone)]
pub struct Seen {
    pub headers: HeaderMap,
    pub at: tokio::time::Instant,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }
}

/// Replays `steps` in order; 200 once they run out.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _ctx: &Context, request: &mut Request) -> nimbus_core::Result<Response> {
        if let Body::Stream(stream) = request.body() {
            stream.take()?;
        }
        self.seen.lock().unwrap().push(Seen {
            headers: request.headers().clone(),
            at: tokio::time::Instant::now(),
        });

        let next = self.steps.lock().unwrap().pop_front();
        let (code, headers) = match next {
            None => (200, Vec::new()),
            Some(Step::Status(code, headers)) => (code, headers),
            Some(Step::Fail(e)) => return Err(e),
        };

        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        Ok(Response::new(
            StatusCode::from_u16(code).unwrap(),
            map,
            Bytes::new(),
            request.head(),
        ))
    }
}

/// Issues `token-1`, `token-2`, ... and counts calls.
#[derive(Debug)]
pub struct CountingCredential {
    calls: AtomicUsize,
    lifetime: Duration,
    delay: Duration,
    failures: Mutex<VecDeque<CredentialError>>,
}

impl CountingCredential {
    pub fn new(lifetime: Duration) -> Arc<Self> {
        Self::with_delay(lifetime, Duration::ZERO)
    }

    pub fn with_delay(lifetime: Duration, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            lifetime,
            delay,
            failures: Mutex::new(VecDeque::new()),
        })
    }

    /// Queue an error for the next acquisition.
    pub fn fail_next(&self, error: CredentialError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenCredential for CountingCredential {
    fn name(&self) -> &str {
        "CountingCredential"
    }

    async fn get_token(
        &self,
        _ctx: &Context,
        _options: &TokenRequestOptions,
    ) -> Result<AccessToken, CredentialError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(AccessToken::expiring_in(format!("token-{n}"), self.lifetime))
    }
}

pub fn url() -> nimbus_core::Url {
    nimbus_core::Url::parse("https://svc.example.net/items/1?api-version=2024-01-01").unwrap()
}
