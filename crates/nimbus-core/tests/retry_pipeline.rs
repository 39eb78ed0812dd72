//! Retry, deadline and cancellation behavior of the assembled pipeline.
//!
//! Runs on paused tokio time so backoff delays are observed exactly.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{status, ScriptedTransport, Step};
use nimbus_core::policies::CLIENT_REQUEST_ID;
use nimbus_core::{
    Body, CancellationToken, ClientRequestIdPolicy, Context, Error, Pipeline, Request,
    RetryOptions, TransportErrorKind, UserAgentPolicy,
};
use tokio::time::Instant;

fn pipeline(transport: Arc<ScriptedTransport>, options: RetryOptions) -> Pipeline {
    Pipeline::builder()
        .retry(options)
        .per_retry(Arc::new(ClientRequestIdPolicy))
        .transport(transport)
        .build()
}

fn fast_retries(max_attempts: u32) -> RetryOptions {
    RetryOptions::default()
        .with_max_attempts(max_attempts)
        .with_base_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(10))
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_last_response() {
    let transport = ScriptedTransport::new(vec![status(503), status(503), status(503)]);
    let pipeline = pipeline(transport.clone(), fast_retries(3));

    let start = Instant::now();
    let response = pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .expect("last response is returned");

    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(transport.calls(), 3);
    // Two sleeps, each at most 100ms * 2^n.
    assert!(start.elapsed() <= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_transient_then_success() {
    let transport = ScriptedTransport::new(vec![
        status(500),
        Step::Fail(Error::transport(TransportErrorKind::Connect, "connection refused")),
        status(200),
    ]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    let response = pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_non_transient_status_is_not_retried() {
    let transport = ScriptedTransport::new(vec![status(404)]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    let response = pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(transport.calls(), 1);
    assert!(matches!(
        response.error_for_status().unwrap_err(),
        Error::HttpStatus { status: 404, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_is_not_retried() {
    let transport = ScriptedTransport::new(vec![Step::Fail(Error::InvalidResponse {
        message: "truncated".into(),
    })]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    let err = pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidResponse { .. }));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_seconds_replaces_backoff() {
    let transport = ScriptedTransport::new(vec![
        Step::Status(429, vec![("retry-after", "2")]),
        status(200),
    ]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    let response = pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let seen = transport.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].at - seen[0].at, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_ms_takes_precedence() {
    let transport = ScriptedTransport::new(vec![
        Step::Status(503, vec![("retry-after", "30"), ("retry-after-ms", "250")]),
        status(200),
    ]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap();

    let seen = transport.seen();
    assert_eq!(seen[1].at - seen[0].at, Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_bounded_by_max_delay() {
    let transport = ScriptedTransport::new(vec![
        Step::Status(503, vec![("retry-after", "86400")]),
        status(200),
    ]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    let response = pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let seen = transport.seen();
    assert_eq!(seen[1].at - seen[0].at, Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_beyond_deadline_surfaces_response() {
    let transport = ScriptedTransport::new(vec![Step::Status(503, vec![("retry-after", "5")])]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));
    let ctx = Context::new().with_timeout(Duration::from_secs(1));

    let start = Instant::now();
    let response = pipeline
        .send(&ctx, &mut Request::get(common::url()))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(transport.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_stops_retrying() {
    let transport = ScriptedTransport::new(vec![status(503), status(200)]);
    let pipeline = pipeline(
        transport.clone(),
        RetryOptions::default().with_base_delay(Duration::from_secs(10)),
    );
    let token = CancellationToken::new();
    let ctx = Context::new().with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    // Full jitter may pick a delay shorter than 100ms; the first response
    // then completes the call before the cancel lands.
    let outcome = pipeline.send(&ctx, &mut Request::get(common::url())).await;
    canceller.await.unwrap();

    match outcome {
        Err(Error::Cancelled) => assert_eq!(transport.calls(), 1),
        Ok(response) => {
            assert_eq!(response.status().as_u16(), 200);
            assert_eq!(transport.calls(), 2);
        }
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_send_never_reaches_transport() {
    let transport = ScriptedTransport::new(vec![]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));
    let token = CancellationToken::new();
    token.cancel();

    let err = pipeline
        .send(
            &Context::new().with_cancellation(token),
            &mut Request::get(common::url()),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_streamed_body_is_not_resent() {
    let transport = ScriptedTransport::new(vec![status(503), status(200)]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    let stream = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"chunk"))]);
    let mut request = Request::post(common::url()).with_body(Body::from_stream(Box::pin(stream)));

    let response = pipeline.send(&Context::new(), &mut request).await.unwrap();

    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_buffered_body_is_resent() {
    let transport = ScriptedTransport::new(vec![status(502), status(201)]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));
    let mut request = Request::post(common::url()).with_body("payload");

    let response = pipeline.send(&Context::new(), &mut request).await.unwrap();

    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_request_id_is_fresh_per_attempt() {
    let transport = ScriptedTransport::new(vec![status(503), status(503), status(200)]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));

    pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap();

    let ids: Vec<String> = transport
        .seen()
        .iter()
        .map(|s| s.header(CLIENT_REQUEST_ID.as_str()).expect("request id"))
        .collect();
    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert!(ids.iter().all(|id| uuid::Uuid::parse_str(id).is_ok()));
}

#[tokio::test(start_paused = true)]
async fn test_caller_request_id_is_kept() {
    let transport = ScriptedTransport::new(vec![status(503), status(200)]);
    let pipeline = pipeline(transport.clone(), fast_retries(4));
    let mut request = Request::get(common::url())
        .with_header("x-ms-client-request-id", "caller-chosen")
        .unwrap();

    pipeline.send(&Context::new(), &mut request).await.unwrap();

    for seen in transport.seen() {
        assert_eq!(seen.header("x-ms-client-request-id").as_deref(), Some("caller-chosen"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_user_agent_is_set_once_per_call() {
    let transport = ScriptedTransport::new(vec![status(500), status(200)]);
    let user_agent = UserAgentPolicy::builder("tables", "2.0.0")
        .prefix(Some("batch-job/3".into()))
        .build()
        .unwrap();
    let pipeline = Pipeline::builder()
        .per_call(Arc::new(user_agent))
        .retry(fast_retries(2))
        .transport(transport.clone())
        .build();

    pipeline
        .send(&Context::new(), &mut Request::get(common::url()))
        .await
        .unwrap();

    for seen in transport.seen() {
        assert_eq!(seen.header("user-agent").as_deref(), Some("batch-job/3 tables/2.0.0"));
    }
}
