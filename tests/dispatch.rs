//! End-to-end dispatch tests against mock upstreams.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::request::Parts;
use identity_gateway::gateway::identity::{ClaimResolver, Claims, ResolveError};
use identity_gateway::gateway::{Gateway, ResponseAborted, ResponseHook};
use identity_gateway::observability::metrics::{LatencyRecorder, UpstreamLabels};
use identity_gateway::GatewayConfig;

mod common;

/// Resolver that always returns the same classification input.
struct FixedResolver(Result<Option<Claims>, ResolveError>);

#[async_trait]
impl ClaimResolver for FixedResolver {
    async fn resolve(&self, _parts: &Parts) -> Result<Option<Claims>, ResolveError> {
        self.0.clone()
    }
}

/// Recorder capturing observations for assertions.
#[derive(Default)]
struct CapturingRecorder(Mutex<Vec<UpstreamLabels>>);

impl CapturingRecorder {
    fn observations(&self) -> Vec<UpstreamLabels> {
        self.0.lock().unwrap().clone()
    }
}

impl LatencyRecorder for CapturingRecorder {
    fn record(&self, _elapsed: Duration, labels: UpstreamLabels) {
        self.0.lock().unwrap().push(labels);
    }
}

fn config_for(upstream: SocketAddr, allowlist: Vec<&str>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.url = format!("http://{}", upstream);
    config.auth.allowlist = allowlist.into_iter().map(String::from).collect();
    config
}

async fn serve(gateway: Gateway) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, gateway.into_router()).await.unwrap();
    });
    addr
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

#[tokio::test]
async fn authenticated_request_is_forwarded_with_identity_headers() {
    let backend = common::start_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    let gateway = Gateway::new(
        &config_for(backend, vec![]),
        Arc::new(FixedResolver(Ok(Some(Claims::new("a@b.com"))))),
    )
    .unwrap()
    .with_recorder(recorder.clone());
    let proxy = serve(gateway).await;

    let response = reqwest::get(format!("http://{}/app/page", proxy))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap().to_lowercase();
    assert!(
        body.contains("x-forwarded-user: a@b.com"),
        "identity header missing from forwarded request: {body}"
    );

    let observations = recorder.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].user, "a@b.com");
    assert_eq!(observations[0].path, "/app/page");
    assert_eq!(observations[0].method, "GET");
    assert_eq!(observations[0].upstream_host, format!("http://{}", backend));
    assert_eq!(observations[0].scheme, "http");
}

#[tokio::test]
async fn allowlisted_request_bypasses_without_identity_headers() {
    let backend = common::start_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    let gateway = Gateway::new(
        &config_for(backend, vec!["/public/"]),
        Arc::new(FixedResolver(Ok(None))),
    )
    .unwrap()
    .with_recorder(recorder.clone());
    let proxy = serve(gateway).await;

    let response = reqwest::get(format!("http://{}/public/asset", proxy))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap().to_lowercase();
    assert!(!body.contains("x-forwarded-user"));

    let observations = recorder.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].user, "");
}

#[tokio::test]
async fn self_signed_upstream_is_rejected_when_verification_is_on() {
    let backend = common::start_tls_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    let mut config = GatewayConfig::default();
    config.upstream.url = format!("https://{}", backend);
    let gateway = Gateway::new(
        &config,
        Arc::new(FixedResolver(Ok(Some(Claims::new("a@b.com"))))),
    )
    .unwrap()
    .with_recorder(recorder.clone());
    let proxy = serve(gateway).await;

    let response = reqwest::get(format!("http://{}/app/page", proxy))
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    // The client sees the generic error body, not transport detail.
    assert_eq!(response.text().await.unwrap(), "upstream request failed");

    let observations = recorder.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].scheme, "https");
}

#[tokio::test]
async fn self_signed_upstream_is_accepted_when_verification_is_off() {
    let backend = common::start_tls_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    let mut config = GatewayConfig::default();
    config.upstream.url = format!("https://{}", backend);
    config.upstream.skip_tls_verification = true;
    let gateway = Gateway::new(
        &config,
        Arc::new(FixedResolver(Ok(Some(Claims::new("a@b.com"))))),
    )
    .unwrap()
    .with_recorder(recorder.clone());
    let proxy = serve(gateway).await;

    let response = reqwest::get(format!("http://{}/app/page", proxy))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap().to_lowercase();
    assert!(
        body.contains("x-forwarded-user: a@b.com"),
        "identity header missing from forwarded request: {body}"
    );

    let observations = recorder.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].scheme, "https");
}

#[tokio::test]
async fn hop_by_hop_request_headers_are_not_forwarded() {
    let backend = common::start_echo_backend().await;

    let gateway = Gateway::new(
        &config_for(backend, vec![]),
        Arc::new(FixedResolver(Ok(Some(Claims::new("a@b.com"))))),
    )
    .unwrap();
    let proxy = serve(gateway).await;

    let response = no_redirect_client()
        .get(format!("http://{}/app/page", proxy))
        .header("te", "trailers")
        .header("proxy-authorization", "Basic Zm9vOmJhcg==")
        .header("x-end-to-end", "kept")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap().to_lowercase();
    assert!(body.contains("x-end-to-end: kept"));
    assert!(!body.contains("proxy-authorization"));
    assert!(!body.lines().any(|line| line.starts_with("te:")));
}

#[tokio::test]
async fn denied_request_redirects_to_start_without_forwarding() {
    let hits = Arc::new(AtomicU32::new(0));
    let backend = common::start_counting_backend(hits.clone()).await;
    let recorder = Arc::new(CapturingRecorder::default());

    let gateway = Gateway::new(
        &config_for(backend, vec!["/public/"]),
        Arc::new(FixedResolver(Err(ResolveError("token expired".into())))),
    )
    .unwrap()
    .with_recorder(recorder.clone());
    let proxy = serve(gateway).await;

    let response = no_redirect_client()
        .get(format!("http://{}/app/secret", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "/auth/start?rd=%2Fapp%2Fsecret"
    );
    assert_eq!(hits.load(Ordering::SeqCst), 0, "upstream must not be hit");
    assert!(recorder.observations().is_empty());
}

#[tokio::test]
async fn unresolved_request_forwards_without_identity_headers() {
    let backend = common::start_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    let gateway = Gateway::new(
        &config_for(backend, vec![]),
        Arc::new(FixedResolver(Ok(None))),
    )
    .unwrap()
    .with_recorder(recorder.clone());
    let proxy = serve(gateway).await;

    let response = reqwest::get(format!("http://{}/app/page", proxy))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap().to_lowercase();
    assert!(!body.contains("x-forwarded-user"));

    let observations = recorder.observations();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].user, "");
}

#[tokio::test]
async fn panic_during_forward_is_contained_and_unmetered() {
    let backend = common::start_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    // First forward panics in the response hook; later forwards succeed.
    let tripped = Arc::new(AtomicBool::new(false));
    let trip = tripped.clone();
    let hook: ResponseHook = Arc::new(move |response| {
        if !trip.swap(true, Ordering::SeqCst) {
            panic!("hook exploded");
        }
        response
    });

    let gateway = Gateway::new(
        &config_for(backend, vec![]),
        Arc::new(FixedResolver(Ok(Some(Claims::new("a@b.com"))))),
    )
    .unwrap()
    .with_recorder(recorder.clone())
    .with_response_hook(hook);
    let proxy = serve(gateway).await;

    let client = no_redirect_client();
    let first = client
        .get(format!("http://{}/app/page", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 502);

    // The server must keep serving after the recovered panic.
    let second = client
        .get(format!("http://{}/app/page", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200);

    let observations = recorder.observations();
    assert_eq!(observations.len(), 1, "panicked forward must not be metered");
}

#[tokio::test]
async fn abort_signal_ends_request_without_metric() {
    let backend = common::start_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    let hook: ResponseHook = Arc::new(|_response| std::panic::panic_any(ResponseAborted));

    let gateway = Gateway::new(
        &config_for(backend, vec![]),
        Arc::new(FixedResolver(Ok(Some(Claims::new("a@b.com"))))),
    )
    .unwrap()
    .with_recorder(recorder.clone())
    .with_response_hook(hook);
    let proxy = serve(gateway).await;

    let client = no_redirect_client();
    let response = client
        .get(format!("http://{}/app/page", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert!(recorder.observations().is_empty());

    // The serving process is unaffected.
    let again = client
        .get(format!("http://{}/app/page", proxy))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 502);
}

#[tokio::test]
async fn concurrent_requests_are_isolated() {
    let backend = common::start_echo_backend().await;
    let recorder = Arc::new(CapturingRecorder::default());

    let gateway = Gateway::new(
        &config_for(backend, vec![]),
        Arc::new(FixedResolver(Ok(Some(Claims::new("a@b.com"))))),
    )
    .unwrap()
    .with_recorder(recorder.clone());
    let proxy = serve(gateway).await;

    let client = no_redirect_client();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .get(format!("http://{}/app/{}", proxy, i))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), 200);
    }
    assert_eq!(recorder.observations().len(), 8);
}
