//! Refinement orchestrator tests against a wiremock HTTP backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scribe_gateway::core::buffer::ParagraphEvent;
use scribe_gateway::core::refine::{RefineBackend, RefineOrchestrator};
use scribe_gateway::core::session::{ClientEvent, ConnectionId, SessionRegistry};

fn paragraph(session_id: &str, number: u64, text: &str) -> ParagraphEvent {
    ParagraphEvent {
        session_id: session_id.to_string(),
        paragraph_number: number,
        text: text.to_string(),
        completed_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

/// Registry with one session and one listening connection.
fn registry_with_session(session_id: &str) -> (Arc<SessionRegistry>, mpsc::Receiver<ClientEvent>) {
    let registry = Arc::new(SessionRegistry::new());
    let (tx, rx) = mpsc::channel(16);
    registry.join(session_id, ConnectionId::new_v4(), "alice", tx);
    (registry, rx)
}

fn http_orchestrator(
    mock_uri: &str,
    registry: Arc<SessionRegistry>,
    cooldown: Duration,
    retry_backoff: Duration,
) -> Arc<RefineOrchestrator> {
    Arc::new(RefineOrchestrator::new(
        Some(RefineBackend::Http {
            url: format!("{mock_uri}/refine"),
            auth_header: Some("Bearer test-token".to_string()),
            model: "test-model".to_string(),
        }),
        cooldown,
        retry_backoff,
        registry,
    ))
}

async fn expect_refined(rx: &mut mpsc::Receiver<ClientEvent>, timeout: Duration) -> (u64, String) {
    let event = tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("Timed out waiting for refined paragraph")
        .expect("Event channel closed");
    match event {
        ClientEvent::ParagraphRefined { data } => (data.paragraph_number, data.refined_text),
        other => panic!("Expected paragraph_refined, got {other:?}"),
    }
}

#[tokio::test]
async fn test_success_broadcasts_refined_paragraph() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refine"))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_string_contains("hello raw words"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "response": "hello refined words" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (registry, mut rx) = registry_with_session("s1");
    let orch = http_orchestrator(
        &server.uri(),
        registry,
        Duration::ZERO,
        Duration::from_secs(10),
    );

    orch.clone()
        .refine_and_broadcast(paragraph("s1", 1, "hello raw words"))
        .await;

    let (number, text) = expect_refined(&mut rx, Duration::from_secs(2)).await;
    assert_eq!(number, 1);
    assert_eq!(text, "hello refined words");
}

#[tokio::test]
async fn test_rate_limit_retries_after_hint_exactly_once() {
    let server = MockServer::start().await;

    // First attempt is rejected with a 1-second hint; the retry succeeds.
    Mock::given(method("POST"))
        .and(path("/refine"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/refine"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "response": "eventually refined" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (registry, mut rx) = registry_with_session("s1");
    let orch = http_orchestrator(
        &server.uri(),
        registry,
        Duration::ZERO,
        Duration::from_secs(30),
    );

    let started = Instant::now();
    orch.clone()
        .refine_and_broadcast(paragraph("s1", 1, "rate limited text"))
        .await;

    let (number, text) = expect_refined(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(number, 1);
    assert_eq!(text, "eventually refined");
    // The refined broadcast cannot appear before the hinted delay elapsed.
    assert!(started.elapsed() >= Duration::from_millis(900));

    // Exactly once: no duplicate refined broadcast follows.
    assert!(
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_cooldown_defers_second_paragraph_without_dropping_it() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refine"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "response": "refined" })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let (registry, mut rx) = registry_with_session("s1");
    let cooldown = Duration::from_millis(600);
    let orch = http_orchestrator(&server.uri(), registry, cooldown, Duration::from_secs(30));

    let started = Instant::now();
    orch.clone()
        .refine_and_broadcast(paragraph("s1", 1, "first"))
        .await;
    orch.clone()
        .refine_and_broadcast(paragraph("s1", 2, "second"))
        .await;

    let (first, _) = expect_refined(&mut rx, Duration::from_secs(2)).await;
    assert_eq!(first, 1);

    // The second call landed inside the cooldown window and was deferred,
    // not dropped.
    let (second, _) = expect_refined(&mut rx, Duration::from_secs(3)).await;
    assert_eq!(second, 2);
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test]
async fn test_permanent_failure_drops_refined_variant_silently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refine"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let (registry, mut rx) = registry_with_session("s1");
    let orch = http_orchestrator(
        &server.uri(),
        registry,
        Duration::ZERO,
        Duration::from_secs(30),
    );

    orch.clone()
        .refine_and_broadcast(paragraph("s1", 1, "doomed"))
        .await;

    // No refined broadcast and no retry.
    assert!(
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_refining_into_destroyed_session_is_a_noop() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refine"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "response": "refined" })),
        )
        .expect(0)
        .mount(&server)
        .await;

    let registry = Arc::new(SessionRegistry::new());
    let orch = http_orchestrator(
        &server.uri(),
        registry,
        Duration::ZERO,
        Duration::from_secs(30),
    );

    // Session was never created (or already destroyed): the call must
    // return quietly without touching the backend.
    orch.clone()
        .refine_and_broadcast(paragraph("ghost", 1, "text"))
        .await;
}

#[tokio::test]
async fn test_empty_backend_output_is_permanent_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refine"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": "  " })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (registry, mut rx) = registry_with_session("s1");
    let orch = http_orchestrator(
        &server.uri(),
        registry,
        Duration::ZERO,
        Duration::from_secs(30),
    );

    orch.clone()
        .refine_and_broadcast(paragraph("s1", 1, "text"))
        .await;

    assert!(
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .is_err()
    );
}
