//! Integration tests for the asynchronous node-graph backend

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use charagen::backend::{ComfyBackend, GenerationBackend, HealthState};
use charagen::config::{ComfyUiConfig, SamplerConfig};
use charagen::request::{GenerationRequest, RenderSpec};
use charagen::resolver::JobHandle;
use charagen::retry::RetryPolicy;
use charagen::styles::StyleRegistry;
use charagen::Error;

fn test_config(base_url: &str) -> ComfyUiConfig {
    ComfyUiConfig {
        base_url: base_url.to_string(),
        poll_interval_secs: 0,
        max_polls: 5,
        ..ComfyUiConfig::default()
    }
}

fn test_backend(base_url: &str) -> ComfyBackend {
    let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4));
    ComfyBackend::new(&test_config(base_url), retry, Duration::from_secs(2)).unwrap()
}

fn test_spec() -> RenderSpec {
    let registry = StyleRegistry::default();
    let style = registry.get("semi_realistic").clone();
    let request = GenerationRequest::new(b"\x89PNG-source".to_vec(), "semi_realistic");
    RenderSpec::resolve(request, &style, &registry, &SamplerConfig::default())
}

fn completed_history(prompt_id: &str) -> serde_json::Value {
    json!({
        prompt_id: {
            "status": { "status_str": "success", "completed": true, "messages": [] },
            "outputs": {
                "8": {
                    "images": [
                        { "filename": "sd1.5_00001_.png", "subfolder": "", "type": "output" }
                    ]
                }
            }
        }
    })
}

#[tokio::test]
async fn test_generate_uploads_submits_polls_and_downloads() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "staged.png" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "job-42" })))
        .expect(1)
        .mount(&server)
        .await;

    // Two empty history responses before the job completes.
    Mock::given(method("GET"))
        .and(path("/history/job-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/history/job-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed_history("job-42")))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/view"))
        .and(query_param("filename", "sd1.5_00001_.png"))
        .and(query_param("type", "output"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"generated-image".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let backend = test_backend(&server.uri());
    let bytes = backend.generate(&test_spec()).await.unwrap();
    assert_eq!(bytes, b"generated-image");
}

#[tokio::test]
async fn test_upload_failure_aborts_before_submit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "never" })))
        .expect(0)
        .mount(&server)
        .await;

    let backend = test_backend(&server.uri());
    let result = backend.generate(&test_spec()).await;
    assert!(matches!(result, Err(Error::BackendContract(_))));
}

#[tokio::test]
async fn test_accepted_submit_without_job_id_is_contract_violation() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "staged.png" })))
        .mount(&server)
        .await;

    // Accepted, but the body carries no job identifier.
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = test_backend(&server.uri());
    let result = backend.generate(&test_spec()).await;
    match result {
        Err(Error::BackendContract(msg)) => assert!(msg.contains("prompt_id")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_poll_budget_exhaustion_times_out_without_download() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "staged.png" })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "job-7" })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/history/job-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(5)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/view"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let backend = test_backend(&server.uri());
    let result = backend.generate(&test_spec()).await;
    assert!(matches!(result, Err(Error::TimeoutExceeded(5))));
}

#[tokio::test]
async fn test_backend_reported_error_stops_polling() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "staged.png" })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "job-9" })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/history/job-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job-9": {
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", { "node_id": "12" }]]
                },
                "outputs": {}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = test_backend(&server.uri());
    let result = backend.generate(&test_spec()).await;
    assert!(matches!(result, Err(Error::UpstreamRejection(_))));
}

#[tokio::test]
async fn test_resolution_is_single_flight_per_handle() {
    let server = MockServer::start().await;

    // Keep the first resolution pending forever.
    Mock::given(method("GET"))
        .and(path("/history/job-busy"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!({}))
            .set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let config = ComfyUiConfig {
        base_url: server.uri(),
        poll_interval_secs: 0,
        max_polls: 1000,
        ..ComfyUiConfig::default()
    };
    let retry = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));
    let backend = Arc::new(ComfyBackend::new(&config, retry, Duration::from_secs(2)).unwrap());

    let first = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.resolve_job(&JobHandle("job-busy".into())).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = backend.resolve_job(&JobHandle("job-busy".into())).await;
    assert!(matches!(second, Err(Error::InvalidRequest(_))));

    first.abort();
}

#[tokio::test]
async fn test_abandoned_resolution_releases_handle() {
    let server = MockServer::start().await;

    // First phase: the job never completes, so the first resolution just
    // keeps polling until it is abandoned.
    Mock::given(method("GET"))
        .and(path("/history/job-x"))
        .respond_with(ResponseTemplate::new(200)
            .set_body_json(json!({}))
            .set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let config = ComfyUiConfig {
        base_url: server.uri(),
        poll_interval_secs: 0,
        max_polls: 1000,
        ..ComfyUiConfig::default()
    };
    let retry = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1));
    let backend = Arc::new(ComfyBackend::new(&config, retry, Duration::from_secs(2)).unwrap());

    let first = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.resolve_job(&JobHandle("job-x".into())).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    first.abort();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The slot is free again; a fresh resolution for the same handle runs
    // to completion.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/history/job-x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed_history("job-x")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/view"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"late-image".to_vec()))
        .mount(&server)
        .await;

    let bytes = backend.resolve_job(&JobHandle("job-x".into())).await.unwrap();
    assert_eq!(bytes, b"late-image");
}

#[tokio::test]
async fn test_health_probe_states() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "system": {} })))
        .mount(&server)
        .await;

    let backend = test_backend(&server.uri());
    let health = backend.check_health().await;
    assert_eq!(health.status, HealthState::Connected);
    assert_eq!(health.base_url, server.uri());

    // Unreachable server reports disconnected.
    let dead = test_backend("http://127.0.0.1:1");
    let health = dead.check_health().await;
    assert_eq!(health.status, HealthState::Disconnected);
    assert!(health.message.is_some());
}
