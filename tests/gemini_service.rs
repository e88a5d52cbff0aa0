
use base64::Engine;
use restyle_pipeline::prompt::framing_for_attempt;
use restyle_pipeline::service::RELAXED_SAFETY_CATEGORIES;
use restyle_pipeline::*;
use serde_json::json;
use std::time::Duration;
use test_helpers::{capture, png, wait_terminal};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-flash-image:generateContent";

fn service(server: &MockServer) -> GeminiService {
    GeminiService::new(
        GeminiConfig::new("test-key")
            .endpoint(server.uri())
            .timeout(Duration::from_millis(500)),
    )
}

fn request() -> GenerationRequest {
    GenerationRequest {
        model: config::DEFAULT_MODEL.to_string(),
        framing: framing_for_attempt(0, "cartoon"),
        input: Some(EncodedImage::new("image/png", capture(1))),
        relaxed_safety: RELAXED_SAFETY_CATEGORIES.to_vec(),
        seed: 7,
        attempt: 0,
    }
}

fn image_response() -> serde_json::Value {
    let data = base64::engine::general_purpose::STANDARD.encode(png(16, 16, [1, 2, 3]));
    json!({
        "candidates": [{
            "content": { "parts": [
                { "text": "done" },
                { "inlineData": { "mimeType": "image/png", "data": data } }
            ]},
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn test_generate_returns_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({ "generationConfig": { "seed": 7 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response()))
        .expect(1)
        .mount(&server)
        .await;

    let image = service(&server).generate(&request()).await.unwrap().unwrap();
    assert_eq!(image.mime_type, "image/png");
    assert_eq!(image.data, png(16, 16, [1, 2, 3]));
}

#[tokio::test]
async fn test_rate_limit_is_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": { "code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED" }
        })))
        .mount(&server)
        .await;

    let err = service(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.reason, RejectionReason::Quota);
}

#[tokio::test]
async fn test_timeout_is_interrupted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(image_response()),
        )
        .mount(&server)
        .await;

    let err = service(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.reason, RejectionReason::Interrupted);
}

#[tokio::test]
async fn test_blocked_prompt_is_safety() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        })))
        .mount(&server)
        .await;

    let err = service(&server).generate(&request()).await.unwrap_err();
    assert_eq!(err.reason, RejectionReason::Safety);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_interrupted() {
    let config = GeminiConfig::new("k")
        .endpoint("http://127.0.0.1:9")
        .timeout(Duration::from_millis(200));
    let err = GeminiService::new(config)
        .generate(&request())
        .await
        .unwrap_err();
    assert_eq!(err.reason, RejectionReason::Interrupted);
}

#[tokio::test]
async fn test_pipeline_end_to_end_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(image_response()))
        .mount(&server)
        .await;

    let config = PipelineConfig::builder().with_canvas_size(16).build();
    let pipeline = RestylePipeline::new(service(&server), config, StyleCatalog::default());
    let mut events = pipeline.subscribe_events();

    pipeline.set_style("cartoon").unwrap();
    let id = pipeline.submit(capture(1)).unwrap();
    wait_terminal(&mut events, 1).await;

    assert!(!pipeline.read().job(&id).unwrap().busy);
    let artifact = pipeline.build_batch().await.unwrap();
    assert_eq!(artifact.frame_count, 2);
}
