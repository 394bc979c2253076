use std::time::Duration;

use actix_web::{test, web, App};
use httpmock::prelude::*;
use recognition_api::handlers::{self, AppState};
use serde_json::{json, Value};
use shared::config::Settings;
use shared::error::ErrorCatalog;
use shared::llm::{RetryPolicy, UpstreamClient};

const SECRET: &str = "test-secret";
const BOUNDARY: &str = "----recognition-api-test-boundary";

fn settings(base_url: &str) -> Settings {
    Settings {
        openrouter_api_key: "test-key".into(),
        openrouter_model: "main-model".into(),
        openrouter_gate_model: Some("gate-model".into()),
        openrouter_base_url: base_url.into(),
        api_proxy_secret: SECRET.into(),
        max_image_size_bytes: 1024 * 1024,
        gate_min_confidence: 0.4,
        gate_med_confidence: 0.6,
        gate_timeout_secs: 0.2,
        recognition_timeout_secs: 0.5,
        legacy_http_200: false,
        log_level: "info".into(),
        http_bind: "127.0.0.1".into(),
        http_port: 0,
    }
}

fn state_with(settings: Settings) -> web::Data<AppState> {
    let upstream = UpstreamClient::new(
        settings.openrouter_base_url.clone(),
        settings.openrouter_api_key.clone(),
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            multiplier: 2.0,
            max_delay: Duration::ZERO,
        },
    );
    web::Data::new(AppState {
        settings,
        catalog: ErrorCatalog::new(),
        upstream,
    })
}

struct MultipartBuilder {
    body: Vec<u8>,
}

impl MultipartBuilder {
    fn new() -> Self {
        Self { body: Vec::new() }
    }

    fn file(mut self, name: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
        self
    }

    fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

fn jpeg_upload(bytes: &[u8]) -> Vec<u8> {
    MultipartBuilder::new()
        .file("image", "food.jpg", "image/jpeg", bytes)
        .text("locale", "ru")
        .finish()
}

fn recognize_request(body: Vec<u8>) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/v1/ai/recognize-food")
        .insert_header(("X-API-Key", SECRET))
        .insert_header((
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
}

fn chat_body(content: Value) -> Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content.to_string()}}]
    })
}

async fn mock_gate(server: &MockServer, content: Value) {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("gate-model");
            then.status(200).json_body(chat_body(content));
        })
        .await;
}

async fn mock_recognition(server: &MockServer, content: Value) {
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("main-model");
            then.status(200).json_body(chat_body(content));
        })
        .await;
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .route("/health", web::get().to(handlers::health))
                .route(
                    "/api/v1/ai/recognize-food",
                    web::post().to(handlers::recognize_food),
                ),
        )
        .await
    };
}

#[actix_rt::test]
async fn health_reports_ok() {
    let server = MockServer::start_async().await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
}

#[actix_rt::test]
async fn wrong_api_key_is_unauthorized() {
    let server = MockServer::start_async().await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let req = recognize_request(jpeg_upload(b"fake"))
        .insert_header(("X-API-Key", "wrong"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);
}

#[actix_rt::test]
async fn empty_image_fails_without_touching_upstream() {
    let server = MockServer::start_async().await;
    let upstream_mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({}));
        })
        .await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_code"], "INVALID_IMAGE");
    assert_eq!(upstream_mock.hits_async().await, 0);
}

#[actix_rt::test]
async fn unsupported_content_type_is_rejected() {
    let server = MockServer::start_async().await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let body = MultipartBuilder::new()
        .file("image", "anim.gif", "image/gif", b"GIF89a")
        .finish();
    let resp = test::call_service(&app, recognize_request(body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "UNSUPPORTED_IMAGE_FORMAT");
    assert_eq!(body["allow_retry"], false);
}

#[actix_rt::test]
async fn oversized_image_is_rejected() {
    let server = MockServer::start_async().await;
    let mut cfg = settings(&server.base_url());
    cfg.max_image_size_bytes = 64;
    let state = state_with(cfg);
    let app = app!(state);

    let resp = test::call_service(
        &app,
        recognize_request(jpeg_upload(&[0u8; 256])).to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 413);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "IMAGE_TOO_LARGE");
}

#[actix_rt::test]
async fn not_food_maps_to_unsupported_content() {
    let server = MockServer::start_async().await;
    mock_gate(
        &server,
        json!({"is_food": false, "confidence": 0.05, "reason": "cat photo"}),
    )
    .await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_code"], "UNSUPPORTED_CONTENT");
    assert_eq!(body["allow_retry"], false);
}

#[actix_rt::test]
async fn legacy_mode_forces_http_200_with_error_body() {
    let server = MockServer::start_async().await;
    mock_gate(
        &server,
        json!({"is_food": false, "confidence": 0.05, "reason": "cat photo"}),
    )
    .await;
    let mut cfg = settings(&server.base_url());
    cfg.legacy_http_200 = true;
    let state = state_with(cfg);
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error_code"], "UNSUPPORTED_CONTENT");
}

#[actix_rt::test]
async fn confident_gate_and_items_produce_success() {
    let server = MockServer::start_async().await;
    mock_gate(
        &server,
        json!({"is_food": true, "confidence": 0.9, "reason": "meal on a plate"}),
    )
    .await;
    mock_recognition(
        &server,
        json!({
            "items": [
                {"name": "индейка", "grams": 150, "kcal": 180, "protein": 32, "fat": 4, "carbs": 0},
                {"name": "картофель", "grams": 200, "kcal": 270, "protein": 5, "fat": 9, "carbohydrates": 40}
            ],
            "model_notes": "веса из комментария"
        }),
    )
    .await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let body = MultipartBuilder::new()
        .file("image", "food.jpg", "image/jpeg", b"fakejpeg")
        .text("user_comment", "индейка 150 г, картофель 200 г")
        .text("locale", "ru")
        .finish();
    let resp = test::call_service(&app, recognize_request(body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["is_food"], true);
    assert_eq!(body["confidence"], 0.9);
    assert_eq!(body["gate_reason"], "meal on a plate");
    assert_eq!(body["result"]["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["result"]["total"]["kcal"], 450.0);
    assert_eq!(body["result"]["model_notes"], "веса из комментария");
}

#[actix_rt::test]
async fn trace_id_is_echoed_in_header_and_body() {
    let server = MockServer::start_async().await;
    mock_gate(
        &server,
        json!({"is_food": false, "confidence": 0.01, "reason": "screenshot"}),
    )
    .await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let req = recognize_request(jpeg_upload(b"fake"))
        .insert_header(("X-Trace-Id", "trace-42"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(
        resp.headers().get("X-Trace-Id").unwrap().to_str().unwrap(),
        "trace-42"
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["trace_id"], "trace-42");
}

#[actix_rt::test]
async fn low_confidence_zone_with_empty_items_maps_to_low_confidence() {
    let server = MockServer::start_async().await;
    // 0.5 sits between the min (0.4) and med (0.6) thresholds
    mock_gate(
        &server,
        json!({"is_food": true, "confidence": 0.5, "reason": "hard to tell"}),
    )
    .await;
    mock_recognition(&server, json!({"items": [], "model_notes": "unclear"})).await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 422);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "LOW_CONFIDENCE");
    assert_eq!(body["allow_retry"], true);
}

#[actix_rt::test]
async fn confident_gate_with_empty_items_maps_to_empty_result() {
    let server = MockServer::start_async().await;
    mock_gate(
        &server,
        json!({"is_food": true, "confidence": 0.9, "reason": "clearly a dish"}),
    )
    .await;
    mock_recognition(&server, json!({"items": []})).await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 422);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "EMPTY_RESULT");
}

#[actix_rt::test]
async fn gate_timeout_on_every_attempt_maps_to_gate_error() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200)
                .delay(Duration::from_millis(600))
                .json_body(chat_body(json!({"is_food": true, "confidence": 0.9})));
        })
        .await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "GATE_ERROR");
    assert_eq!(body["allow_retry"], true);
    // each attempt got its own timeout budget
    assert_eq!(mock.hits_async().await, 3);
}

#[actix_rt::test]
async fn unparseable_gate_answer_maps_to_gate_error() {
    let server = MockServer::start_async().await;
    mock_gate(&server, json!("no object here, just prose")).await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "GATE_ERROR");
}

#[actix_rt::test]
async fn recognition_server_error_maps_to_upstream_error() {
    let server = MockServer::start_async().await;
    mock_gate(
        &server,
        json!({"is_food": true, "confidence": 0.9, "reason": "food"}),
    )
    .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("main-model");
            then.status(500).body("exploded");
        })
        .await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "UPSTREAM_ERROR");
}

#[actix_rt::test]
async fn recognition_rate_limit_maps_to_rate_limit() {
    let server = MockServer::start_async().await;
    mock_gate(
        &server,
        json!({"is_food": true, "confidence": 0.9, "reason": "food"}),
    )
    .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .body_contains("main-model");
            then.status(429).body("rate limit exceeded");
        })
        .await;
    let state = state_with(settings(&server.base_url()));
    let app = app!(state);

    let resp = test::call_service(&app, recognize_request(jpeg_upload(b"fake")).to_request()).await;
    assert_eq!(resp.status().as_u16(), 429);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_code"], "RATE_LIMIT");
}
