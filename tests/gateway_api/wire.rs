use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use keyloom::config::Config;
use keyloom::transport::gateway::run_gateway_with_listener;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub async fn wait_until_ready(port: u16) {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .expect("reqwest client should be built");

    for _ in 0..80 {
        let health = client
            .get(format!("http://127.0.0.1:{port}/health"))
            .send()
            .await;
        if matches!(health, Ok(resp) if resp.status() == StatusCode::OK) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("gateway did not become ready on port {port}");
}

struct WireServer {
    port: u16,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    _workspace: TempDir,
}

impl WireServer {
    #[allow(clippy::field_reassign_with_default)]
    async fn start(upstream: &MockServer) -> Self {
        let workspace = TempDir::new().expect("temp workspace should be created");
        let mut config = Config::default();
        config.config_path = workspace.path().join("config.toml");
        config.gemini.api_keys = vec!["key-a".into(), "key-b".into()];
        config.gemini.base_url = upstream.uri();
        config.fallback.base_url = upstream.uri();
        config.session.db_path = workspace
            .path()
            .join("sessions.db")
            .to_string_lossy()
            .into_owned();
        config.streaming.token_delay_ms = 1;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral gateway listener should bind");
        let port = listener
            .local_addr()
            .expect("listener should expose local address")
            .port();
        let config = Arc::new(config);
        let handle = tokio::spawn(async move {
            run_gateway_with_listener("127.0.0.1", listener, config).await
        });
        wait_until_ready(port).await;

        Self {
            port,
            handle,
            _workspace: workspace,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }
}

impl Drop for WireServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn chat_goes_to_gemini_with_pooled_key() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "key-a"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "Hi! How can I help?"}]}}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = WireServer::start(&upstream).await;
    let client = reqwest::Client::new();

    let reply: Value = client
        .post(server.url("/api/chat/message"))
        .json(&json!({"message": "hello"}))
        .send()
        .await
        .expect("chat should complete")
        .json()
        .await
        .expect("chat should be json");
    assert_eq!(reply["ai_response"]["content"], "Hi! How can I help?");
    assert_eq!(reply["key_usage_stats"], json!({"0": 1, "1": 0}));

    let status: Value = client
        .get(server.url("/api/status"))
        .send()
        .await
        .expect("status should complete")
        .json()
        .await
        .expect("status should be json");
    assert_eq!(status["status"], "online");
    assert_eq!(status["total_keys"], 2);
    assert_eq!(status["total_requests"], 1);
    assert_eq!(status["database_connected"], true);
}

#[tokio::test]
async fn upstream_key_never_leaks_into_error_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("internal failure for key=AIzaSyLEAKEDKEY1234567890abcdef"),
        )
        .mount(&upstream)
        .await;

    let server = WireServer::start(&upstream).await;
    let response = reqwest::Client::new()
        .post(server.url("/api/chat/message"))
        .json(&json!({"message": "hello"}))
        .send()
        .await
        .expect("chat should complete");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response.text().await.expect("error body");
    assert!(!body.contains("AIzaSyLEAKEDKEY1234567890abcdef"));
    assert!(body.contains("provider"));
}

#[tokio::test]
async fn imagen_failure_uses_local_diffusion() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/imagen-3.0-generate-002:predict"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/sdapi/v1/sd-models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"title": "stable-diffusion-v1-4.ckpt [def]", "model_name": "stable-diffusion-v1-4"}
        ])))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .and(body_partial_json(json!({"prompt": "a red fox", "steps": 20})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"images": [STANDARD.encode(b"sd-image")]})),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let server = WireServer::start(&upstream).await;
    let reply: Value = reqwest::Client::new()
        .post(server.url("/api/image/generate"))
        .json(&json!({"prompt": "a red fox"}))
        .send()
        .await
        .expect("generate should complete")
        .json()
        .await
        .expect("generate should be json");
    assert_eq!(reply["generation_method"], "fallback");
    assert_eq!(reply["provider"], "stable-diffusion");
    assert_eq!(reply["image_base64"], STANDARD.encode(b"sd-image"));
}

#[tokio::test]
async fn analyze_accepts_multipart_upload() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [
                {"text": "What animal is this?"},
                {"inlineData": {"mimeType": "image/png"}}
            ]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "A cat."}]}}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = WireServer::start(&upstream).await;
    let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    let boundary = "keyloom-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"prompt\"\r\n\r\nWhat animal is this?\r\n\
             --{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"cat.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(png);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let reply: Value = reqwest::Client::new()
        .post(server.url("/api/image/analyze"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(body)
        .send()
        .await
        .expect("analyze should complete")
        .json()
        .await
        .expect("analyze should be json");
    assert_eq!(reply["analysis"], "A cat.");
    assert_eq!(reply["prompt"], "What animal is this?");
    assert_eq!(reply["message"]["content"], "A cat.");
}
