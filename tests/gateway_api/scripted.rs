use keyloom::assistant::{Assistant, AssistantSettings};
use keyloom::config::GatewayConfig;
use keyloom::error::LlmError;
use keyloom::llm::traits::ProviderFuture;
use keyloom::llm::{
    ChatContext, ChatProvider, Credential, CredentialPool, ImageProvider, InlineImage,
    ProviderFactory,
};
use keyloom::session::SqliteSessionStore;
use keyloom::transport::gateway::{AppState, serve_with_state};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct EchoChat;

impl ChatProvider for EchoChat {
    fn name(&self) -> &str {
        "scripted"
    }

    fn send_turn<'a>(
        &'a self,
        text: &'a str,
        _image: Option<&'a InlineImage>,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move { Ok(format!("echo {text}")) })
    }
}

struct FixedImage {
    name: &'static str,
    result: Result<Vec<u8>, LlmError>,
}

impl ImageProvider for FixedImage {
    fn name(&self) -> &str {
        self.name
    }

    fn generate_image<'a>(&'a self, _prompt: &'a str) -> ProviderFuture<'a, Vec<u8>> {
        Box::pin(async move { self.result.clone() })
    }
}

struct Factory {
    image: Result<Vec<u8>, LlmError>,
}

impl ProviderFactory for Factory {
    fn chat(&self, _credential: Credential, _context: ChatContext) -> Box<dyn ChatProvider> {
        Box::new(EchoChat)
    }

    fn image(&self, _credential: Credential) -> Box<dyn ImageProvider> {
        Box::new(FixedImage {
            name: "primary",
            result: self.image.clone(),
        })
    }
}

struct ScriptedServer {
    port: u16,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    _workspace: TempDir,
}

impl ScriptedServer {
    async fn start(primary: Result<Vec<u8>, LlmError>, fallback: Result<Vec<u8>, LlmError>) -> Self {
        let workspace = TempDir::new().expect("temp workspace should be created");
        let store = SqliteSessionStore::open(&workspace.path().join("sessions.db"))
            .await
            .expect("store should open");
        let pool = CredentialPool::new(["k1", "k2"]).expect("pool should build");
        let assistant = Assistant::new(
            Arc::new(pool),
            Arc::new(Factory { image: primary }),
            Arc::new(FixedImage {
                name: "fallback",
                result: fallback,
            }),
            Arc::new(store),
            AssistantSettings {
                system_prompt: "You are a helpful AI assistant.".into(),
                history_limit: 20,
                analyze_prompt: "Describe this image in detail".into(),
                token_delay: Duration::from_millis(1),
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral listener should bind");
        let port = listener
            .local_addr()
            .expect("listener should expose local address")
            .port();
        let handle = tokio::spawn(async move {
            serve_with_state(listener, AppState { assistant }, &GatewayConfig::default()).await
        });
        super::wire::wait_until_ready(port).await;

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

impl Drop for ScriptedServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn chat_creates_session_and_follow_up_reuses_it() {
    let server = ScriptedServer::start(Ok(b"img".to_vec()), Ok(b"sd".to_vec())).await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(server.url("/api/chat/message"))
        .json(&json!({"message": "hello there"}))
        .send()
        .await
        .expect("chat request should complete")
        .json()
        .await
        .expect("chat reply should be json");
    let session_id = first["session_id"].as_str().expect("session id").to_string();
    assert_eq!(first["ai_response"]["content"], "echo hello there");
    assert_eq!(first["user_message"]["role"], "user");

    let second: Value = client
        .post(server.url("/api/chat/message"))
        .json(&json!({"message": "again", "session_id": session_id}))
        .send()
        .await
        .expect("follow-up should complete")
        .json()
        .await
        .expect("follow-up should be json");
    assert_eq!(second["session_id"], session_id.as_str());

    let messages: Value = client
        .get(server.url(&format!("/api/chat/sessions/{session_id}/messages")))
        .send()
        .await
        .expect("messages request should complete")
        .json()
        .await
        .expect("messages should be json");
    let contents: Vec<&str> = messages
        .as_array()
        .expect("messages array")
        .iter()
        .filter_map(|m| m["content"].as_str())
        .collect();
    assert_eq!(contents, ["hello there", "echo hello there", "again", "echo again"]);

    let sessions: Value = client
        .get(server.url("/api/chat/sessions"))
        .send()
        .await
        .expect("list should complete")
        .json()
        .await
        .expect("list should be json");
    assert_eq!(sessions[0]["id"], session_id.as_str());
    assert_eq!(sessions[0]["title"], "hello there");
}

#[tokio::test]
async fn delete_removes_session_and_its_messages() {
    let server = ScriptedServer::start(Ok(b"img".to_vec()), Ok(b"sd".to_vec())).await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(server.url("/api/chat/sessions"))
        .json(&json!({}))
        .send()
        .await
        .expect("create should complete")
        .json()
        .await
        .expect("create should be json");
    assert_eq!(created["title"], "New Chat");
    let id = created["id"].as_str().expect("id").to_string();

    client
        .post(server.url("/api/chat/message"))
        .json(&json!({"message": "hi", "session_id": id}))
        .send()
        .await
        .expect("chat should complete");

    let deleted: Value = client
        .delete(server.url(&format!("/api/chat/sessions/{id}")))
        .send()
        .await
        .expect("delete should complete")
        .json()
        .await
        .expect("delete should be json");
    assert_eq!(deleted["message"], "Session deleted successfully");
    assert_eq!(deleted["deleted"], true);

    let messages: Value = client
        .get(server.url(&format!("/api/chat/sessions/{id}/messages")))
        .send()
        .await
        .expect("messages should complete")
        .json()
        .await
        .expect("messages should be json");
    assert_eq!(messages, json!([]));
}

#[tokio::test]
async fn image_generation_falls_back_when_primary_fails() {
    let server = ScriptedServer::start(
        Err(LlmError::request("primary", "quota exceeded")),
        Ok(b"sd-bytes".to_vec()),
    )
    .await;

    let reply: Value = reqwest::Client::new()
        .post(server.url("/api/image/generate"))
        .json(&json!({"prompt": "a lighthouse"}))
        .send()
        .await
        .expect("generate should complete")
        .json()
        .await
        .expect("generate should be json");
    assert_eq!(reply["generation_method"], "fallback");
    assert_eq!(reply["provider"], "fallback");
    assert_eq!(reply["image_base64"], "c2QtYnl0ZXM=");
    assert_eq!(reply["message"]["content"], "Generated image using fallback: a lighthouse");
}

#[tokio::test]
async fn image_generation_reports_both_failures() {
    let server = ScriptedServer::start(
        Err(LlmError::request("primary", "quota exceeded")),
        Err(LlmError::unavailable("fallback", "connection refused")),
    )
    .await;

    let response = reqwest::Client::new()
        .post(server.url("/api/image/generate"))
        .json(&json!({"prompt": "a lighthouse"}))
        .send()
        .await
        .expect("generate should complete");
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.expect("error should be json");
    assert_eq!(body["error"]["kind"], "image_generation");
    let message = body["error"]["message"].as_str().expect("message");
    assert!(message.contains("quota exceeded"));
    assert!(message.contains("connection refused"));
}

#[tokio::test]
async fn stream_emits_tokens_then_done_and_persists_reply() {
    let server = ScriptedServer::start(Ok(b"img".to_vec()), Ok(b"sd".to_vec())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/chat/stream/stream-session"))
        .json(&json!({"message": "one two"}))
        .send()
        .await
        .expect("stream should complete");
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    let body = response.text().await.expect("stream body");
    let events: Vec<Value> = body
        .split("\n\n")
        .filter_map(|event| event.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).expect("event should be json"))
        .collect();

    let text: String = events
        .iter()
        .filter(|e| e["done"] == false)
        .filter_map(|e| e["content"].as_str())
        .collect();
    assert_eq!(text.trim_end(), "echo one two");
    let last = events.last().expect("at least one event");
    assert_eq!(last["done"], true);
    assert_eq!(last["session_id"], "stream-session");

    let messages: Value = client
        .get(server.url("/api/chat/sessions/stream-session/messages"))
        .send()
        .await
        .expect("messages should complete")
        .json()
        .await
        .expect("messages should be json");
    assert_eq!(messages[1]["content"], "echo one two");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn empty_chat_message_is_rejected() {
    let server = ScriptedServer::start(Ok(b"img".to_vec()), Ok(b"sd".to_vec())).await;

    let response = reqwest::Client::new()
        .post(server.url("/api/chat/message"))
        .json(&json!({"message": "   "}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("error should be json");
    assert_eq!(body["error"]["kind"], "invalid_request");
}
