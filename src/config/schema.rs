use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Path to config.toml - computed at load time, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub assistant: AssistantConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Primary provider (Gemini / Imagen) ──────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Interchangeable API keys; requests are spread across them
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_gemini_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chat_model() -> String {
    "gemini-2.0-flash".into()
}

fn default_image_model() -> String {
    "imagen-3.0-generate-002".into()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_gemini_timeout_secs() -> u64 {
    120
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            chat_model: default_chat_model(),
            image_model: default_image_model(),
            base_url: default_gemini_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_gemini_timeout_secs(),
        }
    }
}

// ── Assistant behaviour ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Prior turns replayed to the model on each chat call
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Prompt used by image analysis when the caller sends none
    #[serde(default = "default_analyze_prompt")]
    pub analyze_prompt: String,
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant.".into()
}

fn default_history_limit() -> usize {
    20
}

fn default_analyze_prompt() -> String {
    "Describe this image in detail".into()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_limit: default_history_limit(),
            analyze_prompt: default_analyze_prompt(),
        }
    }
}

// ── Fallback image generation (local Stable Diffusion) ──────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_fallback_base_url")]
    pub base_url: String,
    /// Checkpoint to run, matched against the server's model list
    #[serde(default = "default_fallback_model")]
    pub model: String,
    #[serde(default = "default_inference_steps")]
    pub inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default = "default_image_side")]
    pub width: u32,
    #[serde(default = "default_image_side")]
    pub height: u32,
    #[serde(default = "default_fallback_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_fallback_base_url() -> String {
    "http://127.0.0.1:7860".into()
}

fn default_fallback_model() -> String {
    "CompVis/stable-diffusion-v1-4".into()
}

fn default_inference_steps() -> u32 {
    20
}

fn default_guidance_scale() -> f64 {
    7.5
}

fn default_image_side() -> u32 {
    512
}

fn default_fallback_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_fallback_base_url(),
            model: default_fallback_model(),
            inference_steps: default_inference_steps(),
            guidance_scale: default_guidance_scale(),
            width: default_image_side(),
            height: default_image_side(),
            timeout_secs: default_fallback_timeout_secs(),
        }
    }
}

// ── Streaming ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Pause between streamed tokens
    #[serde(default = "default_token_delay_ms")]
    pub token_delay_ms: u64,
}

fn default_token_delay_ms() -> u64 {
    50
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            token_delay_ms: default_token_delay_ms(),
        }
    }
}

// ── Gateway ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway port (default: 8001)
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Gateway host (default: 127.0.0.1)
    #[serde(default = "default_gateway_host")]
    pub host: String,
    /// Allow binding to non-localhost (default: false)
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Allowed CORS origins; `"*"` allows any
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gateway_port() -> u16 {
    8001
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    900
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            host: default_gateway_host(),
            allow_public_bind: false,
            cors_origins: default_cors_origins(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// ── Session store ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "~/.keyloom/sessions.db".into()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl SessionConfig {
    /// Database path with `~` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).into_owned())
    }
}

// ── Observability ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "trace", "debug", "info", "warn" or "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl ObservabilityConfig {
    pub fn level(&self) -> tracing::Level {
        self.log_level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO)
    }
}
