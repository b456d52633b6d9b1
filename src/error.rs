use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `Keyloom`.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains (store, config loading, startup).
#[derive(Debug, Error)]
pub enum KeyloomError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Credential pool ─────────────────────────────────────────────────
    #[error("pool: {0}")]
    Pool(#[from] PoolError),

    // ── LLM / Provider ──────────────────────────────────────────────────
    #[error("llm: {0}")]
    Llm(#[from] LlmError),

    // ── Session ─────────────────────────────────────────────────────────
    #[error("session: {0}")]
    Session(#[from] SessionError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),
}

// ─── Credential pool errors ─────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("no provider credentials configured")]
    Exhausted,
}

// ─── LLM / Provider errors ──────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("provider {provider} request failed: {message}")]
    Request { provider: String, message: String },

    #[error("provider {provider} authentication failed: {message}")]
    Auth { provider: String, message: String },

    #[error("provider {provider} rate-limited: {message}")]
    RateLimited { provider: String, message: String },

    #[error("provider {provider} returned no image")]
    NoImageProduced { provider: String },

    #[error("provider {provider} unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("provider {provider} returned an invalid response: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl LlmError {
    pub fn request(provider: &str, message: impl Into<String>) -> Self {
        Self::Request {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn unavailable(provider: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_response(provider: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn no_image(provider: &str) -> Self {
        Self::NoImageProduced {
            provider: provider.to_string(),
        }
    }

    /// Name of the provider that produced this error.
    pub fn provider(&self) -> &str {
        match self {
            Self::Request { provider, .. }
            | Self::Auth { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::NoImageProduced { provider }
            | Self::Unavailable { provider, .. }
            | Self::InvalidResponse { provider, .. } => provider,
        }
    }
}

/// Both legs of the image fallback chain failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Both image generation methods failed. primary: {primary}; fallback: {fallback}")]
pub struct ImageGenerationError {
    pub primary: LlmError,
    pub fallback: LlmError,
}

// ─── Session errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("store: {0}")]
    Store(String),
}

impl SessionError {
    pub fn store(error: &anyhow::Error) -> Self {
        Self::Store(format!("{error:#}"))
    }
}

// ─── Orchestration boundary errors ──────────────────────────────────────────

/// Failure surfaced by the assistant service to its transports.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("{0}")]
    Provider(#[from] LlmError),

    #[error("{0}")]
    ImageGeneration(#[from] ImageGenerationError),

    #[error("{0}")]
    Store(#[from] SessionError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AssistantError {
    /// Stable machine-readable class for transports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::ImageGeneration(_) => "image_generation",
            Self::Store(_) => "store",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, KeyloomError>;
