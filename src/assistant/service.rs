use crate::config::Config;
use crate::error::{AssistantError, SessionError};
use crate::llm::{
    ChatContext, ChunkStream, Credential, CredentialPool, DiffusionRuntime, FallbackChain,
    GeminiProviderFactory, GenerationMethod, HistoryTurn, ImageProvider, InlineImage,
    LocalDiffusionProvider, PoolStatus, ProviderFactory, ResponseSequencer,
    build_provider_client_with_timeout,
};
use crate::session::{ChatMessage, MessageRole, Session, SessionStore, SqliteSessionStore};
use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Behavioural knobs taken from configuration.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub system_prompt: String,
    pub history_limit: usize,
    pub analyze_prompt: String,
    pub token_delay: Duration,
}

impl From<&Config> for AssistantSettings {
    fn from(config: &Config) -> Self {
        Self {
            system_prompt: config.assistant.system_prompt.clone(),
            history_limit: config.assistant.history_limit,
            analyze_prompt: config.assistant.analyze_prompt.clone(),
            token_delay: Duration::from_millis(config.streaming.token_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub user_message: ChatMessage,
    pub ai_response: ChatMessage,
    pub key_usage_stats: BTreeMap<usize, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReply {
    pub session_id: String,
    pub image_base64: String,
    pub prompt: String,
    pub generation_method: GenerationMethod,
    pub provider: String,
    pub message: ChatMessage,
    pub key_usage_stats: BTreeMap<usize, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReply {
    pub session_id: String,
    pub analysis: String,
    pub prompt: String,
    pub message: ChatMessage,
    pub key_usage_stats: BTreeMap<usize, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub pool: PoolStatus,
    pub database_connected: bool,
}

/// Chat, streaming chat, image generation and image analysis over a
/// credential pool, a provider factory, a fallback image provider and a store.
#[derive(Clone)]
pub struct Assistant {
    pool: Arc<CredentialPool>,
    factory: Arc<dyn ProviderFactory>,
    fallback: Arc<dyn ImageProvider>,
    store: Arc<dyn SessionStore>,
    settings: Arc<AssistantSettings>,
}

fn store_error(error: &anyhow::Error) -> AssistantError {
    AssistantError::Store(SessionError::store(error))
}

/// Decode a client-supplied base64 image, tolerating a `data:` URL prefix.
fn decode_image(encoded: &str) -> Result<InlineImage, AssistantError> {
    let payload = match encoded.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => encoded,
    };
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(&compact)
        .map_err(|e| AssistantError::InvalidRequest(format!("image_base64 is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(AssistantError::InvalidRequest("image_base64 is empty".into()));
    }
    Ok(InlineImage::from_bytes(bytes))
}

fn require_text(value: &str, field: &str) -> Result<(), AssistantError> {
    if value.trim().is_empty() {
        return Err(AssistantError::InvalidRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

impl Assistant {
    pub fn new(
        pool: Arc<CredentialPool>,
        factory: Arc<dyn ProviderFactory>,
        fallback: Arc<dyn ImageProvider>,
        store: Arc<dyn SessionStore>,
        settings: AssistantSettings,
    ) -> Self {
        Self {
            pool,
            factory,
            fallback,
            store,
            settings: Arc::new(settings),
        }
    }

    /// Wire the production stack: Gemini adapters over the configured key
    /// pool, the local diffusion fallback and the SQLite session store.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = CredentialPool::new(&config.gemini.api_keys)
            .context("build Gemini credential pool")?;
        let factory = GeminiProviderFactory::new(
            build_provider_client_with_timeout(config.gemini.timeout_secs),
            config.gemini.clone(),
        );
        let runtime = Arc::new(DiffusionRuntime::new(
            build_provider_client_with_timeout(config.fallback.timeout_secs),
            config.fallback.clone(),
        ));
        let db_path = config.session.resolved_db_path();
        let store = SqliteSessionStore::open(&db_path).await?;

        tracing::info!(
            keys = pool.len(),
            db_path = %db_path.display(),
            fallback = %config.fallback.base_url,
            "assistant initialized"
        );

        Ok(Self::new(
            Arc::new(pool),
            Arc::new(factory),
            Arc::new(LocalDiffusionProvider::new(runtime)),
            Arc::new(store),
            AssistantSettings::from(config),
        ))
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    async fn history(&self, session_id: &str) -> Result<Vec<HistoryTurn>, AssistantError> {
        if self.settings.history_limit == 0 {
            return Ok(Vec::new());
        }
        let messages = self
            .store
            .get_messages(session_id, self.settings.history_limit)
            .await
            .map_err(|e| store_error(&e))?;
        // The window may open mid-exchange; the upstream conversation must start on a user turn.
        Ok(messages
            .into_iter()
            .skip_while(|message| message.role == MessageRole::Assistant)
            .map(|message| HistoryTurn {
                role: message.role,
                text: message.content,
            })
            .collect())
    }

    async fn save(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        image_base64: Option<&str>,
    ) -> Result<ChatMessage, AssistantError> {
        self.store
            .append_message(session_id, role, content, image_base64)
            .await
            .map_err(|e| store_error(&e))
    }

    /// Select a credential and run one chat turn with it.
    async fn chat_turn(
        &self,
        session_id: &str,
        history: Vec<HistoryTurn>,
        text: &str,
        image: Option<&InlineImage>,
    ) -> Result<String, AssistantError> {
        let credential: Credential = self.pool.select();
        let context = ChatContext {
            session_id: session_id.to_string(),
            system_prompt: self.settings.system_prompt.clone(),
            history,
        };
        let chat = self.factory.chat(credential.clone(), context);
        match chat.send_turn(text, image).await {
            Ok(reply) => Ok(reply),
            Err(error) => {
                self.pool.record_failure(&credential);
                tracing::warn!(
                    provider = chat.name(),
                    key_index = credential.index(),
                    session_id,
                    error = %error,
                    "chat turn failed"
                );
                Err(error.into())
            }
        }
    }

    /// One request/response chat exchange. A missing session id starts a new session.
    pub async fn send_message(
        &self,
        message: &str,
        session_id: Option<&str>,
        image_base64: Option<&str>,
    ) -> Result<ChatReply, AssistantError> {
        require_text(message, "message")?;
        let image = image_base64.map(decode_image).transpose()?;
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned);

        let history = self.history(&session_id).await?;
        let user_message = self
            .save(&session_id, MessageRole::User, message, image_base64)
            .await?;
        let reply = self
            .chat_turn(&session_id, history, message, image.as_ref())
            .await?;
        let ai_response = self
            .save(&session_id, MessageRole::Assistant, &reply, None)
            .await?;

        Ok(ChatReply {
            session_id,
            user_message,
            ai_response,
            key_usage_stats: self.pool.usage_stats(),
        })
    }

    /// Streamed chat exchange. Request validation and the user-message save
    /// fail eagerly; a provider failure becomes a single in-stream error event.
    pub async fn stream_message(
        &self,
        session_id: &str,
        message: &str,
        image_base64: Option<&str>,
    ) -> Result<ChunkStream, AssistantError> {
        require_text(message, "message")?;
        let image = image_base64.map(decode_image).transpose()?;

        let history = self.history(session_id).await?;
        self.save(session_id, MessageRole::User, message, image_base64)
            .await?;

        let reply = self
            .chat_turn(session_id, history, message, image.as_ref())
            .await
            .map_err(|e| e.to_string());

        let finish = {
            let store = Arc::clone(&self.store);
            let session_id = session_id.to_string();
            let text = reply.as_ref().ok().cloned();
            async move {
                let Some(text) = text else { return };
                if let Err(error) = store
                    .append_message(&session_id, MessageRole::Assistant, &text, None)
                    .await
                {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %format!("{error:#}"),
                        "failed to save streamed reply"
                    );
                }
            }
        };

        Ok(ResponseSequencer::new(self.settings.token_delay).sequence(
            reply,
            session_id.to_string(),
            finish,
        ))
    }

    /// Generate one image: primary provider on a pooled credential, then the
    /// local fallback.
    pub async fn generate_image(
        &self,
        prompt: &str,
        session_id: Option<&str>,
    ) -> Result<ImageReply, AssistantError> {
        require_text(prompt, "prompt")?;
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned);

        self.save(
            &session_id,
            MessageRole::User,
            &format!("Generate image: {prompt}"),
            None,
        )
        .await?;

        let credential = self.pool.select();
        let primary = self.factory.image(credential.clone());
        let outcome = FallbackChain::new(primary.as_ref(), self.fallback.as_ref())
            .run(prompt)
            .await;
        let image = match outcome.into_result() {
            Ok(image) => {
                if image.method == GenerationMethod::Fallback {
                    self.pool.record_failure(&credential);
                }
                image
            }
            Err(error) => {
                self.pool.record_failure(&credential);
                return Err(error.into());
            }
        };

        let image_base64 = STANDARD.encode(&image.bytes);
        let message = self
            .save(
                &session_id,
                MessageRole::Assistant,
                &format!("Generated image using {}: {prompt}", image.provider),
                Some(&image_base64),
            )
            .await?;

        Ok(ImageReply {
            session_id,
            image_base64,
            prompt: prompt.to_string(),
            generation_method: image.method,
            provider: image.provider,
            message,
            key_usage_stats: self.pool.usage_stats(),
        })
    }

    /// Describe an uploaded image in a fresh session.
    pub async fn analyze_image(
        &self,
        image: Vec<u8>,
        prompt: Option<&str>,
    ) -> Result<AnalysisReply, AssistantError> {
        if image.is_empty() {
            return Err(AssistantError::InvalidRequest("uploaded file is empty".into()));
        }
        let prompt = prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.settings.analyze_prompt)
            .to_string();
        let session_id = Uuid::new_v4().to_string();
        let image_base64 = STANDARD.encode(&image);
        let image = InlineImage::from_bytes(image);

        self.save(
            &session_id,
            MessageRole::User,
            &format!("Analyze image: {prompt}"),
            Some(&image_base64),
        )
        .await?;
        let analysis = self
            .chat_turn(&session_id, Vec::new(), &prompt, Some(&image))
            .await?;
        let message = self
            .save(&session_id, MessageRole::Assistant, &analysis, None)
            .await?;

        Ok(AnalysisReply {
            session_id,
            analysis,
            prompt,
            message,
            key_usage_stats: self.pool.usage_stats(),
        })
    }

    pub async fn status(&self) -> ServiceStatus {
        let database_connected = match self.store.ping().await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(error = %format!("{error:#}"), "session store ping failed");
                false
            }
        };
        ServiceStatus {
            pool: self.pool.status(),
            database_connected,
        }
    }

    // ── Session passthroughs ─────────────────────────────────────

    pub async fn create_session(&self, title: &str) -> Result<Session, AssistantError> {
        self.store
            .create_session(title)
            .await
            .map_err(|e| store_error(&e))
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>, AssistantError> {
        self.store
            .list_sessions(limit)
            .await
            .map_err(|e| store_error(&e))
    }

    pub async fn messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, AssistantError> {
        self.store
            .get_messages(session_id, limit)
            .await
            .map_err(|e| store_error(&e))
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool, AssistantError> {
        self.store
            .delete_session(session_id)
            .await
            .map_err(|e| store_error(&e))
    }
}
