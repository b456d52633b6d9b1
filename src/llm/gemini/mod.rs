//! Google Gemini adapters: chat via `generateContent`, images via Imagen `predict`.
//!
//! The API key travels in the `x-goog-api-key` header so it never appears in
//! URLs that might end up in error text or logs.

use super::pool::Credential;
use super::scrub::{error_body, sanitize_api_error};
use super::traits::{
    ChatContext, ChatProvider, ImageProvider, InlineImage, ProviderFactory, ProviderFuture,
};
use crate::config::GeminiConfig;
use crate::error::LlmError;
use crate::session::MessageRole;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

mod types;
use types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
    PredictInstance, PredictParameters, PredictRequest, PredictResponse,
};

pub const CHAT_PROVIDER_NAME: &str = "gemini";
pub const IMAGE_PROVIDER_NAME: &str = "gemini-imagen";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Builds Gemini adapters that share one HTTP client.
pub struct GeminiProviderFactory {
    client: Client,
    config: Arc<GeminiConfig>,
}

impl GeminiProviderFactory {
    pub fn new(client: Client, config: GeminiConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

impl ProviderFactory for GeminiProviderFactory {
    fn chat(&self, credential: Credential, context: ChatContext) -> Box<dyn ChatProvider> {
        Box::new(GeminiChat {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            credential,
            context,
        })
    }

    fn image(&self, credential: Credential) -> Box<dyn ImageProvider> {
        Box::new(GeminiImagen {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
            credential,
        })
    }
}

fn endpoint(config: &GeminiConfig, model: &str, method: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    format!(
        "{}/models/{model}:{method}",
        config.base_url.trim_end_matches('/')
    )
}

fn status_error(provider: &str, status: StatusCode, detail: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth {
            provider: provider.to_string(),
            message: detail,
        },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: provider.to_string(),
            message: detail,
        },
        _ => LlmError::request(provider, detail),
    }
}

async fn post_json<B, R>(
    client: &Client,
    provider: &str,
    url: String,
    credential: &Credential,
    body: &B,
) -> Result<R, LlmError>
where
    B: Serialize + Sync,
    R: DeserializeOwned,
{
    let response = client
        .post(url)
        .header(API_KEY_HEADER, credential.secret())
        .json(body)
        .send()
        .await
        .map_err(|e| LlmError::request(provider, sanitize_api_error(&e.to_string())))?;

    let status = response.status();
    if !status.is_success() {
        let detail = error_body(response).await;
        return Err(status_error(provider, status, detail));
    }

    response
        .json::<R>()
        .await
        .map_err(|e| LlmError::invalid_response(provider, sanitize_api_error(&e.to_string())))
}

/// Chat adapter bound to one credential and one session.
pub struct GeminiChat {
    client: Client,
    config: Arc<GeminiConfig>,
    credential: Credential,
    context: ChatContext,
}

impl GeminiChat {
    fn build_request(&self, text: &str, image: Option<&InlineImage>) -> GenerateContentRequest {
        let mut contents: Vec<Content> = self
            .context
            .history
            .iter()
            .filter(|turn| !turn.text.is_empty())
            .map(|turn| Content {
                role: Some(
                    match turn.role {
                        MessageRole::User => "user",
                        MessageRole::Assistant => "model",
                    }
                    .to_string(),
                ),
                parts: vec![Part::text(turn.text.clone())],
            })
            .collect();

        let mut parts = vec![Part::text(text)];
        if let Some(image) = image {
            parts.push(Part::inline_data(
                &image.mime_type,
                STANDARD.encode(&image.data),
            ));
        }
        contents.push(Content {
            role: Some("user".to_string()),
            parts,
        });

        let system_instruction = (!self.context.system_prompt.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(self.context.system_prompt.clone())],
        });

        GenerateContentRequest {
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
            },
        }
    }

    fn extract_text(result: &GenerateContentResponse) -> Result<String, LlmError> {
        if let Some(reason) = result
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            return Err(LlmError::invalid_response(
                CHAT_PROVIDER_NAME,
                format!("prompt blocked: {reason}"),
            ));
        }

        let candidate = result.candidates.as_ref().and_then(|c| c.first());
        let text = candidate
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate
                .and_then(|candidate| candidate.finish_reason.as_deref())
                .unwrap_or("no candidates");
            return Err(LlmError::invalid_response(
                CHAT_PROVIDER_NAME,
                format!("empty response ({reason})"),
            ));
        }

        Ok(text)
    }
}

impl ChatProvider for GeminiChat {
    fn name(&self) -> &str {
        CHAT_PROVIDER_NAME
    }

    fn send_turn<'a>(
        &'a self,
        text: &'a str,
        image: Option<&'a InlineImage>,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let request = self.build_request(text, image);
            let url = endpoint(&self.config, &self.config.chat_model, "generateContent");
            tracing::debug!(
                session_id = %self.context.session_id,
                key_index = self.credential.index(),
                history = self.context.history.len(),
                with_image = image.is_some(),
                "sending chat turn"
            );
            let response: GenerateContentResponse = post_json(
                &self.client,
                CHAT_PROVIDER_NAME,
                url,
                &self.credential,
                &request,
            )
            .await?;
            Self::extract_text(&response)
        })
    }
}

/// Imagen adapter bound to one credential.
pub struct GeminiImagen {
    client: Client,
    config: Arc<GeminiConfig>,
    credential: Credential,
}

impl ImageProvider for GeminiImagen {
    fn name(&self) -> &str {
        IMAGE_PROVIDER_NAME
    }

    fn generate_image<'a>(&'a self, prompt: &'a str) -> ProviderFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let request = PredictRequest {
                instances: vec![PredictInstance {
                    prompt: prompt.to_string(),
                }],
                parameters: PredictParameters { sample_count: 1 },
            };
            let url = endpoint(&self.config, &self.config.image_model, "predict");
            let response: PredictResponse = post_json(
                &self.client,
                IMAGE_PROVIDER_NAME,
                url,
                &self.credential,
                &request,
            )
            .await?;

            let Some(encoded) = response
                .predictions
                .into_iter()
                .find_map(|prediction| prediction.bytes_base64_encoded)
            else {
                return Err(LlmError::no_image(IMAGE_PROVIDER_NAME));
            };

            let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                LlmError::invalid_response(IMAGE_PROVIDER_NAME, format!("bad image payload: {e}"))
            })?;
            if bytes.is_empty() {
                return Err(LlmError::no_image(IMAGE_PROVIDER_NAME));
            }
            Ok(bytes)
        })
    }
}
