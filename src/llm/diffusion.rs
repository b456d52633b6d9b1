//! Local Stable Diffusion fallback, reached over an AUTOMATIC1111-compatible
//! HTTP API. No credentials; the server owns device placement.

use super::scrub::{error_body, sanitize_api_error};
use super::traits::{ImageProvider, ProviderFuture};
use crate::config::FallbackConfig;
use crate::error::LlmError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

pub const PROVIDER_NAME: &str = "stable-diffusion";

#[derive(Debug, Deserialize)]
struct SdModel {
    title: String,
    #[serde(default)]
    model_name: String,
}

#[derive(Debug, Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    steps: u32,
    cfg_scale: f64,
    width: u32,
    height: u32,
    batch_size: u32,
    n_iter: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    override_settings: Option<OverrideSettings<'a>>,
}

#[derive(Debug, Serialize)]
struct OverrideSettings<'a> {
    sd_model_checkpoint: &'a str,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// Resolved server state, established once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffusionHandle {
    /// Checkpoint title to pin per request; `None` uses the server's active one.
    pub checkpoint: Option<String>,
}

/// Process-wide lazily initialized handle to the diffusion server.
///
/// Concurrent first users wait on a single probe. A failed probe is not
/// cached, so the next request tries again.
pub struct DiffusionRuntime {
    client: Client,
    config: FallbackConfig,
    handle: OnceCell<DiffusionHandle>,
}

fn checkpoint_matches(model: &SdModel, wanted: &str) -> bool {
    let wanted = wanted.to_ascii_lowercase();
    let short = wanted.rsplit('/').next().unwrap_or(&wanted).to_string();
    let title = model.title.to_ascii_lowercase();
    let name = model.model_name.to_ascii_lowercase();
    title == wanted || name == wanted || name == short || title.starts_with(&short)
}

impl DiffusionRuntime {
    pub fn new(client: Client, config: FallbackConfig) -> Self {
        Self {
            client,
            config,
            handle: OnceCell::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    pub fn is_ready(&self) -> bool {
        self.handle.initialized()
    }

    /// Initialize on first use and return the shared handle.
    pub async fn handle(&self) -> Result<&DiffusionHandle, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::unavailable(
                PROVIDER_NAME,
                "fallback image generation is disabled",
            ));
        }
        self.handle.get_or_try_init(|| self.load()).await
    }

    async fn load(&self) -> Result<DiffusionHandle, LlmError> {
        tracing::info!(
            base_url = %self.config.base_url,
            model = %self.config.model,
            "initializing diffusion fallback"
        );

        let response = self
            .client
            .get(self.url("/sdapi/v1/sd-models"))
            .send()
            .await
            .map_err(|e| LlmError::unavailable(PROVIDER_NAME, sanitize_api_error(&e.to_string())))?;
        if !response.status().is_success() {
            return Err(LlmError::unavailable(
                PROVIDER_NAME,
                error_body(response).await,
            ));
        }
        let models: Vec<SdModel> = response.json().await.map_err(|e| {
            LlmError::invalid_response(PROVIDER_NAME, sanitize_api_error(&e.to_string()))
        })?;

        if models.is_empty() {
            return Err(LlmError::unavailable(
                PROVIDER_NAME,
                "server reports no checkpoints",
            ));
        }

        let checkpoint = models
            .iter()
            .find(|model| checkpoint_matches(model, &self.config.model))
            .map(|model| model.title.clone());
        if checkpoint.is_none() {
            tracing::warn!(
                model = %self.config.model,
                available = models.len(),
                "configured checkpoint not found, using the server's active model"
            );
        }

        Ok(DiffusionHandle { checkpoint })
    }

    async fn txt2img(&self, prompt: &str) -> Result<Vec<u8>, LlmError> {
        let handle = self.handle().await?;
        let request = Txt2ImgRequest {
            prompt,
            steps: self.config.inference_steps,
            cfg_scale: self.config.guidance_scale,
            width: self.config.width,
            height: self.config.height,
            batch_size: 1,
            n_iter: 1,
            override_settings: handle
                .checkpoint
                .as_deref()
                .map(|sd_model_checkpoint| OverrideSettings { sd_model_checkpoint }),
        };

        let response = self
            .client
            .post(self.url("/sdapi/v1/txt2img"))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::request(PROVIDER_NAME, sanitize_api_error(&e.to_string())))?;
        if !response.status().is_success() {
            return Err(LlmError::request(PROVIDER_NAME, error_body(response).await));
        }

        let body: Txt2ImgResponse = response.json().await.map_err(|e| {
            LlmError::invalid_response(PROVIDER_NAME, sanitize_api_error(&e.to_string()))
        })?;
        let Some(encoded) = body.images.into_iter().next() else {
            return Err(LlmError::no_image(PROVIDER_NAME));
        };

        // Some builds prefix a data URL header.
        let encoded = encoded
            .split_once(',')
            .map_or(encoded.as_str(), |(_, data)| data);
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
            LlmError::invalid_response(PROVIDER_NAME, format!("bad image payload: {e}"))
        })?;
        if bytes.is_empty() {
            return Err(LlmError::no_image(PROVIDER_NAME));
        }
        Ok(bytes)
    }
}

/// Fallback image adapter over a shared [`DiffusionRuntime`].
#[derive(Clone)]
pub struct LocalDiffusionProvider {
    runtime: Arc<DiffusionRuntime>,
}

impl LocalDiffusionProvider {
    pub fn new(runtime: Arc<DiffusionRuntime>) -> Self {
        Self { runtime }
    }
}

impl ImageProvider for LocalDiffusionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn generate_image<'a>(&'a self, prompt: &'a str) -> ProviderFuture<'a, Vec<u8>> {
        Box::pin(async move { self.runtime.txt2img(prompt).await })
    }
}
