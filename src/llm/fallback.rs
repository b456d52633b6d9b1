//! Two-stage image generation: primary provider first, local fallback second.

use super::traits::ImageProvider;
use crate::error::{ImageGenerationError, LlmError};
use serde::Serialize;
use strum::Display;

/// Which leg of the chain produced the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GenerationMethod {
    Primary,
    Fallback,
}

/// Terminal state of one chain run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    Succeeded {
        method: GenerationMethod,
        provider: String,
        bytes: Vec<u8>,
    },
    Failed {
        primary: LlmError,
        fallback: LlmError,
    },
}

impl ImageOutcome {
    pub fn into_result(self) -> Result<GeneratedImage, ImageGenerationError> {
        match self {
            Self::Succeeded {
                method,
                provider,
                bytes,
            } => Ok(GeneratedImage {
                method,
                provider,
                bytes,
            }),
            Self::Failed { primary, fallback } => Err(ImageGenerationError { primary, fallback }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub method: GenerationMethod,
    pub provider: String,
    pub bytes: Vec<u8>,
}

enum Stage {
    TryPrimary,
    TryFallback { primary_error: LlmError },
}

/// Runs each provider at most once per request, in order.
pub struct FallbackChain<'a> {
    primary: &'a dyn ImageProvider,
    fallback: &'a dyn ImageProvider,
}

impl<'a> FallbackChain<'a> {
    pub fn new(primary: &'a dyn ImageProvider, fallback: &'a dyn ImageProvider) -> Self {
        Self { primary, fallback }
    }

    pub async fn run(&self, prompt: &str) -> ImageOutcome {
        let mut stage = Stage::TryPrimary;
        loop {
            stage = match stage {
                Stage::TryPrimary => match self.primary.generate_image(prompt).await {
                    Ok(bytes) => {
                        return ImageOutcome::Succeeded {
                            method: GenerationMethod::Primary,
                            provider: self.primary.name().to_string(),
                            bytes,
                        };
                    }
                    Err(primary_error) => {
                        tracing::warn!(
                            provider = self.primary.name(),
                            error = %primary_error,
                            "primary image generation failed, trying fallback"
                        );
                        Stage::TryFallback { primary_error }
                    }
                },
                Stage::TryFallback { primary_error } => {
                    return match self.fallback.generate_image(prompt).await {
                        Ok(bytes) => {
                            tracing::info!(
                                provider = self.fallback.name(),
                                "image generated by fallback provider"
                            );
                            ImageOutcome::Succeeded {
                                method: GenerationMethod::Fallback,
                                provider: self.fallback.name().to_string(),
                                bytes,
                            }
                        }
                        Err(fallback_error) => {
                            tracing::error!(
                                primary_provider = primary_error.provider(),
                                fallback_provider = fallback_error.provider(),
                                primary = %primary_error,
                                fallback = %fallback_error,
                                "both image generation methods failed"
                            );
                            ImageOutcome::Failed {
                                primary: primary_error,
                                fallback: fallback_error,
                            }
                        }
                    };
                }
            };
        }
    }
}
