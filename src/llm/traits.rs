use super::pool::Credential;
use crate::error::LlmError;
use crate::session::MessageRole;
use std::future::Future;
use std::pin::Pin;

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// One image attached to a chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineImage {
    /// Wrap raw bytes, sniffing the MIME type from the content.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime_type = infer::get(&data)
            .map(|kind| kind.mime_type())
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        Self { mime_type, data }
    }
}

/// A prior turn replayed to the model for context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: MessageRole,
    pub text: String,
}

/// Conversation state a chat adapter is bound to.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub session_id: String,
    pub system_prompt: String,
    pub history: Vec<HistoryTurn>,
}

/// Text generation bound to one credential and one session.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Submit one user turn and return the complete reply.
    fn send_turn<'a>(
        &'a self,
        text: &'a str,
        image: Option<&'a InlineImage>,
    ) -> ProviderFuture<'a, String>;
}

/// Text-to-image generation.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Produce exactly one image for `prompt`, returned as encoded bytes.
    fn generate_image<'a>(&'a self, prompt: &'a str) -> ProviderFuture<'a, Vec<u8>>;
}

/// Builds primary-provider adapters for a selected credential.
pub trait ProviderFactory: Send + Sync {
    fn chat(&self, credential: Credential, context: ChatContext) -> Box<dyn ChatProvider>;

    fn image(&self, credential: Credential) -> Box<dyn ImageProvider>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_image_detects_png() {
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(InlineImage::from_bytes(png).mime_type, "image/png");
    }

    #[test]
    fn inline_image_defaults_to_jpeg_for_unknown_bytes() {
        let image = InlineImage::from_bytes(b"not an image".to_vec());
        assert_eq!(image.mime_type, "image/jpeg");
    }
}
