pub mod diffusion;
pub mod fallback;
pub mod gemini;
pub mod http_client;
pub mod pool;
pub mod scrub;
pub mod sequencer;
pub mod traits;

pub use diffusion::{DiffusionRuntime, LocalDiffusionProvider};
pub use fallback::{FallbackChain, GeneratedImage, GenerationMethod, ImageOutcome};
pub use gemini::GeminiProviderFactory;
pub use http_client::build_provider_client_with_timeout;
pub use pool::{Credential, CredentialPool, PoolStatus};
pub use scrub::{sanitize_api_error, scrub_secret_patterns};
pub use sequencer::{ChunkStream, ResponseSequencer, StreamChunk};
pub use traits::{
    ChatContext, ChatProvider, HistoryTurn, ImageProvider, InlineImage, ProviderFactory,
};
