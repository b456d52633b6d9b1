mod env_overrides;
mod loader;
pub mod schema;

pub use schema::{
    AssistantConfig, Config, FallbackConfig, GatewayConfig, GeminiConfig, ObservabilityConfig,
    SessionConfig, StreamingConfig,
};
