//! Orchestration boundary between transports and the provider layer.

mod service;

pub use service::{
    AnalysisReply, Assistant, AssistantSettings, ChatReply, ImageReply, ServiceStatus,
};
