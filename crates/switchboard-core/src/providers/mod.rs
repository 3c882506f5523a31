//! Model provider abstraction
//!
//! Supports OpenAI and any OpenAI-compatible endpoint. Providers implement the
//! [`ModelProvider`] trait and are composed via [`ModelRouter`] for failover.

pub mod openai;
pub mod openai_compat;
pub mod router;
pub mod types;

pub use openai::{HttpTimeouts, OpenAiProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use router::ModelRouter;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, FinishReason, ModelProvider, ResponseFormat,
};
