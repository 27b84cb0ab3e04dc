//! LLM integration - OpenAI-compatible chat completions
//!
//! This module provides:
//! - An HTTP client for chat completions (Groq by default)
//! - Request/response types matching the OpenAI-compatible API
//! - Model fallback with automatic retry

mod client;
mod types;

pub use client::{LlmClient, LlmClientBuilder};
pub use types::{
    ChatRequest, ChatResponse, Choice, FinishReason, LlmResponse, Message, MessageRole, Usage,
};
