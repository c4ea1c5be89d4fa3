//! Streaming chat completions against an OpenAI-compatible API.

mod client;
mod sse;

pub use client::{ChatClient, ChatMessage, ChatStreamChunk, DEFAULT_MODEL, OPENAI_BASE_URL};
