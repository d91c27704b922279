//! Streaming chat clients
//!
//! Speaks the OpenAI Chat Completions and Anthropic Messages wire formats.
//! Only the generation backend adapter talks to this module.

mod anthropic;
mod client;
mod format;
mod openai;
mod types;

pub use client::LlmClient;
pub use format::{detect_api_format, ApiFormat};
pub use types::*;
