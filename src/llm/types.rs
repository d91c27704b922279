//! Chat client types

use serde::{Deserialize, Serialize};

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system` or `user`
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One streamed delta
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

/// Sampling options
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Fully collected streamed response
#[derive(Debug, Clone, Default)]
pub struct StreamCollectResult {
    pub content: String,
    pub finish_reason: Option<String>,
    pub chunk_count: usize,
}

/// Chat client errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("stream error: {0}")]
    StreamError(String),
}

impl LlmError {
    /// Worth retrying: rate limits, server faults, timeouts, broken connections
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::HttpError(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            LlmError::ApiError { status, .. } => {
                matches!(status, 408 | 409 | 425 | 429 | 500..=599)
            }
            LlmError::Timeout | LlmError::StreamError(_) => true,
            LlmError::ConfigError(_) | LlmError::JsonError(_) => false,
        }
    }
}
