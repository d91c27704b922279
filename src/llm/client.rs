//! Chat client over both wire formats

use futures::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use super::anthropic::stream_anthropic;
use super::format::{build_anthropic_endpoint, build_openai_endpoint, ApiFormat};
use super::openai::stream_openai;
use super::types::{ChatChunk, ChatMessage, ChatOptions, LlmError, StreamCollectResult};

/// Streaming chat client bound to one endpoint and wire format
pub struct LlmClient {
    client: Client,
    api_key: String,
    base_url: String,
    format: ApiFormat,
}

impl LlmClient {
    /// `api_key` may be empty for local servers.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        format: ApiFormat,
        request_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(LlmError::ConfigError("base URL is required".to_string()));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(LlmError::HttpError)?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url,
            format,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Fully built request URL
    pub fn endpoint(&self) -> String {
        match self.format {
            ApiFormat::OpenAi => build_openai_endpoint(&self.base_url),
            ApiFormat::Anthropic => build_anthropic_endpoint(&self.base_url),
        }
    }

    pub fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        options: ChatOptions,
    ) -> Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>> {
        debug!("Chat request: model={}, format={:?}", model, self.format);

        match self.format {
            ApiFormat::OpenAi => stream_openai(
                &self.client,
                &self.api_key,
                &self.base_url,
                messages,
                model,
                &options,
            ),
            ApiFormat::Anthropic => stream_anthropic(
                &self.client,
                &self.api_key,
                &self.base_url,
                messages,
                model,
                &options,
            ),
        }
    }

    /// Drain the stream into one response
    pub async fn stream_and_collect(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
        options: ChatOptions,
    ) -> Result<StreamCollectResult, LlmError> {
        let mut stream = self.stream_chat(messages, model, options);
        let mut result = StreamCollectResult::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            result.chunk_count += 1;
            if let Some(content) = chunk.content {
                result.content.push_str(&content);
            }
            if chunk.finish_reason.is_some() {
                result.finish_reason = chunk.finish_reason;
            }
        }

        Ok(result)
    }
}
