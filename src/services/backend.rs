//! Generation backend adapter
//!
//! The pipeline only ever sees [`GenerationBackend::generate`]: one prompt in,
//! one piece of text or a classified error out. Retry policy lives in the
//! scheduler, not here.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AppConfig, BackendConfig, Provider};
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmError};
use crate::utils::RequestLogger;

/// Per-call generation limits
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
}

impl GenerateOptions {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout(),
        }
    }
}

/// Classified backend failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Retrying may help: timeouts, rate limits, dropped connections
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Retrying will not help: bad credentials, rejected request
    #[error("permanent backend error: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Transient(_) => "transient",
            BackendError::Permanent(_) => "permanent",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BackendError::Transient(m) | BackendError::Permanent(m) => m,
        }
    }
}

impl From<LlmError> for BackendError {
    fn from(e: LlmError) -> Self {
        if e.is_transient() {
            BackendError::Transient(e.to_string())
        } else {
            BackendError::Permanent(e.to_string())
        }
    }
}

/// Anything that can turn a prompt into documentation text
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, options: &GenerateOptions)
        -> Result<String, BackendError>;
}

pub type SharedBackend = Arc<dyn GenerationBackend>;

/// Backend for the configured provider
pub fn create_backend(
    config: &AppConfig,
    system_prompt: &str,
) -> Result<SharedBackend, BackendError> {
    if config.backend.provider == Provider::Offline {
        return Ok(Arc::new(OfflineBackend));
    }

    let journal = config
        .request_log
        .as_ref()
        .map(|path| Arc::new(RequestLogger::new(path.clone())));
    let backend = ChatBackend::new(&config.backend, system_prompt, journal)?;
    Ok(Arc::new(backend))
}

/// Hosted or local chat model
pub struct ChatBackend {
    client: LlmClient,
    provider: Provider,
    model: String,
    system_prompt: String,
    journal: Option<Arc<RequestLogger>>,
}

impl ChatBackend {
    pub fn new(
        config: &BackendConfig,
        system_prompt: &str,
        journal: Option<Arc<RequestLogger>>,
    ) -> Result<Self, BackendError> {
        let api_key = config.resolve_api_key().unwrap_or_default();
        if api_key.is_empty() && !config.provider.is_local() {
            return Err(BackendError::Permanent(format!(
                "no API key configured for {}",
                config.provider.as_str()
            )));
        }

        let client = LlmClient::new(
            api_key,
            config.resolve_base_url(),
            config.api_format(),
            config.timeout(),
        )?;

        Ok(Self {
            client,
            provider: config.provider,
            model: config.model.clone(),
            system_prompt: system_prompt.to_string(),
            journal,
        })
    }
}

#[async_trait]
impl GenerationBackend for ChatBackend {
    fn name(&self) -> &str {
        self.provider.as_str()
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, BackendError> {
        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(prompt),
        ];
        let chat_options = ChatOptions {
            temperature: Some(options.temperature),
            max_tokens: Some(options.max_tokens),
        };

        let started = Instant::now();
        let entry = self.journal.as_ref().map(|journal| {
            journal.log_request(
                &RequestLogger::generate_request_id(),
                self.provider.as_str(),
                &self.client.endpoint(),
                &self.model,
                prompt,
                chat_options.temperature,
                chat_options.max_tokens,
                options.timeout.as_secs(),
                self.client.api_key(),
            )
        });

        let call = self
            .client
            .stream_and_collect(messages, &self.model, chat_options);
        let result = match tokio::time::timeout(options.timeout, call).await {
            Err(_) => Err(BackendError::Transient(format!(
                "no response within {}s",
                options.timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(BackendError::from(e)),
            Ok(Ok(collected)) if collected.content.trim().is_empty() => Err(
                BackendError::Transient("backend returned an empty response".to_string()),
            ),
            Ok(Ok(collected)) => Ok(collected),
        };

        match (&result, self.journal.as_ref().zip(entry)) {
            (Ok(collected), Some((journal, entry))) => journal.log_success(
                entry,
                started,
                collected.content.len(),
                collected.chunk_count,
            ),
            (Err(e), Some((journal, entry))) => {
                journal.log_error(entry, started, e.kind(), e.message())
            }
            _ => {}
        }

        match result {
            Ok(collected) => {
                debug!(
                    "Generated {} chars in {}ms (finish: {:?})",
                    collected.content.len(),
                    started.elapsed().as_millis(),
                    collected.finish_reason
                );
                Ok(collected.content)
            }
            Err(e) => {
                warn!("Backend call failed: {}", e);
                Err(e)
            }
        }
    }
}

/// Deterministic local output; no network
///
/// Useful for dry runs and for exercising the publish path without a model.
pub struct OfflineBackend;

#[async_trait]
impl GenerationBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    async fn generate(
        &self,
        prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<String, BackendError> {
        let subject = prompt
            .lines()
            .find_map(|l| l.strip_prefix("Subject: "))
            .unwrap_or("this item")
            .trim();
        Ok(format!(
            "## Overview\n\nReference page for `{}`. Generated without a model; rerun with a \
             configured provider for a full description.\n",
            subject
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    fn options() -> GenerateOptions {
        GenerateOptions {
            max_tokens: 100,
            temperature: 0.2,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_llm_errors_are_classified() {
        let rate_limited = LlmError::ApiError {
            status: 429,
            message: "slow down".into(),
        };
        assert!(BackendError::from(rate_limited).is_transient());

        let unauthorized = LlmError::ApiError {
            status: 401,
            message: "bad key".into(),
        };
        assert_eq!(BackendError::from(unauthorized).kind(), "permanent");
    }

    #[tokio::test]
    async fn test_offline_backend_names_subject() {
        let text = OfflineBackend
            .generate("Document this.\nSubject: net::Socket\n", &options())
            .await
            .unwrap();
        assert!(text.contains("`net::Socket`"));
    }

    #[test]
    fn test_remote_provider_without_key_is_rejected() {
        let config = BackendConfig {
            provider: Provider::OpenAi,
            api_key: String::new(),
            base_url: Some("http://127.0.0.1:9".into()),
            model: "gpt-4o".into(),
            ..Default::default()
        };
        if std::env::var("OPENAI_API_KEY").map_or(true, |k| k.is_empty()) {
            assert!(ChatBackend::new(&config, "sys", None).is_err());
        }
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let config = BackendConfig {
            provider: Provider::Ollama,
            model: "llama3.1".into(),
            ..Default::default()
        };
        let backend = ChatBackend::new(&config, "sys", None).unwrap();
        assert_eq!(backend.name(), "ollama");
    }

    #[tokio::test]
    async fn test_chat_backend_unreachable_server_is_transient() {
        let config = BackendConfig {
            provider: Provider::LmStudio,
            base_url: Some("http://127.0.0.1:9/v1".into()),
            model: "local".into(),
            ..Default::default()
        };
        let backend = ChatBackend::new(&config, "sys", None).unwrap();
        let err = backend.generate("hello", &options()).await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }

    #[tokio::test]
    async fn test_scripted_backend_rules() {
        let backend = ScriptedBackend::new()
            .fail_permanently("BAD")
            .fail_transiently("FLAKY", 2);

        assert!(!backend.generate("BAD", &options()).await.unwrap_err().is_transient());
        assert!(backend.generate("FLAKY", &options()).await.unwrap_err().is_transient());
        assert!(backend.generate("FLAKY", &options()).await.unwrap_err().is_transient());
        assert!(backend.generate("FLAKY", &options()).await.is_ok());
        assert_eq!(backend.call_count(), 4);
    }
}
