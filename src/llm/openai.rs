//! Chat Completions streaming
//!
//! Also used for Ollama and LM Studio, which expose the same endpoint.

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::{debug, error};

use super::format::{build_openai_endpoint, error_preview, take_sse_line};
use super::types::{ChatChunk, ChatMessage, ChatOptions, LlmError};

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct CompletionChunk {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize, Debug)]
struct CompletionChoice {
    delta: CompletionDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CompletionDelta {
    content: Option<String>,
}

pub fn stream_openai(
    client: &Client,
    api_key: &str,
    base_url: &str,
    messages: Vec<ChatMessage>,
    model: &str,
    options: &ChatOptions,
) -> Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>> {
    let endpoint = build_openai_endpoint(base_url);
    let api_key = api_key.to_string();
    let model = model.to_string();
    let options = options.clone();
    let client = client.clone();

    Box::pin(try_stream! {
        let payload = CompletionRequest {
            model: model.clone(),
            messages,
            stream: true,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        let mut request = client
            .post(&endpoint)
            .header("Content-Type", "application/json");
        // Local servers run without a key
        if !api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        debug!("Chat completions request: endpoint={}, model={}", endpoint, model);

        let response = request.json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Chat completions error: status={}, body={}", status.as_u16(), error_preview(&body));
            Err::<(), _>(LlmError::ApiError {
                status: status.as_u16(),
                message: body,
            })?;
            return;
        }

        let mut buffer = String::new();
        let mut body = response.bytes_stream();

        while let Some(bytes) = body.next().await {
            buffer.push_str(&String::from_utf8_lossy(&bytes?));

            while let Some(line) = take_sse_line(&mut buffer) {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return;
                }

                match serde_json::from_str::<CompletionChunk>(data) {
                    Ok(chunk) => {
                        if let Some(choice) = chunk.choices.into_iter().next() {
                            yield ChatChunk {
                                content: choice.delta.content,
                                finish_reason: choice.finish_reason,
                            };
                        }
                    }
                    Err(e) => debug!("Skipping unparsable chunk: {}, data: {}", e, data),
                }
            }
        }
    })
}
