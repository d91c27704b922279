//! Messages API streaming

use async_stream::try_stream;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tracing::{debug, error};

use super::format::{build_anthropic_endpoint, error_preview, take_sse_line};
use super::types::{ChatChunk, ChatMessage, ChatOptions, LlmError};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize, Debug)]
struct MessagesEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<MessagesDelta>,
}

#[derive(Deserialize, Debug)]
struct MessagesDelta {
    #[serde(rename = "type")]
    delta_type: Option<String>,
    text: Option<String>,
    stop_reason: Option<String>,
}

/// The system message travels in its own field; everything else is a turn.
fn split_system(messages: Vec<ChatMessage>) -> (Option<String>, Vec<ChatMessage>) {
    let mut system = None;
    let mut turns = Vec::with_capacity(messages.len());
    for msg in messages {
        if msg.role == "system" {
            system = Some(msg.content);
        } else {
            turns.push(msg);
        }
    }
    (system, turns)
}

fn event_to_chunk(event: MessagesEvent) -> Option<ChatChunk> {
    match event.event_type.as_str() {
        "content_block_delta" => {
            let delta = event.delta?;
            if delta.delta_type.as_deref() != Some("text_delta") {
                return None;
            }
            delta.text.map(|text| ChatChunk {
                content: Some(text),
                finish_reason: None,
            })
        }
        "message_delta" => event.delta?.stop_reason.map(|reason| ChatChunk {
            content: None,
            finish_reason: Some(reason),
        }),
        "message_stop" => Some(ChatChunk {
            content: None,
            finish_reason: Some("stop".to_string()),
        }),
        _ => None,
    }
}

pub fn stream_anthropic(
    client: &Client,
    api_key: &str,
    base_url: &str,
    messages: Vec<ChatMessage>,
    model: &str,
    options: &ChatOptions,
) -> Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>> {
    let endpoint = build_anthropic_endpoint(base_url);
    let api_key = api_key.to_string();
    let model = model.to_string();
    let options = options.clone();
    let client = client.clone();

    Box::pin(try_stream! {
        let (system, turns) = split_system(messages);
        let payload = MessagesRequest {
            model: model.clone(),
            messages: turns,
            system,
            stream: true,
            max_tokens: options.max_tokens.unwrap_or(4096),
            temperature: options.temperature,
        };

        debug!("Messages request: endpoint={}, model={}", endpoint, model);

        let response = client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Messages API error: status={}, body={}", status.as_u16(), error_preview(&body));
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

                match serde_json::from_str::<MessagesEvent>(data) {
                    Ok(event) => {
                        let finished = event.event_type == "message_stop";
                        if let Some(chunk) = event_to_chunk(event) {
                            yield chunk;
                        }
                        if finished {
                            return;
                        }
                    }
                    Err(e) => debug!("Skipping unparsable event: {}, data: {}", e, data),
                }
            }
        }
    })
}
