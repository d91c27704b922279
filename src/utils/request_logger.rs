//! Backend call journal
//!
//! Appends one JSON line per generation call so a run can be audited after
//! the fact without raising the log level.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::time::Instant;
use uuid::Uuid;

/// One journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// `openai`, `anthropic`, ...
    pub provider: String,
    pub endpoint: String,
    pub api_key_masked: String,
    pub model: String,
    /// Prompt size in characters
    pub prompt_chars: usize,
    pub prompt_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Per-call timeout in seconds
    pub timeout: u64,
    /// `pending`, `success` or `error`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    /// `transient` or `permanent`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// JSONL journal with a bounded number of retained entries
pub struct RequestLogger {
    log_path: PathBuf,
    max_entries: usize,
    file: Mutex<Option<File>>,
}

impl RequestLogger {
    pub fn new(log_path: PathBuf) -> Self {
        if let Some(parent) = log_path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        Self {
            log_path,
            max_entries: 1000,
            file: Mutex::new(None),
        }
    }

    pub fn generate_request_id() -> String {
        Uuid::new_v4().to_string()[..8].to_string()
    }

    pub fn mask_api_key(api_key: &str) -> String {
        if api_key.is_empty() {
            String::new()
        } else if api_key.len() <= 8 {
            "*".repeat(api_key.len())
        } else {
            format!("{}...{}", &api_key[..4], &api_key[api_key.len() - 4..])
        }
    }

    /// Truncate on a char boundary
    fn truncate(s: &str, max_chars: usize) -> String {
        match s.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &s[..idx]),
            None => s.to_string(),
        }
    }

    /// Start a journal entry for a call about to be sent
    #[allow(clippy::too_many_arguments)]
    pub fn log_request(
        &self,
        request_id: &str,
        provider: &str,
        endpoint: &str,
        model: &str,
        prompt: &str,
        temperature: Option<f64>,
        max_tokens: Option<u32>,
        timeout: u64,
        api_key: &str,
    ) -> LogEntry {
        LogEntry {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
            api_key_masked: Self::mask_api_key(api_key),
            model: model.to_string(),
            prompt_chars: prompt.chars().count(),
            prompt_preview: Self::truncate(prompt, 200),
            temperature,
            max_tokens,
            timeout,
            status: "pending".to_string(),
            duration_ms: None,
            response_length: None,
            chunk_count: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn log_success(
        &self,
        mut entry: LogEntry,
        start_time: Instant,
        response_length: usize,
        chunk_count: usize,
    ) {
        entry.status = "success".to_string();
        entry.duration_ms = Some(start_time.elapsed().as_millis() as u64);
        entry.response_length = Some(response_length);
        entry.chunk_count = Some(chunk_count);
        self.write_entry(&entry);
    }

    pub fn log_error(
        &self,
        mut entry: LogEntry,
        start_time: Instant,
        error_kind: &str,
        error_message: &str,
    ) {
        entry.status = "error".to_string();
        entry.duration_ms = Some(start_time.elapsed().as_millis() as u64);
        entry.error_kind = Some(error_kind.to_string());
        entry.error_message = Some(Self::truncate(error_message, 500));
        self.write_entry(&entry);
    }

    fn write_entry(&self, entry: &LogEntry) {
        let mut file_guard = self.file.lock();

        if file_guard.is_none() {
            if let Ok(f) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
            {
                *file_guard = Some(f);
            }
        }

        if let Some(file) = file_guard.as_mut() {
            if let Ok(json) = serde_json::to_string(entry) {
                let _ = writeln!(file, "{}", json);
                let _ = file.flush();
            }
        }

        self.trim_if_needed(&mut file_guard);
    }

    /// Keep only the newest `max_entries` lines
    ///
    /// The append handle is dropped after a rewrite and reopened lazily.
    fn trim_if_needed(&self, file_guard: &mut Option<File>) {
        let Ok(file) = File::open(&self.log_path) else {
            return;
        };
        let lines: Vec<String> = BufReader::new(file).lines().map_while(Result::ok).collect();
        if lines.len() <= self.max_entries {
            return;
        }

        let keep = &lines[lines.len() - self.max_entries..];
        if let Ok(mut file) = File::create(&self.log_path) {
            for line in keep {
                let _ = writeln!(file, "{}", line);
            }
        }
        *file_guard = None;
    }
}
