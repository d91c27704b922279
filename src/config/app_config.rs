//! Pipeline configuration
//!
//! Loaded once from a JSON file (or built-in defaults), resolved against the
//! directory the file lives in, and validated before any task is planned.
//! A validation failure is the only way a run ends up `crashed`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::llm::{detect_api_format, ApiFormat};

/// Config file names probed when no explicit path is given
pub const CONFIG_FILE_CANDIDATES: &[&str] = &["autodoc.json", ".autodoc.json"];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, String),

    #[error("source root is not a readable directory: {0}")]
    SourceRoot(PathBuf),

    #[error("invalid glob pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("no API key for provider `{0}` (set backend.api_key or {1})")]
    MissingCredentials(String, &'static str),
}

/// Generation backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Pick OpenAI or Anthropic wire format from the model name
    Auto,
    OpenAi,
    Anthropic,
    Ollama,
    LmStudio,
    /// Deterministic local renderer, no network
    Offline,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Auto => "auto",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Ollama => "ollama",
            Provider::LmStudio => "lmstudio",
            Provider::Offline => "offline",
        }
    }

    /// Providers that run on the local machine and need no credentials
    pub fn is_local(&self) -> bool {
        matches!(self, Provider::Ollama | Provider::LmStudio | Provider::Offline)
    }
}

/// Which extraction strategy to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorMode {
    /// Structural when the capability probe succeeds, heuristic otherwise
    #[default]
    Auto,
    Structural,
    Heuristic,
}

/// Per-level enable flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelToggles {
    #[serde(default = "default_true")]
    pub project: bool,
    #[serde(default = "default_true")]
    pub module: bool,
    #[serde(default = "default_true")]
    pub unit: bool,
}

impl Default for LevelToggles {
    fn default() -> Self {
        Self {
            project: true,
            module: true,
            unit: true,
        }
    }
}

/// Output roots per level, relative to `docs_dir`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLayout {
    #[serde(default = "default_project_dir")]
    pub project_dir: String,
    #[serde(default = "default_module_dir")]
    pub module_dir: String,
    #[serde(default = "default_unit_dir")]
    pub unit_dir: String,
}

fn default_project_dir() -> String {
    "generated".to_string()
}

fn default_module_dir() -> String {
    "generated/modules".to_string()
}

fn default_unit_dir() -> String {
    "generated/api".to_string()
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            project_dir: default_project_dir(),
            module_dir: default_module_dir(),
            unit_dir: default_unit_dir(),
        }
    }
}

/// Backend selection and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,

    #[serde(default = "default_model")]
    pub model: String,

    /// Falls back to the provider's environment variable when empty
    #[serde(default)]
    pub api_key: String,

    /// Provider default when unset
    #[serde(default)]
    pub base_url: Option<String>,

    /// 0.0 - 2.0
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> Provider {
    Provider::Anthropic
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Wire format actually spoken to the provider
    pub fn api_format(&self) -> ApiFormat {
        match self.provider {
            Provider::Anthropic => ApiFormat::Anthropic,
            Provider::Auto => detect_api_format(&self.model),
            _ => ApiFormat::OpenAi,
        }
    }

    fn credentials_env(&self) -> &'static str {
        match self.api_format() {
            ApiFormat::Anthropic => "ANTHROPIC_API_KEY",
            ApiFormat::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Explicit key, else the provider's environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var(self.credentials_env())
            .ok()
            .filter(|k| !k.is_empty())
    }

    pub fn resolve_base_url(&self) -> String {
        if let Some(url) = self.base_url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }
        match self.provider {
            Provider::Ollama => "http://localhost:11434/v1".to_string(),
            Provider::LmStudio => "http://localhost:1234/v1".to_string(),
            _ => match self.api_format() {
                ApiFormat::Anthropic => "https://api.anthropic.com".to_string(),
                ApiFormat::OpenAi => "https://api.openai.com".to_string(),
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry policy for transient backend errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Including the first attempt
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Backend response cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/autodoc/responses")
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
        }
    }
}

/// HTTP host settings for `serve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,

    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,

    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Larger files are not candidates
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    #[serde(default)]
    pub force_regenerate: bool,

    #[serde(default)]
    pub levels: LevelToggles,

    #[serde(default)]
    pub output: OutputLayout,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub extractor: ExtractorMode,

    #[serde(default)]
    pub cache: CacheSettings,

    /// Body excerpt length carried in unit prompts
    #[serde(default = "default_max_excerpt_chars")]
    pub max_excerpt_chars: usize,

    #[serde(default = "default_true")]
    pub enable_cross_references: bool,

    /// JSONL call journal, disabled when unset
    #[serde(default)]
    pub request_log: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_true() -> bool {
    true
}

fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from(".cache/autodoc/manifest.json")
}

fn default_include_patterns() -> Vec<String> {
    [
        "**/*.h", "**/*.hpp", "**/*.cpp", "**/*.cc", "**/*.c", "**/*.rs", "**/*.py", "**/*.js",
        "**/*.ts", "**/*.java", "**/*.go",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_patterns() -> Vec<String> {
    [
        "**/build/**",
        "**/third_party/**",
        "**/external/**",
        "**/target/**",
        "**/node_modules/**",
        "**/.git/**",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_concurrency_limit() -> usize {
    3
}

fn default_max_excerpt_chars() -> usize {
    1200
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            docs_dir: default_docs_dir(),
            manifest_path: default_manifest_path(),
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            max_file_size: default_max_file_size(),
            concurrency_limit: default_concurrency_limit(),
            force_regenerate: false,
            levels: LevelToggles::default(),
            output: OutputLayout::default(),
            backend: BackendConfig::default(),
            retry: RetrySettings::default(),
            extractor: ExtractorMode::default(),
            cache: CacheSettings::default(),
            max_excerpt_chars: default_max_excerpt_chars(),
            enable_cross_references: true,
            request_log: None,
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a JSON file; relative paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let mut config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e.to_string()))?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base);
        Ok(config)
    }

    /// Explicit file, else the first candidate in `base`, else defaults
    pub fn load_or_default(explicit: Option<&Path>, base: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        for name in CONFIG_FILE_CANDIDATES {
            let candidate = base.join(name);
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        let mut config = Self::default();
        config.resolve_paths(base);
        Ok(config)
    }

    /// Anchor every relative path at `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        anchor(&mut self.source_root);
        anchor(&mut self.docs_dir);
        anchor(&mut self.manifest_path);
        anchor(&mut self.cache.dir);
        if let Some(log) = self.request_log.as_mut() {
            anchor(log);
        }
    }

    /// Check everything a run depends on before any task starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.source_root.is_dir() || fs::read_dir(&self.source_root).is_err() {
            return Err(ConfigError::SourceRoot(self.source_root.clone()));
        }

        if self.concurrency_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency_limit",
                message: "must be a positive integer".to_string(),
            });
        }

        if self.include_patterns.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "include_patterns",
                message: "at least one pattern is required".to_string(),
            });
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        }

        if !(self.levels.project || self.levels.module || self.levels.unit) {
            return Err(ConfigError::InvalidValue {
                field: "levels",
                message: "at least one level must be enabled".to_string(),
            });
        }

        self.validate_layout()?;

        let backend = &self.backend;
        if !(0.0..=2.0).contains(&backend.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "backend.temperature",
                message: format!("{} is outside 0.0 - 2.0", backend.temperature),
            });
        }
        if backend.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "backend.max_tokens",
                message: "must be positive".to_string(),
            });
        }
        if backend.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "backend.timeout_secs",
                message: "must be positive".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts",
                message: "must be at least 1".to_string(),
            });
        }
        if !backend.provider.is_local() && backend.resolve_api_key().is_none() {
            return Err(ConfigError::MissingCredentials(
                backend.provider.as_str().to_string(),
                backend.credentials_env(),
            ));
        }

        Ok(())
    }

    fn validate_layout(&self) -> Result<(), ConfigError> {
        let dirs = [
            ("output.project_dir", &self.output.project_dir),
            ("output.module_dir", &self.output.module_dir),
            ("output.unit_dir", &self.output.unit_dir),
        ];
        for (field, dir) in dirs {
            let path = Path::new(dir.as_str());
            let escapes = path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if dir.is_empty() || escapes {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: format!("`{}` must be a relative path inside docs_dir", dir),
                });
            }
        }
        let (project, module, unit) = (
            &self.output.project_dir,
            &self.output.module_dir,
            &self.output.unit_dir,
        );
        if module == unit || project == unit {
            return Err(ConfigError::InvalidValue {
                field: "output",
                message: "unit_dir must differ from project_dir and module_dir".to_string(),
            });
        }
        if project == module {
            return Err(ConfigError::InvalidValue {
                field: "output",
                message: "project_dir and module_dir must differ".to_string(),
            });
        }
        Ok(())
    }
}
