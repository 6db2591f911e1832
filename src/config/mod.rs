//! Configuration for the transcription relay server
//!
//! Configuration is assembled from three sources with the priority
//! YAML file > environment variables > built-in defaults. A `.env` file,
//! if present, is loaded into the environment by `main` before this module
//! runs.
//!
//! # Example
//! ```rust,no_run
//! use scribe_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallback
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::utils::validate_backend_url;

/// Default quiet period after which buffered transcript text is flushed.
pub const DEFAULT_FLUSH_WINDOW: Duration = Duration::from_secs(10);

/// Default minimum spacing between refinement calls for one session.
pub const DEFAULT_REFINE_COOLDOWN: Duration = Duration::from_secs(5);

/// Default delay before retrying a rate-limited refinement call when the
/// backend gives no hint of its own.
pub const DEFAULT_REFINE_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Default base URL of the upstream streaming transcription service.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "wss://streaming.assemblyai.com";

/// Errors that can occur while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Selectable refinement backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefineProvider {
    /// Hosted task API of the upstream transcription vendor
    Lemur,
    /// Generic JSON-over-HTTP backend with a configurable endpoint
    Http,
    /// Direct generative-model call
    #[default]
    Gemini,
}

impl std::fmt::Display for RefineProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefineProvider::Lemur => write!(f, "lemur"),
            RefineProvider::Http => write!(f, "http"),
            RefineProvider::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for RefineProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lemur" => Ok(RefineProvider::Lemur),
            "http" => Ok(RefineProvider::Http),
            "gemini" => Ok(RefineProvider::Gemini),
            _ => Err(ConfigError::Invalid(format!(
                "Unsupported refinement provider: {s}. Supported providers: lemur, http, gemini"
            ))),
        }
    }
}

/// Server configuration
///
/// Contains everything the relay needs at runtime:
/// - Server settings (host, port)
/// - Upstream transcription provider key and endpoint
/// - Refinement backend selection and tuning
/// - Text buffering window
/// - Security settings (CORS, rate limiting)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    /// API key for the upstream streaming transcription service.
    /// Sessions cannot be established without it.
    pub assemblyai_api_key: Option<String>,
    /// Base URL of the upstream streaming endpoint. Overridable for
    /// self-hosted gateways and tests.
    pub upstream_base_url: String,

    /// Google API key, required when the `gemini` refinement provider is
    /// selected.
    pub google_api_key: Option<String>,

    // Refinement backend
    pub refine_provider: RefineProvider,
    /// Model identifier passed to the selected backend.
    pub refine_model: String,
    /// Endpoint for the generic HTTP backend (required when selected).
    pub refine_http_url: Option<String>,
    /// Full `Authorization` header value for the generic HTTP backend.
    pub refine_http_auth_header: Option<String>,
    /// Minimum spacing between refinement calls per session.
    pub refine_cooldown: Duration,
    /// Fallback delay before retrying a rate-limited refinement call.
    pub refine_retry_backoff: Duration,

    /// Quiet period after which buffered transcript text is flushed into a
    /// paragraph.
    pub buffer_flush_window: Duration,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all).
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            assemblyai_api_key: None,
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            google_api_key: None,
            refine_provider: RefineProvider::default(),
            refine_model: "gemini-2.0-flash-exp".to_string(),
            refine_http_url: None,
            refine_http_auth_header: None,
            refine_cooldown: DEFAULT_REFINE_COOLDOWN,
            refine_retry_backoff: DEFAULT_REFINE_RETRY_BACKOFF,
            buffer_flush_window: DEFAULT_FLUSH_WINDOW,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
        }
    }
}

/// Zeroize secret fields when the configuration is dropped so API keys do
/// not linger in freed memory.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.assemblyai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.google_api_key {
            key.zeroize();
        }
        if let Some(ref mut header) = self.refine_http_auth_header {
            header.zeroize();
        }
    }
}

/// YAML configuration file shape. Every field is optional; unset fields
/// fall back to environment variables and defaults.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    upstream: FileUpstream,
    #[serde(default)]
    refine: FileRefine,
    #[serde(default)]
    buffer: FileBuffer,
    #[serde(default)]
    security: FileSecurity,
}

#[derive(Debug, Default, Deserialize)]
struct FileServer {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct FileUpstream {
    api_key: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileRefine {
    provider: Option<String>,
    model: Option<String>,
    http_url: Option<String>,
    http_auth_header: Option<String>,
    google_api_key: Option<String>,
    cooldown_seconds: Option<u64>,
    retry_backoff_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileBuffer {
    flush_window_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FileSecurity {
    cors_allowed_origins: Option<String>,
    rate_limit_requests_per_second: Option<u32>,
    rate_limit_burst_size: Option<u32>,
}

impl ServerConfig {
    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ServerConfig::default();

        let refine_provider = match env_opt("REFINE_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => defaults.refine_provider,
        };

        Ok(Self {
            host: env_opt("HOST").unwrap_or_else(|| defaults.host.clone()),
            port: env_parse("PORT", defaults.port)?,
            assemblyai_api_key: env_opt("ASSEMBLYAI_API_KEY"),
            upstream_base_url: env_opt("UPSTREAM_BASE_URL")
                .unwrap_or_else(|| defaults.upstream_base_url.clone()),
            google_api_key: env_opt("GOOGLE_API_KEY"),
            refine_provider,
            refine_model: env_opt("REFINE_MODEL").unwrap_or_else(|| defaults.refine_model.clone()),
            refine_http_url: env_opt("REFINE_HTTP_URL"),
            refine_http_auth_header: env_opt("REFINE_HTTP_AUTH_HEADER"),
            refine_cooldown: env_duration_secs("REFINE_COOLDOWN_SECONDS", defaults.refine_cooldown)?,
            refine_retry_backoff: env_duration_secs(
                "REFINE_RETRY_BACKOFF_SECONDS",
                defaults.refine_retry_backoff,
            )?,
            buffer_flush_window: env_duration_secs(
                "TEXT_BUFFER_SECONDS",
                defaults.buffer_flush_window,
            )?,
            cors_allowed_origins: env_opt("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: env_parse(
                "RATE_LIMIT_REQUESTS_PER_SECOND",
                defaults.rate_limit_requests_per_second,
            )?,
            rate_limit_burst_size: env_parse(
                "RATE_LIMIT_BURST_SIZE",
                defaults.rate_limit_burst_size,
            )?,
        })
    }

    /// Load configuration from a YAML file, falling back to environment
    /// variables (and then defaults) for unset fields.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let file: FileConfig = serde_yaml::from_str(&raw)?;
        let mut config = Self::from_env()?;

        if let Some(host) = file.server.host {
            config.host = host;
        }
        if let Some(port) = file.server.port {
            config.port = port;
        }
        if let Some(key) = file.upstream.api_key {
            config.assemblyai_api_key = Some(key);
        }
        if let Some(url) = file.upstream.base_url {
            config.upstream_base_url = url;
        }
        if let Some(provider) = file.refine.provider {
            config.refine_provider = provider.parse()?;
        }
        if let Some(model) = file.refine.model {
            config.refine_model = model;
        }
        if let Some(url) = file.refine.http_url {
            config.refine_http_url = Some(url);
        }
        if let Some(header) = file.refine.http_auth_header {
            config.refine_http_auth_header = Some(header);
        }
        if let Some(key) = file.refine.google_api_key {
            config.google_api_key = Some(key);
        }
        if let Some(secs) = file.refine.cooldown_seconds {
            config.refine_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = file.refine.retry_backoff_seconds {
            config.refine_retry_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = file.buffer.flush_window_seconds {
            config.buffer_flush_window = Duration::from_secs(secs);
        }
        if let Some(origins) = file.security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = file.security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = file.security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }

        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Hard misconfiguration (unusable port, HTTP backend selected without
    /// a usable URL) is an error. Missing API keys only warn: the server can
    /// start without them, sessions and refinement then fail per-operation
    /// with their own error paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("Server port must not be 0".to_string()));
        }

        if self.refine_provider == RefineProvider::Http {
            match &self.refine_http_url {
                Some(url) => {
                    validate_backend_url(url).map_err(|e| {
                        ConfigError::Invalid(format!("Refinement backend URL rejected: {e}"))
                    })?;
                }
                None => {
                    return Err(ConfigError::Invalid(
                        "REFINE_HTTP_URL is required when the http refinement provider is selected"
                            .to_string(),
                    ));
                }
            }
        }

        if self.assemblyai_api_key.is_none() {
            warn!("ASSEMBLYAI_API_KEY not set; transcription sessions cannot be established");
        }
        if self.refine_provider == RefineProvider::Gemini && self.google_api_key.is_none() {
            warn!("GOOGLE_API_KEY not set but gemini refinement provider selected; refinement disabled");
        }
        if self.refine_provider == RefineProvider::Lemur && self.assemblyai_api_key.is_none() {
            warn!("ASSEMBLYAI_API_KEY not set but lemur refinement provider selected; refinement disabled");
        }

        Ok(())
    }

    /// Socket address string for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("Cannot parse {name}={raw}"))),
        None => Ok(default),
    }
}

fn env_duration_secs(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(match env_opt(name) {
        Some(raw) => Duration::from_secs(
            raw.parse()
                .map_err(|_| ConfigError::Invalid(format!("Cannot parse {name}={raw}")))?,
        ),
        None => default,
    })
}
