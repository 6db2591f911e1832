//! Configuration for the upstream streaming connection.

use std::str::FromStr;

use url::Url;

use crate::config::{DEFAULT_UPSTREAM_BASE_URL, ServerConfig};

/// Silence threshold (ms) after which a turn ends once the upstream is
/// confident about the transcript. Tuned short so turns close promptly
/// during natural pauses.
pub const MIN_END_OF_TURN_SILENCE_MS: u32 = 200;

/// Hard silence ceiling (ms) after which a turn ends regardless of
/// confidence.
pub const MAX_TURN_SILENCE_MS: u32 = 1600;

/// Audio encodings accepted by the upstream streaming API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamEncoding {
    /// PCM signed 16-bit little-endian (default)
    #[default]
    PcmS16le,
    /// PCM mu-law (telephony, 8kHz)
    PcmMulaw,
}

impl UpstreamEncoding {
    /// Convert to the API query parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PcmS16le => "pcm_s16le",
            Self::PcmMulaw => "pcm_mulaw",
        }
    }
}

impl FromStr for UpstreamEncoding {
    type Err = ();

    /// Parse from an encoding string (case-insensitive). Unknown values
    /// fall back to PCM S16LE.
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "pcm_mulaw" | "mulaw" | "ulaw" => Self::PcmMulaw,
            _ => Self::PcmS16le,
        })
    }
}

/// Connection parameters for the upstream streaming API.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// API key; sessions cannot be opened without it.
    pub api_key: Option<String>,
    /// Base WebSocket URL, overridable for self-hosted gateways and tests.
    pub base_url: String,
    /// Audio encoding of the frames relayed from clients.
    pub encoding: UpstreamEncoding,
    /// Request transcripts as immutable formatted turns.
    pub format_turns: bool,
    pub min_end_of_turn_silence_ms: u32,
    pub max_turn_silence_ms: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            encoding: UpstreamEncoding::default(),
            format_turns: true,
            min_end_of_turn_silence_ms: MIN_END_OF_TURN_SILENCE_MS,
            max_turn_silence_ms: MAX_TURN_SILENCE_MS,
        }
    }
}

impl UpstreamConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            api_key: config.assemblyai_api_key.clone(),
            base_url: config.upstream_base_url.clone(),
            ..Default::default()
        }
    }

    /// Build the WebSocket URL with query parameters.
    pub fn build_websocket_url(&self, sample_rate: u32) -> String {
        let mut url = String::with_capacity(256);

        url.push_str(&self.base_url);
        url.push_str("/v3/ws");

        url.push_str("?sample_rate=");
        url.push_str(&sample_rate.to_string());

        url.push_str("&encoding=");
        url.push_str(self.encoding.as_str());

        url.push_str("&format_turns=");
        url.push_str(if self.format_turns { "true" } else { "false" });

        url.push_str("&min_end_of_turn_silence_when_confident=");
        url.push_str(&self.min_end_of_turn_silence_ms.to_string());

        url.push_str("&max_turn_silence=");
        url.push_str(&self.max_turn_silence_ms.to_string());

        url
    }

    /// Host (with non-default port) for the HTTP `Host` header of the
    /// WebSocket handshake. `None` when the base URL cannot be parsed.
    pub fn host(&self) -> Option<String> {
        let url = Url::parse(&self.base_url).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }
}
