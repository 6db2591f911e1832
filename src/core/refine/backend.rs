//! Refinement backend strategies.
//!
//! The backend is a closed set of variants behind one operation, selected
//! once at startup. All three send the same non-rewriting instruction and
//! are expected to return a single refined text string; the response field
//! name varies by backend, so extraction tries an ordered candidate list.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};

use super::RefineError;
use crate::config::{RefineProvider, ServerConfig};

/// Instruction sent with every refinement request. Deliberately forbids any
/// rewriting: the backend may only regroup the given lines.
pub const REFINE_INSTRUCTION: &str = "Reorganize the following transcript lines into readable \
paragraphs. Do not alter, add, or remove any word or character; only group the existing lines \
into paragraphs. Return the reorganized text and nothing else.";

/// Hosted task endpoint of the transcription vendor.
pub const LEMUR_TASK_URL: &str = "https://api.assemblyai.com/lemur/v3/generate/task";

/// Base URL for direct generative-model calls.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Top-level response fields tried in order when extracting refined text.
const RESPONSE_TEXT_FIELDS: &[&str] = &["response", "text", "output", "result", "content"];

/// One of the interchangeable refinement backends.
#[derive(Debug, Clone)]
pub enum RefineBackend {
    /// Hosted task API keyed by the transcription vendor's API key.
    Lemur { api_key: String, model: String },
    /// Generic JSON-over-HTTP backend with a configurable endpoint and
    /// optional `Authorization` header value.
    Http {
        url: String,
        auth_header: Option<String>,
        model: String,
    },
    /// Direct generative-model call.
    Gemini { api_key: String, model: String },
}

impl RefineBackend {
    /// Build the configured backend, or `None` when the selected provider
    /// is missing its credentials or endpoint. Refinement then degrades to
    /// raw paragraphs only.
    pub fn from_config(config: &ServerConfig) -> Option<Self> {
        match config.refine_provider {
            RefineProvider::Lemur => {
                config
                    .assemblyai_api_key
                    .clone()
                    .map(|api_key| RefineBackend::Lemur {
                        api_key,
                        model: config.refine_model.clone(),
                    })
            }
            RefineProvider::Http => config.refine_http_url.clone().map(|url| RefineBackend::Http {
                url,
                auth_header: config.refine_http_auth_header.clone(),
                model: config.refine_model.clone(),
            }),
            RefineProvider::Gemini => {
                config
                    .google_api_key
                    .clone()
                    .map(|api_key| RefineBackend::Gemini {
                        api_key,
                        model: config.refine_model.clone(),
                    })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RefineBackend::Lemur { .. } => "lemur",
            RefineBackend::Http { .. } => "http",
            RefineBackend::Gemini { .. } => "gemini",
        }
    }

    /// Run one refinement call. A 429 maps to
    /// [`RefineError::RateLimited`] with the `Retry-After` hint when the
    /// backend provides one; any other non-success status, transport
    /// failure, unrecognizable response shape, or empty output is a
    /// permanent failure for this attempt.
    pub async fn refine(&self, client: &reqwest::Client, text: &str) -> Result<String, RefineError> {
        let request = match self {
            RefineBackend::Lemur { api_key, model } => client
                .post(LEMUR_TASK_URL)
                .header("Authorization", api_key)
                .json(&json!({
                    "prompt": REFINE_INSTRUCTION,
                    "input_text": text,
                    "final_model": model,
                })),

            RefineBackend::Http {
                url,
                auth_header,
                model,
            } => {
                let mut request = client.post(url).json(&json!({
                    "model": model,
                    "prompt": REFINE_INSTRUCTION,
                    "text": text,
                }));
                if let Some(value) = auth_header {
                    request = request.header("Authorization", value);
                }
                request
            }

            RefineBackend::Gemini { api_key, model } => client
                .post(format!("{GEMINI_BASE_URL}/{model}:generateContent"))
                .query(&[("key", api_key.as_str())])
                .json(&json!({
                    "contents": [{
                        "parts": [{ "text": format!("{REFINE_INSTRUCTION}\n\n{text}") }]
                    }]
                })),
        };

        let response = request.send().await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(RefineError::RateLimited { retry_after });
        }
        if !response.status().is_success() {
            return Err(RefineError::BackendStatus(response.status().as_u16()));
        }

        let body: Value = response.json().await?;
        let refined = extract_refined_text(&body).ok_or(RefineError::MissingText)?;
        if refined.trim().is_empty() {
            return Err(RefineError::EmptyOutput);
        }
        Ok(refined)
    }
}

/// Pull the refined text out of a backend response, trying the ordered
/// candidate fields first and the generative-model response shape last.
pub(crate) fn extract_refined_text(body: &Value) -> Option<String> {
    for field in RESPONSE_TEXT_FIELDS {
        if let Some(text) = body.get(field).and_then(|v| v.as_str()) {
            return Some(text.to_string());
        }
    }

    body.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
        .map(str::to_string)
}
