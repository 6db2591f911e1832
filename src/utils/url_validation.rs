//! URL validation for the configurable HTTP refinement backend
//!
//! The refinement backend URL is operator-supplied configuration, so the
//! only checks here are structural: the URL must parse, must use an HTTP(S)
//! scheme, and must carry a host. Plain HTTP is allowed for on-premise
//! backends but logged, since transcript text travels over the connection.

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during backend URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTP or HTTPS, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,
}

/// Validate a refinement backend URL from configuration.
///
/// Returns the parsed [`Url`] so callers can reuse it without a second parse.
pub fn validate_backend_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "https" => {}
        "http" => {
            warn!(
                url = %url,
                "Refinement backend uses plain HTTP; transcript text will not be encrypted in transit"
            );
        }
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none() {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}
