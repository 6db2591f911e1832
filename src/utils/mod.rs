pub mod url_validation;
pub use url_validation::{UrlValidationError, validate_backend_url};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current UTC time as an RFC 3339 string, used for client-facing event
/// timestamps. Formatting `now_utc()` with the well-known RFC 3339
/// description cannot fail in practice, so an empty string is returned
/// instead of threading an error through every event constructor.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_rfc3339_shape() {
        let ts = now_rfc3339();
        assert!(ts.len() >= 20);
        assert!(ts.contains('T'));
        assert!(ts.ends_with('Z') || ts.contains('+'));
    }
}
