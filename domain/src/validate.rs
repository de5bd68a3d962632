//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use url::Url;

use crate::Code;
use crate::CoreError;

/// Bounds for user-supplied aliases.
pub const MIN_ALIAS_LEN: usize = 3;
pub const MAX_ALIAS_LEN: usize = 30;

const MAX_URL_LEN: usize = 2048;

/// Validate an original URL: http/https scheme, a host, and a reasonable
/// length. Returns the trimmed URL.
pub fn validate_original_url(s: &str) -> Result<String, CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUrl("url is required".into()));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(CoreError::InvalidUrl("too long".into()));
    }
    let parsed = Url::parse(trimmed).map_err(|e| CoreError::InvalidUrl(e.to_string()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(CoreError::InvalidUrl(
            "url must start with http or https".into(),
        ));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(trimmed.to_string()),
        _ => Err(CoreError::InvalidUrl("url must include host".into())),
    }
}

/// True if `s` is 3-30 characters of ASCII letters, digits, `_` or `-`.
pub fn is_valid_alias(s: &str) -> bool {
    (MIN_ALIAS_LEN..=MAX_ALIAS_LEN).contains(&s.len())
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate a custom alias and turn it into a `Code`.
pub fn validate_custom_alias(s: &str) -> Result<Code, CoreError> {
    if !is_valid_alias(s) {
        return Err(CoreError::InvalidAlias);
    }
    Code::new(s).map_err(|_| CoreError::InvalidAlias)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation_basic() {
        assert!(validate_original_url("https://example.com").is_ok());
        assert!(validate_original_url("http://example.com/path?q=1").is_ok());
        assert_eq!(
            validate_original_url("  https://example.com/x ").unwrap(),
            "https://example.com/x"
        );
        assert!(validate_original_url("").is_err());
        assert!(validate_original_url("   ").is_err());
        assert!(validate_original_url("ftp://example.com").is_err());
        assert!(validate_original_url("not a url").is_err());
        assert!(validate_original_url("mailto:someone@example.com").is_err());
    }

    #[test]
    fn url_validation_rejects_overlong() {
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LEN));
        assert!(matches!(
            validate_original_url(&long),
            Err(CoreError::InvalidUrl(_))
        ));
    }

    #[test]
    fn alias_rules() {
        assert!(is_valid_alias("abc"));
        assert!(is_valid_alias("my-alias_01"));
        assert!(is_valid_alias(&"a".repeat(30)));
        assert!(!is_valid_alias("ab"));
        assert!(!is_valid_alias(&"a".repeat(31)));
        assert!(!is_valid_alias("bad!alias"));
        assert!(!is_valid_alias("has space"));
    }

    #[test]
    fn custom_alias_maps_to_invalid_alias() {
        assert_eq!(validate_custom_alias("promo1").unwrap().as_str(), "promo1");
        assert!(matches!(
            validate_custom_alias("x"),
            Err(CoreError::InvalidAlias)
        ));
        assert!(matches!(
            validate_custom_alias("bad/char"),
            Err(CoreError::InvalidAlias)
        ));
    }
}
