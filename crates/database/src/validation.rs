//! Input validation for user-supplied link and account fields.

use std::fmt;

use url::Url;

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Invalid email format.
    InvalidEmail(String),
    /// Invalid or unsupported URL.
    InvalidUrl(String),
    /// Value too long.
    TooLong { field: String, max: usize, actual: usize },
    /// Empty value where one is required.
    Empty(String),
    /// Numeric value outside the accepted range.
    OutOfRange { field: String, value: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidEmail(msg) => write!(f, "Invalid email: {}", msg),
            ValidationError::InvalidUrl(msg) => write!(f, "Invalid URL: {}", msg),
            ValidationError::TooLong { field, max, actual } => {
                write!(f, "{} is too long ({} chars, max {})", field, actual, max)
            }
            ValidationError::Empty(field) => write!(f, "{} cannot be empty", field),
            ValidationError::OutOfRange { field, value } => {
                write!(f, "{} is out of range: {}", field, value)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Maximum allowed length for email addresses.
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Maximum allowed length for link URLs.
pub const MAX_URL_LENGTH: usize = 2048;

/// Maximum allowed length for link titles.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Validate an email address (basic RFC 5322 format check).
///
/// This is a basic validation that checks:
/// - Contains exactly one @
/// - Has at least one character before and after @
/// - Has a well-formed dotted domain
/// - Is not too long
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();

    if email.is_empty() {
        return Err(ValidationError::Empty("email".to_string()));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong {
            field: "email".to_string(),
            max: MAX_EMAIL_LENGTH,
            actual: email.len(),
        });
    }

    let (local, domain) = match email.split_once('@') {
        Some((local, domain)) if !domain.contains('@') => (local, domain),
        _ => {
            return Err(ValidationError::InvalidEmail(
                "must contain exactly one @ symbol".to_string(),
            ))
        }
    };

    if local.is_empty() {
        return Err(ValidationError::InvalidEmail(
            "missing local part (before @)".to_string(),
        ));
    }

    if domain.is_empty() {
        return Err(ValidationError::InvalidEmail(
            "missing domain (after @)".to_string(),
        ));
    }

    if !domain.contains('.') {
        return Err(ValidationError::InvalidEmail(
            "domain must contain at least one dot".to_string(),
        ));
    }

    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return Err(ValidationError::InvalidEmail(
            "malformed domain".to_string(),
        ));
    }

    Ok(())
}

/// Strip whitespace and characters that have no business in a tracked URL,
/// and add an `https://` scheme when none is given. Other schemes are kept
/// so that [`normalize_url`] can reject them.
pub fn sanitize_url(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '\\'))
        .collect();

    if cleaned.contains("://") {
        cleaned
    } else {
        format!("https://{}", cleaned)
    }
}

/// Sanitize and validate a link URL, returning its normalized form.
///
/// Only `http` and `https` URLs with a host are accepted. Bare IP
/// addresses are allowed; affiliate redirectors sometimes use them.
pub fn normalize_url(raw: &str) -> Result<String, ValidationError> {
    if raw.trim().is_empty() {
        return Err(ValidationError::Empty("url".to_string()));
    }

    let sanitized = sanitize_url(raw);
    if sanitized.len() > MAX_URL_LENGTH {
        return Err(ValidationError::TooLong {
            field: "url".to_string(),
            max: MAX_URL_LENGTH,
            actual: sanitized.len(),
        });
    }

    let parsed = Url::parse(&sanitized).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    validate_parsed_url(&parsed)?;

    Ok(parsed.to_string())
}

/// Check that an already-parsed URL is something the checker can probe.
pub fn validate_parsed_url(url: &Url) -> Result<(), ValidationError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(ValidationError::InvalidUrl("missing host".to_string())),
    }
}

/// Validate a link title.
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    let title = title.trim();

    if title.is_empty() {
        return Err(ValidationError::Empty("title".to_string()));
    }

    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "title".to_string(),
            max: MAX_TITLE_LENGTH,
            actual: title.chars().count(),
        });
    }

    Ok(())
}

/// Validate a product price.
pub fn validate_price(price: f64) -> Result<(), ValidationError> {
    if !price.is_finite() || price < 0.0 {
        return Err(ValidationError::OutOfRange {
            field: "price".to_string(),
            value: price.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email_valid() {
        assert!(validate_email("test@example.com").is_ok());
        assert!(validate_email("user.name@domain.co.uk").is_ok());
        assert!(validate_email(" test@example.com ").is_ok()); // trimmed
    }

    #[test]
    fn test_validate_email_invalid() {
        assert!(matches!(validate_email(""), Err(ValidationError::Empty(_))));
        assert!(matches!(
            validate_email("no-at-sign.com"),
            Err(ValidationError::InvalidEmail(_))
        ));
        assert!(matches!(
            validate_email("a@b@c.com"),
            Err(ValidationError::InvalidEmail(_))
        ));
        assert!(matches!(
            validate_email("user@localhost"),
            Err(ValidationError::InvalidEmail(_))
        ));
        assert!(matches!(
            validate_email("user@example..com"),
            Err(ValidationError::InvalidEmail(_))
        ));
    }

    #[test]
    fn test_normalize_url_adds_scheme() {
        assert_eq!(
            normalize_url("example.com/deal").unwrap(),
            "https://example.com/deal"
        );
        assert_eq!(
            normalize_url("  http://example.com/a?tag=x ").unwrap(),
            "http://example.com/a?tag=x"
        );
    }

    #[test]
    fn test_normalize_url_strips_unsafe_chars() {
        assert_eq!(
            normalize_url("https://example.com/<script>").unwrap(),
            "https://example.com/script"
        );
    }

    #[test]
    fn test_normalize_url_rejects_bad_input() {
        assert!(matches!(normalize_url("   "), Err(ValidationError::Empty(_))));
        assert!(matches!(
            normalize_url("ftp://example.com/file"),
            Err(ValidationError::InvalidUrl(_))
        ));
        assert!(matches!(
            normalize_url("https://"),
            Err(ValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_validate_title() {
        assert!(validate_title("Spring sale").is_ok());
        assert!(matches!(validate_title(" "), Err(ValidationError::Empty(_))));
        let long = "x".repeat(MAX_TITLE_LENGTH + 1);
        assert!(matches!(
            validate_title(&long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price(19.99).is_ok());
        assert!(validate_price(0.0).is_ok());
        assert!(validate_price(-1.0).is_err());
        assert!(validate_price(f64::NAN).is_err());
    }
}
