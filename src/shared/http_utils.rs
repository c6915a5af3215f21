//! Header and body redaction helpers for request logging.
//!
//! Header names are compared case-insensitively; redaction sets hold
//! lowercase names.

use std::collections::{HashMap, HashSet};

/// Placeholder written instead of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Redact a header value if `name` is in `redact_headers`.
///
/// # Arguments
///
/// * `name` - Header name, any case
/// * `value` - Original header value
/// * `redact_headers` - Lowercase names of headers to redact
/// * `show_auth_scheme` - Whether to keep the scheme of an `authorization` value
/// * `max_len` - Optional maximum length for values that are not redacted
pub fn redact_header_value(
    name: &str,
    value: &str,
    redact_headers: &HashSet<String>,
    show_auth_scheme: bool,
    max_len: Option<usize>,
) -> String {
    let name = name.to_ascii_lowercase();
    if !redact_headers.contains(&name) {
        return truncate_value(value, max_len);
    }

    match value.split_once(' ') {
        Some((scheme, _)) if name == "authorization" && show_auth_scheme => {
            format!("{} {}", scheme, REDACTED)
        },
        _ => REDACTED.to_string(),
    }
}

/// Truncate a value to at most `max_len` bytes on a character boundary.
pub fn truncate_value(value: &str, max_len: Option<usize>) -> String {
    match max_len {
        Some(max) if value.len() > max => {
            let mut end = max;
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &value[..end])
        },
        _ => value.to_string(),
    }
}

/// Whether a body with this content type is text and may be logged.
pub fn should_log_body_for_content_type(
    content_type: Option<&str>,
    allowed_types: &HashSet<String>,
) -> bool {
    let Some(ct) = content_type else {
        return false;
    };

    let base_ct = ct.split(';').next().unwrap_or(ct).trim();
    allowed_types.contains(base_ct) || base_ct.starts_with("text/")
}

/// Replace the query string of a URL with a placeholder.
pub fn redact_url_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?{}", base, REDACTED),
        None => url.to_string(),
    }
}

/// Render headers as `name=value` pairs, sorted by name, with redaction applied.
pub fn format_headers_for_logging(
    headers: &HashMap<String, String>,
    redact_headers: &HashSet<String>,
    max_value_len: Option<usize>,
) -> String {
    let mut pairs: Vec<(&String, &String)> = headers.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    pairs
        .into_iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                name,
                redact_header_value(name, value, redact_headers, true, max_value_len)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Headers redacted by default: credentials of both identity services plus
/// the usual HTTP auth headers.
pub fn default_sensitive_headers() -> HashSet<String> {
    [
        "sessiontoken",
        "keymanagertoken",
        "authorization",
        "proxy-authorization",
        "cookie",
        "set-cookie",
        "x-api-key",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Content types whose bodies are safe to log.
pub fn default_loggable_content_types() -> HashSet<String> {
    ["application/json", "text/plain"]
        .into_iter()
        .map(String::from)
        .collect()
}
