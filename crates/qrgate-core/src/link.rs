//! Token extraction from scanned QR payloads
//!
//! Scanners hand back anything from a bare id to a full access URL with
//! extra query parameters, so the lookup is deliberately forgiving.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("token pattern is valid")
});

const MAX_BARE_TOKEN_LEN: usize = 20;
const MIN_PATH_TOKEN_LEN: usize = 4;

fn looks_like_token(s: &str) -> bool {
    !s.is_empty() && TOKEN_RE.is_match(s)
}

/// Form-style query decoding: `+` is a space, `%XX` an escaped byte
fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// Token id carried by `input`, if any
///
/// Tried in order: the input itself as a bare id, the `token` query
/// parameter, any id-like query value, then an id-like path segment.
pub fn extract_token(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if looks_like_token(input) && input.len() <= MAX_BARE_TOKEN_LEN {
        return Some(input.to_string());
    }

    let without_fragment = input.split('#').next().unwrap_or(input);
    let (location, query) = match without_fragment.split_once('?') {
        Some((location, query)) => (location, query),
        None => (without_fragment, ""),
    };

    let pairs: Vec<(String, String)> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter_map(|(key, value)| Some((decode_component(key)?, decode_component(value)?)))
        .collect();

    if let Some((_, value)) = pairs
        .iter()
        .find(|(key, value)| key == "token" && looks_like_token(value))
    {
        return Some(value.clone());
    }

    if let Some((_, value)) = pairs.iter().find(|(_, value)| looks_like_token(value)) {
        return Some(value.clone());
    }

    // Skip scheme and authority so a hostname is never mistaken for an id
    let path = match location.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => location,
    };

    path.split('/')
        .find(|segment| segment.len() >= MIN_PATH_TOKEN_LEN && looks_like_token(segment))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_token() {
        assert_eq!(extract_token("  1718000000 ").as_deref(), Some("1718000000"));
        assert_eq!(extract_token("expo-1718000000").as_deref(), Some("expo-1718000000"));
    }

    #[test]
    fn test_query_parameter() {
        assert_eq!(
            extract_token("http://localhost:7860/?token=abc123&lang=en").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            extract_token("https://gate.example/?lang=en&token=t-42#top").as_deref(),
            Some("t-42")
        );
    }

    #[test]
    fn test_query_values_are_percent_decoded() {
        assert_eq!(
            extract_token("https://gate.example/?token=expo%2D123").as_deref(),
            Some("expo-123")
        );
        assert_eq!(
            extract_token("https://gate.example/?t=abc%5F42").as_deref(),
            Some("abc_42")
        );
    }

    #[test]
    fn test_token_param_must_look_like_an_id() {
        // A junk token value falls through to the next id-like value
        assert_eq!(
            extract_token("https://gate.example/?token=a%20b&ref=abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(extract_token("https://gate.example/?token=%3Cscript%3E"), None);
    }

    #[test]
    fn test_other_query_value() {
        assert_eq!(
            extract_token("https://gate.example/?t=abc123").as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_path_segment() {
        assert_eq!(
            extract_token("https://gate.example/t/abcd1234").as_deref(),
            Some("abcd1234")
        );
    }

    #[test]
    fn test_no_token() {
        assert_eq!(extract_token(""), None);
        assert_eq!(extract_token("http://localhost:7860/"), None);
        assert_eq!(extract_token("https://gate.example/a/b"), None);
    }
}
