//! Content hashing for image fingerprints and cache keys
//!
//! The image fingerprint and the caption cache key are the same SHA-256
//! digest of the raw payload. A resubmitted image is therefore both a caption
//! cache hit and a reuse violation for the token; both checks share this one
//! computation and must stay on the same hash family.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of an image payload
pub fn fingerprint(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Caption cache key: identical to the image fingerprint
pub fn caption_key(payload: &[u8]) -> String {
    fingerprint(payload)
}

/// Story cache key over (caption, style, additional text), in that order
///
/// Each field is length-prefixed so ("ab", "c") and ("a", "bc") never collide.
pub fn story_key(caption: &str, style: &str, additional_text: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [caption, style, additional_text] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(b"image-bytes");
        assert_eq!(a, fingerprint(b"image-bytes"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, fingerprint(b"other-bytes"));
    }

    #[test]
    fn test_caption_key_matches_fingerprint() {
        assert_eq!(caption_key(b"payload"), fingerprint(b"payload"));
    }

    #[test]
    fn test_story_key_distinguishes_additional_text() {
        assert_ne!(story_key("c1", "fire", ""), story_key("c1", "fire", "extra"));
    }

    #[test]
    fn test_story_key_field_boundaries() {
        assert_ne!(story_key("ab", "c", ""), story_key("a", "bc", ""));
        assert_ne!(story_key("c1", "", "x"), story_key("c1", "x", ""));
    }

    #[test]
    fn test_story_key_is_order_sensitive() {
        assert_eq!(story_key("c1", "ink", "t"), story_key("c1", "ink", "t"));
        assert_ne!(story_key("c1", "ink", "t"), story_key("ink", "c1", "t"));
    }
}
