//! crates/readalong_core/src/content.rs
//!
//! Content identity and artifact key derivation.
//!
//! Synthesized audio is cached by what was spoken, not by which block asked
//! for it: two blocks with identical trimmed text share one artifact. The
//! cache key is the SHA-256 of the trimmed text, formatted to look like a
//! UUID (8-4-4-4-12). It is an identity hash, not a v4 UUID.

use sha2::{Digest, Sha256};

/// Prefix for uploaded page images.
pub const UPLOADS_PREFIX: &str = "uploads/";
/// Prefix for synthesized MP3 artifacts.
pub const AUDIO_PREFIX: &str = "audio/";
/// Prefix for character-alignment JSON artifacts.
pub const ALIGNMENT_PREFIX: &str = "alignment/";

/// Path segment under which the service exposes blob downloads; URIs
/// returned by the artifact store embed it so they reverse back to keys.
pub const OBJECTS_MOUNT: &str = "/objects/";

/// Deterministic UUID-shaped identifier for a passage of text.
pub fn content_uuid(text: &str) -> String {
    let digest = Sha256::digest(text.trim().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

pub fn audio_key(content_uuid: &str) -> String {
    format!("{AUDIO_PREFIX}tts_content_{content_uuid}.mp3")
}

pub fn alignment_key(content_uuid: &str) -> String {
    format!("{ALIGNMENT_PREFIX}tts_content_{content_uuid}_alignment.json")
}

pub fn normalized_alignment_key(content_uuid: &str) -> String {
    format!("{ALIGNMENT_PREFIX}tts_content_{content_uuid}_normalized.json")
}

/// Key for an uploaded page image: `uploads/<unix_ms>-<random7digits><ext>`.
/// `ext` carries its leading dot (".jpg").
pub fn upload_key(unix_ms: i64, random7: u32, ext: &str) -> String {
    format!("{UPLOADS_PREFIX}{unix_ms}-{:07}{ext}", random7 % 10_000_000)
}

/// Maps a URI produced by the artifact store back to its key.
///
/// Accepts bare keys and any absolute or service-relative URI containing the
/// objects mount. Legacy rows that hold local filesystem paths (or anything
/// else that does not reverse to a known key prefix) return `None` and are
/// treated as cache misses by callers.
pub fn key_from_uri(uri: &str) -> Option<String> {
    if let Some(idx) = uri.find(OBJECTS_MOUNT) {
        let key = &uri[idx + OBJECTS_MOUNT.len()..];
        return is_known_key(key).then(|| key.to_string());
    }
    // Bare keys pass through; anything with a scheme ("file:", "C:\") or a
    // leading slash is a legacy filesystem reference, not a key.
    (is_known_key(uri) && !uri.contains(':')).then(|| uri.to_string())
}

fn is_known_key(candidate: &str) -> bool {
    candidate.starts_with(UPLOADS_PREFIX)
        || candidate.starts_with(AUDIO_PREFIX)
        || candidate.starts_with(ALIGNMENT_PREFIX)
}

/// Infers a `Content-Type` from a key's extension, for blob streaming.
pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("mp3") => "audio/mpeg",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_uuid_has_canonical_shape() {
        let id = content_uuid("Hello world");
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(groups.len(), 5);
        assert_eq!(
            groups.iter().map(|g| g.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn content_uuid_ignores_surrounding_whitespace() {
        assert_eq!(content_uuid("Hello world"), content_uuid("  Hello world  "));
        assert_ne!(content_uuid("Hello world"), content_uuid("Hello  world"));
    }

    #[test]
    fn artifact_keys_share_the_content_stem() {
        let id = content_uuid("a passage");
        assert_eq!(audio_key(&id), format!("audio/tts_content_{id}.mp3"));
        assert_eq!(
            alignment_key(&id),
            format!("alignment/tts_content_{id}_alignment.json")
        );
        assert_eq!(
            normalized_alignment_key(&id),
            format!("alignment/tts_content_{id}_normalized.json")
        );
    }

    #[test]
    fn upload_key_pads_the_random_component() {
        assert_eq!(upload_key(1700000000123, 42, ".jpg"), "uploads/1700000000123-0000042.jpg");
    }

    #[test]
    fn key_from_uri_reverses_store_uris() {
        let key = "audio/tts_content_abc.mp3";
        assert_eq!(key_from_uri(key).as_deref(), Some(key));
        assert_eq!(key_from_uri("/objects/audio/tts_content_abc.mp3").as_deref(), Some(key));
        assert_eq!(
            key_from_uri("https://cdn.example.com/objects/audio/tts_content_abc.mp3").as_deref(),
            Some(key)
        );
    }

    #[test]
    fn key_from_uri_rejects_legacy_local_paths() {
        assert_eq!(key_from_uri("/var/data/audio/tts_content_abc.mp3"), None);
        assert_eq!(key_from_uri("file:///tmp/audio/tts_content_abc.mp3"), None);
        assert_eq!(key_from_uri("C:\\audio\\x.mp3"), None);
        assert_eq!(key_from_uri(""), None);
    }

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for_key("uploads/1-0000001.jpg"), "image/jpeg");
        assert_eq!(content_type_for_key("audio/tts_content_x.mp3"), "audio/mpeg");
        assert_eq!(content_type_for_key("alignment/x.json"), "application/json");
        assert_eq!(content_type_for_key("misc/blob"), "application/octet-stream");
    }
}
