//! Emoji MIME validation.

const ALLOWED_EMOJI_MIMES: [&str; 3] = ["image/gif", "image/png", "image/webp"];

/// Validates and normalizes emoji mime types to safe image formats.
///
/// Media-type parameters are accepted and discarded; anything outside the
/// whitelist returns `None`.
pub fn normalize_emoji_mime(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let media_type = raw
        .split(';')
        .next()
        .unwrap_or(raw)
        .trim()
        .to_ascii_lowercase();

    if ALLOWED_EMOJI_MIMES.contains(&media_type.as_str()) {
        Some(media_type)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exactly_the_whitelist() {
        assert_eq!(normalize_emoji_mime("image/png").as_deref(), Some("image/png"));
        assert_eq!(normalize_emoji_mime("image/webp").as_deref(), Some("image/webp"));
        assert_eq!(normalize_emoji_mime("image/gif").as_deref(), Some("image/gif"));
    }

    #[test]
    fn normalizes_case_whitespace_and_parameters() {
        assert_eq!(normalize_emoji_mime("  IMAGE/PNG  ").as_deref(), Some("image/png"));
        assert_eq!(
            normalize_emoji_mime("image/webp; charset=binary").as_deref(),
            Some("image/webp")
        );
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(normalize_emoji_mime(""), None);
        assert_eq!(normalize_emoji_mime("   "), None);
        assert_eq!(normalize_emoji_mime("image/jpeg"), None);
        assert_eq!(normalize_emoji_mime("image/svg+xml"), None);
        assert_eq!(normalize_emoji_mime("text/html"), None);
        assert_eq!(normalize_emoji_mime("png"), None);
    }
}
