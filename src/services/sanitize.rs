//! Deterministic sanitizers for user-supplied names.
//!
//! Everything that ends up as a path component on disk or as part of a
//! metadata-store key goes through one of these first. Distinct raw names
//! may collide on the same sanitized value; no collision detection is done.

/// File extensions accepted for upload (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: [&str; 25] = [
    "mp4", "txt", "pem", "srt", "ass", "pickle", "json", "wav", "jpg", "jpeg", "png", "gif",
    "webp", "bmp", "js", "jsx", "ts", "tsx", "html", "css", "svg", "ico", "md", "pdf", "py",
];

/// Reduce a filename to ASCII `[A-Za-z0-9_.-]`.
///
/// Path separators and whitespace become `_` (runs collapse to one),
/// anything else outside the charset is dropped, and leading/trailing dots
/// and underscores are trimmed so the result can never be `.` or `..`.
pub fn sanitize_filename(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '/' || c == '\\' || c.is_whitespace() {
            spaced.push(' ');
        } else if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            spaced.push(c);
        }
    }

    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

/// Reduce a project (or object) name to `[0-9A-Za-z_]`.
///
/// Builds on [`sanitize_filename`], then removes dots and hyphens and
/// collapses repeated underscores.
pub fn sanitize_identifier(raw: &str) -> String {
    let base = sanitize_filename(raw);
    let mut out = String::with_capacity(base.len());
    for c in base.chars() {
        match c {
            '.' | '-' => {}
            '_' if out.ends_with('_') => {}
            c if c.is_ascii_alphanumeric() || c == '_' => out.push(c),
            _ => {}
        }
    }
    out.trim_matches('_').to_string()
}

/// Derive the storage key for a caller from its `X-User-Id` value.
///
/// Dots become underscores; any character outside `[0-9A-Za-z_@-]` makes
/// the id unusable and yields `None` rather than a silently altered key.
pub fn user_key(raw: &str) -> Option<String> {
    let key = raw.trim().replace('.', "_");
    if key.is_empty() || key.trim_matches('_').is_empty() {
        return None;
    }
    if key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '-'))
    {
        Some(key)
    } else {
        None
    }
}

/// True if the filename carries an allow-listed extension.
pub fn is_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_keeps_extension_and_drops_unsafe_chars() {
        assert_eq!(sanitize_filename("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("my holiday  clip!.mp4"), "my_holiday_clip.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_filename(".."), "");
        assert_eq!(sanitize_filename("vidéo.mp4"), "vido.mp4");
    }

    #[test]
    fn identifier_is_restricted_charset() {
        for raw in ["My Project!!...v2", "a/b\\c", "  -- ..", "Ünïcødé 名前", "x__y"] {
            let safe = sanitize_identifier(raw);
            assert!(
                safe.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                "{raw:?} -> {safe:?}"
            );
            assert!(!safe.contains("__"));
        }
        assert_eq!(sanitize_identifier("Highlights"), "Highlights");
        assert_eq!(sanitize_identifier("My Project v2"), "My_Project_v2");
        assert_eq!(sanitize_identifier("My Project!!...v2"), "My_Projectv2");
    }

    #[test]
    fn distinct_names_may_collide() {
        assert_eq!(sanitize_identifier("My Project!!"), sanitize_identifier("My Project"));
        assert_eq!(sanitize_identifier("my-proj"), sanitize_identifier("myproj"));
    }

    #[test]
    fn user_key_replaces_dots_and_rejects_separators() {
        assert_eq!(user_key("u123").as_deref(), Some("u123"));
        assert_eq!(
            user_key("someone@example.com").as_deref(),
            Some("someone@example_com")
        );
        assert_eq!(user_key("../root"), None);
        assert_eq!(user_key("a/b"), None);
        assert_eq!(user_key("   "), None);
        assert_eq!(user_key(".."), None);
    }

    #[test]
    fn extension_allow_list() {
        assert!(is_allowed_extension("clip.MP4"));
        assert!(is_allowed_extension("notes.tar.md"));
        assert!(!is_allowed_extension("payload.exe"));
        assert!(!is_allowed_extension("mp4"));
        assert!(!is_allowed_extension(""));
    }
}
