//! File-extension to media-type lookup for static-file responses.
//!
//! Built once at first use and read-only thereafter; unknown extensions
//! fall back to `application/octet-stream`.

use std::collections::HashMap;
use std::sync::OnceLock;

const ENTRIES: &[(&str, &str)] = &[
    ("html", "text/html; charset=UTF-8"),
    ("htm", "text/html; charset=UTF-8"),
    ("js", "text/javascript; charset=UTF-8"),
    ("mjs", "text/javascript; charset=UTF-8"),
    ("cjs", "text/javascript; charset=UTF-8"),
    ("css", "text/css; charset=UTF-8"),
    ("json", "application/json; charset=UTF-8"),
    ("jsonld", "application/ld+json; charset=UTF-8"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("ico", "image/x-icon"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mov", "video/quicktime"),
    ("wav", "audio/wav"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("wasm", "application/wasm"),
    ("txt", "text/plain; charset=UTF-8"),
    ("xml", "application/xml"),
];

const FALLBACK: &str = "application/octet-stream";

fn table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| ENTRIES.iter().copied().collect())
}

/// Looks up the media type for a file by its extension (case-insensitive,
/// without the leading dot) against the curated table. Returns `None` for
/// extensions the table doesn't cover; callers fall back further via
/// [`media_type_for_path`].
pub fn media_type_for_extension(extension: &str) -> Option<&'static str> {
    table().get(extension.to_ascii_lowercase().as_str()).copied()
}

/// Looks up the media type for a file by its full path: the curated table
/// first, then a best-effort guess from the file's extension, then
/// `application/octet-stream`.
pub fn media_type_for_path(path: &std::path::Path) -> String {
    let extension = path.extension().and_then(|ext| ext.to_str());
    if let Some(extension) = extension {
        if let Some(exact) = media_type_for_extension(extension) {
            return exact.to_string();
        }
    }
    mime_guess::from_path(path)
        .first_raw()
        .map_or_else(|| FALLBACK.to_string(), ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extension_resolves() {
        assert_eq!(media_type_for_extension("HTML"), Some("text/html; charset=UTF-8"));
    }

    #[test]
    fn unknown_extension_falls_back_through_mime_guess_to_octet_stream() {
        assert_eq!(
            media_type_for_path(std::path::Path::new("archive.unknownext")),
            FALLBACK
        );
    }

    #[test]
    fn curated_table_wins_over_mime_guess() {
        assert_eq!(
            media_type_for_path(std::path::Path::new("index.html")),
            "text/html; charset=UTF-8"
        );
    }
}
