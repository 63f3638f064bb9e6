//! Extension-based media classification and the MIME lookup table.
//!
//! Classification is deliberately extension-driven: the ingestion front door
//! and the archive importer both decide from the filename alone, before any
//! bytes are inspected. Unknown extensions fall back to `application/octet-stream`
//! and are stored as opaque blobs.

/// MIME type normalized videos come out as.
pub const VIDEO_NORMALIZED_MIME: &str = "video/mp4";

/// MIME type normalized audio comes out as.
pub const AUDIO_NORMALIZED_MIME: &str = "audio/mpeg";

/// Map a lowercase extension (without the dot) to a MIME type.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "ogv" => "video/ogg",
        "3gp" => "video/3gpp",
        "3g2" => "video/3gpp2",
        "avi" => "video/x-msvideo",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mpg" | "mpeg" => "video/mpeg",
        "mp3" => "audio/mpeg",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "wma" => "audio/x-ms-wma",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" | "tgz" => "application/gzip",
        "7z" => "application/x-7z-compressed",
        _ => "application/octet-stream",
    }
}

/// Extensions treated as viewable media (as opposed to opaque blobs).
pub fn is_processable_media(ext: &str) -> bool {
    matches!(
        ext,
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "heif" | "svg" | "avif" | "bmp"
            | "ico" | "mp4" | "mkv" | "mov" | "webm" | "ogv" | "3gp" | "3g2" | "avi" | "wmv"
            | "flv" | "mpg" | "mpeg" | "mp3" | "aac" | "wav" | "ogg" | "opus" | "flac" | "m4a"
            | "wma" | "pdf"
    )
}

/// Split a filename into its stem and lowercase extension (without the dot).
///
/// `"Clip.MKV"` yields `("Clip", "mkv")`; a name with no dot yields an empty
/// extension.
pub fn split_extension(filename: &str) -> (&str, String) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext.to_ascii_lowercase()),
        _ => (filename, String::new()),
    }
}
