//! Content types and media categories derived from object keys

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Content type for a key, by its (case-insensitive) extension
pub fn from_key(key: &str) -> &'static str {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    let Some((_, extension)) = file_name.rsplit_once('.') else {
        return OCTET_STREAM;
    };

    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => OCTET_STREAM,
    }
}

/// Media category stored on media records: `images`, `videos` or `other`
pub fn category(content_type: &str) -> &'static str {
    if content_type.starts_with("image/") {
        "images"
    } else if content_type.starts_with("video/") {
        "videos"
    } else {
        "other"
    }
}
