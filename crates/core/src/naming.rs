//! File naming helpers for uploads, outputs, and downloads.

/// Known extension / MIME type pairs.
const CONTENT_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("webp", "image/webp"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("tiff", "image/tiff"),
    ("ico", "image/x-icon"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("txt", "text/plain"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("mov", "video/quicktime"),
    ("avi", "video/x-msvideo"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("m4a", "audio/x-m4a"),
    ("flac", "audio/flac"),
    ("aac", "audio/aac"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
];

/// Fallback MIME type for unknown content.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Longest file name kept after sanitizing.
const MAX_FILE_NAME_LEN: usize = 200;

/// Lowercased extension of `name`, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    let base = base_name(name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// `name` without directory components or extension.
pub fn stem_of(name: &str) -> &str {
    let base = base_name(name);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    }
}

fn base_name(name: &str) -> &str {
    name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(name)
}

/// MIME type for an extension, falling back to `application/octet-stream`.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    CONTENT_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, ct)| *ct)
        .unwrap_or(OCTET_STREAM)
}

/// Preferred extension for a MIME type.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    CONTENT_TYPES
        .iter()
        .find(|(_, c)| c.eq_ignore_ascii_case(ct))
        .map(|(e, _)| *e)
}

/// Strip path components, control characters and quoting from a user-supplied
/// file name. Never returns an empty string.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = base_name(name)
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | '<' | '>' | '|' | ':' | '*' | '?'))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        return "file".to_string();
    }
    cleaned.chars().take(MAX_FILE_NAME_LEN).collect()
}

/// Name for a transform's output: the input's stem with a new extension.
///
/// ```
/// use magetool_core::naming::output_file_name;
///
/// assert_eq!(output_file_name("holiday photo.JPG", "png"), "holiday photo.png");
/// assert_eq!(output_file_name("clip", "mp3"), "clip.mp3");
/// ```
pub fn output_file_name(original: &str, extension: &str) -> String {
    let stem = stem_of(&sanitize_file_name(original)).to_string();
    format!("{stem}.{}", extension.trim_start_matches('.'))
}

/// Give `download_name` the extension of `source_name` when it has none.
pub fn ensure_extension(download_name: &str, source_name: &str) -> String {
    if extension_of(download_name).is_some() {
        return download_name.to_string();
    }
    match extension_of(source_name) {
        Some(ext) => format!("{download_name}.{ext}"),
        None => download_name.to_string(),
    }
}

/// `Content-Disposition` value for an attachment download.
///
/// Carries an ASCII `filename` fallback and an RFC 5987 `filename*`
/// parameter so non-ASCII names survive.
pub fn content_disposition(file_name: &str) -> String {
    let name = sanitize_file_name(file_name);
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() && c != '\\' { c } else { '_' })
        .collect();
    let mut encoded = String::with_capacity(name.len() * 3);
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b'~') {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions() {
        assert_eq!(extension_of("a/b/photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(stem_of("C:\\users\\me\\song.mp3"), "song");
    }

    #[test]
    fn content_types_both_ways() {
        assert_eq!(content_type_for_extension("PNG"), "image/png");
        assert_eq!(content_type_for_extension(".mp4"), "video/mp4");
        assert_eq!(content_type_for_extension("xyz"), OCTET_STREAM);
        assert_eq!(extension_for_content_type("image/jpeg"), Some("jpg"));
        assert_eq!(
            extension_for_content_type("audio/mpeg; charset=binary"),
            Some("mp3")
        );
        assert_eq!(extension_for_content_type("application/x-thing"), None);
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("a\"b<c>.png"), "abc.png");
        assert_eq!(sanitize_file_name("..."), "file");
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name(&"n".repeat(500)).len(), 200);
    }

    #[test]
    fn ensure_extension_inherits_from_source() {
        assert_eq!(ensure_extension("my video", "abc123.mp4"), "my video.mp4");
        assert_eq!(ensure_extension("song.mp3", "abc123.wav"), "song.mp3");
        assert_eq!(ensure_extension("plain", "token"), "plain");
    }

    #[test]
    fn disposition_escapes_non_ascii() {
        let header = content_disposition("résumé.pdf");
        assert!(header.starts_with("attachment; filename=\"r_sum_.pdf\""));
        assert!(header.contains("filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"));
    }
}
