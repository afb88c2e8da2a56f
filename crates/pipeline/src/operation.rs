//! Operation model and request parsing.
//!
//! An [`Operation`] is parsed once, before a job exists, from the route's
//! `(domain, operation)` pair plus its string form parameters. Anything that
//! fails to parse is a validation error and no job is created.

use std::collections::HashMap;
use std::fmt;

use magetool_core::error::CoreError;
use serde::Serialize;

/// String form parameters accompanying a request.
pub type Params = HashMap<String, String>;

/// Largest accepted width / height for resize and crop, in pixels.
pub const MAX_DIMENSION: u32 = 10_000;

/// Accepted upscale factors.
pub const UPSCALE_RANGE: std::ops::RangeInclusive<u32> = 2..=4;

/// Video container formats accepted by `videos/convert`.
pub const VIDEO_FORMATS: &[&str] = &["mp4", "webm", "mkv", "mov", "avi", "gif"];

/// Audio formats accepted by `audio/convert` and `videos/extract-audio`.
pub const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a"];

// ---------------------------------------------------------------------------
// Image parameters
// ---------------------------------------------------------------------------

/// Raster output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Webp => image::ImageFormat::WebP,
        }
    }

    pub(crate) fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }
}

/// Named image filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFilter {
    Grayscale,
    Invert,
    Blur,
    Sharpen,
    Sepia,
    Brighten,
    Contrast,
}

impl ImageFilter {
    pub const ALL: &'static [&'static str] = &[
        "grayscale", "invert", "blur", "sharpen", "sepia", "brighten", "contrast",
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grayscale" | "greyscale" => Some(Self::Grayscale),
            "invert" => Some(Self::Invert),
            "blur" => Some(Self::Blur),
            "sharpen" => Some(Self::Sharpen),
            "sepia" => Some(Self::Sepia),
            "brighten" => Some(Self::Brighten),
            "contrast" => Some(Self::Contrast),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// How a job's inputs are supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Uploaded files, one SubTask per file.
    Files,
    /// A single source URL in the `url` parameter.
    Url,
}

/// A validated processing request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    ImageConvert {
        format: ImageFormat,
    },
    /// A missing side is derived from the aspect ratio.
    ImageResize {
        width: Option<u32>,
        height: Option<u32>,
    },
    ImageUpscale {
        scale: u32,
    },
    ImageFilter {
        filter: ImageFilter,
    },
    ImageCrop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    MediaConvert {
        target_format: String,
    },
    ExtractAudio {
        format: String,
    },
    AudioTrim {
        start_secs: f64,
        end_secs: f64,
    },
    MediaDownload {
        audio_only: bool,
    },
}

impl Operation {
    /// Parse the operation named by `domain/operation` with its parameters.
    ///
    /// A trailing `-stream` on the operation name is ignored; streaming is a
    /// delivery choice, not a different operation.
    pub fn parse(domain: &str, operation: &str, params: &Params) -> Result<Self, CoreError> {
        let operation = operation.strip_suffix("-stream").unwrap_or(operation);
        match (domain, operation) {
            ("images", "convert") => {
                let raw = required(params, "target_format")?;
                let format = ImageFormat::parse(raw).ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Unsupported image format '{raw}'. Supported: png, jpg, jpeg, webp"
                    ))
                })?;
                Ok(Self::ImageConvert { format })
            }
            ("images", "resize") => {
                let width = optional_u32(params, "width", 1..=MAX_DIMENSION)?;
                let height = optional_u32(params, "height", 1..=MAX_DIMENSION)?;
                if width.is_none() && height.is_none() {
                    return Err(CoreError::Validation(
                        "Provide width, height, or both".to_string(),
                    ));
                }
                Ok(Self::ImageResize { width, height })
            }
            ("images", "upscale") => {
                let scale = optional_u32(params, "scale", UPSCALE_RANGE)?.unwrap_or(2);
                Ok(Self::ImageUpscale { scale })
            }
            ("images", "filter") => {
                let raw = required(params, "filter_name")?;
                let filter = ImageFilter::parse(raw).ok_or_else(|| {
                    CoreError::Validation(format!(
                        "Unknown filter '{raw}'. Supported: {}",
                        ImageFilter::ALL.join(", ")
                    ))
                })?;
                Ok(Self::ImageFilter { filter })
            }
            ("images", "crop") => Ok(Self::ImageCrop {
                x: required_u32(params, "x", 0..=MAX_DIMENSION)?,
                y: required_u32(params, "y", 0..=MAX_DIMENSION)?,
                width: required_u32(params, "width", 1..=MAX_DIMENSION)?,
                height: required_u32(params, "height", 1..=MAX_DIMENSION)?,
            }),
            ("videos", "convert") => Ok(Self::MediaConvert {
                target_format: media_format(params, "target_format", VIDEO_FORMATS)?,
            }),
            ("audio", "convert") => Ok(Self::MediaConvert {
                target_format: media_format(params, "target_format", AUDIO_FORMATS)?,
            }),
            ("videos", "extract-audio") => {
                let format = if required(params, "target_format").is_ok() {
                    media_format(params, "target_format", AUDIO_FORMATS)?
                } else {
                    "mp3".to_string()
                };
                Ok(Self::ExtractAudio { format })
            }
            ("audio", "trim") => {
                let start_secs = required_secs(params, "start_time")?;
                let end_secs = required_secs(params, "end_time")?;
                if end_secs <= start_secs {
                    return Err(CoreError::Validation(
                        "end_time must be greater than start_time".to_string(),
                    ));
                }
                Ok(Self::AudioTrim { start_secs, end_secs })
            }
            ("videos", "youtube-download" | "instagram-download" | "shorts-download" | "reels-download") => {
                Ok(Self::MediaDownload { audio_only: false })
            }
            ("audio", "download") => Ok(Self::MediaDownload { audio_only: true }),
            _ => Err(CoreError::Validation(format!(
                "Unsupported operation: {domain}/{operation}"
            ))),
        }
    }

    pub fn input_mode(&self) -> InputMode {
        match self {
            Self::MediaDownload { .. } => InputMode::Url,
            _ => InputMode::Files,
        }
    }

    /// Whether the transform reports fine-grained progress.
    pub fn reports_progress(&self) -> bool {
        matches!(
            self,
            Self::MediaDownload { .. } | Self::MediaConvert { .. } | Self::ExtractAudio { .. } | Self::AudioTrim { .. }
        )
    }

    /// Short name used in logs and job listings.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ImageConvert { .. } => "image_convert",
            Self::ImageResize { .. } => "image_resize",
            Self::ImageUpscale { .. } => "image_upscale",
            Self::ImageFilter { .. } => "image_filter",
            Self::ImageCrop { .. } => "image_crop",
            Self::MediaConvert { .. } => "media_convert",
            Self::ExtractAudio { .. } => "extract_audio",
            Self::AudioTrim { .. } => "audio_trim",
            Self::MediaDownload { .. } => "media_download",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Parameter helpers
// ---------------------------------------------------------------------------

fn required<'a>(params: &'a Params, key: &str) -> Result<&'a str, CoreError> {
    params
        .get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::Validation(format!("Missing required parameter '{key}'")))
}

fn optional_u32(
    params: &Params,
    key: &str,
    range: std::ops::RangeInclusive<u32>,
) -> Result<Option<u32>, CoreError> {
    let Some(raw) = params.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let value: u32 = raw
        .parse()
        .map_err(|_| CoreError::Validation(format!("Parameter '{key}' must be a whole number")))?;
    if !range.contains(&value) {
        return Err(CoreError::Validation(format!(
            "Parameter '{key}' must be between {} and {}",
            range.start(),
            range.end()
        )));
    }
    Ok(Some(value))
}

fn required_u32(
    params: &Params,
    key: &str,
    range: std::ops::RangeInclusive<u32>,
) -> Result<u32, CoreError> {
    optional_u32(params, key, range)?
        .ok_or_else(|| CoreError::Validation(format!("Missing required parameter '{key}'")))
}

fn required_secs(params: &Params, key: &str) -> Result<f64, CoreError> {
    let raw = required(params, key)?;
    let secs: f64 = raw
        .parse()
        .map_err(|_| CoreError::Validation(format!("Parameter '{key}' must be a number of seconds")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(CoreError::Validation(format!(
            "Parameter '{key}' must be zero or positive"
        )));
    }
    Ok(secs)
}

fn media_format(params: &Params, key: &str, allowed: &[&str]) -> Result<String, CoreError> {
    let raw = required(params, key)?;
    let format = raw.trim_start_matches('.').to_ascii_lowercase();
    if allowed.contains(&format.as_str()) {
        Ok(format)
    } else {
        Err(CoreError::Validation(format!(
            "Unsupported format '{raw}'. Supported: {}",
            allowed.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn image_convert_accepts_jpg_alias() {
        let op = Operation::parse("images", "convert", &params(&[("target_format", "JPG")])).unwrap();
        assert_eq!(op, Operation::ImageConvert { format: ImageFormat::Jpeg });
        assert_eq!(op.input_mode(), InputMode::Files);
    }

    #[test]
    fn image_convert_rejects_unknown_format() {
        let err = Operation::parse("images", "convert", &params(&[("target_format", "tiff")])).unwrap_err();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("tiff"));
    }

    #[test]
    fn resize_needs_at_least_one_side() {
        assert_matches!(
            Operation::parse("images", "resize", &params(&[])),
            Err(CoreError::Validation(_))
        );
        assert_eq!(
            Operation::parse("images", "resize", &params(&[("width", "640")])).unwrap(),
            Operation::ImageResize { width: Some(640), height: None }
        );
    }

    #[test]
    fn resize_rejects_out_of_range_dimensions() {
        assert_matches!(
            Operation::parse("images", "resize", &params(&[("width", "0")])),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            Operation::parse("images", "resize", &params(&[("width", "abc")])),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn upscale_defaults_to_two() {
        assert_eq!(
            Operation::parse("images", "upscale", &params(&[])).unwrap(),
            Operation::ImageUpscale { scale: 2 }
        );
        assert!(Operation::parse("images", "upscale", &params(&[("scale", "8")])).is_err());
    }

    #[test]
    fn trim_requires_ordered_bounds() {
        let ok = Operation::parse(
            "audio",
            "trim",
            &params(&[("start_time", "1.5"), ("end_time", "4")]),
        )
        .unwrap();
        assert_eq!(ok, Operation::AudioTrim { start_secs: 1.5, end_secs: 4.0 });

        assert!(Operation::parse(
            "audio",
            "trim",
            &params(&[("start_time", "5"), ("end_time", "4")]),
        )
        .is_err());
    }

    #[test]
    fn media_convert_checks_domain_formats() {
        assert!(Operation::parse("videos", "convert", &params(&[("target_format", "webm")])).is_ok());
        assert!(Operation::parse("audio", "convert", &params(&[("target_format", "webm")])).is_err());
        assert!(Operation::parse("audio", "convert", &params(&[("target_format", "mp3")])).is_ok());
    }

    #[test]
    fn extract_audio_defaults_to_mp3() {
        assert_eq!(
            Operation::parse("videos", "extract-audio", &params(&[])).unwrap(),
            Operation::ExtractAudio { format: "mp3".to_string() }
        );
    }

    #[test]
    fn download_routes_take_url_input_and_ignore_stream_suffix() {
        let op = Operation::parse("videos", "youtube-download-stream", &params(&[])).unwrap();
        assert_eq!(op, Operation::MediaDownload { audio_only: false });
        assert_eq!(op.input_mode(), InputMode::Url);

        let audio = Operation::parse("audio", "download", &params(&[])).unwrap();
        assert_eq!(audio, Operation::MediaDownload { audio_only: true });
    }

    #[test]
    fn unknown_operations_are_rejected() {
        for (domain, op) in [("images", "ocr"), ("images", "remove-background"), ("files", "merge-pdf")] {
            let err = Operation::parse(domain, op, &params(&[])).unwrap_err();
            assert_matches!(err, CoreError::Validation(msg) if msg.starts_with("Unsupported operation"));
        }
    }
}
