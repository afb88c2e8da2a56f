use std::io;

/// Failure of a single transform call.
///
/// Always scoped to one SubTask: the executor records the message as that
/// SubTask's error and carries on with its siblings.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Could not decode input: {0}")]
    Decode(String),

    #[error("Could not encode output: {0}")]
    Encode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("{program} is not available: {source}")]
    MissingBinary {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed (exit code {exit_code:?}): {stderr}")]
    Process {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Download failed: {0}")]
    Fetch(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal transform error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for TransformError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}

impl From<image::ImageError> for TransformError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Decoding(_) | image::ImageError::Unsupported(_) => {
                Self::Decode(e.to_string())
            }
            image::ImageError::Encoding(_) => Self::Encode(e.to_string()),
            image::ImageError::Limits(_) | image::ImageError::Parameter(_) => {
                Self::InvalidInput(e.to_string())
            }
            image::ImageError::IoError(io) => Self::Io(io),
        }
    }
}
