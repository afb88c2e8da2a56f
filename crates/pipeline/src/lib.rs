//! External transform seam for the job executor.
//!
//! The executor treats media processing as an opaque
//! `transform(input, params) -> output | error` call. This crate defines
//! that seam and the default implementation behind it:
//!
//! - [`Operation`] -- validated description of what to do, parsed from the
//!   request route and form parameters.
//! - [`Transform`] -- the async trait the executor calls.
//! - [`Toolkit`] -- the production [`Transform`]: the `image` crate for
//!   still images, an `ffmpeg` process for audio/video, `yt-dlp` for
//!   platform downloads and `reqwest` for direct downloads.

pub mod download;
pub mod error;
pub mod ffmpeg;
pub mod image_ops;
pub mod operation;
pub mod scratch;
pub mod toolkit;
pub mod transform;
pub mod ytdlp;

pub use error::TransformError;
pub use operation::{ImageFilter, ImageFormat, InputMode, Operation, Params};
pub use toolkit::{Toolkit, ToolkitConfig};
pub use transform::{ProgressReporter, Transform, TransformInput, TransformOutput, TransformProgress};
