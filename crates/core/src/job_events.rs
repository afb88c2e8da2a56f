//! Wire-level names for job progress and lifecycle messages.
//!
//! The stream endpoint (`*-stream`) and the lifecycle WebSocket use these
//! strings, so clients can match on them without parsing free text.

/// Stream status: the job has been accepted and is starting.
pub const STREAM_STATUS_STARTING: &str = "starting";

/// Stream status: bytes are being transferred.
pub const STREAM_STATUS_DOWNLOADING: &str = "downloading";

/// Stream status: post-transfer processing (merge, transcode, store).
pub const STREAM_STATUS_PROCESSING: &str = "processing";

/// Stream status: terminal success.
pub const STREAM_STATUS_COMPLETE: &str = "complete";

/// Stream status: terminal failure.
pub const STREAM_STATUS_ERROR: &str = "error";

/// Lifecycle event: a job was accepted into the registry.
pub const EVENT_JOB_CREATED: &str = "job.created";

/// Lifecycle event: the executor started the job.
pub const EVENT_JOB_STARTED: &str = "job.started";

/// Lifecycle event: the job reached a terminal state.
pub const EVENT_JOB_FINISHED: &str = "job.finished";

/// Lifecycle event: the job record was retired after its retention window.
pub const EVENT_JOB_RETIRED: &str = "job.retired";
