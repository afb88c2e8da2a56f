//! Request validation applied before a job is created.
//!
//! Everything here fails with [`CoreError::Validation`], which the API
//! surfaces as a 400 without touching the job registry.

use crate::error::CoreError;

/// Fewest inputs a job may have.
pub const MIN_FILES: usize = 1;

/// Batch-size ceiling per job.
pub const MAX_FILES: usize = 40;

/// Longest accepted client identifier.
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Client id used when a request carries none.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Validate the number of inputs for one job.
pub fn validate_batch_size(count: usize) -> Result<(), CoreError> {
    if count < MIN_FILES {
        return Err(CoreError::Validation("No files provided".to_string()));
    }
    if count > MAX_FILES {
        return Err(CoreError::Validation(format!(
            "Too many files: {count} provided, at most {MAX_FILES} allowed"
        )));
    }
    Ok(())
}

/// Validate that a source URL is non-empty and uses http(s).
pub fn validate_source_url(url: &str) -> Result<(), CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("URL must not be empty".to_string()));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(CoreError::Validation(format!(
            "URL must start with http:// or https://, got: '{trimmed}'"
        )));
    }
    Ok(())
}

/// Normalize a client identifier.
///
/// Empty input maps to [`ANONYMOUS_CLIENT`]. Ids longer than
/// [`MAX_CLIENT_ID_LEN`] or containing characters outside
/// `[A-Za-z0-9._-]` are rejected.
pub fn normalize_client_id(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(ANONYMOUS_CLIENT.to_string());
    }
    if trimmed.len() > MAX_CLIENT_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Client id must not exceed {MAX_CLIENT_ID_LEN} characters"
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CoreError::Validation(
            "Client id may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
