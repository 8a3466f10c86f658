//! Upload intake checks: extension membership and size cap.
//!

use std::fmt::Display;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::naming::extension_of;

const MEGABYTE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid file extension for '{filename}'. Allowed extensions: {}", join_extensions(.allowed))]
    UnsupportedExtension {
        filename: String,
        allowed: Vec<String>,
    },

    #[error("File too large - limit is {} MB", megabytes(.limit))]
    FileTooLarge { limit: usize },

    #[error("Failed to read upload: {0}")]
    Read(String),
}

fn join_extensions(allowed: &[String]) -> String {
    allowed.join(", ")
}

fn megabytes(limit: &usize) -> usize {
    limit / MEGABYTE
}

/// Decides whether an upload is accepted. Holds no state beyond its configuration.
#[derive(Clone, Debug)]
pub struct Validator {
    allowed_extensions: Vec<String>,
    max_size: usize,
}

impl Validator {
    pub fn new(allowed_extensions: Vec<String>, max_size: usize) -> Self {
        Self {
            allowed_extensions,
            max_size,
        }
    }

    /// Checks the extension of `filename` against the allowed set, returning it lower-cased.
    pub fn check_extension(&self, filename: &str) -> Result<String, ValidationError> {
        let extension = extension_of(filename);
        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::UnsupportedExtension {
                filename: filename.to_string(),
                allowed: self.allowed_extensions.clone(),
            });
        }
        Ok(extension)
    }

    /// Validates an in-memory upload.
    pub fn validate_bytes(&self, filename: &str, content: &[u8]) -> Result<Vec<u8>, ValidationError> {
        self.check_extension(filename)?;
        if content.len() > self.max_size {
            return Err(ValidationError::FileTooLarge {
                limit: self.max_size,
            });
        }
        Ok(content.to_vec())
    }

    /// Validates a streamed upload.
    ///
    /// The extension is checked before anything is read. The stream is then consumed until
    /// either it ends or more than `max_size` bytes have arrived; at most `max_size + 1` bytes
    /// are ever buffered.
    pub async fn validate<S, E>(&self, filename: &str, stream: S) -> Result<Vec<u8>, ValidationError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        self.check_extension(filename)?;

        let cap = self.max_size.saturating_add(1);
        let mut content: Vec<u8> = Vec::new();
        let mut stream = std::pin::pin!(stream);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| ValidationError::Read(err.to_string()))?;
            let wanted = cap - content.len();
            content.extend_from_slice(&chunk[..chunk.len().min(wanted)]);
            if content.len() > self.max_size {
                debug!(
                    "Upload {} exceeded the {} byte limit, stopped reading",
                    filename, self.max_size
                );
                return Err(ValidationError::FileTooLarge {
                    limit: self.max_size,
                });
            }
        }

        Ok(content)
    }
}
