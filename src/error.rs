//! Errors surfaced by the resolution pipeline.

use std::path::PathBuf;

/// Failures that stop a response from being built.
///
/// Extraction and matching never fail; only response synthesis (file I/O)
/// and routing can.
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("failed to read response file {}: {source}", .path.display())]
    ResponseFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no endpoint matches {method} {path}")]
    NoEndpoint { method: String, path: String },
}

impl MockError {
    /// HTTP status the transport should answer with.
    pub fn status(&self) -> u16 {
        match self {
            MockError::ResponseFile { .. } => 500,
            MockError::NoEndpoint { .. } => 404,
        }
    }
}
