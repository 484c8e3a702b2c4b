//! Piecestream Core - Stream scheduling and demultiplexing over piece downloads
//!
//! This crate turns a single piece-oriented download of a multi-file archive
//! into several byte-accurate output streams, one per logical file, while the
//! download is still in progress: piece geometry, sliding-window scheduling,
//! buffering estimation, seek translation, event dispatch, and ordered
//! delivery to output ports.

pub mod config;
pub mod demux;
pub mod description;
pub mod engine;
pub mod output;
pub mod sniff;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::{DemuxConfig, SelectionPolicy, StorageConfig};
pub use demux::{DemuxError, DemuxState, Demuxer, SeekError, SeekFormat, SeekRequest};
pub use engine::{ContentHandle, Engine, EngineError, EngineEvent};
pub use output::{Output, PortInfo, PushError};

/// Core errors that can bubble up from any Piecestream subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum PieceStreamError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Demux error: {0}")]
    Demux(#[from] DemuxError),

    #[error("Seek error: {0}")]
    Seek(#[from] SeekError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PieceStreamError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            PieceStreamError::Engine(e) => match e {
                EngineError::InvalidDescription { reason } => {
                    format!("Invalid archive description: {reason}")
                }
                EngineError::UnknownContent { handle } => {
                    format!("Content {handle} is not known to the engine")
                }
                _ => "Download engine error occurred".to_string(),
            },
            PieceStreamError::Demux(DemuxError::AddContent { reason }) => {
                format!("Could not add the archive: {reason}")
            }
            PieceStreamError::Demux(_) => "Streaming error occurred".to_string(),
            PieceStreamError::Seek(e) => format!("Seek rejected: {e}"),
            PieceStreamError::Configuration { reason } => {
                format!("Configuration error: {reason}")
            }
            PieceStreamError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PieceStreamError::Configuration { .. }
                | PieceStreamError::Seek(_)
                | PieceStreamError::Engine(EngineError::InvalidDescription { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, PieceStreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_invalid_description() {
        let error = PieceStreamError::from(EngineError::InvalidDescription {
            reason: "missing files".to_string(),
        });
        assert_eq!(
            error.user_message(),
            "Invalid archive description: missing files"
        );
        assert!(error.is_user_error());
    }

    #[test]
    fn test_stream_flow_error_is_not_user_error() {
        let error = PieceStreamError::from(DemuxError::StreamFlow {
            stream: 2,
            reason: PushError::NotLinked,
        });
        assert_eq!(error.user_message(), "Streaming error occurred");
        assert!(!error.is_user_error());
    }
}
