//! Events produced asynchronously by the download engine.

use bytes::Bytes;

use super::ContentHandle;

/// Completion and error notifications drained from the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Content was accepted and its geometry can be queried
    ContentAdded { handle: ContentHandle },
    /// Content could not be added
    AddFailed { reason: String },
    /// Existing data on disk was checked; availability is now accurate
    ContentChecked { handle: ContentHandle },
    /// A piece finished downloading and passed verification
    PieceFinished { handle: ContentHandle, piece: u32 },
    /// Bytes of a piece previously requested with `read_piece`
    PieceRead {
        handle: ContentHandle,
        piece: u32,
        data: Bytes,
    },
    /// A `read_piece` request could not be served
    ReadFailed {
        handle: ContentHandle,
        piece: u32,
        reason: String,
    },
    /// Content was released by the engine
    ContentRemoved { handle: ContentHandle },
    /// Informational message with no effect on scheduling
    Status { message: String },
}

impl EngineEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::ContentAdded { .. } => "content_added",
            EngineEvent::AddFailed { .. } => "add_failed",
            EngineEvent::ContentChecked { .. } => "content_checked",
            EngineEvent::PieceFinished { .. } => "piece_finished",
            EngineEvent::PieceRead { .. } => "piece_read",
            EngineEvent::ReadFailed { .. } => "read_failed",
            EngineEvent::ContentRemoved { .. } => "content_removed",
            EngineEvent::Status { .. } => "status",
        }
    }
}
