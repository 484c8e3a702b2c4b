//! Download engine contract consumed by the demuxer.
//!
//! The swarm engine (peer protocol, verification, disk I/O) lives outside this
//! crate. The demuxer only adds content, queries geometry and availability,
//! adjusts piece priorities, requests asynchronous piece reads, and consumes
//! the engine's completion events.

mod events;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
pub use events::EngineEvent;

/// Identifier the engine assigns to added content.
///
/// 20-byte digest rendered as lowercase hex, the same shape as a torrent's
/// info hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHandle([u8; 20]);

impl ContentHandle {
    /// Creates a handle from a 20-byte digest.
    pub const fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to the underlying digest.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for ContentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Download priority of a single piece, 0 (skip) to 7 (maximum).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PiecePriority(u8);

impl PiecePriority {
    /// Do not download.
    pub const SKIP: Self = Self(0);
    /// Engine default for pieces nobody asked about.
    pub const DEFAULT: Self = Self(4);
    /// Download before anything else.
    pub const MAX: Self = Self(7);

    /// Creates a priority, clamping levels above 7.
    pub fn new(level: u8) -> Self {
        Self(level.min(Self::MAX.0))
    }

    /// Returns the numeric level.
    pub fn level(self) -> u8 {
        self.0
    }

    /// Whether the engine should fetch a piece with this priority at all.
    pub fn is_wanted(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for PiecePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One logical file inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Position of the file in the archive's file list
    pub index: usize,
    /// Path of the file inside the archive
    pub path: String,
    /// Byte offset of the file's first byte within the whole content
    pub offset: u64,
    /// File length in bytes
    pub size: u64,
}

/// Geometry of added content. Immutable once the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub piece_length: u32,
    pub num_pieces: u32,
    pub files: Vec<FileEntry>,
}

impl Content {
    /// Total content length in bytes.
    pub fn total_size(&self) -> u64 {
        self.files
            .iter()
            .map(|file| file.offset + file.size)
            .max()
            .unwrap_or(0)
    }

    /// Length of a specific piece; only the last piece may be short.
    pub fn piece_size(&self, index: u32) -> u32 {
        if index + 1 < self.num_pieces {
            return self.piece_length;
        }
        let remainder = self.total_size() % u64::from(self.piece_length);
        if remainder == 0 {
            self.piece_length
        } else {
            remainder as u32
        }
    }
}

/// Parameters for adding content to the engine.
#[derive(Debug, Clone)]
pub struct AddContentParams {
    /// Raw archive description (for example a bencoded torrent)
    pub description: Bytes,
    /// Directory for the engine's temporary piece storage
    pub save_path: PathBuf,
}

/// Errors reported synchronously by engine calls.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Content {handle} not found")]
    UnknownContent { handle: ContentHandle },

    #[error("Piece {index} out of range (content has {num_pieces} pieces)")]
    PieceOutOfRange { index: u32, num_pieces: u32 },

    #[error("Invalid archive description: {reason}")]
    InvalidDescription { reason: String },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Operations the demuxer needs from a download engine.
///
/// Calls are fire-and-forget where the engine works asynchronously: results
/// of `add_content` and `read_piece` arrive later as [`EngineEvent`]s through
/// `wait_for_events`.
pub trait Engine: Send + Sync {
    /// Starts adding content; completion is reported as
    /// `ContentAdded` or `AddFailed`.
    fn add_content(&self, params: AddContentParams);

    /// Returns the geometry of added content.
    ///
    /// # Errors
    ///
    /// - `EngineError::UnknownContent` - If the handle was never added or was removed
    fn geometry(&self, handle: ContentHandle) -> Result<Content, EngineError>;

    /// Checks if a piece is downloaded and verified.
    fn have_piece(&self, handle: ContentHandle, index: u32) -> bool;

    /// Returns the current download priority of a piece.
    fn piece_priority(&self, handle: ContentHandle, index: u32) -> PiecePriority;

    /// Sets the download priority of a piece.
    fn set_priority(&self, handle: ContentHandle, index: u32, priority: PiecePriority);

    /// Requests the bytes of a downloaded piece; delivered as `PieceRead`
    /// or `ReadFailed`.
    fn read_piece(&self, handle: ContentHandle, index: u32);

    /// Hints the engine to prefer ascending piece order.
    fn set_sequential_download(&self, handle: ContentHandle, sequential: bool);

    /// Releases content; completion is reported as `ContentRemoved`.
    fn remove_content(&self, handle: ContentHandle, delete_files: bool);

    /// Blocks until events are pending or the timeout elapses, then drains
    /// every pending event.
    fn wait_for_events(&self, timeout: Duration) -> Vec<EngineEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_file_content() -> Content {
        Content {
            piece_length: 1000,
            num_pieces: 3,
            files: vec![
                FileEntry {
                    index: 0,
                    path: "a.bin".to_string(),
                    offset: 0,
                    size: 1500,
                },
                FileEntry {
                    index: 1,
                    path: "b.bin".to_string(),
                    offset: 1500,
                    size: 1000,
                },
            ],
        }
    }

    #[test]
    fn test_content_handle_display() {
        let handle = ContentHandle::new([0xab; 20]);
        assert_eq!(handle.to_string(), "ab".repeat(20));
    }

    #[test]
    fn test_priority_clamps_to_max() {
        assert_eq!(PiecePriority::new(12), PiecePriority::MAX);
        assert!(!PiecePriority::SKIP.is_wanted());
        assert!(PiecePriority::DEFAULT.is_wanted());
    }

    #[test]
    fn test_last_piece_is_short() {
        let content = two_file_content();
        assert_eq!(content.total_size(), 2500);
        assert_eq!(content.piece_size(0), 1000);
        assert_eq!(content.piece_size(2), 500);
    }
}
