//! Output contract exposed by the demuxer to the consumption framework.
//!
//! Every active stream owns one output port, addressed by the file index of
//! the stream. Ports receive a range announcement, then trimmed piece bytes in
//! strictly increasing order, then end-of-stream.

use bytes::Bytes;

use crate::demux::DemuxError;
use crate::sniff::ContentType;

/// Description of a port handed to the consumer when it opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Path of the file inside the archive
    pub name: String,
    /// Full file length in bytes
    pub size: u64,
    /// Sniffed type of the first delivered bytes, when sniffing is enabled
    pub content_type: Option<ContentType>,
}

/// Non-success results of a push.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Consumer is flushing (typically mid-seek); the buffer is discarded
    #[error("port is flushing")]
    Flushing,

    /// Nothing is linked to the port
    #[error("port is not linked")]
    NotLinked,

    #[error("fatal flow error: {0}")]
    Fatal(String),
}

impl PushError {
    /// Whether the stream must stop after this result.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PushError::Flushing)
    }
}

/// Consumer side of the demuxer.
///
/// `push` may block for as long as the consumer needs; it is only called from
/// the stream's delivery worker thread. All other callbacks are short
/// notifications and may arrive from the dispatcher or a control thread.
pub trait Output: Send + Sync {
    /// A stream became active and its port is ready for data.
    fn port_added(&self, port: usize, info: PortInfo);

    /// A stream's port was torn down.
    fn port_removed(&self, port: usize);

    /// Announces the byte range `[start, end)` of the file that the following
    /// pushes cover.
    fn announce_range(&self, port: usize, start: u64, end: u64);

    /// Delivers the next bytes of the stream.
    ///
    /// # Errors
    ///
    /// - `PushError::Flushing` - Buffer dropped, stream continues
    /// - `PushError::NotLinked` - Port has no consumer, stream stops
    /// - `PushError::Fatal` - Unrecoverable consumer failure, stream stops
    fn push(&self, port: usize, data: Bytes) -> Result<(), PushError>;

    /// No more data follows on this port until the next range announcement.
    fn end_of_stream(&self, port: usize);

    /// Every requested stream has an open port.
    fn no_more_ports(&self);

    /// Subsystem-wide readiness, 0 to 100. 100 means playback may resume.
    fn buffering(&self, percent: u8);

    /// A fatal subsystem or stream error.
    fn error(&self, error: DemuxError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_flushing_is_recoverable() {
        assert!(!PushError::Flushing.is_fatal());
        assert!(PushError::NotLinked.is_fatal());
        assert!(PushError::Fatal("closed".to_string()).is_fatal());
    }
}
