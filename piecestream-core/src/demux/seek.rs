//! Byte-range seeks on a single stream.

use std::fmt;

use tracing::{debug, info};

use super::dispatcher::DemuxShared;

/// Unit of a seek position as the consumption framework expresses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFormat {
    Bytes,
    Time,
    Percent,
    Default,
}

impl fmt::Display for SeekFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeekFormat::Bytes => write!(f, "bytes"),
            SeekFormat::Time => write!(f, "time"),
            SeekFormat::Percent => write!(f, "percent"),
            SeekFormat::Default => write!(f, "default"),
        }
    }
}

/// A seek on one stream.
///
/// `start` and `stop` are positions inside the file; `stop: None` means the
/// end of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekRequest {
    pub format: SeekFormat,
    pub rate: f64,
    pub start: u64,
    pub stop: Option<u64>,
}

impl SeekRequest {
    /// Creates a forward, normal-rate byte seek.
    pub fn bytes(start: u64, stop: Option<u64>) -> Self {
        Self {
            format: SeekFormat::Bytes,
            rate: 1.0,
            start,
            stop,
        }
    }

    /// Sets the playback rate.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }
}

/// Reasons a seek is rejected. A rejected seek changes nothing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeekError {
    #[error("Seeking in {format} format is not supported")]
    UnsupportedFormat { format: SeekFormat },

    #[error("Negative playback rate {rate} is not supported")]
    NegativeRate { rate: f64 },

    #[error("Content geometry is not known yet")]
    ContentUnknown,

    #[error("Stream {stream} does not exist")]
    UnknownStream { stream: usize },

    #[error("Stream {stream} is not active")]
    StreamInactive { stream: usize },

    #[error("Invalid range {start}..{stop} for a file of {size} bytes")]
    InvalidRange { start: u64, stop: u64, size: u64 },
}

impl DemuxShared {
    /// Moves a stream to a new byte range.
    ///
    /// The abandoned window is released, the stream is re-activated under a
    /// new generation and either reads its first piece right away or joins
    /// buffering.
    pub(crate) fn seek(&self, index: usize, request: &SeekRequest) -> Result<(), SeekError> {
        if request.format != SeekFormat::Bytes {
            return Err(SeekError::UnsupportedFormat {
                format: request.format,
            });
        }
        if request.rate < 0.0 {
            return Err(SeekError::NegativeRate { rate: request.rate });
        }
        let handle = self.handle().ok_or(SeekError::ContentUnknown)?;
        let stream = self
            .stream(index)
            .ok_or(SeekError::UnknownStream { stream: index })?;
        let window = self.piece_window(handle);
        let claimed = self.claimed_ranges(index);

        let needs_buffering = {
            let mut state = stream.lock();
            if !state.requested {
                return Err(SeekError::StreamInactive { stream: index });
            }
            let size = state.file_size;
            let stop = request.stop.unwrap_or(size).min(size);
            if request.start >= stop {
                return Err(SeekError::InvalidRange {
                    start: request.start,
                    stop,
                    size,
                });
            }

            window.release(&state, &claimed);
            state.set_range(request.start, stop);
            let needs_buffering = window.activate(&mut state);
            info!(
                stream = index,
                start = request.start,
                stop,
                generation = state.generation,
                "Seek"
            );
            if !needs_buffering {
                let first = state.next_piece;
                debug!(stream = index, piece = first, "Reading first piece after seek");
                state.read_pending = true;
                self.engine.read_piece(handle, first);
            }
            needs_buffering
        };

        if needs_buffering {
            self.refresh_buffering();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_seek_defaults() {
        let request = SeekRequest::bytes(10, None);
        assert_eq!(request.format, SeekFormat::Bytes);
        assert_eq!(request.rate, 1.0);
        assert_eq!(request.with_rate(-1.0).rate, -1.0);
    }

    #[test]
    fn test_error_messages() {
        let error = SeekError::UnsupportedFormat {
            format: SeekFormat::Time,
        };
        assert_eq!(error.to_string(), "Seeking in time format is not supported");
        let error = SeekError::InvalidRange {
            start: 5,
            stop: 5,
            size: 5,
        };
        assert_eq!(error.to_string(), "Invalid range 5..5 for a file of 5 bytes");
    }
}
