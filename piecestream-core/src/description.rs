//! Accumulation of an archive description that arrives in chunks.
//!
//! Upstream may hand the description over in arbitrary pieces; nothing can be
//! added to the engine until end-of-input, when the whole buffer is taken.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::engine::EngineError;
use crate::sniff;

/// Collects description chunks until end-of-input.
#[derive(Debug, Default)]
pub struct DescriptionCollector {
    buffer: BytesMut,
    chunks: usize,
}

impl DescriptionCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next chunk of the description.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
        self.chunks += 1;
        debug!(
            "Received description chunk {} ({} bytes total)",
            self.chunks,
            self.buffer.len()
        );
    }

    /// Number of bytes collected so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing was collected yet.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether the collected prefix looks like a bencoded description.
    pub fn looks_like_description(&self) -> bool {
        sniff::is_archive_description(&self.buffer)
    }

    /// Takes the complete description at end-of-input.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvalidDescription` - If no bytes were collected
    pub fn finish(&mut self) -> Result<Bytes, EngineError> {
        if self.buffer.is_empty() {
            return Err(EngineError::InvalidDescription {
                reason: "description is empty".to_string(),
            });
        }
        self.chunks = 0;
        Ok(self.buffer.split().freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_are_concatenated() {
        let mut collector = DescriptionCollector::new();
        collector.push(b"d8:ann");
        collector.push(b"ounce3:url");
        assert_eq!(collector.len(), 16);
        assert!(collector.looks_like_description());

        let description = collector.finish().unwrap();
        assert_eq!(&description[..], b"d8:announce3:url");
        assert!(collector.is_empty());
    }

    #[test]
    fn test_empty_description_rejected() {
        let mut collector = DescriptionCollector::new();
        assert!(matches!(
            collector.finish(),
            Err(EngineError::InvalidDescription { .. })
        ));
    }
}
