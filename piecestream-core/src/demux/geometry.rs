//! Conversions between byte positions of the content and piece coordinates.

use bytes::Bytes;

/// Index of the piece holding `byte`.
pub fn piece_of(byte: u64, piece_length: u32) -> u32 {
    (byte / u64::from(piece_length)) as u32
}

/// Offset of `byte` inside its piece.
pub fn offset_in_piece(byte: u64, piece_length: u32) -> u32 {
    (byte % u64::from(piece_length)) as u32
}

/// Piece range covering a contiguous byte range of the content.
///
/// The end coordinates are derived from the exclusive end byte, so a range
/// ending exactly on a piece boundary has `end_offset == 0` and its
/// `end_piece` contributes no bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSpan {
    pub start_piece: u32,
    pub start_offset: u32,
    pub end_piece: u32,
    pub end_offset: u32,
}

impl PieceSpan {
    /// Computes the span of `size` bytes starting at content byte `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `piece_length` is zero.
    pub fn for_range(piece_length: u32, offset: u64, size: u64) -> Self {
        assert!(piece_length > 0, "piece length must be non-zero");
        let end = offset + size;
        Self {
            start_piece: piece_of(offset, piece_length),
            start_offset: offset_in_piece(offset, piece_length),
            end_piece: piece_of(end, piece_length),
            end_offset: offset_in_piece(end, piece_length),
        }
    }

    /// Whether `piece` lies inside the span, boundary pieces included.
    pub fn contains(&self, piece: u32) -> bool {
        (self.start_piece..=self.end_piece).contains(&piece)
    }

    /// Last piece that carries at least one byte of the range.
    pub fn last_data_piece(&self) -> u32 {
        if self.end_offset == 0 && self.end_piece > self.start_piece {
            self.end_piece - 1
        } else {
            self.end_piece
        }
    }

    /// Cuts a piece's bytes down to the part that belongs to the range.
    ///
    /// Pieces outside the span, and `end_piece` of a range ending on a piece
    /// boundary, trim to an empty slice.
    pub fn trim(&self, piece: u32, data: &Bytes) -> Bytes {
        if !self.contains(piece) {
            return Bytes::new();
        }
        let begin = if piece == self.start_piece {
            self.start_offset as usize
        } else {
            0
        };
        let end = if piece == self.end_piece {
            self.end_offset as usize
        } else {
            data.len()
        };
        let end = end.min(data.len());
        if begin >= end {
            return Bytes::new();
        }
        data.slice(begin..end)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn content_bytes(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn pieces_of(content: &[u8], piece_length: u32) -> Vec<Bytes> {
        content
            .chunks(piece_length as usize)
            .map(Bytes::copy_from_slice)
            .collect()
    }

    #[test]
    fn test_piece_conversions() {
        assert_eq!(piece_of(0, 16384), 0);
        assert_eq!(piece_of(16383, 16384), 0);
        assert_eq!(piece_of(16384, 16384), 1);
        assert_eq!(offset_in_piece(16385, 16384), 1);
    }

    #[test]
    fn test_span_ending_on_piece_boundary() {
        let span = PieceSpan::for_range(16384, 0, 32768);
        assert_eq!(
            span,
            PieceSpan {
                start_piece: 0,
                start_offset: 0,
                end_piece: 2,
                end_offset: 0,
            }
        );
        assert!(span.contains(2));
        assert_eq!(span.last_data_piece(), 1);
        assert!(span.trim(2, &Bytes::from(vec![1u8; 16384])).is_empty());
    }

    #[test]
    fn test_span_inside_one_piece() {
        let span = PieceSpan::for_range(100, 120, 30);
        assert_eq!(span.start_piece, 1);
        assert_eq!(span.end_piece, 1);
        assert_eq!(span.last_data_piece(), 1);

        let piece = Bytes::from(content_bytes(200).split_off(100));
        let trimmed = span.trim(1, &piece);
        assert_eq!(trimmed.len(), 30);
        assert_eq!(trimmed[0], piece[20]);
    }

    #[test]
    fn test_zero_size_range_trims_to_nothing() {
        let span = PieceSpan::for_range(100, 250, 0);
        assert_eq!(span.start_piece, span.end_piece);
        assert_eq!(span.last_data_piece(), 2);
        assert!(span.trim(2, &Bytes::from(vec![0u8; 100])).is_empty());
    }

    #[test]
    fn test_trim_outside_span_is_empty() {
        let span = PieceSpan::for_range(100, 250, 100);
        assert!(span.trim(0, &Bytes::from(vec![0u8; 100])).is_empty());
        assert!(span.trim(4, &Bytes::from(vec![0u8; 100])).is_empty());
    }

    proptest! {
        #[test]
        fn prop_span_matches_integer_division(
            piece_length in 1u32..70_000,
            offset in 0u64..10_000_000,
            size in 0u64..10_000_000,
        ) {
            let span = PieceSpan::for_range(piece_length, offset, size);
            prop_assert_eq!(u64::from(span.start_piece), offset / u64::from(piece_length));
            prop_assert_eq!(u64::from(span.end_piece), (offset + size) / u64::from(piece_length));
            prop_assert!(span.start_piece <= span.last_data_piece());
            prop_assert!(span.last_data_piece() <= span.end_piece);
        }

        #[test]
        fn prop_trimmed_pieces_cover_exactly_the_file(
            piece_length in 1u32..512,
            offset in 0u64..4096,
            size in 0u64..4096,
            tail in 0u64..1024,
        ) {
            let content = content_bytes(offset + size + tail);
            let pieces = pieces_of(&content, piece_length);
            let span = PieceSpan::for_range(piece_length, offset, size);

            let mut rebuilt = Vec::new();
            for index in span.start_piece..=span.end_piece {
                if let Some(piece) = pieces.get(index as usize) {
                    rebuilt.extend_from_slice(&span.trim(index, piece));
                }
            }
            prop_assert_eq!(&rebuilt[..], &content[offset as usize..(offset + size) as usize]);

            let mut up_to_last = Vec::new();
            for index in span.start_piece..=span.last_data_piece() {
                if let Some(piece) = pieces.get(index as usize) {
                    up_to_last.extend_from_slice(&span.trim(index, piece));
                }
            }
            prop_assert_eq!(up_to_last, rebuilt);
        }
    }
}
