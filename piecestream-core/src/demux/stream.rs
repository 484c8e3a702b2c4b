//! Per-file stream state and its delivery queue.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::geometry::PieceSpan;
use crate::engine::FileEntry;

/// Entry of a stream's delivery queue.
#[derive(Debug)]
pub(crate) enum Delivery {
    /// Bytes of a piece, produced under the given activation generation
    Piece {
        generation: u64,
        piece: u32,
        data: Bytes,
    },
    /// An activation whose byte range is empty; announce and end it
    EmptyRange { generation: u64 },
    /// Stop the worker
    Shutdown,
}

/// Scheduling, buffering and position state of one stream.
///
/// Snapshots of this struct are handed out by [`Demuxer::stream`](super::Demuxer::stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamState {
    /// File index, also the output port number
    pub index: usize,
    pub file_offset: u64,
    pub file_size: u64,
    pub piece_length: u32,
    pub num_pieces: u32,
    /// Piece coordinates of the active byte range
    pub span: PieceSpan,
    /// Last piece that carries bytes of the active range
    pub last_piece: u32,
    /// File-relative `[start, end)` announced before the next push
    pub segment: (u64, u64),
    /// Piece expected next; one past the last piece handed to delivery
    pub next_piece: u32,
    pub requested: bool,
    pub finished: bool,
    pub buffering: bool,
    /// Readiness of the buffering window, 0 to 100
    pub buffering_level: u8,
    /// Pieces that were missing when buffering started
    pub buffering_pieces: Vec<u32>,
    /// A range announcement must precede the next push
    pub pending_segment: bool,
    /// A read of `next_piece` was issued and has not been answered yet
    pub read_pending: bool,
    /// Bumped on every activation; queue entries of older generations are stale
    pub generation: u64,
    pub port_open: bool,
}

impl StreamState {
    /// Creates the state for a file covering its whole byte range.
    pub fn new(file: &FileEntry, piece_length: u32, num_pieces: u32) -> Self {
        let mut state = Self {
            index: file.index,
            file_offset: file.offset,
            file_size: file.size,
            piece_length,
            num_pieces,
            span: PieceSpan::for_range(piece_length, file.offset, file.size),
            last_piece: 0,
            segment: (0, file.size),
            next_piece: 0,
            requested: false,
            finished: false,
            buffering: false,
            buffering_level: 0,
            buffering_pieces: Vec::new(),
            pending_segment: false,
            read_pending: false,
            generation: 0,
            port_open: false,
        };
        state.set_range(0, file.size);
        state
    }

    /// Points the stream at the file-relative byte range `[start, stop)`.
    ///
    /// Callers guarantee `start <= stop <= file_size`.
    pub fn set_range(&mut self, start: u64, stop: u64) {
        self.segment = (start, stop);
        self.span = PieceSpan::for_range(self.piece_length, self.file_offset + start, stop - start);
        self.last_piece = self
            .span
            .last_data_piece()
            .min(self.num_pieces.saturating_sub(1));
        self.next_piece = self.span.start_piece;
        self.finished = false;
    }

    /// Whether the active range holds no bytes.
    pub fn is_empty_range(&self) -> bool {
        self.segment.0 == self.segment.1
    }

    /// Whether every piece of the active range was handed to delivery.
    ///
    /// An empty range has no pieces to read.
    pub fn is_fully_read(&self) -> bool {
        self.is_empty_range() || self.next_piece > self.last_piece
    }

    /// Number of pieces counted when buffering started.
    pub fn buffering_count(&self) -> usize {
        self.buffering_pieces.len()
    }

    pub(crate) fn clear_buffering(&mut self) {
        self.buffering = false;
        self.buffering_level = 0;
        self.buffering_pieces.clear();
    }
}

/// A stream entity: its locked state plus the delivery queue.
pub(crate) struct Stream {
    pub file: FileEntry,
    state: Mutex<StreamState>,
    queue: mpsc::UnboundedSender<Delivery>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
}

impl Stream {
    pub fn new(file: FileEntry, piece_length: u32, num_pieces: u32) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(StreamState::new(&file, piece_length, num_pieces)),
            file,
            queue,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn index(&self) -> usize {
        self.file.index
    }

    /// Locks the stream state for one discrete operation.
    pub fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock()
    }

    /// Queues a delivery; false once the worker has gone away.
    pub fn enqueue(&self, delivery: Delivery) -> bool {
        self.queue.send(delivery).is_ok()
    }

    /// Hands the queue's consuming end to a worker, once.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        self.receiver.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(index: usize, offset: u64, size: u64) -> FileEntry {
        FileEntry {
            index,
            path: format!("file-{index}"),
            offset,
            size,
        }
    }

    #[test]
    fn test_new_state_covers_whole_file() {
        let state = StreamState::new(&file(1, 1500, 2500), 1000, 4);
        assert_eq!(state.span.start_piece, 1);
        assert_eq!(state.span.start_offset, 500);
        assert_eq!(state.span.end_piece, 4);
        assert_eq!(state.span.end_offset, 0);
        assert_eq!(state.last_piece, 3);
        assert_eq!(state.next_piece, 1);
        assert_eq!(state.segment, (0, 2500));
        assert!(!state.requested);
    }

    #[test]
    fn test_set_range_moves_span() {
        let mut state = StreamState::new(&file(0, 0, 10_000), 1000, 10);
        state.finished = true;
        state.set_range(4200, 6000);
        assert_eq!(state.span.start_piece, 4);
        assert_eq!(state.span.start_offset, 200);
        assert_eq!(state.last_piece, 5);
        assert_eq!(state.next_piece, 4);
        assert_eq!(state.segment, (4200, 6000));
        assert!(!state.finished);
    }

    #[test]
    fn test_last_piece_clamped_to_content() {
        let state = StreamState::new(&file(0, 0, 0), 1000, 0);
        assert_eq!(state.last_piece, 0);
        assert!(state.is_empty_range());
    }

    #[test]
    fn test_queue_closed_after_receiver_dropped() {
        let stream = Stream::new(file(0, 0, 10), 16, 1);
        let receiver = stream.take_receiver();
        assert!(receiver.is_some());
        assert!(stream.take_receiver().is_none());
        assert!(stream.enqueue(Delivery::Shutdown));
        drop(receiver);
        assert!(!stream.enqueue(Delivery::Shutdown));
    }
}
