//! Sliding-window piece prioritization.
//!
//! Each requested stream keeps up to `window` missing pieces ahead of its
//! position at maximum priority. Everything else stays at skip, so the engine
//! only fetches what playback is about to need.

use std::ops::RangeInclusive;

use tracing::{debug, trace};

use super::buffering;
use super::stream::StreamState;
use crate::engine::{ContentHandle, Engine, PiecePriority};

/// Scheduler bound to one piece of content and a window size.
pub(crate) struct PieceWindow<'a> {
    engine: &'a dyn Engine,
    handle: ContentHandle,
    window: u32,
}

impl<'a> PieceWindow<'a> {
    pub fn new(engine: &'a dyn Engine, handle: ContentHandle, window: u32) -> Self {
        Self {
            engine,
            handle,
            window,
        }
    }

    pub fn engine(&self) -> &'a dyn Engine {
        self.engine
    }

    pub fn handle(&self) -> ContentHandle {
        self.handle
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// Activates a stream at the start of its current range.
    ///
    /// Returns whether the stream has to buffer before its first read. A
    /// stream whose first piece is already on disk gets the following pieces
    /// scheduled and can be read right away.
    pub fn activate(&self, state: &mut StreamState) -> bool {
        state.requested = true;
        state.generation += 1;
        state.next_piece = state.span.start_piece;
        state.pending_segment = true;
        state.read_pending = false;
        state.finished = false;
        state.clear_buffering();

        if state.is_empty_range() {
            debug!(stream = state.index, "Activated empty range");
            return false;
        }

        let first = state.span.start_piece;
        if self.engine.have_piece(self.handle, first) && state.last_piece > first {
            self.schedule_ahead(state, first + 1, self.window.saturating_sub(1));
            debug!(
                stream = state.index,
                generation = state.generation,
                first,
                "Activated with first piece available"
            );
            return false;
        }

        self.schedule_ahead(state, first, self.window);
        let needs_buffering = buffering::start_buffering(self, state);
        debug!(
            stream = state.index,
            generation = state.generation,
            first,
            needs_buffering,
            "Activated"
        );
        needs_buffering
    }

    /// Raises the first eligible piece at or after `from_piece` to maximum
    /// priority.
    ///
    /// Pieces already available or already at maximum are skipped. Returns the
    /// piece that was raised, if any.
    pub fn add_piece(&self, state: &StreamState, from_piece: u32) -> Option<u32> {
        for piece in from_piece..=state.last_piece {
            if self.engine.have_piece(self.handle, piece) {
                continue;
            }
            if self.engine.piece_priority(self.handle, piece) == PiecePriority::MAX {
                continue;
            }
            self.engine
                .set_priority(self.handle, piece, PiecePriority::MAX);
            trace!(stream = state.index, piece, "Scheduled piece");
            return Some(piece);
        }
        None
    }

    /// Demotes the still-missing scheduled pieces of the stream's window back
    /// to skip.
    ///
    /// Pieces inside `claimed`, the unread ranges of other requested streams,
    /// keep their priority: a piece on a file boundary belongs to both files.
    pub fn release(&self, state: &StreamState, claimed: &[RangeInclusive<u32>]) {
        if !state.requested || state.is_fully_read() {
            return;
        }
        let mut released = 0;
        for piece in state.next_piece..=state.last_piece {
            if released == self.window {
                break;
            }
            if self.engine.have_piece(self.handle, piece) {
                continue;
            }
            if self.engine.piece_priority(self.handle, piece) != PiecePriority::MAX {
                continue;
            }
            if claimed.iter().any(|range| range.contains(&piece)) {
                trace!(stream = state.index, piece, "Piece still wanted by another stream");
                released += 1;
                continue;
            }
            self.engine
                .set_priority(self.handle, piece, PiecePriority::SKIP);
            released += 1;
        }
        if released > 0 {
            debug!(stream = state.index, released, "Released window");
        }
    }

    fn schedule_ahead(&self, state: &StreamState, from_piece: u32, count: u32) {
        let mut from = from_piece;
        for _ in 0..count {
            match self.add_piece(state, from) {
                Some(piece) => from = piece + 1,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FileEntry;
    use crate::test_mocks::{MOCK_HANDLE, MockEngine};

    fn state_for(engine: &MockEngine, index: usize) -> StreamState {
        let content = engine.content();
        let file: &FileEntry = &content.files[index];
        StreamState::new(file, content.piece_length, content.num_pieces)
    }

    #[test]
    fn test_activate_without_first_piece_buffers() {
        let engine = MockEngine::with_files(100, &[1000]);
        let window = PieceWindow::new(&engine, MOCK_HANDLE, 3);
        let mut state = state_for(&engine, 0);

        assert!(window.activate(&mut state));
        assert!(state.requested);
        assert!(state.pending_segment);
        assert_eq!(state.generation, 1);
        assert_eq!(state.next_piece, 0);
        assert_eq!(state.buffering_count(), 3);
        for piece in 0..3 {
            assert_eq!(engine.priority(piece), PiecePriority::MAX);
        }
        assert_eq!(engine.priority(3), PiecePriority::DEFAULT);
    }

    #[test]
    fn test_activate_with_first_piece_schedules_following() {
        let engine = MockEngine::with_files(100, &[1000]);
        engine.preload([0]);
        let window = PieceWindow::new(&engine, MOCK_HANDLE, 3);
        let mut state = state_for(&engine, 0);

        assert!(!window.activate(&mut state));
        assert!(!state.buffering);
        assert_eq!(engine.priority(1), PiecePriority::MAX);
        assert_eq!(engine.priority(2), PiecePriority::MAX);
        assert_ne!(engine.priority(3), PiecePriority::MAX);
    }

    #[test]
    fn test_activate_single_available_piece_reads_immediately() {
        let engine = MockEngine::with_files(100, &[60]);
        engine.preload([0]);
        let window = PieceWindow::new(&engine, MOCK_HANDLE, 3);
        let mut state = state_for(&engine, 0);

        assert!(!window.activate(&mut state));
        assert!(!state.buffering);
    }

    #[test]
    fn test_add_piece_skips_available_and_scheduled() {
        let engine = MockEngine::with_files(100, &[1000]);
        engine.preload([2]);
        let window = PieceWindow::new(&engine, MOCK_HANDLE, 3);
        let state = state_for(&engine, 0);

        engine.set_priority(MOCK_HANDLE, 1, PiecePriority::MAX);
        assert_eq!(window.add_piece(&state, 1), Some(3));
        assert_eq!(window.add_piece(&state, 1), Some(4));
        assert_eq!(window.add_piece(&state, 10), None);
    }

    #[test]
    fn test_add_piece_stops_at_last_data_piece() {
        let engine = MockEngine::with_files(100, &[200, 50]);
        let window = PieceWindow::new(&engine, MOCK_HANDLE, 3);
        let state = state_for(&engine, 0);

        assert_eq!(state.last_piece, 1);
        assert_eq!(window.add_piece(&state, 0), Some(0));
        assert_eq!(window.add_piece(&state, 0), Some(1));
        assert_eq!(window.add_piece(&state, 0), None);
        assert_ne!(engine.priority(2), PiecePriority::MAX);
    }

    #[test]
    fn test_release_demotes_missing_window() {
        let engine = MockEngine::with_files(100, &[1000]);
        let window = PieceWindow::new(&engine, MOCK_HANDLE, 3);
        let mut state = state_for(&engine, 0);
        window.activate(&mut state);

        window.release(&state, &[]);
        for piece in 0..3 {
            assert_eq!(engine.priority(piece), PiecePriority::SKIP);
        }
    }

    #[test]
    fn test_release_keeps_boundary_piece_of_neighbour() {
        let engine = MockEngine::with_files(100, &[150, 250]);
        let window = PieceWindow::new(&engine, MOCK_HANDLE, 3);
        let mut first = state_for(&engine, 0);
        let mut second = state_for(&engine, 1);
        window.activate(&mut first);
        window.activate(&mut second);
        assert_eq!(first.last_piece, 1);
        assert_eq!(second.span.start_piece, 1);

        window.release(&first, &[second.next_piece..=second.last_piece]);
        assert_eq!(engine.priority(0), PiecePriority::SKIP);
        assert_eq!(engine.priority(1), PiecePriority::MAX);
    }
}
