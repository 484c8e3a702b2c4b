//! Buffering readiness per stream and its aggregation across streams.

use tracing::{debug, info};

use super::dispatcher::DemuxShared;
use super::scheduler::PieceWindow;
use super::stream::StreamState;

/// Starts buffering if pieces ahead of the stream's position are missing.
///
/// Counts the missing pieces among the next `window` pieces of the range.
/// Returns false, leaving the stream out of buffering, when none is missing.
pub(crate) fn start_buffering(window: &PieceWindow<'_>, state: &mut StreamState) -> bool {
    state.clear_buffering();
    if state.is_fully_read() {
        return false;
    }
    let from = state.next_piece;
    let to = from
        .saturating_add(window.window().saturating_sub(1))
        .min(state.last_piece);
    let missing: Vec<u32> = (from..=to)
        .filter(|&piece| !window.engine().have_piece(window.handle(), piece))
        .collect();
    if missing.is_empty() {
        return false;
    }
    debug!(
        stream = state.index,
        from,
        missing = missing.len(),
        "Buffering started"
    );
    state.buffering = true;
    state.buffering_level = 0;
    state.buffering_pieces = missing;
    true
}

/// Recomputes the buffering level of a stream from the counted pieces.
pub(crate) fn update_buffering(window: &PieceWindow<'_>, state: &mut StreamState) -> u8 {
    let count = state.buffering_pieces.len();
    let level = if count == 0 {
        100
    } else {
        let available = state
            .buffering_pieces
            .iter()
            .filter(|&&piece| window.engine().have_piece(window.handle(), piece))
            .count();
        (available * 100 / count) as u8
    };
    state.buffering_level = level;
    level
}

/// Arithmetic mean of stream levels; no buffering stream means fully ready.
pub fn mean_level(levels: &[u8]) -> u8 {
    if levels.is_empty() {
        return 100;
    }
    let sum: usize = levels.iter().map(|&level| usize::from(level)).sum();
    (sum / levels.len()) as u8
}

/// What the aggregate buffering state asks of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingSignal {
    /// Nothing to report
    Idle,
    /// Still buffering at the given level
    Progress(u8),
    /// Readiness reached 100 after buffering
    Resume,
}

/// Subsystem-wide buffering latch.
#[derive(Debug, Default)]
pub struct BufferingLatch {
    latched: bool,
}

impl BufferingLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Feeds the current mean level into the latch.
    pub fn observe(&mut self, mean: u8) -> BufferingSignal {
        if mean < 100 {
            self.latched = true;
            BufferingSignal::Progress(mean)
        } else if self.latched {
            self.latched = false;
            BufferingSignal::Resume
        } else {
            BufferingSignal::Idle
        }
    }
}

impl DemuxShared {
    /// Recomputes buffering of every buffering stream and acts on the
    /// aggregate: reports progress, or kicks every stream without an
    /// outstanding read once the content ahead of all of them is available.
    pub(crate) fn refresh_buffering(&self) {
        let Some(handle) = self.handle() else {
            return;
        };
        let window = self.piece_window(handle);
        let mut latch = self.latch.lock();

        loop {
            let streams = self.streams_snapshot();
            let levels: Vec<u8> = streams
                .iter()
                .filter_map(|stream| {
                    let mut state = stream.lock();
                    (state.requested && state.buffering)
                        .then(|| update_buffering(&window, &mut state))
                })
                .collect();

            let mean = mean_level(&levels);
            let signal = latch.observe(mean);
            match signal {
                BufferingSignal::Progress(percent) => {
                    debug!(percent, streams = levels.len(), "Buffering");
                    self.output.buffering(percent);
                    return;
                }
                BufferingSignal::Resume => {
                    info!("Buffering complete, resuming");
                    self.output.buffering(100);
                }
                BufferingSignal::Idle if levels.is_empty() => return,
                BufferingSignal::Idle => {}
            }

            // Streams with a read in flight resume on its answer.
            let mut rearmed = false;
            for stream in &streams {
                let mut state = stream.lock();
                if !state.requested || state.is_fully_read() || state.read_pending {
                    continue;
                }
                state.clear_buffering();
                let next = state.next_piece;
                if self.engine.have_piece(handle, next) {
                    state.read_pending = true;
                    self.engine.read_piece(handle, next);
                } else if start_buffering(&window, &mut state) {
                    rearmed = true;
                }
            }
            if !rearmed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::test_mocks::{MOCK_HANDLE, MockEngine};

    fn buffering_stream(engine: &MockEngine) -> (PieceWindow<'_>, StreamState) {
        let content = engine.content();
        let state = StreamState::new(&content.files[0], content.piece_length, content.num_pieces);
        (PieceWindow::new(engine, MOCK_HANDLE, 3), state)
    }

    #[test]
    fn test_two_of_three_pieces_is_66_percent() {
        let engine = MockEngine::with_files(16384, &[10 * 16384]);
        let (window, mut state) = buffering_stream(&engine);

        assert!(start_buffering(&window, &mut state));
        assert_eq!(state.buffering_count(), 3);
        assert_eq!(update_buffering(&window, &mut state), 0);

        engine.preload([0, 1]);
        assert_eq!(update_buffering(&window, &mut state), 66);
        engine.preload([2]);
        assert_eq!(update_buffering(&window, &mut state), 100);
    }

    #[test]
    fn test_only_missing_pieces_are_counted() {
        let engine = MockEngine::with_files(100, &[1000]);
        engine.preload([1]);
        let (window, mut state) = buffering_stream(&engine);

        assert!(start_buffering(&window, &mut state));
        assert_eq!(state.buffering_pieces, vec![0, 2]);
        engine.preload([2]);
        assert_eq!(update_buffering(&window, &mut state), 50);
    }

    #[test]
    fn test_no_buffering_when_window_available() {
        let engine = MockEngine::with_files(100, &[1000]);
        engine.preload([0, 1, 2]);
        let (window, mut state) = buffering_stream(&engine);

        assert!(!start_buffering(&window, &mut state));
        assert!(!state.buffering);
    }

    #[test]
    fn test_window_clamped_to_last_piece() {
        let engine = MockEngine::with_files(100, &[250]);
        let (window, mut state) = buffering_stream(&engine);
        state.next_piece = 2;

        assert!(start_buffering(&window, &mut state));
        assert_eq!(state.buffering_pieces, vec![2]);
    }

    #[test]
    fn test_latch_transitions() {
        let mut latch = BufferingLatch::new();
        assert_eq!(latch.observe(100), BufferingSignal::Idle);
        assert_eq!(latch.observe(40), BufferingSignal::Progress(40));
        assert!(latch.is_latched());
        assert_eq!(latch.observe(90), BufferingSignal::Progress(90));
        assert_eq!(latch.observe(100), BufferingSignal::Resume);
        assert!(!latch.is_latched());
        assert_eq!(latch.observe(100), BufferingSignal::Idle);
    }

    #[test]
    fn test_mean_of_no_streams_is_ready() {
        assert_eq!(mean_level(&[]), 100);
        assert_eq!(mean_level(&[0, 100, 50]), 50);
    }

    proptest! {
        #[test]
        fn prop_level_bounded_and_full_only_when_complete(
            available in proptest::collection::vec(any::<bool>(), 6),
        ) {
            let engine = MockEngine::with_files(100, &[600]);
            let content = engine.content();
            let mut state = StreamState::new(&content.files[0], 100, content.num_pieces);
            let window = PieceWindow::new(&engine, MOCK_HANDLE, 6);

            prop_assert!(start_buffering(&window, &mut state));
            let counted = state.buffering_pieces.clone();
            engine.preload(
                available
                    .iter()
                    .enumerate()
                    .filter(|(_, have)| **have)
                    .map(|(piece, _)| piece as u32),
            );

            let level = update_buffering(&window, &mut state);
            prop_assert!(level <= 100);
            let complete = counted.iter().all(|&piece| available[piece as usize]);
            prop_assert_eq!(level == 100, complete);
        }
    }
}
