//! Mock engine and recording output for testing the demuxer.
//!
//! `MockEngine` serves one piece of content whose byte at absolute offset
//! `x` is `x % 251`; pieces become available only when a test preloads or
//! completes them. `RecordingOutput` records every output call and lets
//! tests block until a condition on the call log holds.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::demux::DemuxError;
use crate::engine::{
    AddContentParams, Content, ContentHandle, Engine, EngineError, EngineEvent, FileEntry,
    PiecePriority,
};
use crate::output::{Output, PortInfo, PushError};

/// Handle the mock engine assigns to its content.
pub const MOCK_HANDLE: ContentHandle = ContentHandle::new([7; 20]);

/// Byte at an absolute content offset.
pub fn content_byte(offset: u64) -> u8 {
    (offset % 251) as u8
}

struct MockEngineState {
    content: Content,
    added: bool,
    fail_add: Option<String>,
    have: Vec<bool>,
    priorities: Vec<PiecePriority>,
    sequential: bool,
    reads: Vec<u32>,
    hold_reads: bool,
    failing_reads: Vec<u32>,
    removals: Vec<(ContentHandle, bool)>,
    descriptions: Vec<AddContentParams>,
    pending: VecDeque<EngineEvent>,
}

/// In-memory engine driven explicitly by tests.
pub struct MockEngine {
    state: Mutex<MockEngineState>,
    events: Condvar,
}

impl MockEngine {
    /// Creates content made of consecutive files with the given sizes.
    pub fn with_files(piece_length: u32, sizes: &[u64]) -> Self {
        let mut offset = 0;
        let files: Vec<FileEntry> = sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| {
                let file = FileEntry {
                    index,
                    path: format!("file-{index}.bin"),
                    offset,
                    size,
                };
                offset += size;
                file
            })
            .collect();
        let num_pieces = offset.div_ceil(u64::from(piece_length)) as u32;

        Self {
            state: Mutex::new(MockEngineState {
                content: Content {
                    piece_length,
                    num_pieces,
                    files,
                },
                added: false,
                fail_add: None,
                have: vec![false; num_pieces as usize],
                priorities: vec![PiecePriority::DEFAULT; num_pieces as usize],
                sequential: false,
                reads: Vec::new(),
                hold_reads: false,
                failing_reads: Vec::new(),
                removals: Vec::new(),
                descriptions: Vec::new(),
                pending: VecDeque::new(),
            }),
            events: Condvar::new(),
        }
    }

    /// Makes `add_content` fail with the given reason.
    pub fn failing_add(self, reason: &str) -> Self {
        self.state.lock().fail_add = Some(reason.to_string());
        self
    }

    /// Records reads without ever answering them.
    pub fn hold_reads(&self) {
        self.state.lock().hold_reads = true;
    }

    /// Makes reads of these pieces fail even when they are available.
    pub fn fail_reads(&self, pieces: impl IntoIterator<Item = u32>) {
        self.state.lock().failing_reads.extend(pieces);
    }

    pub fn content(&self) -> Content {
        self.state.lock().content.clone()
    }

    /// Marks pieces available without emitting events.
    pub fn preload(&self, pieces: impl IntoIterator<Item = u32>) {
        let mut state = self.state.lock();
        for piece in pieces {
            if let Some(have) = state.have.get_mut(piece as usize) {
                *have = true;
            }
        }
    }

    /// Marks every piece available without emitting events.
    pub fn preload_all(&self) {
        let num_pieces = self.state.lock().content.num_pieces;
        self.preload(0..num_pieces);
    }

    /// Finishes downloading a piece and emits `PieceFinished`.
    pub fn complete_piece(&self, piece: u32) {
        self.preload([piece]);
        self.push_event(EngineEvent::PieceFinished {
            handle: MOCK_HANDLE,
            piece,
        });
    }

    /// Queues an arbitrary event.
    pub fn push_event(&self, event: EngineEvent) {
        self.state.lock().pending.push_back(event);
        self.events.notify_all();
    }

    /// Bytes of a piece as the engine would read them.
    pub fn piece_bytes(&self, piece: u32) -> Bytes {
        let content = self.content();
        let start = u64::from(piece) * u64::from(content.piece_length);
        let end = (start + u64::from(content.piece_length)).min(content.total_size());
        (start..end).map(content_byte).collect::<Vec<u8>>().into()
    }

    /// Every byte of a file, for comparison with delivered data.
    pub fn file_bytes(&self, index: usize) -> Vec<u8> {
        let content = self.content();
        let file = &content.files[index];
        (file.offset..file.offset + file.size)
            .map(content_byte)
            .collect()
    }

    pub fn priority(&self, piece: u32) -> PiecePriority {
        self.state.lock().priorities[piece as usize]
    }

    /// Pieces passed to `read_piece`, in call order.
    pub fn reads(&self) -> Vec<u32> {
        self.state.lock().reads.clone()
    }

    pub fn removals(&self) -> Vec<(ContentHandle, bool)> {
        self.state.lock().removals.clone()
    }

    pub fn is_sequential(&self) -> bool {
        self.state.lock().sequential
    }

    /// Parameters of every `add_content` call.
    pub fn added(&self) -> Vec<AddContentParams> {
        self.state.lock().descriptions.clone()
    }
}

impl Engine for MockEngine {
    fn add_content(&self, params: AddContentParams) {
        let mut state = self.state.lock();
        state.descriptions.push(params);
        if let Some(reason) = state.fail_add.clone() {
            state.pending.push_back(EngineEvent::AddFailed { reason });
        } else {
            state.added = true;
            state.pending.push_back(EngineEvent::ContentAdded {
                handle: MOCK_HANDLE,
            });
            state.pending.push_back(EngineEvent::ContentChecked {
                handle: MOCK_HANDLE,
            });
        }
        self.events.notify_all();
    }

    fn geometry(&self, handle: ContentHandle) -> Result<Content, EngineError> {
        let state = self.state.lock();
        if !state.added || handle != MOCK_HANDLE {
            return Err(EngineError::UnknownContent { handle });
        }
        Ok(state.content.clone())
    }

    fn have_piece(&self, _handle: ContentHandle, index: u32) -> bool {
        self.state
            .lock()
            .have
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    fn piece_priority(&self, _handle: ContentHandle, index: u32) -> PiecePriority {
        self.state
            .lock()
            .priorities
            .get(index as usize)
            .copied()
            .unwrap_or(PiecePriority::SKIP)
    }

    fn set_priority(&self, _handle: ContentHandle, index: u32, priority: PiecePriority) {
        if let Some(slot) = self.state.lock().priorities.get_mut(index as usize) {
            *slot = priority;
        }
    }

    fn read_piece(&self, handle: ContentHandle, index: u32) {
        let available = self.have_piece(handle, index);
        let event = if self.state.lock().failing_reads.contains(&index) {
            EngineEvent::ReadFailed {
                handle,
                piece: index,
                reason: "read error".to_string(),
            }
        } else if available {
            EngineEvent::PieceRead {
                handle,
                piece: index,
                data: self.piece_bytes(index),
            }
        } else {
            EngineEvent::ReadFailed {
                handle,
                piece: index,
                reason: "piece not downloaded".to_string(),
            }
        };
        let mut state = self.state.lock();
        state.reads.push(index);
        if state.hold_reads {
            return;
        }
        state.pending.push_back(event);
        self.events.notify_all();
    }

    fn set_sequential_download(&self, _handle: ContentHandle, sequential: bool) {
        self.state.lock().sequential = sequential;
    }

    fn remove_content(&self, handle: ContentHandle, delete_files: bool) {
        let mut state = self.state.lock();
        state.removals.push((handle, delete_files));
        state.added = false;
        state
            .pending
            .push_back(EngineEvent::ContentRemoved { handle });
        self.events.notify_all();
    }

    fn wait_for_events(&self, timeout: Duration) -> Vec<EngineEvent> {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            self.events.wait_for(&mut state, timeout);
        }
        state.pending.drain(..).collect()
    }
}

/// One recorded output call.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    PortAdded { port: usize, info: PortInfo },
    PortRemoved { port: usize },
    AnnounceRange { port: usize, start: u64, end: u64 },
    Push { port: usize, len: usize },
    EndOfStream { port: usize },
    NoMorePorts,
    Buffering { percent: u8 },
    Error { message: String },
}

#[derive(Default)]
struct Recorded {
    calls: Vec<OutputCall>,
    segments: HashMap<usize, Vec<Vec<u8>>>,
    push_failure: Option<PushError>,
    pushes_paused: bool,
}

/// Output that records every call.
#[derive(Default)]
pub struct RecordingOutput {
    recorded: Mutex<Recorded>,
    changed: Condvar,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following push fail with `error`.
    pub fn fail_pushes_with(&self, error: PushError) {
        self.recorded.lock().push_failure = Some(error);
    }

    /// Blocks every following push until [`resume_pushes`](Self::resume_pushes).
    pub fn pause_pushes(&self) {
        self.recorded.lock().pushes_paused = true;
    }

    pub fn resume_pushes(&self) {
        self.recorded.lock().pushes_paused = false;
        self.changed.notify_all();
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.recorded.lock().calls.clone()
    }

    /// Bytes pushed to a port, concatenated across ranges.
    pub fn data(&self, port: usize) -> Vec<u8> {
        self.segments(port).concat()
    }

    /// Bytes pushed to a port, one entry per announced range.
    pub fn segments(&self, port: usize) -> Vec<Vec<u8>> {
        self.recorded
            .lock()
            .segments
            .get(&port)
            .cloned()
            .unwrap_or_default()
    }

    pub fn buffering_levels(&self) -> Vec<u8> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                OutputCall::Buffering { percent } => Some(percent),
                _ => None,
            })
            .collect()
    }

    pub fn end_of_stream_count(&self, port: usize) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == OutputCall::EndOfStream { port })
            .count()
    }

    /// Blocks until `condition` holds on the call log or the timeout passes.
    pub fn wait_until(&self, timeout: Duration, condition: impl Fn(&[OutputCall]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut recorded = self.recorded.lock();
        while !condition(&recorded.calls) {
            if self.changed.wait_until(&mut recorded, deadline).timed_out() {
                return condition(&recorded.calls);
            }
        }
        true
    }

    /// Blocks until a port has seen `count` end-of-stream signals.
    pub fn wait_for_end_of_stream(&self, port: usize, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |calls| {
            calls
                .iter()
                .filter(|call| **call == OutputCall::EndOfStream { port })
                .count()
                >= count
        })
    }

    fn record(&self, call: OutputCall) {
        self.recorded.lock().calls.push(call);
        self.changed.notify_all();
    }
}

impl Output for RecordingOutput {
    fn port_added(&self, port: usize, info: PortInfo) {
        self.record(OutputCall::PortAdded { port, info });
    }

    fn port_removed(&self, port: usize) {
        self.record(OutputCall::PortRemoved { port });
    }

    fn announce_range(&self, port: usize, start: u64, end: u64) {
        self.recorded
            .lock()
            .segments
            .entry(port)
            .or_default()
            .push(Vec::new());
        self.record(OutputCall::AnnounceRange { port, start, end });
    }

    fn push(&self, port: usize, data: Bytes) -> Result<(), PushError> {
        let mut recorded = self.recorded.lock();
        while recorded.pushes_paused {
            self.changed.wait(&mut recorded);
        }
        if let Some(error) = recorded.push_failure.clone() {
            return Err(error);
        }
        let segments = recorded.segments.entry(port).or_default();
        if segments.is_empty() {
            segments.push(Vec::new());
        }
        if let Some(segment) = segments.last_mut() {
            segment.extend_from_slice(&data);
        }
        recorded.calls.push(OutputCall::Push {
            port,
            len: data.len(),
        });
        drop(recorded);
        self.changed.notify_all();
        Ok(())
    }

    fn end_of_stream(&self, port: usize) {
        self.record(OutputCall::EndOfStream { port });
    }

    fn no_more_ports(&self) {
        self.record(OutputCall::NoMorePorts);
    }

    fn buffering(&self, percent: u8) {
        self.record(OutputCall::Buffering { percent });
    }

    fn error(&self, error: DemuxError) {
        self.record(OutputCall::Error {
            message: error.to_string(),
        });
    }
}
