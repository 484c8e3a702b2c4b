//! Engine event dispatch and the state shared by every demuxer thread.

use std::ops::{ControlFlow, RangeInclusive};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::buffering::{self, BufferingLatch};
use super::scheduler::PieceWindow;
use super::stream::{Delivery, Stream};
use super::{DemuxError, DemuxState, selector, worker};
use crate::config::DemuxConfig;
use crate::engine::{Content, ContentHandle, Engine, EngineEvent, PiecePriority};
use crate::output::{Output, PortInfo};
use crate::sniff::ContentType;

/// State shared between the dispatcher, the delivery workers and control
/// calls.
///
/// Lock order: `latch`, then individual stream locks one at a time. The
/// stream collection lock is only held to clone the snapshot.
pub(crate) struct DemuxShared {
    pub engine: Arc<dyn Engine>,
    pub output: Arc<dyn Output>,
    pub config: DemuxConfig,
    pub streams: RwLock<Vec<Arc<Stream>>>,
    pub content: RwLock<Option<(ContentHandle, Content)>>,
    pub latch: Mutex<BufferingLatch>,
    pub state: Mutex<DemuxState>,
    pub stop_requested: AtomicBool,
    ports_settled: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DemuxShared {
    pub fn new(engine: Arc<dyn Engine>, output: Arc<dyn Output>, config: DemuxConfig) -> Self {
        Self {
            engine,
            output,
            config,
            streams: RwLock::new(Vec::new()),
            content: RwLock::new(None),
            latch: Mutex::new(BufferingLatch::new()),
            state: Mutex::new(DemuxState::Idle),
            stop_requested: AtomicBool::new(false),
            ports_settled: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> Option<ContentHandle> {
        self.content.read().as_ref().map(|(handle, _)| *handle)
    }

    pub fn stream(&self, index: usize) -> Option<Arc<Stream>> {
        self.streams.read().get(index).cloned()
    }

    pub fn streams_snapshot(&self) -> Vec<Arc<Stream>> {
        self.streams.read().clone()
    }

    pub fn piece_window(&self, handle: ContentHandle) -> PieceWindow<'_> {
        PieceWindow::new(self.engine.as_ref(), handle, self.config.window)
    }

    /// Unread piece ranges of every requested stream except `except`.
    ///
    /// Ranges only shrink while streams read, so a snapshot taken before
    /// locking the excepted stream never under-reports.
    pub fn claimed_ranges(&self, except: usize) -> Vec<RangeInclusive<u32>> {
        self.streams_snapshot()
            .iter()
            .filter(|stream| stream.index() != except)
            .filter_map(|stream| {
                let state = stream.lock();
                (state.requested && !state.is_fully_read())
                    .then(|| state.next_piece..=state.last_piece)
            })
            .collect()
    }

    /// Runs the dispatch loop until stopped or a terminal event arrives,
    /// then drains.
    ///
    /// A terminal event lets the workers flush what is already queued; an
    /// explicit stop discards it.
    pub fn run(self: &Arc<Self>) {
        info!("Dispatcher started");
        let mut terminated = false;
        'dispatch: while !self.stop_requested.load(Ordering::Acquire) {
            let events = self.engine.wait_for_events(self.config.event_poll_timeout);
            for event in events {
                trace!(event = event.kind(), "Engine event");
                if self.handle_event(event).is_break() {
                    terminated = true;
                    break 'dispatch;
                }
            }
        }
        self.drain(terminated && !self.stop_requested.load(Ordering::Acquire));
        info!("Dispatcher stopped");
    }

    /// Applies one engine event.
    pub fn handle_event(self: &Arc<Self>, event: EngineEvent) -> ControlFlow<()> {
        match event {
            EngineEvent::ContentAdded { handle } => self.on_content_added(handle),
            EngineEvent::AddFailed { reason } => {
                error!("Adding content failed: {reason}");
                self.output.error(DemuxError::AddContent { reason });
                ControlFlow::Break(())
            }
            EngineEvent::ContentChecked { handle } => {
                if self.is_current(handle) {
                    self.on_content_checked(handle);
                }
                ControlFlow::Continue(())
            }
            EngineEvent::PieceFinished { handle, piece } => {
                if self.is_current(handle) {
                    self.on_piece_finished(handle, piece);
                }
                ControlFlow::Continue(())
            }
            EngineEvent::PieceRead {
                handle,
                piece,
                data,
            } => {
                if self.is_current(handle) {
                    self.on_piece_read(handle, piece, data);
                }
                ControlFlow::Continue(())
            }
            EngineEvent::ReadFailed {
                handle,
                piece,
                reason,
            } => {
                if self.is_current(handle) {
                    self.on_read_failed(handle, piece, &reason);
                }
                ControlFlow::Continue(())
            }
            EngineEvent::ContentRemoved { handle } => {
                if !self.is_current(handle) {
                    return ControlFlow::Continue(());
                }
                info!(%handle, "Content removed");
                *self.content.write() = None;
                ControlFlow::Break(())
            }
            EngineEvent::Status { message } => {
                debug!("Engine: {message}");
                ControlFlow::Continue(())
            }
        }
    }

    fn is_current(&self, handle: ContentHandle) -> bool {
        let current = self.handle() == Some(handle);
        if !current {
            trace!(%handle, "Ignoring event for other content");
        }
        current
    }

    fn on_content_added(&self, handle: ContentHandle) -> ControlFlow<()> {
        if self.handle().is_some() {
            warn!(%handle, "Ignoring additional content");
            return ControlFlow::Continue(());
        }
        let content = match self.engine.geometry(handle) {
            Ok(content) => content,
            Err(e) => {
                error!(%handle, "Failed to query geometry: {e}");
                self.output.error(DemuxError::Engine(e));
                return ControlFlow::Break(());
            }
        };
        if content.piece_length == 0 {
            self.output.error(DemuxError::AddContent {
                reason: "content reports a zero piece length".to_string(),
            });
            return ControlFlow::Break(());
        }
        info!(
            %handle,
            files = content.files.len(),
            pieces = content.num_pieces,
            piece_length = content.piece_length,
            "Content added"
        );

        for piece in 0..content.num_pieces {
            self.engine.set_priority(handle, piece, PiecePriority::SKIP);
        }
        self.engine.set_sequential_download(handle, true);

        let streams: Vec<Arc<Stream>> = content
            .files
            .iter()
            .map(|file| {
                Arc::new(Stream::new(
                    file.clone(),
                    content.piece_length,
                    content.num_pieces,
                ))
            })
            .collect();
        for index in selector::select(self.config.selection, &content.files) {
            if let Some(stream) = streams.get(index) {
                debug!(stream = index, path = %stream.file.path, "Selected");
                stream.lock().requested = true;
            }
        }

        *self.streams.write() = streams;
        *self.content.write() = Some((handle, content));
        ControlFlow::Continue(())
    }

    fn on_content_checked(self: &Arc<Self>, handle: ContentHandle) {
        let window = self.piece_window(handle);
        let mut needs_buffering = false;
        let mut first_reads = Vec::new();

        for stream in self.streams_snapshot() {
            if !stream.lock().requested {
                continue;
            }
            if let Err(e) = self.spawn_worker(&stream) {
                error!(stream = stream.index(), "Failed to start delivery worker: {e}");
                stream.lock().requested = false;
                self.output.error(e);
                continue;
            }
            if !self.config.typefind {
                self.open_port(&stream, None);
            }

            let mut state = stream.lock();
            if window.activate(&mut state) {
                needs_buffering = true;
            } else if state.is_empty_range() {
                stream.enqueue(Delivery::EmptyRange {
                    generation: state.generation,
                });
            } else {
                first_reads.push(Arc::clone(&stream));
            }
        }

        // While any stream buffers, the resume kick issues the first reads.
        if needs_buffering {
            self.refresh_buffering();
        } else {
            for stream in first_reads {
                let piece = {
                    let mut state = stream.lock();
                    state.read_pending = true;
                    state.next_piece
                };
                self.engine.read_piece(handle, piece);
            }
        }
        self.check_ports_settled();
    }

    fn on_piece_finished(&self, handle: ContentHandle, piece: u32) {
        let scheduled = self.engine.piece_priority(handle, piece) == PiecePriority::MAX;
        if scheduled {
            self.engine.set_priority(handle, piece, PiecePriority::SKIP);
        }
        trace!(piece, scheduled, "Piece finished");

        let window = self.piece_window(handle);
        let mut buffering = false;
        for stream in self.streams_snapshot() {
            let state = stream.lock();
            if !state.requested || piece < state.span.start_piece || piece > state.last_piece {
                continue;
            }
            if scheduled {
                window.add_piece(&state, piece + 1);
            }
            buffering |= state.buffering;
        }
        if buffering {
            self.refresh_buffering();
        }
    }

    fn on_piece_read(&self, handle: ContentHandle, piece: u32, data: Bytes) {
        let window = self.piece_window(handle);
        let mut rebuffer = false;

        for stream in self.streams_snapshot() {
            let mut state = stream.lock();
            if !state.requested || state.is_fully_read() || piece != state.next_piece {
                continue;
            }
            let delivery = Delivery::Piece {
                generation: state.generation,
                piece,
                data: data.clone(),
            };
            state.read_pending = false;
            if !stream.enqueue(delivery) {
                warn!(stream = state.index, piece, "Delivery queue closed");
                continue;
            }
            state.next_piece += 1;
            trace!(stream = state.index, piece, "Piece queued");

            if state.is_fully_read() {
                debug!(stream = state.index, piece, "Last piece queued");
                continue;
            }
            let next = state.next_piece;
            if self.engine.have_piece(handle, next) {
                state.read_pending = true;
                self.engine.read_piece(handle, next);
            } else if buffering::start_buffering(&window, &mut state) {
                rebuffer = true;
            }
        }

        if rebuffer {
            self.refresh_buffering();
        }
    }

    fn on_read_failed(&self, handle: ContentHandle, piece: u32, reason: &str) {
        let window = self.piece_window(handle);
        let mut rebuffer = false;

        for stream in self.streams_snapshot() {
            let mut state = stream.lock();
            if !state.requested || piece != state.next_piece {
                continue;
            }
            warn!(stream = state.index, piece, "Reading piece failed: {reason}");
            state.read_pending = false;
            if buffering::start_buffering(&window, &mut state) {
                rebuffer = true;
            } else {
                warn!(stream = state.index, piece, "Unreadable piece reported available");
            }
        }

        if rebuffer {
            self.refresh_buffering();
        }
    }

    fn spawn_worker(self: &Arc<Self>, stream: &Arc<Stream>) -> Result<(), DemuxError> {
        if let Some(handle) = worker::spawn(Arc::clone(self), Arc::clone(stream))? {
            self.workers.lock().push(handle);
        }
        Ok(())
    }

    /// Opens a stream's port unless it is already open.
    pub fn open_port(&self, stream: &Stream, content_type: Option<ContentType>) {
        {
            let mut state = stream.lock();
            if state.port_open {
                return;
            }
            state.port_open = true;
        }
        info!(stream = stream.index(), path = %stream.file.path, "Port added");
        self.output.port_added(
            stream.index(),
            PortInfo {
                name: stream.file.path.clone(),
                size: stream.file.size,
                content_type,
            },
        );
    }

    /// Reports `no_more_ports` once every requested stream has an open port.
    pub fn check_ports_settled(&self) {
        if self.ports_settled.load(Ordering::Acquire) {
            return;
        }
        let mut requested = 0;
        for stream in self.streams_snapshot() {
            let state = stream.lock();
            if state.requested {
                if !state.port_open {
                    return;
                }
                requested += 1;
            }
        }
        if requested == 0 {
            return;
        }
        if self
            .ports_settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(ports = requested, "No more ports");
            self.output.no_more_ports();
        }
    }

    /// Shuts the delivery workers down and removes the open ports.
    ///
    /// With `flush` the workers deliver every entry queued before the
    /// shutdown; otherwise queued entries are dropped as stale.
    fn drain(&self, flush: bool) {
        *self.state.lock() = DemuxState::Draining;
        let handle = self.handle();
        let streams = self.streams_snapshot();
        debug!(flush, "Draining");

        for stream in &streams {
            let mut state = stream.lock();
            if let Some(handle) = handle {
                self.piece_window(handle).release(&state, &[]);
            }
            if !flush {
                state.requested = false;
            }
            stream.enqueue(Delivery::Shutdown);
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let name = worker.thread().name().unwrap_or("delivery").to_string();
            if worker.join().is_err() {
                error!("Delivery worker {name} panicked");
            }
        }

        for stream in &streams {
            let was_open = {
                let mut state = stream.lock();
                state.requested = false;
                std::mem::replace(&mut state.port_open, false)
            };
            if was_open {
                self.output.port_removed(stream.index());
            }
        }
        *self.state.lock() = DemuxState::Stopped;
    }
}
