//! Stream scheduling and demultiplexing of piece-addressed content.
//!
//! A [`Demuxer`] owns one dispatcher thread consuming engine events and one
//! delivery thread per active stream. Control calls (content input, seeks,
//! queries, stop) may come from any thread.

mod buffering;
mod dispatcher;
pub mod geometry;
mod scheduler;
mod seek;
mod selector;
mod stream;
mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use dispatcher::DemuxShared;
pub use geometry::PieceSpan;
use parking_lot::Mutex;
pub use seek::{SeekError, SeekFormat, SeekRequest};
pub use stream::StreamState;
use tracing::{info, warn};

use crate::config::DemuxConfig;
use crate::description::DescriptionCollector;
use crate::engine::{AddContentParams, Content, ContentHandle, Engine, EngineError};
use crate::output::{Output, PushError};
use crate::PieceStreamError;

/// Lifecycle of the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    /// Created, dispatcher not running
    Idle,
    /// Dispatching engine events
    Running,
    /// Flushing queues and joining workers
    Draining,
    /// Resources released
    Stopped,
}

impl fmt::Display for DemuxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemuxState::Idle => write!(f, "idle"),
            DemuxState::Running => write!(f, "running"),
            DemuxState::Draining => write!(f, "draining"),
            DemuxState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Errors of the demux subsystem, surfaced through [`Output::error`] or
/// returned from lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("Failed to add content: {reason}")]
    AddContent { reason: String },

    #[error("Stream {stream} stopped: {reason}")]
    StreamFlow { stream: usize, reason: PushError },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Demuxer cannot start while {state}")]
    AlreadyStarted { state: DemuxState },

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Thread {name} panicked")]
    ThreadPanicked { name: String },
}

const DISPATCHER_THREAD_NAME: &str = "piecestream-dispatch";

/// Demultiplexer turning one piece download into per-file output streams.
pub struct Demuxer {
    shared: Arc<DemuxShared>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    collector: Mutex<DescriptionCollector>,
}

impl Demuxer {
    /// Creates a demuxer over an engine and an output.
    ///
    /// # Errors
    ///
    /// - `PieceStreamError::Configuration` - If the configuration is invalid
    pub fn new(
        engine: Arc<dyn Engine>,
        output: Arc<dyn Output>,
        config: DemuxConfig,
    ) -> Result<Self, PieceStreamError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(DemuxShared::new(engine, output, config)),
            dispatcher: Mutex::new(None),
            collector: Mutex::new(DescriptionCollector::new()),
        })
    }

    /// Starts the dispatcher thread.
    ///
    /// # Errors
    ///
    /// - `DemuxError::AlreadyStarted` - If the demuxer left the idle state
    /// - `DemuxError::Spawn` - If the thread could not be created
    pub fn start(&self) -> Result<(), DemuxError> {
        {
            let mut state = self.shared.state.lock();
            if *state != DemuxState::Idle {
                return Err(DemuxError::AlreadyStarted { state: *state });
            }
            *state = DemuxState::Running;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || shared.run());
        match spawned {
            Ok(handle) => {
                *self.dispatcher.lock() = Some(handle);
                info!("Demuxer started");
                Ok(())
            }
            Err(e) => {
                *self.shared.state.lock() = DemuxState::Idle;
                Err(DemuxError::Spawn(e))
            }
        }
    }

    /// Appends a chunk of the archive description.
    pub fn push_description(&self, chunk: &[u8]) {
        self.collector.lock().push(chunk);
    }

    /// Ends description input and adds the collected description.
    ///
    /// # Errors
    ///
    /// - `EngineError::InvalidDescription` - If no description bytes arrived
    pub fn end_of_description(&self) -> Result<(), EngineError> {
        let description = self.collector.lock().finish()?;
        self.add_content(description);
        Ok(())
    }

    /// Hands a complete description to the engine.
    ///
    /// Geometry and availability arrive later as engine events.
    pub fn add_content(&self, description: Bytes) {
        let save_path = self.shared.config.storage.temp_path.clone();
        info!(
            bytes = description.len(),
            save_path = %save_path.display(),
            "Adding content"
        );
        self.shared.engine.add_content(AddContentParams {
            description,
            save_path,
        });
    }

    /// Moves a stream to a new byte range.
    ///
    /// # Errors
    ///
    /// - `SeekError::UnsupportedFormat` - If the request is not a byte seek
    /// - `SeekError::NegativeRate` - If the rate is negative
    /// - `SeekError::ContentUnknown` - If content geometry is not known yet
    /// - `SeekError::UnknownStream` - If the archive has no such file
    /// - `SeekError::StreamInactive` - If the stream is not requested
    /// - `SeekError::InvalidRange` - If start is not before the clamped stop
    pub fn seek(&self, stream: usize, request: &SeekRequest) -> Result<(), SeekError> {
        self.shared.seek(stream, request)
    }

    /// Stops dispatching, joins every thread and releases the content.
    ///
    /// # Errors
    ///
    /// - `DemuxError::ThreadPanicked` - If the dispatcher thread panicked
    pub fn stop(&self) -> Result<(), DemuxError> {
        self.shared.stop_requested.store(true, Ordering::Release);

        let dispatcher = self.dispatcher.lock().take();
        let joined = match dispatcher {
            Some(handle) => handle.join().map_err(|_| DemuxError::ThreadPanicked {
                name: DISPATCHER_THREAD_NAME.to_string(),
            }),
            None => Ok(()),
        };
        {
            let mut state = self.shared.state.lock();
            if *state == DemuxState::Idle {
                *state = DemuxState::Stopped;
            }
        }

        let released = self.shared.content.write().take();
        if let Some((handle, _)) = released {
            let delete_files = self.shared.config.storage.delete_on_teardown;
            info!(%handle, delete_files, "Releasing content");
            self.shared.engine.remove_content(handle, delete_files);
        }
        joined
    }

    pub fn state(&self) -> DemuxState {
        *self.shared.state.lock()
    }

    /// Handle of the added content, once the engine accepted it.
    pub fn handle(&self) -> Option<ContentHandle> {
        self.shared.handle()
    }

    /// Geometry of the added content.
    pub fn content(&self) -> Option<Content> {
        self.shared
            .content
            .read()
            .as_ref()
            .map(|(_, content)| content.clone())
    }

    /// Snapshot of one stream's state.
    pub fn stream(&self, index: usize) -> Option<StreamState> {
        self.shared.stream(index).map(|stream| stream.lock().clone())
    }

    /// Snapshots of every stream, in file order.
    pub fn streams(&self) -> Vec<StreamState> {
        self.shared
            .streams_snapshot()
            .iter()
            .map(|stream| stream.lock().clone())
            .collect()
    }

    /// Whether the subsystem is currently latched in buffering.
    pub fn is_buffering(&self) -> bool {
        self.shared.latch.lock().is_latched()
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Demuxer teardown failed: {e}");
        }
    }
}
