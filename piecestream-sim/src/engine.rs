//! In-memory download engine backed by a simulated swarm.
//!
//! Content bytes come from the manifest generator; completed pieces are
//! written to `<save_path>/<handle>.part` and reads are served from that file,
//! so the demuxer sees the same asynchronous add, download and read cycle a
//! real engine produces.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use piecestream_core::engine::{
    AddContentParams, Content, ContentHandle, Engine, EngineError, EngineEvent, PiecePriority,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::SimulationError;
use crate::manifest::{ContentManifest, content_handle};
use crate::swarm::{SwarmConfig, pick_next};

struct SimContent {
    manifest: ContentManifest,
    content: Content,
    have: Vec<bool>,
    priorities: Vec<PiecePriority>,
    sequential: bool,
    part_path: PathBuf,
}

impl SimContent {
    fn piece_offset(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.content.piece_length)
    }

    fn store_piece(&self, index: u32) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.part_path)?;
        file.seek(SeekFrom::Start(self.piece_offset(index)))?;
        file.write_all(&self.manifest.piece_bytes(index))
    }

    fn load_piece(&self, index: u32) -> io::Result<Bytes> {
        let mut file = File::open(&self.part_path)?;
        file.seek(SeekFrom::Start(self.piece_offset(index)))?;
        let mut data = vec![0u8; self.content.piece_size(index) as usize];
        file.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }
}

struct SimState {
    contents: HashMap<ContentHandle, SimContent>,
    pending: VecDeque<EngineEvent>,
    rng: ChaCha8Rng,
}

struct SimShared {
    state: Mutex<SimState>,
    events: Condvar,
    stop: AtomicBool,
    config: SwarmConfig,
}

impl SimShared {
    fn emit(&self, state: &mut SimState, event: EngineEvent) {
        state.pending.push_back(event);
        self.events.notify_all();
    }

    fn run_swarm(&self) {
        debug!("Swarm started");
        while !self.stop.load(Ordering::Acquire) {
            thread::sleep(self.config.tick);
            self.tick();
        }
        debug!("Swarm stopped");
    }

    /// Completes up to `pieces_per_tick` pieces of every content.
    fn tick(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut finished = Vec::new();

        for (handle, content) in state.contents.iter_mut() {
            for _ in 0..self.config.pieces_per_tick {
                let Some(piece) = pick_next(
                    &content.priorities,
                    &content.have,
                    content.sequential,
                    self.config.reorder_probability,
                    &mut state.rng,
                ) else {
                    break;
                };
                if let Err(e) = content.store_piece(piece) {
                    warn!(%handle, piece, "Failed to store piece: {e}");
                    finished.push(EngineEvent::Status {
                        message: format!("storing piece {piece} failed: {e}"),
                    });
                    break;
                }
                content.have[piece as usize] = true;
                trace!(%handle, piece, "Piece downloaded");
                finished.push(EngineEvent::PieceFinished {
                    handle: *handle,
                    piece,
                });
            }
        }

        for event in finished {
            self.emit(state, event);
        }
    }
}

/// Engine implementation driving a simulated swarm on a background thread.
pub struct SimulatedEngine {
    shared: Arc<SimShared>,
    swarm: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedEngine {
    /// Starts the engine and its swarm thread.
    ///
    /// # Errors
    ///
    /// - `SimulationError::InvalidConfig` - If the reorder probability is outside 0 to 1
    /// - `SimulationError::Spawn` - If the swarm thread could not be created
    pub fn new(config: SwarmConfig) -> Result<Self, SimulationError> {
        if !(0.0..=1.0).contains(&config.reorder_probability) {
            return Err(SimulationError::InvalidConfig {
                reason: format!(
                    "reorder probability {} is outside 0..=1",
                    config.reorder_probability
                ),
            });
        }

        let shared = Arc::new(SimShared {
            state: Mutex::new(SimState {
                contents: HashMap::new(),
                pending: VecDeque::new(),
                rng: ChaCha8Rng::seed_from_u64(config.seed),
            }),
            events: Condvar::new(),
            stop: AtomicBool::new(false),
            config,
        });

        let swarm_shared = Arc::clone(&shared);
        let swarm = thread::Builder::new()
            .name("piecestream-swarm".to_string())
            .spawn(move || swarm_shared.run_swarm())?;

        Ok(Self {
            shared,
            swarm: Mutex::new(Some(swarm)),
        })
    }

    /// Number of downloaded pieces of some content.
    pub fn downloaded(&self, handle: ContentHandle) -> Option<usize> {
        let state = self.shared.state.lock();
        let content = state.contents.get(&handle)?;
        Some(content.have.iter().filter(|have| **have).count())
    }

    /// Location of the partial download of some content.
    pub fn part_path(&self, handle: ContentHandle) -> Option<PathBuf> {
        let state = self.shared.state.lock();
        state
            .contents
            .get(&handle)
            .map(|content| content.part_path.clone())
    }

    fn add(&self, params: &AddContentParams) -> Result<(ContentHandle, SimContent), String> {
        let manifest =
            ContentManifest::from_json(&params.description).map_err(|e| e.to_string())?;
        let handle = content_handle(&params.description);
        fs::create_dir_all(&params.save_path).map_err(|e| {
            format!(
                "cannot create storage directory {}: {e}",
                params.save_path.display()
            )
        })?;

        let content = manifest.content();
        let num_pieces = content.num_pieces as usize;
        let mut sim = SimContent {
            part_path: part_file(&params.save_path, handle),
            manifest,
            content,
            have: vec![false; num_pieces],
            priorities: vec![PiecePriority::DEFAULT; num_pieces],
            sequential: false,
        };
        for &piece in &self.shared.config.preloaded {
            if (piece as usize) < num_pieces {
                sim.store_piece(piece).map_err(|e| e.to_string())?;
                sim.have[piece as usize] = true;
            }
        }
        Ok((handle, sim))
    }
}

fn part_file(save_path: &Path, handle: ContentHandle) -> PathBuf {
    save_path.join(format!("{}.part", hex::encode(handle.as_bytes())))
}

impl Engine for SimulatedEngine {
    fn add_content(&self, params: AddContentParams) {
        let added = self.add(&params);
        let mut state = self.shared.state.lock();
        match added {
            Ok((handle, _)) if state.contents.contains_key(&handle) => {
                self.shared.emit(
                    &mut state,
                    EngineEvent::AddFailed {
                        reason: format!("content {handle} is already added"),
                    },
                );
            }
            Ok((handle, content)) => {
                info!(
                    %handle,
                    name = %content.manifest.name,
                    pieces = content.content.num_pieces,
                    "Content added"
                );
                let preloaded = content.have.iter().filter(|have| **have).count();
                state.contents.insert(handle, content);
                self.shared
                    .emit(&mut state, EngineEvent::ContentAdded { handle });
                self.shared.emit(
                    &mut state,
                    EngineEvent::Status {
                        message: format!("checked {preloaded} pieces on disk"),
                    },
                );
                self.shared
                    .emit(&mut state, EngineEvent::ContentChecked { handle });
            }
            Err(reason) => {
                warn!("Rejected description: {reason}");
                self.shared
                    .emit(&mut state, EngineEvent::AddFailed { reason });
            }
        }
    }

    fn geometry(&self, handle: ContentHandle) -> Result<Content, EngineError> {
        let state = self.shared.state.lock();
        state
            .contents
            .get(&handle)
            .map(|content| content.content.clone())
            .ok_or(EngineError::UnknownContent { handle })
    }

    fn have_piece(&self, handle: ContentHandle, index: u32) -> bool {
        let state = self.shared.state.lock();
        state
            .contents
            .get(&handle)
            .and_then(|content| content.have.get(index as usize).copied())
            .unwrap_or(false)
    }

    fn piece_priority(&self, handle: ContentHandle, index: u32) -> PiecePriority {
        let state = self.shared.state.lock();
        state
            .contents
            .get(&handle)
            .and_then(|content| content.priorities.get(index as usize).copied())
            .unwrap_or(PiecePriority::SKIP)
    }

    fn set_priority(&self, handle: ContentHandle, index: u32, priority: PiecePriority) {
        let mut state = self.shared.state.lock();
        if let Some(slot) = state
            .contents
            .get_mut(&handle)
            .and_then(|content| content.priorities.get_mut(index as usize))
        {
            *slot = priority;
        }
    }

    fn read_piece(&self, handle: ContentHandle, index: u32) {
        let mut state = self.shared.state.lock();
        let result = match state.contents.get(&handle) {
            None => Err(EngineError::UnknownContent { handle }),
            Some(content) if index >= content.content.num_pieces => {
                Err(EngineError::PieceOutOfRange {
                    index,
                    num_pieces: content.content.num_pieces,
                })
            }
            Some(content) if !content.have[index as usize] => Err(EngineError::Io(
                io::Error::new(io::ErrorKind::NotFound, "piece not downloaded"),
            )),
            Some(content) => content.load_piece(index).map_err(EngineError::from),
        };

        let event = match result {
            Ok(data) => EngineEvent::PieceRead {
                handle,
                piece: index,
                data,
            },
            Err(e) => EngineEvent::ReadFailed {
                handle,
                piece: index,
                reason: e.to_string(),
            },
        };
        self.shared.emit(&mut state, event);
    }

    fn set_sequential_download(&self, handle: ContentHandle, sequential: bool) {
        let mut state = self.shared.state.lock();
        if let Some(content) = state.contents.get_mut(&handle) {
            content.sequential = sequential;
        }
    }

    fn remove_content(&self, handle: ContentHandle, delete_files: bool) {
        let mut state = self.shared.state.lock();
        let Some(content) = state.contents.remove(&handle) else {
            return;
        };
        if delete_files {
            match fs::remove_file(&content.part_path) {
                Ok(()) => debug!(path = %content.part_path.display(), "Deleted partial download"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %content.part_path.display(), "Failed to delete: {e}"),
            }
        }
        info!(%handle, delete_files, "Content removed");
        self.shared
            .emit(&mut state, EngineEvent::ContentRemoved { handle });
    }

    fn wait_for_events(&self, timeout: Duration) -> Vec<EngineEvent> {
        let mut state = self.shared.state.lock();
        if state.pending.is_empty() {
            self.shared.events.wait_for(&mut state, timeout);
        }
        state.pending.drain(..).collect()
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(swarm) = self.swarm.lock().take() {
            if swarm.join().is_err() {
                warn!("Swarm thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn manifest_json(sizes: &[u64]) -> Bytes {
        Bytes::from(
            ContentManifest::synthetic("sim", 100, sizes, 11)
                .to_json()
                .unwrap(),
        )
    }

    fn collect_until(
        engine: &SimulatedEngine,
        condition: impl Fn(&[EngineEvent]) -> bool,
    ) -> Vec<EngineEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while !condition(&events) && Instant::now() < deadline {
            events.extend(engine.wait_for_events(Duration::from_millis(20)));
        }
        events
    }

    /// One piece per tick, slow enough that tests adjust priorities before
    /// the first download.
    fn slow_swarm() -> SwarmConfig {
        SwarmConfig::default().with_speed(1, Duration::from_millis(200))
    }

    #[test]
    fn test_invalid_description_fails_add() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(slow_swarm()).unwrap();
        engine.add_content(AddContentParams {
            description: Bytes::from_static(b"d8:announce"),
            save_path: dir.path().to_path_buf(),
        });

        let events = engine.wait_for_events(Duration::from_secs(1));
        assert!(matches!(events.as_slice(), [EngineEvent::AddFailed { .. }]));
    }

    #[test]
    fn test_add_reports_geometry_and_check() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(slow_swarm()).unwrap();
        let description = manifest_json(&[150, 250]);
        let handle = content_handle(&description);
        engine.add_content(AddContentParams {
            description,
            save_path: dir.path().to_path_buf(),
        });

        let events = engine.wait_for_events(Duration::from_secs(1));
        let kinds: Vec<&str> = events.iter().map(EngineEvent::kind).collect();
        assert_eq!(kinds, vec!["content_added", "status", "content_checked"]);

        let content = engine.geometry(handle).unwrap();
        assert_eq!(content.num_pieces, 4);
        assert_eq!(content.files[1].offset, 150);
        assert!(engine.geometry(ContentHandle::new([0; 20])).is_err());
    }

    #[test]
    fn test_swarm_downloads_only_wanted_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(slow_swarm()).unwrap();
        let description = manifest_json(&[1000]);
        let handle = content_handle(&description);
        engine.add_content(AddContentParams {
            description,
            save_path: dir.path().to_path_buf(),
        });
        for piece in 0..10 {
            engine.set_priority(handle, piece, PiecePriority::SKIP);
        }
        engine.set_priority(handle, 6, PiecePriority::MAX);
        engine.set_sequential_download(handle, true);

        let events = collect_until(&engine, |events| {
            events
                .iter()
                .any(|event| matches!(event, EngineEvent::PieceFinished { piece: 6, .. }))
        });
        assert!(engine.have_piece(handle, 6));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.downloaded(handle), Some(1));
        assert!(
            events
                .iter()
                .all(|event| !matches!(event, EngineEvent::PieceFinished { piece, .. } if *piece != 6))
        );
    }

    #[test]
    fn test_read_serves_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let engine =
            SimulatedEngine::new(slow_swarm().with_preloaded([0, 2])).unwrap();
        let description = manifest_json(&[250]);
        let manifest = ContentManifest::from_json(&description).unwrap();
        let handle = content_handle(&description);
        engine.add_content(AddContentParams {
            description,
            save_path: dir.path().to_path_buf(),
        });
        for piece in 0..3 {
            engine.set_priority(handle, piece, PiecePriority::SKIP);
        }
        engine.wait_for_events(Duration::from_secs(1));

        engine.read_piece(handle, 2);
        engine.read_piece(handle, 1);
        let events = collect_until(&engine, |events| events.len() >= 2);
        match &events[..] {
            [
                EngineEvent::PieceRead { piece: 2, data, .. },
                EngineEvent::ReadFailed { piece: 1, .. },
            ] => assert_eq!(data, &manifest.piece_bytes(2)),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_remove_deletes_partial_download() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimulatedEngine::new(slow_swarm().with_preloaded([0])).unwrap();
        let description = manifest_json(&[300]);
        let handle = content_handle(&description);
        engine.add_content(AddContentParams {
            description,
            save_path: dir.path().to_path_buf(),
        });
        let part = engine.part_path(handle).unwrap();
        assert!(part.exists());

        engine.remove_content(handle, true);
        assert!(!part.exists());
        let events = collect_until(&engine, |events| {
            events
                .iter()
                .any(|event| matches!(event, EngineEvent::ContentRemoved { .. }))
        });
        assert!(!events.is_empty());
        assert!(engine.geometry(handle).is_err());
    }

    #[test]
    fn test_rejects_invalid_reorder_probability() {
        let config = SwarmConfig::default().with_reordering(1.5, 0);
        assert!(matches!(
            SimulatedEngine::new(config),
            Err(SimulationError::InvalidConfig { .. })
        ));
    }
}
