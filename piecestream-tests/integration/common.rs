//! Shared setup for demuxer runs on the simulated engine.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use piecestream_core::DemuxConfig;
use piecestream_core::Demuxer;
use piecestream_core::test_mocks::RecordingOutput;
use piecestream_sim::{ContentManifest, SimulatedEngine, SwarmConfig};

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub struct SimRun {
    pub manifest: ContentManifest,
    pub description: Vec<u8>,
    pub engine: Arc<SimulatedEngine>,
    pub output: Arc<RecordingOutput>,
    pub demuxer: Demuxer,
}

pub fn config(storage: &Path) -> DemuxConfig {
    DemuxConfig::default()
        .with_event_poll_timeout(Duration::from_millis(10))
        .with_storage(storage, true)
}

pub fn fast_swarm() -> SwarmConfig {
    SwarmConfig::default().with_speed(4, Duration::from_millis(5))
}

/// Starts a demuxer and feeds it the manifest in two description chunks.
pub fn start_run(manifest: ContentManifest, swarm: SwarmConfig, config: DemuxConfig) -> SimRun {
    let description = manifest.to_json().unwrap();
    let engine = Arc::new(SimulatedEngine::new(swarm).unwrap());
    let output = Arc::new(RecordingOutput::new());
    let demuxer = Demuxer::new(engine.clone(), output.clone(), config).unwrap();
    demuxer.start().unwrap();

    let (head, tail) = description.split_at(description.len() / 2);
    demuxer.push_description(head);
    demuxer.push_description(tail);
    demuxer.end_of_description().unwrap();

    SimRun {
        manifest,
        description,
        engine,
        output,
        demuxer,
    }
}
