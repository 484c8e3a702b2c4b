//! Piecestream Sim - Deterministic download engine for the demuxer.
//!
//! Stands in for a real swarm engine: content is described by a JSON
//! [`ContentManifest`], its bytes are generated from the manifest seed, and a
//! background swarm thread completes prioritized pieces at a configurable
//! pace. Runs with the same seeds make the same choices.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use piecestream_core::engine::Engine;
//! use piecestream_sim::{ContentManifest, SimulatedEngine, SwarmConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manifest = ContentManifest::synthetic("movie", 16384, &[1 << 20], 7);
//! let engine: Arc<dyn Engine> = Arc::new(SimulatedEngine::new(SwarmConfig::default())?);
//! let description = manifest.to_json()?;
//! # let _ = (engine, description);
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod manifest;
pub mod swarm;

pub use engine::SimulatedEngine;
pub use manifest::{ContentManifest, ManifestError, ManifestFile, content_handle};
pub use swarm::SwarmConfig;

/// Errors raised while setting up a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Invalid simulation config: {reason}")]
    InvalidConfig { reason: String },

    #[error("Failed to spawn swarm thread: {0}")]
    Spawn(#[from] std::io::Error),
}
