//! Integration tests for Piecestream
//!
//! These tests run the demuxer against the simulated engine: real threads,
//! real partial downloads on disk, and a swarm that completes pieces over
//! time. They verify what reaches the output ports, not internal state.

#[path = "style.rs"]
mod style;

#[path = "integration/common.rs"]
mod common;
#[path = "integration/seek_workflow.rs"]
mod seek_workflow;
#[path = "integration/sim_streaming.rs"]
mod sim_streaming;
#[path = "integration/teardown.rs"]
mod teardown;
