//! Stopping runs and releasing the partial download.

use std::time::Duration;

use piecestream_core::DemuxState;
use piecestream_core::test_mocks::OutputCall;
use piecestream_sim::{ContentManifest, SwarmConfig, content_handle};

use crate::common::{SimRun, TIMEOUT, config, start_run};

fn crawling_swarm() -> SwarmConfig {
    SwarmConfig::default().with_speed(1, Duration::from_millis(40))
}

fn started_mid_download(keep_files: bool) -> (tempfile::TempDir, SimRun) {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("partial", 1000, &[30_000, 4_000], 12);
    let mut config = config(dir.path());
    config.storage.delete_on_teardown = !keep_files;
    let run = start_run(manifest, crawling_swarm(), config);
    assert!(run.output.wait_until(TIMEOUT, |calls| {
        calls
            .iter()
            .any(|call| matches!(call, OutputCall::Push { .. }))
    }));
    (dir, run)
}

#[test]
fn test_stop_deletes_partial_download() {
    let (_dir, run) = started_mid_download(false);
    let handle = content_handle(&run.description);
    let part_path = run.engine.part_path(handle).unwrap();
    assert!(part_path.exists());

    run.demuxer.stop().unwrap();

    assert_eq!(run.demuxer.state(), DemuxState::Stopped);
    assert!(!part_path.exists());
    assert_eq!(run.engine.part_path(handle), None);
    assert_eq!(run.output.end_of_stream_count(0), 0);
    assert!(
        run.output
            .calls()
            .contains(&OutputCall::PortRemoved { port: 0 })
    );
}

#[test]
fn test_keep_temp_preserves_partial_download() {
    let (_dir, run) = started_mid_download(true);
    let part_path = run
        .engine
        .part_path(content_handle(&run.description))
        .unwrap();

    run.demuxer.stop().unwrap();

    assert!(part_path.exists());
}

#[test]
fn test_drop_releases_content() {
    let (_dir, run) = started_mid_download(false);
    let handle = content_handle(&run.description);
    let part_path = run.engine.part_path(handle).unwrap();

    let SimRun {
        demuxer, engine, ..
    } = run;
    drop(demuxer);

    assert!(!part_path.exists());
    assert_eq!(engine.downloaded(handle), None);
}

#[test]
fn test_stop_twice_is_harmless() {
    let (_dir, run) = started_mid_download(false);
    run.demuxer.stop().unwrap();
    run.demuxer.stop().unwrap();
    assert_eq!(run.demuxer.state(), DemuxState::Stopped);
}
