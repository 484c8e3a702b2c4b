//! Seeking streams while the swarm is still downloading.

use std::sync::Arc;
use std::time::Duration;

use piecestream_core::test_mocks::{OutputCall, RecordingOutput};
use piecestream_core::{Demuxer, SeekError, SeekRequest};
use piecestream_sim::{ContentManifest, SimulatedEngine, SwarmConfig};

use crate::common::{SimRun, TIMEOUT, config, start_run};

fn paced_swarm() -> SwarmConfig {
    SwarmConfig::default().with_speed(1, Duration::from_millis(25))
}

fn wait_for_first_push(run: &SimRun, port: usize) -> bool {
    run.output.wait_until(TIMEOUT, |calls| {
        calls
            .iter()
            .any(|call| matches!(call, OutputCall::Push { port: p, .. } if *p == port))
    })
}

#[test]
fn test_seek_restarts_stream_at_new_offset() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("seekable", 1000, &[20_000], 3);
    let run = start_run(manifest, paced_swarm(), config(dir.path()));
    let expected = run.manifest.file_bytes(0).unwrap();

    assert!(wait_for_first_push(&run, 0));
    run.demuxer
        .seek(0, &SeekRequest::bytes(12_500, None))
        .unwrap();
    assert!(run.output.wait_for_end_of_stream(0, 1, TIMEOUT));

    let segments = run.output.segments(0);
    assert_eq!(segments.len(), 2);
    assert!(expected.starts_with(&segments[0]));
    assert_eq!(segments[1], expected[12_500..]);
    assert!(run.output.calls().contains(&OutputCall::AnnounceRange {
        port: 0,
        start: 12_500,
        end: 20_000
    }));
}

#[test]
fn test_seek_to_bounded_range_ends_at_stop() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("bounded", 1000, &[3_000, 20_000], 8);
    let run = start_run(manifest, paced_swarm(), config(dir.path()));
    let expected = run.manifest.file_bytes(1).unwrap();

    assert!(wait_for_first_push(&run, 1));
    run.demuxer
        .seek(1, &SeekRequest::bytes(2_000, Some(4_500)))
        .unwrap();
    assert!(run.output.wait_for_end_of_stream(1, 1, TIMEOUT));

    let segments = run.output.segments(1);
    assert_eq!(segments.last().unwrap(), &expected[2_000..4_500]);
    assert_eq!(run.demuxer.stream(1).unwrap().segment, (2_000, 4_500));

    // The other file is unaffected.
    assert!(run.output.wait_for_end_of_stream(0, 1, TIMEOUT));
    assert_eq!(run.output.data(0), run.manifest.file_bytes(0).unwrap());
}

#[test]
fn test_rejected_seeks_keep_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("steady", 1000, &[8_000], 6);
    let run = start_run(manifest, paced_swarm(), config(dir.path()));

    assert!(wait_for_first_push(&run, 0));
    assert_eq!(
        run.demuxer.seek(0, &SeekRequest::bytes(9_000, None)),
        Err(SeekError::InvalidRange {
            start: 9_000,
            stop: 8_000,
            size: 8_000
        })
    );
    assert!(matches!(
        run.demuxer
            .seek(0, &SeekRequest::bytes(0, None).with_rate(-1.0)),
        Err(SeekError::NegativeRate { .. })
    ));
    assert_eq!(
        run.demuxer.seek(4, &SeekRequest::bytes(0, None)),
        Err(SeekError::UnknownStream { stream: 4 })
    );

    assert!(run.output.wait_for_end_of_stream(0, 1, TIMEOUT));
    assert_eq!(run.output.segments(0).len(), 1);
    assert_eq!(run.output.data(0), run.manifest.file_bytes(0).unwrap());
}

#[test]
fn test_seek_before_content_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(SimulatedEngine::new(paced_swarm()).unwrap());
    let output = Arc::new(RecordingOutput::new());
    let demuxer = Demuxer::new(engine, output, config(dir.path())).unwrap();
    demuxer.start().unwrap();

    assert_eq!(
        demuxer.seek(0, &SeekRequest::bytes(0, None)),
        Err(SeekError::ContentUnknown)
    );
    demuxer.stop().unwrap();
}
