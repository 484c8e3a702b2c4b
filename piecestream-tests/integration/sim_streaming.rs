//! Streaming whole archives from the simulated swarm.

use std::time::Duration;

use piecestream_core::SelectionPolicy;
use piecestream_core::test_mocks::OutputCall;
use piecestream_sim::{ContentManifest, SwarmConfig, content_handle};
use proptest::prelude::*;

use crate::common::{TIMEOUT, config, fast_swarm, start_run};

fn assert_byte_exact(run: &crate::common::SimRun, ports: &[usize]) {
    for &port in ports {
        assert!(
            run.output.wait_for_end_of_stream(port, 1, TIMEOUT),
            "port {port} never ended"
        );
        assert_eq!(
            run.output.data(port),
            run.manifest.file_bytes(port).unwrap(),
            "port {port} bytes differ"
        );
    }
}

#[test]
fn test_streams_every_file_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("album", 1024, &[3000, 0, 5000, 1024], 9);
    let run = start_run(manifest, fast_swarm(), config(dir.path()));

    assert_byte_exact(&run, &[0, 1, 2, 3]);

    let handle = content_handle(&run.description);
    assert_eq!(run.demuxer.handle(), Some(handle));
    let num_pieces = run.demuxer.content().unwrap().num_pieces as usize;
    assert_eq!(run.engine.downloaded(handle), Some(num_pieces));
    assert!(run.output.calls().contains(&OutputCall::NoMorePorts));
}

#[test]
fn test_reordered_swarm_still_delivers_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("shuffled", 1000, &[12_000, 2_500], 4);
    let swarm = fast_swarm().with_reordering(0.8, 21);
    let run = start_run(manifest, swarm, config(dir.path()).with_window(6));

    assert_byte_exact(&run, &[0, 1]);
    assert_eq!(run.output.end_of_stream_count(0), 1);
}

#[test]
fn test_preloaded_content_streams_without_swarm() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("cached", 512, &[1500, 700], 2);
    let num_pieces = manifest.content().num_pieces;
    let swarm = SwarmConfig::default()
        .with_speed(0, Duration::from_millis(20))
        .with_preloaded(0..num_pieces);
    let run = start_run(manifest, swarm, config(dir.path()));

    assert_byte_exact(&run, &[0, 1]);
}

#[test]
fn test_largest_policy_streams_only_largest_file() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("feature", 1024, &[2048, 8192, 1024], 5);
    let config = config(dir.path()).with_selection(SelectionPolicy::Largest);
    let run = start_run(manifest, fast_swarm(), config);

    assert_byte_exact(&run, &[1]);
    assert!(run.output.data(0).is_empty());
    assert!(run.output.data(2).is_empty());

    let ports: Vec<usize> = run
        .output
        .calls()
        .iter()
        .filter_map(|call| match call {
            OutputCall::PortAdded { port, .. } => Some(*port),
            _ => None,
        })
        .collect();
    assert_eq!(ports, vec![1]);
    assert!(!run.demuxer.stream(0).unwrap().requested);
}

#[test]
fn test_slow_swarm_reports_buffering_until_window_fills() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = ContentManifest::synthetic("slow", 1000, &[10_000], 1);
    let swarm = SwarmConfig::default().with_speed(1, Duration::from_millis(30));
    let run = start_run(manifest, swarm, config(dir.path()).with_window(4));

    assert_byte_exact(&run, &[0]);

    let levels = run.output.buffering_levels();
    assert!(!levels.is_empty());
    assert!(levels[0] < 100);
    assert!(levels.contains(&100));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_any_layout_streams_byte_exact(
        piece_length in 64u32..600,
        sizes in prop::collection::vec(1u64..3000, 1..4),
        seed in any::<u64>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ContentManifest::synthetic("layout", piece_length, &sizes, seed);
        let swarm = SwarmConfig::default().with_speed(16, Duration::from_millis(1));
        let run = start_run(manifest, swarm, config(dir.path()));

        for port in 0..sizes.len() {
            prop_assert!(run.output.wait_for_end_of_stream(port, 1, TIMEOUT));
            prop_assert_eq!(run.output.data(port), run.manifest.file_bytes(port).unwrap());
        }
    }
}
