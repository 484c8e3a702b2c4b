//! Simulated swarm: which missing piece arrives next.

use std::time::Duration;

use piecestream_core::engine::PiecePriority;
use rand::Rng;

/// Pieces considered when a reorder perturbs sequential picking.
const REORDER_SPREAD: usize = 4;

/// Download behavior of the simulated swarm.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Pieces completed per tick for each piece of content
    pub pieces_per_tick: u32,
    /// Interval between download ticks
    pub tick: Duration,
    /// Chance, 0 to 1, that a sequential pick takes a later piece of the
    /// top priority tier instead of the first
    pub reorder_probability: f64,
    /// Seed of the swarm's random choices
    pub seed: u64,
    /// Pieces already on disk when content is added
    pub preloaded: Vec<u32>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            pieces_per_tick: 2,
            tick: Duration::from_millis(20),
            reorder_probability: 0.0,
            seed: 0,
            preloaded: Vec::new(),
        }
    }
}

impl SwarmConfig {
    /// Sets the download speed.
    pub fn with_speed(mut self, pieces_per_tick: u32, tick: Duration) -> Self {
        self.pieces_per_tick = pieces_per_tick;
        self.tick = tick;
        self
    }

    /// Sets the reorder probability and the seed of the swarm's choices.
    pub fn with_reordering(mut self, probability: f64, seed: u64) -> Self {
        self.reorder_probability = probability;
        self.seed = seed;
        self
    }

    /// Marks pieces as downloaded before the swarm starts.
    pub fn with_preloaded(mut self, pieces: impl IntoIterator<Item = u32>) -> Self {
        self.preloaded = pieces.into_iter().collect();
        self
    }
}

/// Picks the next piece to download.
///
/// Only missing pieces with a non-skip priority are candidates, and only the
/// highest priority present among them is considered. Sequential download
/// takes the lowest index of that tier unless a reorder fires; otherwise the
/// tier is sampled uniformly.
pub fn pick_next<R: Rng>(
    priorities: &[PiecePriority],
    have: &[bool],
    sequential: bool,
    reorder_probability: f64,
    rng: &mut R,
) -> Option<u32> {
    let candidates = || {
        priorities
            .iter()
            .zip(have)
            .enumerate()
            .filter(|(_, (priority, have))| priority.is_wanted() && !**have)
    };
    let top = candidates().map(|(_, (priority, _))| *priority).max()?;
    let tier: Vec<u32> = candidates()
        .filter(|(_, (priority, _))| **priority == top)
        .map(|(index, _)| index as u32)
        .collect();

    let choice = if !sequential {
        rng.random_range(0..tier.len())
    } else if tier.len() > 1 && rng.random_bool(reorder_probability) {
        rng.random_range(1..tier.len().min(REORDER_SPREAD))
    } else {
        0
    };
    Some(tier[choice])
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn priorities(levels: &[u8]) -> Vec<PiecePriority> {
        levels.iter().map(|&level| PiecePriority::new(level)).collect()
    }

    #[test]
    fn test_highest_priority_lowest_index_first() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let levels = priorities(&[4, 7, 0, 7, 4]);
        let have = [false; 5];
        assert_eq!(pick_next(&levels, &have, true, 0.0, &mut rng), Some(1));

        let have = [false, true, false, false, false];
        assert_eq!(pick_next(&levels, &have, true, 0.0, &mut rng), Some(3));
    }

    #[test]
    fn test_skipped_and_downloaded_pieces_never_picked() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let levels = priorities(&[0, 0, 4]);
        assert_eq!(
            pick_next(&levels, &[false, false, true], true, 0.0, &mut rng),
            None
        );
        assert_eq!(pick_next(&levels, &[false; 3], false, 0.0, &mut rng), Some(2));
    }

    #[test]
    fn test_reordering_stays_in_top_tier() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let levels = priorities(&[7, 7, 7, 7, 7, 7, 1]);
        let have = [false; 7];
        for _ in 0..50 {
            let piece = pick_next(&levels, &have, true, 1.0, &mut rng).unwrap();
            assert!((1..4).contains(&piece));
        }
    }

    #[test]
    fn test_same_seed_same_choices() {
        let levels = priorities(&[4; 32]);
        let have = [false; 32];
        let picks = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..10)
                .map(|_| pick_next(&levels, &have, false, 0.0, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(3), picks(3));
    }

    proptest! {
        #[test]
        fn prop_picks_only_wanted_missing_top_tier_pieces(
            pieces in proptest::collection::vec((0u8..=7, any::<bool>()), 0..40),
            sequential in any::<bool>(),
            reorder in 0.0f64..=1.0,
            seed in any::<u64>(),
        ) {
            let levels: Vec<PiecePriority> =
                pieces.iter().map(|&(level, _)| PiecePriority::new(level)).collect();
            let have: Vec<bool> = pieces.iter().map(|&(_, have)| have).collect();
            let top = levels
                .iter()
                .zip(&have)
                .filter(|(priority, have)| priority.is_wanted() && !**have)
                .map(|(priority, _)| *priority)
                .max();

            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            match pick_next(&levels, &have, sequential, reorder, &mut rng) {
                Some(piece) => {
                    let piece = piece as usize;
                    prop_assert!(!have[piece]);
                    prop_assert!(levels[piece].is_wanted());
                    prop_assert_eq!(Some(levels[piece]), top);
                }
                None => {
                    prop_assert_eq!(top, None);
                }
            }
        }
    }
}
