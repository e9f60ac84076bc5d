//! Approximate key popularity for the admission policy.
//!
//! A count-min sketch with four rows of small saturating counters. After
//! `sample_size` increments every counter is halved so popularity decays and
//! formerly hot keys stop crowding out new ones.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

const DEPTH: usize = 4;
const MAX_COUNT: u8 = 15;
const SEEDS: [u64; DEPTH] = [
    0x9E37_79B9_7F4A_7C15,
    0xC2B2_AE3D_27D4_EB4F,
    0x1656_67B1_9E37_79F9,
    0x85EB_CA77_C2B2_AE63,
];

pub(crate) struct FrequencySketch {
    rows: [Vec<u8>; DEPTH],
    mask: usize,
    additions: u64,
    sample_size: u64,
    hasher: RandomState,
}

impl FrequencySketch {
    /// `counters` is the number of counters per row, rounded up to a power of two.
    pub(crate) fn new(counters: u64) -> Self {
        let width = (counters.max(16) as usize).next_power_of_two();
        Self {
            rows: std::array::from_fn(|_| vec![0u8; width]),
            mask: width - 1,
            additions: 0,
            sample_size: counters.max(16),
            hasher: RandomState::new(),
        }
    }

    pub(crate) fn increment(&mut self, key: &str) {
        let hash = self.hasher.hash_one(key);
        for (row, seed) in SEEDS.iter().enumerate() {
            let idx = self.index(hash, *seed);
            let counter = &mut self.rows[row][idx];
            if *counter < MAX_COUNT {
                *counter += 1;
            }
        }

        self.additions += 1;
        if self.additions >= self.sample_size {
            self.halve();
        }
    }

    pub(crate) fn estimate(&self, key: &str) -> u8 {
        let hash = self.hasher.hash_one(key);
        SEEDS
            .iter()
            .enumerate()
            .map(|(row, seed)| self.rows[row][self.index(hash, *seed)])
            .min()
            .unwrap_or(0)
    }

    pub(crate) fn clear(&mut self) {
        for row in self.rows.iter_mut() {
            row.fill(0);
        }
        self.additions = 0;
    }

    fn halve(&mut self) {
        for row in self.rows.iter_mut() {
            for counter in row.iter_mut() {
                *counter >>= 1;
            }
        }
        self.additions /= 2;
    }

    #[inline]
    fn index(&self, hash: u64, seed: u64) -> usize {
        let mixed = (hash ^ seed).wrapping_mul(0xFF51_AFD7_ED55_8CCD);
        ((mixed ^ (mixed >> 32)) as usize) & self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tracks_increments() {
        let mut sketch = FrequencySketch::new(1024);
        for _ in 0..5 {
            sketch.increment("hot");
        }
        sketch.increment("cold");

        assert!(sketch.estimate("hot") >= 5);
        assert!(sketch.estimate("hot") > sketch.estimate("cold"));
        assert_eq!(sketch.estimate("never-seen"), 0);
    }

    #[test]
    fn test_counters_saturate() {
        let mut sketch = FrequencySketch::new(1 << 20);
        for _ in 0..100 {
            sketch.increment("k");
        }
        assert_eq!(sketch.estimate("k"), MAX_COUNT);
    }

    #[test]
    fn test_halving_decays_popularity() {
        let mut sketch = FrequencySketch::new(16);
        for _ in 0..8 {
            sketch.increment("k");
        }
        let before = sketch.estimate("k");
        for i in 0..8 {
            sketch.increment(&format!("other-{i}"));
        }
        assert!(sketch.estimate("k") < before);
    }

    #[test]
    fn test_clear() {
        let mut sketch = FrequencySketch::new(64);
        sketch.increment("k");
        sketch.clear();
        assert_eq!(sketch.estimate("k"), 0);
    }
}
