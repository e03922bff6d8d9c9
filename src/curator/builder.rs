use super::category::Category;
use super::settings::CategoryWeights;
use log::{debug, info};
use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};

/// Reorders a candidate pool before it is cut down to its quota.
pub trait Shuffler {
    fn shuffle(&self, items: &mut [String]);
}

pub struct RandomShuffler;

impl Shuffler for RandomShuffler {
    fn shuffle(&self, items: &mut [String]) {
        items.shuffle(&mut rand::thread_rng());
    }
}

/// Leaves pools in supply order so tests can predict the output.
#[cfg(test)]
pub struct IdentityShuffler;

#[cfg(test)]
impl Shuffler for IdentityShuffler {
    fn shuffle(&self, _items: &mut [String]) {}
}

/// Composes the final track list from per-category pools.
pub struct PlaylistBuilder {
    shuffler: Box<dyn Shuffler>,
}

impl Default for PlaylistBuilder {
    fn default() -> Self {
        Self::new(Box::new(RandomShuffler))
    }
}

impl PlaylistBuilder {
    pub fn new(shuffler: Box<dyn Shuffler>) -> Self {
        Self { shuffler }
    }

    /// Slots reserved for a category: `floor(target_size * weight)`.
    pub fn quota(target_size: usize, weight: f64) -> usize {
        if !weight.is_finite() || weight <= 0.0 {
            return 0;
        }
        (target_size as f64 * weight).floor() as usize
    }

    /// Build up to `target_size` track ids from pools given in rotation order
    /// (favorites, hits, discovery, wildcard).
    ///
    /// Each pool is shuffled and cut to its quota, then the pools are
    /// interleaved round-robin, skipping exhausted ones. Shortfalls are not
    /// backfilled from other categories.
    pub fn build(
        &self,
        pools: [Vec<String>; 4],
        target_size: usize,
        weights: &CategoryWeights,
    ) -> Vec<String> {
        let mut queues: Vec<VecDeque<String>> = Vec::with_capacity(4);
        let mut seen = HashSet::new();

        for (category, mut pool) in Category::ALL.into_iter().zip(pools) {
            let quota = Self::quota(target_size, weights.get(category));
            // A track already claimed by an earlier category stays there
            pool.retain(|id| !seen.contains(id));
            self.shuffler.shuffle(&mut pool);

            let mut selected = VecDeque::with_capacity(quota.min(pool.len()));
            for id in pool {
                if selected.len() == quota {
                    break;
                }
                if seen.insert(id.clone()) {
                    selected.push_back(id);
                }
            }
            debug!(
                "{}: quota {}, selected {}",
                category,
                quota,
                selected.len()
            );
            queues.push(selected);
        }

        let mut playlist = Vec::with_capacity(target_size);
        while playlist.len() < target_size {
            let mut emitted = false;
            for queue in queues.iter_mut() {
                if playlist.len() == target_size {
                    break;
                }
                if let Some(id) = queue.pop_front() {
                    playlist.push(id);
                    emitted = true;
                }
            }
            if !emitted {
                break;
            }
        }

        info!(
            "Built playlist with {} of {} requested tracks",
            playlist.len(),
            target_size
        );
        playlist
    }
}
