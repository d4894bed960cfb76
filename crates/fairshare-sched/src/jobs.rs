//! Job sources: where the coordinator's batches come from.

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use fairshare_core::ClusterConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces the demands of each round's batch. The coordinator assigns
/// job ids and caps the batch at the worker count.
pub trait JobSource: Send {
    fn next_batch(&mut self, round: u64, workers: usize) -> Vec<u64>;
}

/// Uniformly random batch sizes and demands.
#[derive(Debug, Clone)]
pub struct RandomJobSource {
    rng: StdRng,
    demand: RangeInclusive<u64>,
    batch: RangeInclusive<usize>,
}

impl RandomJobSource {
    pub fn new(demand: RangeInclusive<u64>, batch: RangeInclusive<usize>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, demand, batch }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.demand_range(), config.batch_range(), config.jobs.seed)
    }
}

impl JobSource for RandomJobSource {
    fn next_batch(&mut self, _round: u64, workers: usize) -> Vec<u64> {
        let size = if self.batch.is_empty() {
            *self.batch.end()
        } else {
            self.rng.gen_range(self.batch.clone())
        };
        (0..size.min(workers))
            .map(|_| {
                if self.demand.is_empty() {
                    *self.demand.start()
                } else {
                    self.rng.gen_range(self.demand.clone())
                }
            })
            .collect()
    }
}

/// Fixed batches, one per round. Empty once exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedJobSource {
    batches: VecDeque<Vec<u64>>,
}

impl ScriptedJobSource {
    pub fn new(batches: impl IntoIterator<Item = Vec<u64>>) -> Self {
        Self {
            batches: batches.into_iter().collect(),
        }
    }
}

impl JobSource for ScriptedJobSource {
    fn next_batch(&mut self, _round: u64, _workers: usize) -> Vec<u64> {
        self.batches.pop_front().unwrap_or_default()
    }
}
