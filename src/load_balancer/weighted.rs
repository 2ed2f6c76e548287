//! Weighted random selection.

use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::LoadBalancer;
use crate::routing::Target;

/// Picks a target with probability proportional to its weight.
///
/// Draws uniformly from `[0, total_weight)` and walks the running sum, so
/// no state is kept between calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedRandom;

impl WeightedRandom {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a draw in `[0, total_weight)` to a target.
    pub fn pick(targets: &[Arc<Target>], draw: u64) -> Option<&Arc<Target>> {
        let mut sum = 0u64;
        targets.iter().find(|t| {
            sum += u64::from(t.weight);
            draw < sum
        })
    }

    /// Sum of all target weights.
    pub fn total_weight(targets: &[Arc<Target>]) -> u64 {
        targets.iter().map(|t| u64::from(t.weight)).sum()
    }
}

impl LoadBalancer for WeightedRandom {
    fn next_server(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>> {
        match targets {
            [] => None,
            [only] => Some(Arc::clone(only)),
            _ => {
                let total = Self::total_weight(targets);
                if total == 0 {
                    return None;
                }
                let draw = rand::thread_rng().gen_range(0..total);
                Self::pick(targets, draw).cloned()
            }
        }
    }
}
