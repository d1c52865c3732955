use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::ReplicateError;
use crate::learning::learner::{Context, Learner, LearnerSnapshot, Observation};
use crate::{PriceIndex, UInt};

/// UCB1-Tuned index bandit over the price grid. No context: rival prices
/// enter only through the realized reward. Warm-up pulls every arm
/// exactly once in a shuffled order, so no index ever divides by a zero
/// pull count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UcbLearner {
    pulls: Vec<UInt>,
    reward_sum: Vec<f64>,
    reward_sq_sum: Vec<f64>,
    /// Shuffled arm order for the initialization pulls.
    init_order: Vec<PriceIndex>,
    init_next: usize,
}

impl UcbLearner {
    pub fn new(arms: usize, rng: &mut StdRng) -> Self {
        let mut init_order: Vec<PriceIndex> = (0..arms).collect();
        init_order.shuffle(rng);
        UcbLearner {
            pulls: vec![0; arms],
            reward_sum: vec![0.0; arms],
            reward_sq_sum: vec![0.0; arms],
            init_order,
            init_next: 0,
        }
    }

    fn initialized(&self) -> bool {
        self.init_next >= self.init_order.len()
    }

    /// UCB1-Tuned index for one arm:
    /// mean + sqrt((ln T / n) * min(1/4, V)),
    /// V = sq_sum/n - mean^2 + sqrt(2 ln T / n).
    fn index(&self, arm: PriceIndex, total: f64) -> f64 {
        let n = self.pulls[arm] as f64;
        let mean = self.reward_sum[arm] / n;
        let variance_bound =
            self.reward_sq_sum[arm] / n - mean * mean + (2.0 * total.ln() / n).sqrt();
        mean + (total.ln() / n * variance_bound.min(0.25)).sqrt()
    }
}

impl Learner for UcbLearner {
    fn warmup_arm(&mut self, _t: UInt, _rng: &mut StdRng) -> Option<PriceIndex> {
        if self.initialized() {
            return None;
        }
        let arm = self.init_order[self.init_next];
        self.init_next += 1;
        Some(arm)
    }

    fn estimates(&self, ctx: &Context) -> Result<Vec<f64>, ReplicateError> {
        if !self.initialized() {
            return Err(ReplicateError::State { period: ctx.t });
        }
        let total: f64 = self.pulls.iter().map(|n| *n as f64).sum();
        Ok((0..self.pulls.len()).map(|a| self.index(a, total)).collect())
    }

    fn observe(&mut self, obs: &Observation, _rng: &mut StdRng) -> Result<(), ReplicateError> {
        // Only the played arm's accumulators move.
        self.pulls[obs.own] += 1;
        self.reward_sum[obs.own] += obs.profit;
        self.reward_sq_sum[obs.own] += obs.profit * obs.profit;
        Ok(())
    }

    fn snapshot(&self) -> LearnerSnapshot {
        LearnerSnapshot::UcbTuned {
            pulls: self.pulls.clone(),
            reward_sum: self.reward_sum.clone(),
            reward_sq_sum: self.reward_sq_sum.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rand::SeedableRng;

    fn observe(learner: &mut UcbLearner, rng: &mut StdRng, arm: PriceIndex, profit: f64) {
        let obs = Observation {
            t: 0,
            own: arm,
            rivals: vec![],
            profit,
        };
        learner.observe(&obs, rng).unwrap();
    }

    #[test]
    fn test_warmup_is_a_permutation_of_arms() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut learner = UcbLearner::new(4, &mut rng);
        let mut seen = vec![];
        for t in 0..4 {
            let arm = learner.warmup_arm(t, &mut rng).unwrap();
            seen.push(arm);
            observe(&mut learner, &mut rng, arm, 0.1);
        }
        assert!(learner.warmup_arm(4, &mut rng).is_none());
        assert_eq!(seen.iter().copied().sorted().collect_vec(), vec![0, 1, 2, 3]);
        assert!(learner.pulls.iter().all(|n| *n == 1));
    }

    #[test]
    fn test_selection_before_warmup_is_a_state_error() {
        let mut rng = StdRng::seed_from_u64(1);
        let learner = UcbLearner::new(3, &mut rng);
        let ctx = Context { t: 0, last: None };
        assert_eq!(
            learner.estimates(&ctx),
            Err(ReplicateError::State { period: 0 })
        );
    }

    #[test]
    fn test_update_touches_played_arm_only() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut learner = UcbLearner::new(3, &mut rng);
        observe(&mut learner, &mut rng, 1, 0.5);
        assert_eq!(learner.pulls, vec![0, 1, 0]);
        assert_eq!(learner.reward_sum, vec![0.0, 0.5, 0.0]);
        assert_eq!(learner.reward_sq_sum, vec![0.0, 0.25, 0.0]);
    }

    #[test]
    fn test_index_converges_to_true_mean() {
        // A heavily pulled arm with constant reward: the exploration
        // bonus washes out and the index approaches the arm's mean.
        let mut rng = StdRng::seed_from_u64(3);
        let mut learner = UcbLearner::new(3, &mut rng);
        for t in 0..3 {
            let arm = learner.warmup_arm(t, &mut rng).unwrap();
            observe(&mut learner, &mut rng, arm, 0.2);
        }
        for _ in 0..10_000 {
            observe(&mut learner, &mut rng, 0, 0.2);
        }
        let ctx = Context { t: 10_003, last: None };
        let estimates = learner.estimates(&ctx).unwrap();
        assert!((estimates[0] - 0.2).abs() < 0.01);
        // Rarely pulled arms keep a large bonus.
        assert!(estimates[1] > estimates[0]);
    }
}
