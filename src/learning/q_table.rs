use itertools::Itertools;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::ReplicateError;
use crate::grid::PriceGrid;
use crate::learning::learner::{Context, Learner, LearnerSnapshot, Observation};
use crate::market;
use crate::{PriceIndex, UInt};

/// Tabular Q-learning over the joint discretized state of everyone's
/// previous price. The state (own last index, rival last index(es)) is
/// flattened to a single integer row; actions are own next price
/// indices.
///
/// The table is warm-started to the exact static one-shot profit of each
/// action against the rival prices encoded in the state, biasing early
/// play toward the static equilibrium instead of zero. The reduced-state
/// variant reuses this learner unchanged on a coarser grid with a faster
/// exploration decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QLearner {
    grid: PriceGrid,
    rate: f64,
    discount: f64,
    /// q[flattened joint state][action].
    q: Vec<Vec<f64>>,
    /// Joint state realized at the end of the previous period.
    prev: Option<usize>,
}

impl QLearner {
    pub fn new(
        grid: &PriceGrid,
        n_agents: usize,
        alpha: f64,
        beta: f64,
        rate: f64,
        discount: f64,
    ) -> Self {
        let arms = grid.len();
        // Enumerate every joint state (own slot first, then rivals) and
        // seed each action with its static one-shot profit.
        let q = vec![0..arms; n_agents]
            .into_iter()
            .multi_cartesian_product()
            .map(|profile| {
                let rivals: Vec<f64> = profile[1..].iter().map(|r| grid.price(*r)).collect();
                (0..arms)
                    .map(|a| market::reward(grid.price(a), &rivals, alpha, beta))
                    .collect()
            })
            .collect();
        QLearner {
            grid: grid.clone(),
            rate,
            discount,
            q,
            prev: None,
        }
    }

    /// Flatten (own last, rival lasts) into a table row, own slot most
    /// significant. Matches the enumeration order of `new`.
    fn encode(&self, own: PriceIndex, rivals: &[PriceIndex]) -> usize {
        let arms = self.grid.len();
        rivals.iter().fold(own, |acc, r| acc * arms + r)
    }

    pub fn table(&self) -> &[Vec<f64>] {
        &self.q
    }
}

impl Learner for QLearner {
    fn warmup_arm(&mut self, t: UInt, rng: &mut StdRng) -> Option<PriceIndex> {
        // The first period of a replicate has no valid prior state; it is
        // seeded by an independent uniform draw per agent.
        if t == 0 {
            return Some(rng.random_range(0..self.grid.len()));
        }
        None
    }

    fn estimates(&self, ctx: &Context) -> Result<Vec<f64>, ReplicateError> {
        let last = ctx
            .last
            .as_ref()
            .ok_or(ReplicateError::State { period: ctx.t })?;
        Ok(self.q[self.encode(last.own, &last.rivals)].clone())
    }

    fn observe(&mut self, obs: &Observation, _rng: &mut StdRng) -> Result<(), ReplicateError> {
        let next = self.encode(obs.own, &obs.rivals);
        if let Some(state) = self.prev {
            // Off-policy Bellman backup against the best continuation
            // from the state formed by this period's realized prices.
            let max_next = self.q[next]
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            let cell = &mut self.q[state][obs.own];
            *cell = (1.0 - self.rate) * *cell + self.rate * (obs.profit + self.discount * max_next);
        }
        self.prev = Some(next);
        Ok(())
    }

    fn snapshot(&self) -> LearnerSnapshot {
        LearnerSnapshot::QTable {
            values: self.q.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn grid() -> PriceGrid {
        PriceGrid::new(vec![0.3, 0.4, 0.5]).unwrap()
    }

    #[test]
    fn test_warm_start_is_the_one_shot_profit_matrix() {
        let grid = grid();
        let learner = QLearner::new(&grid, 2, 5.0, 5.0, 0.15, 0.95);
        assert_eq!(learner.q.len(), 9);
        for own_last in 0..3 {
            for rival_last in 0..3 {
                let s = learner.encode(own_last, &[rival_last]);
                for a in 0..3 {
                    let expected =
                        market::reward(grid.price(a), &[grid.price(rival_last)], 5.0, 5.0);
                    assert_eq!(learner.q[s][a], expected);
                }
            }
        }
    }

    #[test]
    fn test_warm_start_reference_cell() {
        // State (own = 0.4, competitor = 0.4), action 0.4: exactly the
        // static profit at (0.4, 0.4).
        let grid = grid();
        let learner = QLearner::new(&grid, 2, 5.0, 5.0, 0.15, 0.95);
        let s = learner.encode(1, &[1]);
        assert_eq!(learner.q[s][1], market::reward(0.4, &[0.4], 5.0, 5.0));
    }

    #[test]
    fn test_bellman_backup() {
        let grid = grid();
        let mut rng = StdRng::seed_from_u64(0);
        let mut learner = QLearner::new(&grid, 2, 5.0, 5.0, 0.5, 0.9);

        // First observation only records the state.
        let first = Observation {
            t: 0,
            own: 0,
            rivals: vec![2],
            profit: 0.1,
        };
        let before = learner.q.clone();
        learner.observe(&first, &mut rng).unwrap();
        assert_eq!(learner.q, before);
        assert_eq!(learner.prev, Some(learner.encode(0, &[2])));

        // Second observation backs up Q(s, a) for s = (0, 2), a = 1.
        let s = learner.encode(0, &[2]);
        let old = learner.q[s][1];
        let second = Observation {
            t: 1,
            own: 1,
            rivals: vec![0],
            profit: 0.25,
        };
        let next = learner.encode(1, &[0]);
        let max_next = learner.q[next]
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        learner.observe(&second, &mut rng).unwrap();
        let expected = 0.5 * old + 0.5 * (0.25 + 0.9 * max_next);
        assert!((learner.q[s][1] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_three_agent_state_space() {
        let grid = grid();
        let learner = QLearner::new(&grid, 3, 5.0, 5.0, 0.15, 0.95);
        assert_eq!(learner.q.len(), 27);
        let s = learner.encode(2, &[0, 1]);
        assert_eq!(learner.q[s][0], market::reward(0.3, &[0.3, 0.4], 5.0, 5.0));
    }

    #[test]
    fn test_first_period_is_seeded_at_random() {
        let grid = grid();
        let mut rng = StdRng::seed_from_u64(1);
        let mut learner = QLearner::new(&grid, 2, 5.0, 5.0, 0.15, 0.95);
        let arm = learner.warmup_arm(0, &mut rng).unwrap();
        assert!(arm < 3);
        assert!(learner.warmup_arm(1, &mut rng).is_none());
    }
}
