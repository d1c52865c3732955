use enum_dispatch::enum_dispatch;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::LearnerConfig;
use crate::error::ReplicateError;
use crate::grid::PriceGrid;
use crate::learning::linear::LinearLearner;
use crate::learning::neural::{NeuralLearner, NeuralWeights};
use crate::learning::q_table::QLearner;
use crate::learning::ucb::UcbLearner;
use crate::{PriceIndex, UInt};

/// Prices realized in the previous period, seen from one agent's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastPrices {
    pub own: PriceIndex,
    pub rivals: Vec<PriceIndex>,
}

/// Pre-period selection context. Everything a choice may depend on is
/// frozen at the end of the previous period; `last` is `None` only in a
/// replicate's first period, which every learner covers with warm-up.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub t: UInt,
    pub last: Option<LastPrices>,
}

/// Realized outcome of one period for one agent: the committed price
/// indices of everyone and the agent's own profit.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub t: UInt,
    pub own: PriceIndex,
    pub rivals: Vec<PriceIndex>,
    pub profit: f64,
}

/// Common estimate-and-update contract over the four learner variants.
#[enum_dispatch]
pub trait Learner {
    /// Arm dictated by the learner's initialization procedure, or `None`
    /// once warm-up is complete and indexed selection may run.
    fn warmup_arm(&mut self, t: UInt, rng: &mut StdRng) -> Option<PriceIndex>;

    /// Current value estimate for every arm on the grid, given the
    /// pre-period context. `StateError` if warm-up has not completed.
    fn estimates(&self, ctx: &Context) -> Result<Vec<f64>, ReplicateError>;

    /// Fold one period's realized outcome into the learner's state.
    fn observe(&mut self, obs: &Observation, rng: &mut StdRng) -> Result<(), ReplicateError>;

    /// Terminal state for offline analysis.
    fn snapshot(&self) -> LearnerSnapshot;
}

#[enum_dispatch(Learner)]
#[derive(Debug)]
pub enum LearnerKind {
    UcbTuned(UcbLearner),
    Linear(LinearLearner),
    Neural(NeuralLearner),
    QLearning(QLearner),
}

impl LearnerKind {
    /// Construct a fresh learner for one replicate. Learner state lives
    /// exactly as long as the replicate that owns it.
    pub fn build(
        config: &LearnerConfig,
        grid: &PriceGrid,
        n_agents: usize,
        alpha: f64,
        beta: f64,
        rng: &mut StdRng,
    ) -> Self {
        match config {
            LearnerConfig::UcbTuned => LearnerKind::UcbTuned(UcbLearner::new(grid.len(), rng)),
            LearnerConfig::Linear {
                init_periods,
                refit_every,
                sample_size,
                ..
            } => LearnerKind::Linear(LinearLearner::new(
                grid.clone(),
                n_agents,
                *init_periods,
                *refit_every,
                *sample_size,
            )),
            LearnerConfig::Neural {
                init_periods,
                batch_cap,
                lr_scale,
                init_lr,
                init_tol,
                init_max_epochs,
                ..
            } => LearnerKind::Neural(NeuralLearner::new(
                grid.len(),
                n_agents,
                *init_periods,
                *batch_cap,
                *lr_scale,
                *init_lr,
                *init_tol,
                *init_max_epochs,
                rng,
            )),
            LearnerConfig::QLearning { rate, discount, .. } => {
                LearnerKind::QLearning(QLearner::new(grid, n_agents, alpha, beta, *rate, *discount))
            }
        }
    }
}

/// Terminal learner state recorded per replicate for offline analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LearnerSnapshot {
    UcbTuned {
        pulls: Vec<UInt>,
        reward_sum: Vec<f64>,
        reward_sq_sum: Vec<f64>,
    },
    /// Intercept, own-price slope, one slope per rival.
    Linear { coefficients: Option<Vec<f64>> },
    Neural { weights: NeuralWeights },
    /// Row per flattened joint state, column per action.
    QTable { values: Vec<Vec<f64>> },
}

/// Uniform minibatch of `n` indices into a history of length `len`.
/// Sampling is with replacement; every index is strictly below `len`,
/// so a sample drawn at period t can never reference a later period.
pub fn sample_indices(len: usize, n: usize, rng: &mut StdRng) -> Vec<usize> {
    (0..n).map(|_| rng.random_range(0..len)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_sample_indices_never_look_ahead() {
        // History at period t holds t+1 entries at most, so index < len
        // is exactly the no-future-leakage property.
        let mut rng = StdRng::seed_from_u64(5);
        for len in [1usize, 7, 500] {
            let sample = sample_indices(len, 200, &mut rng);
            assert_eq!(sample.len(), 200);
            assert!(sample.iter().all(|i| *i < len));
        }
    }
}
