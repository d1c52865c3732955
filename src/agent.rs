use rand::Rng;
use rand::rngs::StdRng;

use crate::PriceIndex;
use crate::config::Config;
use crate::error::ReplicateError;
use crate::grid::PriceGrid;
use crate::learning::exploration::ExplorationSchedule;
use crate::learning::learner::{Context, Learner, LearnerKind, LearnerSnapshot, Observation};
use crate::learning::policy;

/// One pricing firm: an identifier, an owned learner and the learner's
/// exploration schedule. Constructed at replicate start and discarded at
/// replicate end; nothing is shared across replicates.
#[derive(Debug)]
pub struct Agent {
    pub id: usize,
    arms: usize,
    learner: LearnerKind,
    /// None for UCB1-Tuned, whose index explores on its own.
    schedule: Option<ExplorationSchedule>,
}

impl Agent {
    pub fn new(id: usize, config: &Config, grid: &PriceGrid, rng: &mut StdRng) -> Self {
        let learner = LearnerKind::build(
            &config.learner,
            grid,
            config.n_agents,
            config.alpha,
            config.beta,
            rng,
        );
        Agent {
            id,
            arms: grid.len(),
            learner,
            schedule: config.learner.decay().map(ExplorationSchedule::new),
        }
    }

    /// Pick the next price index from state frozen at the end of the
    /// previous period: the learner's warm-up arm if one is forced, else
    /// an exploratory uniform draw, else the greedy argmax over the
    /// learner's value estimates.
    pub fn choose_price(
        &mut self,
        ctx: &Context,
        rng: &mut StdRng,
    ) -> Result<PriceIndex, ReplicateError> {
        if let Some(arm) = self.learner.warmup_arm(ctx.t, rng) {
            return Ok(arm);
        }
        if let Some(schedule) = &self.schedule {
            if schedule.draw(ctx.t, rng) {
                return Ok(rng.random_range(0..self.arms));
            }
        }
        let estimates = self.learner.estimates(ctx)?;
        Ok(policy::argmax_uniform(&estimates, rng))
    }

    pub fn observe(&mut self, obs: &Observation, rng: &mut StdRng) -> Result<(), ReplicateError> {
        self.learner.observe(obs, rng)
    }

    pub fn snapshot(&self) -> LearnerSnapshot {
        self.learner.snapshot()
    }
}
