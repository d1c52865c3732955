use serde::{Deserialize, Serialize};

use crate::UInt;
use crate::error::ConfigError;
use crate::grid::PriceGrid;

/// Full experiment configuration: market, horizon and learner
/// hyperparameters. Round-trips through TOML so experiments can be
/// driven from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Ordered candidate prices shared by all agents.
    pub grid: Vec<f64>,
    /// Logit demand intercept.
    pub alpha: f64,
    /// Logit demand price sensitivity.
    pub beta: f64,
    /// Number of competing firms (2 or 3).
    pub n_agents: usize,
    /// Periods per replicate.
    pub periods: UInt,
    /// Independent Monte Carlo replicates.
    pub replicates: UInt,
    /// Base seed; replicate i runs on seed + i.
    pub seed: u64,
    pub learner: LearnerConfig,
}

/// Per-algorithm hyperparameters. Exploration decays as exp(-decay * t);
/// UCB1-Tuned carries no decay because its index is self-exploring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum LearnerConfig {
    UcbTuned,
    Linear {
        decay: f64,
        /// Random-pricing warm-up length before the first fit.
        init_periods: UInt,
        /// Full refit cadence in periods; static in between.
        refit_every: UInt,
        /// Observations drawn per refit.
        sample_size: usize,
    },
    Neural {
        decay: f64,
        init_periods: UInt,
        /// Upper bound on the per-period minibatch.
        batch_cap: usize,
        /// Step size is lr_scale / batch_len. The inverse scaling has no
        /// stated statistical justification, so it stays an overridable
        /// knob rather than a constant.
        lr_scale: f64,
        /// Step size for the initial full-batch fit.
        init_lr: f64,
        /// Loss-delta convergence tolerance for the initial fit.
        init_tol: f64,
        init_max_epochs: usize,
    },
    QLearning {
        decay: f64,
        /// Bellman learning rate.
        rate: f64,
        /// Discount factor.
        discount: f64,
    },
}

impl LearnerConfig {
    pub fn ucb() -> Self {
        LearnerConfig::UcbTuned
    }

    pub fn linear() -> Self {
        LearnerConfig::Linear {
            decay: 5e-4,
            init_periods: 100,
            refit_every: 500,
            sample_size: 500,
        }
    }

    pub fn neural() -> Self {
        LearnerConfig::Neural {
            decay: 5e-4,
            init_periods: 100,
            batch_cap: 128,
            lr_scale: 1.0,
            init_lr: 0.05,
            init_tol: 1e-8,
            init_max_epochs: 5000,
        }
    }

    /// Q-learning over the full joint state space.
    pub fn q_full() -> Self {
        LearnerConfig::QLearning {
            decay: 1e-4,
            rate: 0.15,
            discount: 0.95,
        }
    }

    /// Reduced-state variant: same update rule, faster decay. Pair with a
    /// coarser price grid in `Config::grid`.
    pub fn q_reduced() -> Self {
        LearnerConfig::QLearning {
            decay: 1e-3,
            rate: 0.15,
            discount: 0.95,
        }
    }

    /// Exploration decay constant, if this learner explores by schedule.
    pub fn decay(&self) -> Option<f64> {
        match self {
            LearnerConfig::UcbTuned => None,
            LearnerConfig::Linear { decay, .. }
            | LearnerConfig::Neural { decay, .. }
            | LearnerConfig::QLearning { decay, .. } => Some(*decay),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            grid: vec![0.3, 0.4, 0.5],
            alpha: 5.0,
            beta: 5.0,
            n_agents: 2,
            periods: 10_000,
            replicates: 10,
            seed: 1,
            learner: LearnerConfig::ucb(),
        }
    }
}

impl Config {
    /// Validate the whole configuration and hand back the parsed grid.
    /// Fatal: nothing runs on an invalid configuration.
    pub fn validate(&self) -> Result<PriceGrid, ConfigError> {
        let grid = PriceGrid::new(self.grid.clone())?;
        if self.periods == 0 {
            return Err(ConfigError::NonPositivePeriods);
        }
        if self.replicates == 0 {
            return Err(ConfigError::NonPositiveReplicates);
        }
        if !(2..=3).contains(&self.n_agents) {
            return Err(ConfigError::UnsupportedAgentCount(self.n_agents));
        }
        if !self.alpha.is_finite() || !self.beta.is_finite() || self.beta <= 0.0 {
            return Err(ConfigError::InvalidHyperparameter(
                "demand parameters must be finite with beta > 0".into(),
            ));
        }
        if let Some(decay) = self.learner.decay() {
            if !decay.is_finite() || decay <= 0.0 {
                return Err(ConfigError::NonPositiveDecay(decay));
            }
        }
        match &self.learner {
            LearnerConfig::UcbTuned => {}
            LearnerConfig::Linear {
                init_periods,
                refit_every,
                sample_size,
                ..
            } => {
                Self::check_init(*init_periods, self.periods)?;
                if *refit_every == 0 {
                    return Err(ConfigError::InvalidHyperparameter(
                        "refit_every must be positive".into(),
                    ));
                }
                if *sample_size == 0 {
                    return Err(ConfigError::InvalidHyperparameter(
                        "sample_size must be positive".into(),
                    ));
                }
            }
            LearnerConfig::Neural {
                init_periods,
                batch_cap,
                lr_scale,
                init_lr,
                init_tol,
                init_max_epochs,
                ..
            } => {
                Self::check_init(*init_periods, self.periods)?;
                if *batch_cap == 0 || *init_max_epochs == 0 {
                    return Err(ConfigError::InvalidHyperparameter(
                        "batch_cap and init_max_epochs must be positive".into(),
                    ));
                }
                for (name, v) in [
                    ("lr_scale", *lr_scale),
                    ("init_lr", *init_lr),
                    ("init_tol", *init_tol),
                ] {
                    if !v.is_finite() || v <= 0.0 {
                        return Err(ConfigError::InvalidHyperparameter(format!(
                            "{name} must be positive and finite"
                        )));
                    }
                }
            }
            LearnerConfig::QLearning { rate, discount, .. } => {
                if !rate.is_finite() || *rate <= 0.0 || *rate > 1.0 {
                    return Err(ConfigError::InvalidHyperparameter(
                        "learning rate must lie in (0, 1]".into(),
                    ));
                }
                if !discount.is_finite() || *discount < 0.0 || *discount >= 1.0 {
                    return Err(ConfigError::InvalidHyperparameter(
                        "discount must lie in [0, 1)".into(),
                    ));
                }
            }
        }
        Ok(grid)
    }

    fn check_init(init_periods: UInt, periods: UInt) -> Result<(), ConfigError> {
        if init_periods == 0 || init_periods >= periods {
            return Err(ConfigError::InvalidHyperparameter(
                "init_periods must be positive and shorter than the horizon".into(),
            ));
        }
        Ok(())
    }
}
