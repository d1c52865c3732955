use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::ReplicateError;
use crate::grid::PriceGrid;
use crate::learning::learner::{Context, Learner, LearnerSnapshot, Observation, sample_indices};
use crate::{PriceIndex, UInt};

/// One observed period: own price, rival price(s), realized demand
/// (profit divided by own price).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DemandSample {
    own: f64,
    rivals: Vec<f64>,
    demand: f64,
}

/// Contextual bandit around an OLS demand model
/// d = a + b * own + sum_j c_j * rival_j.
///
/// Warm-up prices uniformly at random, fits once over the warm-up
/// sample, then refits in full every `refit_every` periods on a fresh
/// uniform minibatch from the entire history. Between refits the model
/// is static; a refit replaces the coefficient vector wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearLearner {
    grid: PriceGrid,
    n_agents: usize,
    init_periods: UInt,
    refit_every: UInt,
    sample_size: usize,
    history: Vec<DemandSample>,
    /// [intercept, own slope, rival slope(s)]; None until the first fit.
    coefficients: Option<Vec<f64>>,
}

impl LinearLearner {
    pub fn new(
        grid: PriceGrid,
        n_agents: usize,
        init_periods: UInt,
        refit_every: UInt,
        sample_size: usize,
    ) -> Self {
        LinearLearner {
            grid,
            n_agents,
            init_periods,
            refit_every,
            sample_size,
            history: Vec::new(),
            coefficients: None,
        }
    }

    fn fit(&self, samples: &[&DemandSample], period: UInt) -> Result<Vec<f64>, ReplicateError> {
        let k = self.n_agents + 1;
        let mut xtx = vec![vec![0.0; k]; k];
        let mut xty = vec![0.0; k];
        let mut row = vec![0.0; k];
        for sample in samples {
            row[0] = 1.0;
            row[1] = sample.own;
            row[2..k].copy_from_slice(&sample.rivals);
            for i in 0..k {
                for j in 0..k {
                    xtx[i][j] += row[i] * row[j];
                }
                xty[i] += row[i] * sample.demand;
            }
        }
        let coef = solve(xtx, xty).ok_or_else(|| ReplicateError::Numerical {
            period,
            detail: "degenerate regression minibatch: singular normal equations".into(),
        })?;
        if coef.iter().any(|c| !c.is_finite()) {
            return Err(ReplicateError::Numerical {
                period,
                detail: "non-finite regression coefficients".into(),
            });
        }
        Ok(coef)
    }
}

/// Solve A x = b by Gaussian elimination with partial pivoting. The
/// systems here are (n_agents + 1)-dimensional, so no linear-algebra
/// dependency is warranted.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|i, j| a[*i][col].abs().total_cmp(&a[*j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

impl Learner for LinearLearner {
    fn warmup_arm(&mut self, t: UInt, rng: &mut StdRng) -> Option<PriceIndex> {
        if t < self.init_periods {
            return Some(rng.random_range(0..self.grid.len()));
        }
        None
    }

    fn estimates(&self, ctx: &Context) -> Result<Vec<f64>, ReplicateError> {
        let coef = self
            .coefficients
            .as_ref()
            .ok_or(ReplicateError::State { period: ctx.t })?;
        let last = ctx
            .last
            .as_ref()
            .ok_or(ReplicateError::State { period: ctx.t })?;
        let rival_term: f64 = last
            .rivals
            .iter()
            .zip(&coef[2..])
            .map(|(idx, c)| c * self.grid.price(*idx))
            .sum();
        Ok(self
            .grid
            .prices()
            .iter()
            .map(|p| (coef[0] + coef[1] * p + rival_term) * p)
            .collect())
    }

    fn observe(&mut self, obs: &Observation, rng: &mut StdRng) -> Result<(), ReplicateError> {
        let own = self.grid.price(obs.own);
        self.history.push(DemandSample {
            own,
            rivals: obs.rivals.iter().map(|i| self.grid.price(*i)).collect(),
            demand: obs.profit / own,
        });

        let completed = obs.t + 1;
        if completed == self.init_periods {
            // Initial fit: the whole warm-up sample, no subsampling.
            let all: Vec<&DemandSample> = self.history.iter().collect();
            self.coefficients = Some(self.fit(&all, obs.t)?);
        } else if completed > self.init_periods && completed % self.refit_every == 0 {
            let picked = sample_indices(self.history.len(), self.sample_size, rng);
            let sample: Vec<&DemandSample> = picked.iter().map(|i| &self.history[*i]).collect();
            self.coefficients = Some(self.fit(&sample, obs.t)?);
        }
        Ok(())
    }

    fn snapshot(&self) -> LearnerSnapshot {
        LearnerSnapshot::Linear {
            coefficients: self.coefficients.clone(),
        }
    }
}
