use itertools::Itertools;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::ReplicateError;
use crate::learning::learner::{Context, Learner, LearnerSnapshot, Observation, sample_indices};
use crate::{PriceIndex, UInt};

/// Weight and bias tensors for one hidden layer of two logistic units
/// and a linear output. Mutated in place by a single gradient step per
/// period once warm-up training has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralWeights {
    /// [hidden unit][input], input = one-hot rival block(s) then own block.
    pub w1: Vec<Vec<f64>>,
    pub b1: Vec<f64>,
    pub w2: Vec<f64>,
    pub b2: f64,
}

const HIDDEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TrainSample {
    own: PriceIndex,
    rivals: Vec<PriceIndex>,
    profit: f64,
}

/// Contextual bandit around a two-unit neural network trained to predict
/// realized own profit from one-hot (rival prices, own price) context.
///
/// Warm-up prices at random and accumulates an initialization sample; at
/// the end of warm-up the network is batch-trained to convergence on it.
/// Afterwards each period takes exactly one gradient step on a bounded
/// minibatch drawn only from post-initialization history, then refreshes
/// the cached payoff table (own price x rival combination) that
/// selection reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralLearner {
    arms: usize,
    n_agents: usize,
    init_periods: UInt,
    batch_cap: usize,
    lr_scale: f64,
    init_lr: f64,
    init_tol: f64,
    init_max_epochs: usize,
    weights: NeuralWeights,
    init_samples: Vec<TrainSample>,
    history: Vec<TrainSample>,
    /// payoff[rival combination][own arm]; None until the initial fit.
    payoff: Option<Vec<Vec<f64>>>,
}

impl NeuralLearner {
    pub fn new(
        arms: usize,
        n_agents: usize,
        init_periods: UInt,
        batch_cap: usize,
        lr_scale: f64,
        init_lr: f64,
        init_tol: f64,
        init_max_epochs: usize,
        rng: &mut StdRng,
    ) -> Self {
        let input = arms * n_agents;
        let mut uniform = |_: usize| rng.random::<f64>() - 0.5;
        let weights = NeuralWeights {
            w1: (0..HIDDEN)
                .map(|_| (0..input).map(&mut uniform).collect())
                .collect(),
            b1: (0..HIDDEN).map(&mut uniform).collect(),
            w2: (0..HIDDEN).map(&mut uniform).collect(),
            b2: 0.0,
        };
        NeuralLearner {
            arms,
            n_agents,
            init_periods,
            batch_cap,
            lr_scale,
            init_lr,
            init_tol,
            init_max_epochs,
            weights,
            init_samples: Vec::new(),
            history: Vec::new(),
            payoff: None,
        }
    }

    fn encode(&self, own: PriceIndex, rivals: &[PriceIndex]) -> Vec<f64> {
        let mut x = vec![0.0; self.arms * self.n_agents];
        for (block, rival) in rivals.iter().enumerate() {
            x[block * self.arms + rival] = 1.0;
        }
        x[(self.n_agents - 1) * self.arms + own] = 1.0;
        x
    }

    fn forward(&self, x: &[f64]) -> ([f64; HIDDEN], f64) {
        let mut hidden = [0.0; HIDDEN];
        for (j, h) in hidden.iter_mut().enumerate() {
            let z: f64 = self.weights.b1[j]
                + self.weights.w1[j]
                    .iter()
                    .zip(x)
                    .map(|(w, xi)| w * xi)
                    .sum::<f64>();
            *h = logistic(z);
        }
        let out = self.weights.b2
            + self
                .weights
                .w2
                .iter()
                .zip(&hidden)
                .map(|(w, h)| w * h)
                .sum::<f64>();
        (hidden, out)
    }

    fn mse(&self, samples: &[&TrainSample]) -> f64 {
        samples
            .iter()
            .map(|s| {
                let (_, y) = self.forward(&self.encode(s.own, &s.rivals));
                (y - s.profit) * (y - s.profit)
            })
            .sum::<f64>()
            / samples.len() as f64
    }

    /// One gradient step on the summed squared error of `samples`,
    /// explicit backward pass through the logistic hidden layer.
    fn gradient_step(&mut self, samples: &[&TrainSample], lr: f64) {
        let input = self.arms * self.n_agents;
        let mut g_w1 = vec![vec![0.0; input]; HIDDEN];
        let mut g_b1 = [0.0; HIDDEN];
        let mut g_w2 = [0.0; HIDDEN];
        let mut g_b2 = 0.0;
        for sample in samples {
            let x = self.encode(sample.own, &sample.rivals);
            let (hidden, y) = self.forward(&x);
            let dy = 2.0 * (y - sample.profit);
            g_b2 += dy;
            for j in 0..HIDDEN {
                g_w2[j] += dy * hidden[j];
                let dz = dy * self.weights.w2[j] * hidden[j] * (1.0 - hidden[j]);
                g_b1[j] += dz;
                for (g, xi) in g_w1[j].iter_mut().zip(&x) {
                    *g += dz * xi;
                }
            }
        }
        self.weights.b2 -= lr * g_b2;
        for j in 0..HIDDEN {
            self.weights.w2[j] -= lr * g_w2[j];
            self.weights.b1[j] -= lr * g_b1[j];
            for (w, g) in self.weights.w1[j].iter_mut().zip(&g_w1[j]) {
                *w -= lr * g;
            }
        }
    }

    /// Full-batch training to convergence over the initialization sample.
    fn initial_fit(&mut self, period: UInt) -> Result<(), ReplicateError> {
        let samples: Vec<TrainSample> = self.init_samples.clone();
        let refs: Vec<&TrainSample> = samples.iter().collect();
        let lr = self.init_lr / refs.len() as f64;
        let mut prev = self.mse(&refs);
        for _ in 0..self.init_max_epochs {
            self.gradient_step(&refs, lr);
            let loss = self.mse(&refs);
            if !loss.is_finite() {
                return Err(ReplicateError::Numerical {
                    period,
                    detail: "initial network fit diverged".into(),
                });
            }
            if (prev - loss).abs() < self.init_tol {
                break;
            }
            prev = loss;
        }
        self.check_finite(period)
    }

    fn check_finite(&self, period: UInt) -> Result<(), ReplicateError> {
        let finite = self.weights.b2.is_finite()
            && self.weights.b1.iter().all(|v| v.is_finite())
            && self.weights.w2.iter().all(|v| v.is_finite())
            && self.weights.w1.iter().flatten().all(|v| v.is_finite());
        if finite {
            Ok(())
        } else {
            Err(ReplicateError::Numerical {
                period,
                detail: "non-finite network weights".into(),
            })
        }
    }

    /// Recompute the cached payoff table for every (rival combination,
    /// own price) pair. Runs after every weight update, never lazily at
    /// selection time.
    fn recompute_payoff(&mut self) {
        let combos = vec![0..self.arms; self.n_agents - 1]
            .into_iter()
            .multi_cartesian_product();
        let table = combos
            .map(|rivals| {
                (0..self.arms)
                    .map(|own| self.forward(&self.encode(own, &rivals)).1)
                    .collect()
            })
            .collect();
        self.payoff = Some(table);
    }

    fn combo_index(&self, rivals: &[PriceIndex]) -> usize {
        rivals.iter().fold(0, |acc, r| acc * self.arms + r)
    }
}

fn logistic(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Learner for NeuralLearner {
    fn warmup_arm(&mut self, t: UInt, rng: &mut StdRng) -> Option<PriceIndex> {
        if t < self.init_periods {
            return Some(rng.random_range(0..self.arms));
        }
        None
    }

    fn estimates(&self, ctx: &Context) -> Result<Vec<f64>, ReplicateError> {
        let payoff = self
            .payoff
            .as_ref()
            .ok_or(ReplicateError::State { period: ctx.t })?;
        let last = ctx
            .last
            .as_ref()
            .ok_or(ReplicateError::State { period: ctx.t })?;
        Ok(payoff[self.combo_index(&last.rivals)].clone())
    }

    fn observe(&mut self, obs: &Observation, rng: &mut StdRng) -> Result<(), ReplicateError> {
        let sample = TrainSample {
            own: obs.own,
            rivals: obs.rivals.clone(),
            profit: obs.profit,
        };
        if obs.t < self.init_periods {
            self.init_samples.push(sample);
            if obs.t + 1 == self.init_periods {
                self.initial_fit(obs.t)?;
                self.recompute_payoff();
            }
            return Ok(());
        }
        // Post-initialization: exactly one step on a minibatch drawn from
        // history accumulated since initialization, never the warm-up
        // window itself.
        self.history.push(sample);
        let batch = self.batch_cap.min(self.history.len());
        let picked = sample_indices(self.history.len(), batch, rng);
        let minibatch: Vec<TrainSample> = picked.iter().map(|i| self.history[*i].clone()).collect();
        let refs: Vec<&TrainSample> = minibatch.iter().collect();
        self.gradient_step(&refs, self.lr_scale / batch as f64);
        self.check_finite(obs.t)?;
        self.recompute_payoff();
        Ok(())
    }

    fn snapshot(&self) -> LearnerSnapshot {
        LearnerSnapshot::Neural {
            weights: self.weights.clone(),
        }
    }
}
