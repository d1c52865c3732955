use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::UInt;

/// Time-decaying exploration probability, p(t) = exp(-decay * t).
/// The decay constant is fixed per algorithm configuration and must be
/// positive (enforced by `Config::validate`), which keeps p in (0, 1]
/// and strictly decreasing in t.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSchedule {
    decay: f64,
}

impl ExplorationSchedule {
    pub fn new(decay: f64) -> Self {
        ExplorationSchedule { decay }
    }

    pub fn probability(&self, t: UInt) -> f64 {
        (-self.decay * t as f64).exp()
    }

    /// One Bernoulli(p(t)) draw. Each agent calls this on its own RNG
    /// stream, so draws are never shared across agents.
    pub fn draw(&self, t: UInt, rng: &mut StdRng) -> bool {
        let r: f64 = rng.random();
        r < self.probability(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_probability_bounds_and_monotonicity() {
        let schedule = ExplorationSchedule::new(2e-3);
        let mut prev = schedule.probability(0);
        assert_eq!(prev, 1.0);
        for t in 1..5000u32 {
            let p = schedule.probability(t);
            assert!(p > 0.0 && p <= 1.0);
            assert!(p < prev);
            prev = p;
        }
    }

    #[test]
    fn test_first_period_always_explores() {
        // p(0) = 1 and rng.random() < 1.0 always holds.
        let schedule = ExplorationSchedule::new(1e-4);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert!(schedule.draw(0, &mut rng));
        }
    }

    #[test]
    fn test_draw_rate_tracks_probability() {
        let schedule = ExplorationSchedule::new(1e-3);
        let mut rng = StdRng::seed_from_u64(11);
        let t = 693; // p ~= 0.5
        let hits = (0..10_000)
            .filter(|_| schedule.draw(t, &mut rng))
            .count() as f64;
        let p = schedule.probability(t);
        assert!((hits / 10_000.0 - p).abs() < 0.03);
    }
}
