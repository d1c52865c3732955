use rand::Rng;
use rand::rngs::StdRng;

use crate::PriceIndex;

/// Argmax over per-arm values, breaking exact ties uniformly at random.
/// Every learner routes its exploitation step through here so the
/// tie-break rule is identical across algorithms.
///
/// `values` must be non-empty and contain at least one finite entry;
/// learners surface non-finite estimates as errors before selection.
pub fn argmax_uniform(values: &[f64], rng: &mut StdRng) -> PriceIndex {
    let best = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let ties: Vec<PriceIndex> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v == best)
        .map(|(i, _)| i)
        .collect();
    ties[rng.random_range(0..ties.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_unique_maximum() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(argmax_uniform(&[0.1, 0.9, 0.3], &mut rng), 1);
        assert_eq!(argmax_uniform(&[2.0, -1.0], &mut rng), 0);
    }

    #[test]
    fn test_exact_ties_hit_all_maximizers() {
        let mut rng = StdRng::seed_from_u64(42);
        let values = [0.5, 0.2, 0.5];
        let mut seen = [0usize; 3];
        for _ in 0..2000 {
            seen[argmax_uniform(&values, &mut rng)] += 1;
        }
        assert_eq!(seen[1], 0);
        // Uniform over {0, 2}: each side well away from zero.
        assert!(seen[0] > 800 && seen[2] > 800);
    }
}
