use serde::{Deserialize, Serialize};

use crate::PriceIndex;
use crate::error::ConfigError;

/// The ordered set of prices available to every agent in an experiment.
/// Fixed for the experiment's lifetime; all chosen prices are members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceGrid {
    prices: Vec<f64>,
}

impl PriceGrid {
    /// Build a grid from strictly increasing, strictly positive, finite
    /// prices. Anything else is a configuration error.
    pub fn new(prices: Vec<f64>) -> Result<Self, ConfigError> {
        if prices.len() < 2 {
            return Err(ConfigError::InvalidGrid);
        }
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(ConfigError::InvalidGrid);
        }
        if prices.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidGrid);
        }
        Ok(PriceGrid { prices })
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn price(&self, idx: PriceIndex) -> f64 {
        self.prices[idx]
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    /// Index of an exact price value, if it is on the grid.
    pub fn index_of(&self, price: f64) -> Option<PriceIndex> {
        self.prices.iter().position(|p| *p == price)
    }
}
