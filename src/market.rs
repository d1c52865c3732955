//! Logit demand market. A firm's per-period profit is its price times its
//! multinomial-logit market share against an outside option.

/// Profit of a firm posting `own_price` while the other firms post
/// `other_prices`. The denominator sums over all firms including this
/// one, so the same function serves 2- and 3-agent markets.
pub fn reward(own_price: f64, other_prices: &[f64], alpha: f64, beta: f64) -> f64 {
    let own = (alpha - beta * own_price).exp();
    let others: f64 = other_prices.iter().map(|p| (alpha - beta * p).exp()).sum();
    own_price * own / (1.0 + own + others)
}
