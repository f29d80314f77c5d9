//! Kelly Criterion stake sizing on decimal bookmaker odds.
//!
//! Full Kelly on decimal odds `o` with win probability `p`:
//!   f* = (p·o − 1) / (o − 1)
//! which is the usual (b·p − q) / b with b = o − 1 net odds.
//!
//! A *fractional* Kelly multiplier (typically 0.25) scales f* down to cut
//! variance.

/// Full Kelly fraction of bankroll. Zero when there is no edge or the odds
/// cannot pay out.
pub fn full_kelly(probability: f64, odds: f64) -> f64 {
    if odds <= 1.0 || !(0.0..=1.0).contains(&probability) {
        return 0.0;
    }
    let f = (probability * odds - 1.0) / (odds - 1.0);
    if f <= 0.0 {
        return 0.0; // no edge
    }
    f.min(1.0)
}

/// Fraction of bankroll to stake after applying the Kelly multiplier.
pub fn stake_fraction(probability: f64, odds: f64, kelly_fraction: f64) -> f64 {
    (full_kelly(probability, odds) * kelly_fraction.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Amount to stake from `bankroll`. Never negative, never above the bankroll.
pub fn stake(probability: f64, odds: f64, bankroll: f64, kelly_fraction: f64) -> f64 {
    if bankroll <= 0.0 {
        return 0.0;
    }
    (stake_fraction(probability, odds, kelly_fraction) * bankroll).clamp(0.0, bankroll)
}

/// Expected profit per unit staked.
///
/// Edge = p·odds − 1
///
/// Positive edge means the bookmaker is underpricing the true probability.
pub fn edge(probability: f64, odds: f64) -> f64 {
    if odds <= 0.0 {
        return 0.0;
    }
    probability * odds - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kelly_breakeven_is_zero() {
        assert_relative_eq!(full_kelly(0.5, 2.0), 0.0, epsilon = 1e-9);
        assert_relative_eq!(stake(0.5, 2.0, 1000.0, 0.25), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_positive_edge() {
        // p = 0.6 at evens → f = (1.2 - 1) / 1 = 0.2
        assert_relative_eq!(full_kelly(0.6, 2.0), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_fractional_multiplier() {
        assert_relative_eq!(stake(0.6, 2.0, 1000.0, 0.25), 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_kelly_negative_edge() {
        assert_relative_eq!(stake(0.3, 2.0, 1000.0, 1.0), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stake_never_exceeds_bankroll() {
        for &(p, o) in &[(0.99, 50.0), (1.0, 1.01), (0.9, 3.0), (0.7, 100.0)] {
            let s = stake(p, o, 250.0, 1.0);
            assert!((0.0..=250.0).contains(&s), "stake {s} out of range");
        }
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(stake(0.6, 1.0, 100.0, 0.25), 0.0);
        assert_eq!(stake(0.6, 0.5, 100.0, 0.25), 0.0);
        assert_eq!(stake(0.6, 2.0, 0.0, 0.25), 0.0);
        assert_eq!(stake(0.6, 2.0, -10.0, 0.25), 0.0);
    }

    #[test]
    fn test_edge_calculation() {
        assert_relative_eq!(edge(0.6, 2.0), 0.2, epsilon = 1e-9);
        assert_relative_eq!(edge(0.5, 2.0), 0.0, epsilon = 1e-9);
        assert!(edge(0.3, 2.0) < 0.0);
    }
}
