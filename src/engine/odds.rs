//! Price conversions shared by the detector, the allocator and the feed.

/// A decimal price is usable when it is finite and strictly positive.
pub fn is_priced(decimal_odds: f64) -> bool {
    decimal_odds.is_finite() && decimal_odds > 0.0
}

/// Implied probability of a decimal price: `1 / odds`.
/// Returns 0.0 for unusable prices so callers can skip them.
pub fn implied_probability(decimal_odds: f64) -> f64 {
    if is_priced(decimal_odds) {
        1.0 / decimal_odds
    } else {
        0.0
    }
}

/// Convert American odds to decimal odds.
/// +150 -> 2.50, -150 -> 1.6667. Zero is not a valid American price.
pub fn american_to_decimal(odds: f64) -> Option<f64> {
    if !odds.is_finite() || odds == 0.0 {
        return None;
    }
    if odds > 0.0 {
        Some(1.0 + odds / 100.0)
    } else {
        Some(1.0 + 100.0 / odds.abs())
    }
}

/// Sum of implied probabilities across a set of decimal prices.
pub fn implied_sum(prices: &[f64]) -> f64 {
    prices.iter().map(|&p| implied_probability(p)).sum()
}

/// Round a money amount to cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_probability() {
        assert!((implied_probability(2.0) - 0.5).abs() < 1e-12);
        assert!((implied_probability(4.0) - 0.25).abs() < 1e-12);
        assert_eq!(implied_probability(0.0), 0.0);
        assert_eq!(implied_probability(-1.5), 0.0);
        assert_eq!(implied_probability(f64::NAN), 0.0);
    }

    #[test]
    fn test_american_to_decimal() {
        assert!((american_to_decimal(150.0).unwrap() - 2.5).abs() < 1e-9);
        assert!((american_to_decimal(-200.0).unwrap() - 1.5).abs() < 1e-9);
        assert!((american_to_decimal(100.0).unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(american_to_decimal(0.0), None);
    }

    #[test]
    fn test_american_favourite_and_underdog_probabilities() {
        // -150 is a 60% favourite, +150 a 40% underdog
        let fav = american_to_decimal(-150.0).unwrap();
        let dog = american_to_decimal(150.0).unwrap();
        assert!((implied_probability(fav) - 0.6).abs() < 1e-9);
        assert!((implied_probability(dog) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_implied_sum_two_way() {
        // 1/1.8 + 1/1.9 = 0.5556 + 0.5263 = 1.0819
        let sum = implied_sum(&[1.8, 1.9]);
        assert!((sum - 1.0819).abs() < 0.0001);
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(49.3979), 49.40);
        assert_eq!(round_cents(50.6021), 50.60);
        assert_eq!(round_cents(0.004), 0.0);
    }
}
