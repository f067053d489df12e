/// Recursive exponential moving average seeded with the first price,
/// weight `2 / (span + 1)`. Each value depends only on prices up to its index.
pub fn calculate_ema(prices: &[f64], span: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (span as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

#[cfg(test)]
mod tests {
    use super::calculate_ema;

    #[test]
    fn ema_matches_hand_computed_values() {
        // span 3 => alpha 0.5
        let ema = calculate_ema(&[10.0, 20.0, 30.0, 20.0], 3);
        let expected = [10.0, 15.0, 22.5, 21.25];
        assert_eq!(ema.len(), expected.len());
        for (actual, expected) in ema.iter().zip(expected) {
            assert!((actual - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn span_one_tracks_prices_exactly() {
        let prices = [3.0, 1.0, 4.0, 1.0, 5.0];
        assert_eq!(calculate_ema(&prices, 1), prices.to_vec());
    }

    #[test]
    fn no_look_ahead() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let full = calculate_ema(&prices, 4);
        let prefix = calculate_ema(&prices[..3], 4);
        assert_eq!(&full[..3], prefix.as_slice());
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(calculate_ema(&[], 5).is_empty());
    }
}
