/// Integer mean rounded towards negative infinity. Returns `None` for empty input.
pub fn floor_mean(values: &[i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    let sum: i64 = values.iter().sum();
    Some(sum.div_euclid(values.len() as i64))
}

/// Mean of `(value, weight)` pairs rounded towards negative infinity.
/// Returns `None` when the weights sum to zero.
pub fn weighted_floor_mean(pairs: &[(i64, i64)]) -> Option<i64> {
    let weight_sum: i64 = pairs.iter().map(|(_, w)| w).sum();
    if weight_sum <= 0 {
        return None;
    }
    let weighted_total: i64 = pairs.iter().map(|(v, w)| v * w).sum();
    Some(weighted_total.div_euclid(weight_sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_mean() {
        assert_eq!(floor_mean(&[]), None);
        assert_eq!(floor_mean(&[300]), Some(300));
        assert_eq!(floor_mean(&[100, 201]), Some(150));
        // floors, not truncates, for negative sums
        assert_eq!(floor_mean(&[-100, -201]), Some(-151));
    }

    #[test]
    fn test_weighted_floor_mean() {
        assert_eq!(weighted_floor_mean(&[]), None);
        assert_eq!(weighted_floor_mean(&[(100, 0)]), None);
        assert_eq!(weighted_floor_mean(&[(100, 1), (400, 2)]), Some(300));
        assert_eq!(weighted_floor_mean(&[(100, 2), (101, 1)]), Some(100));
        assert_eq!(weighted_floor_mean(&[(-10, 1), (-11, 2)]), Some(-11));
    }
}
