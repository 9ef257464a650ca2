//! Order statistics over the unsigned value domain

/// Median, flooring the mean of the two central values for even counts.
/// `None` for an empty slice.
pub fn median(values: &[u64]) -> Option<u64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        let sum = sorted[mid - 1] as u128 + sorted[mid] as u128;
        Some((sum / 2) as u64)
    }
}

/// Median absolute deviation around `center`
pub fn median_absolute_deviation(values: &[u64], center: u64) -> Option<u64> {
    let deviations: Vec<u64> = values.iter().map(|v| v.abs_diff(center)).collect();
    median(&deviations)
}

/// Half-width of the tolerance interval: `floor(lambda_x100 * mad / 100)`
pub fn tolerance(lambda_x100: u64, mad: u64) -> u64 {
    let d = lambda_x100 as u128 * mad as u128 / 100;
    u64::try_from(d).unwrap_or(u64::MAX)
}

pub fn gcd(a: u128, b: u128) -> u128 {
    if b == 0 { a } else { gcd(b, a % b) }
}
