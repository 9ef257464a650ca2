//! Median/MAD aggregation with an optional reputation-weighted trimmed mean

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stats::{gcd, median, median_absolute_deviation, tolerance};
use crate::error::{OracleError, Result};
use crate::registry::Identity;

/// One fixed-point weight unit
pub const WEIGHT_UNIT: u128 = 1_000_000_000_000_000_000;

/// Basis-point denominator used for every ratio
pub const BPS: u64 = 10_000;

/// How per-reporter weights are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightPolicy {
    pub use_weights: bool,
    pub base: u128,
    pub rep_coeff: u128,
}

impl WeightPolicy {
    pub fn uniform() -> Self {
        Self {
            use_weights: false,
            base: WEIGHT_UNIT,
            rep_coeff: 0,
        }
    }

    /// `base + rep_coeff * max(rep, 0)`, or 1 for everyone when unweighted.
    /// Negative reputation floors at the base component.
    pub fn weight(&self, reputation: i64) -> u128 {
        if !self.use_weights {
            return 1;
        }
        let rep = reputation.max(0) as u128;
        self.base.saturating_add(self.rep_coeff.saturating_mul(rep))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationParams {
    pub lambda_x100: u64,
    pub weights: WeightPolicy,
}

/// Per-reporter verdict of one aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub identity: Identity,
    pub value: u64,
    pub weight: u128,
    pub anomalous: bool,
}

/// Immutable outcome of aggregating one request's reveals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub consensus: u64,
    pub lower_bound: u64,
    pub upper_bound: u64,
    pub median: u64,
    pub mad: u64,
    pub anomaly_count: usize,
    pub total_count: usize,
    pub total_weight: u128,
    pub anomaly_weight: u128,
    pub anomaly_ratio_x10000: u64,
    pub finalized: bool,
    pub reporters: Vec<Classification>,
}

impl AggregationResult {
    pub fn interval_width(&self) -> u64 {
        self.upper_bound - self.lower_bound
    }
}

/// Aggregate revealed values.
///
/// 1. `m = median`, `MAD = median(|v - m|)`
/// 2. interval `[m - D, m + D]` with `D = floor(lambda_x100 * MAD / 100)`
/// 3. values outside the interval are anomalies
/// 4. consensus is the weighted mean of the rest, or `m` if nothing is left
///
/// `reputation` is only consulted when the weight policy is enabled.
pub fn compute(
    values: &[(Identity, u64)],
    params: &AggregationParams,
    reputation: &dyn Fn(&Identity) -> i64,
) -> Result<AggregationResult> {
    let raw: Vec<u64> = values.iter().map(|(_, v)| *v).collect();
    let m = median(&raw).ok_or(OracleError::NoReveals)?;
    let mad = median_absolute_deviation(&raw, m).ok_or(OracleError::NoReveals)?;
    let d = tolerance(params.lambda_x100, mad);
    let lower = m.saturating_sub(d);
    let upper = m.saturating_add(d);

    let reporters: Vec<Classification> = values
        .iter()
        .map(|(identity, value)| Classification {
            identity: *identity,
            value: *value,
            weight: params.weights.weight(reputation(identity)),
            anomalous: *value < lower || *value > upper,
        })
        .collect();

    // Only ratios of weights matter; dividing out the common factor keeps
    // fixed-point weights small enough for the products below.
    let divisor = reporters.iter().fold(0u128, |acc, r| gcd(acc, r.weight)).max(1);

    let mut total_reduced = 0u128;
    let mut anomaly_reduced = 0u128;
    let mut kept_reduced = 0u128;
    let mut kept_sum = 0u128;
    for r in &reporters {
        let w = r.weight / divisor;
        total_reduced = total_reduced.checked_add(w).ok_or(OracleError::Overflow("total weight"))?;
        if r.anomalous {
            anomaly_reduced += w;
        } else {
            kept_reduced += w;
            let product = w
                .checked_mul(r.value as u128)
                .ok_or(OracleError::Overflow("weighted sum"))?;
            kept_sum = kept_sum
                .checked_add(product)
                .ok_or(OracleError::Overflow("weighted sum"))?;
        }
    }

    let consensus = if kept_reduced == 0 {
        m
    } else {
        (kept_sum / kept_reduced) as u64
    };

    let anomaly_ratio_x10000 = if total_reduced == 0 {
        0
    } else {
        let scaled = anomaly_reduced
            .checked_mul(BPS as u128)
            .ok_or(OracleError::Overflow("anomaly ratio"))?;
        (scaled / total_reduced) as u64
    };

    let anomaly_count = reporters.iter().filter(|r| r.anomalous).count();
    let total_weight = reporters.iter().fold(0u128, |acc, r| acc.saturating_add(r.weight));
    let anomaly_weight = reporters
        .iter()
        .filter(|r| r.anomalous)
        .fold(0u128, |acc, r| acc.saturating_add(r.weight));

    debug!(
        median = m,
        mad,
        lower,
        upper,
        consensus,
        anomalies = anomaly_count,
        total = reporters.len(),
        ratio_x10000 = anomaly_ratio_x10000,
        "Aggregation computed"
    );

    Ok(AggregationResult {
        consensus,
        lower_bound: lower,
        upper_bound: upper,
        median: m,
        mad,
        anomaly_count,
        total_count: reporters.len(),
        total_weight,
        anomaly_weight,
        anomaly_ratio_x10000,
        finalized: true,
        reporters,
    })
}
