//! Aggregation Engine
//!
//! Pure robust-statistics consensus over revealed values. No I/O and no
//! shared state: the same reveals, parameters and reputations always give
//! the same [`AggregationResult`].

mod engine;
mod stats;

pub use engine::{
    AggregationParams, AggregationResult, BPS, Classification, WEIGHT_UNIT, WeightPolicy, compute,
};
pub use stats::{gcd, median, median_absolute_deviation, tolerance};
