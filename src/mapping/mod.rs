//! Mapping aggregation and analyst review

pub mod aggregator;
pub mod review;

pub use aggregator::{
    plan_edges, select_best, AggregationPolicy, EdgePlan, MappingAggregator, ReconcileOutcome,
};
pub use review::{ReviewError, ReviewResult, ReviewService};
