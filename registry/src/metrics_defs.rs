//! Metrics definitions for the registry.

use shared::metrics_defs::{MetricDef, MetricType};

pub const PROMOTION_COMMITTED: MetricDef = MetricDef {
    name: "promotion.committed",
    metric_type: MetricType::Counter,
    description: "Number of environment changes committed",
};

pub const PROMOTION_REJECTED: MetricDef = MetricDef {
    name: "promotion.rejected",
    metric_type: MetricType::Counter,
    description: "Number of environment changes rejected before commit",
};

pub const INDEX_WARM_FAILED: MetricDef = MetricDef {
    name: "promotion.index_warm.failed",
    metric_type: MetricType::Counter,
    description: "Number of fire-and-forget index warm attempts that failed",
};

pub const ALL_METRICS: &[MetricDef] = &[PROMOTION_COMMITTED, PROMOTION_REJECTED, INDEX_WARM_FAILED];
