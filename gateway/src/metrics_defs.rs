//! Metrics definitions for the gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const AUTH_CACHE_HIT: MetricDef = MetricDef {
    name: "auth_cache.hit",
    metric_type: MetricType::Counter,
    description: "API key validations answered from the auth cache",
};

pub const AUTH_CACHE_MISS: MetricDef = MetricDef {
    name: "auth_cache.miss",
    metric_type: MetricType::Counter,
    description: "API key validations that fell through to the store",
};

pub const AUTH_CACHE_FALLBACK: MetricDef = MetricDef {
    name: "auth_cache.fallback",
    metric_type: MetricType::Counter,
    description: "API key validations that bypassed an unreachable cache backend",
};

pub const REQUEST_REJECTED: MetricDef = MetricDef {
    name: "gateway.request.rejected",
    metric_type: MetricType::Counter,
    description: "Tenant requests rejected before forwarding",
};

pub const ALL_METRICS: &[MetricDef] = &[
    AUTH_CACHE_HIT,
    AUTH_CACHE_MISS,
    AUTH_CACHE_FALLBACK,
    REQUEST_REJECTED,
];
