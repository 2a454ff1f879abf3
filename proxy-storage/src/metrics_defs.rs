//! Metrics definitions for the proxy storage.

use shared::metrics_defs::{MetricDef, MetricType};

pub const FETCH_SINCE_HIT: MetricDef = MetricDef {
    name: "change_summaries.fetch.hit",
    metric_type: MetricType::Counter,
    description: "Number of since lookups answered from a cached checkpoint",
};

pub const FETCH_SINCE_MISS: MetricDef = MetricDef {
    name: "change_summaries.fetch.miss",
    metric_type: MetricType::Counter,
    description: "Number of since lookups for an unknown checkpoint",
};

pub const CHECKPOINT_COUNT: MetricDef = MetricDef {
    name: "change_summaries.checkpoints",
    metric_type: MetricType::Gauge,
    description: "Number of checkpoints currently retained",
};

pub const CHECKPOINT_EVICTED: MetricDef = MetricDef {
    name: "change_summaries.evicted",
    metric_type: MetricType::Counter,
    description: "Number of checkpoints evicted because the configured bound was reached",
};

pub const SNAPSHOT_PERSIST_DURATION: MetricDef = MetricDef {
    name: "snapshot.persist.duration",
    metric_type: MetricType::Histogram,
    description: "Time to capture and store a snapshot in seconds",
};

pub const SNAPSHOT_PERSIST_BYTES: MetricDef = MetricDef {
    name: "snapshot.persist.bytes",
    metric_type: MetricType::Histogram,
    description: "Size of the encoded snapshot in bytes",
};

pub const SNAPSHOT_PERSIST_FAILED: MetricDef = MetricDef {
    name: "snapshot.persist.failed",
    metric_type: MetricType::Counter,
    description: "Number of snapshot attempts that failed",
};

pub const SNAPSHOT_RESTORE_FAILED: MetricDef = MetricDef {
    name: "snapshot.restore.failed",
    metric_type: MetricType::Counter,
    description: "Number of startups that fell back to a cold start",
};

pub const ALL_METRICS: &[MetricDef] = &[
    FETCH_SINCE_HIT,
    FETCH_SINCE_MISS,
    CHECKPOINT_COUNT,
    CHECKPOINT_EVICTED,
    SNAPSHOT_PERSIST_DURATION,
    SNAPSHOT_PERSIST_BYTES,
    SNAPSHOT_PERSIST_FAILED,
    SNAPSHOT_RESTORE_FAILED,
];
