use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const BATCH_SIZE: MetricDef = MetricDef {
    name: "batch.size",
    metric_type: MetricType::Histogram,
    description: "Number of identifiers submitted per batch",
};

pub const BATCH_DURATION: MetricDef = MetricDef {
    name: "batch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to resolve a whole batch in seconds. Tagged with timed_out.",
};

pub const BATCH_DEADLINE_EXCEEDED: MetricDef = MetricDef {
    name: "batch.deadline_exceeded",
    metric_type: MetricType::Counter,
    description: "Batches that hit the deadline with lookups still outstanding",
};

pub const LOOKUP_DURATION: MetricDef = MetricDef {
    name: "lookup.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single provider lookup in seconds. Tagged with outcome.",
};

pub const LOOKUP_OUTCOME: MetricDef = MetricDef {
    name: "lookup.outcome",
    metric_type: MetricType::Counter,
    description: "Lookups by outcome (success or failure category)",
};

pub const LOOKUPS_INFLIGHT: MetricDef = MetricDef {
    name: "lookups.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of lookups currently holding a worker slot",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    BATCH_SIZE,
    BATCH_DURATION,
    BATCH_DEADLINE_EXCEEDED,
    LOOKUP_DURATION,
    LOOKUP_OUTCOME,
    LOOKUPS_INFLIGHT,
];
