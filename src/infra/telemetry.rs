use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the crate emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "repocache_cache_hit_total",
            Unit::Count,
            "Total number of repository reads served from the cache."
        );
        describe_counter!(
            "repocache_cache_miss_total",
            Unit::Count,
            "Total number of repository reads computed from the store."
        );
        describe_counter!(
            "repocache_cache_passthrough_total",
            Unit::Count,
            "Total number of reads served uncached because the backend lacks tag support."
        );
        describe_counter!(
            "repocache_cache_invalidate_total",
            Unit::Count,
            "Total number of tag-wide cache invalidations."
        );
        describe_counter!(
            "repocache_cache_evict_total",
            Unit::Count,
            "Total number of in-memory cache evictions due to capacity."
        );
        describe_histogram!(
            "repocache_cache_compute_ms",
            Unit::Milliseconds,
            "Store query latency on cache misses in milliseconds."
        );
        describe_counter!(
            "repocache_event_published_total",
            Unit::Count,
            "Total number of lifecycle events published."
        );
        describe_counter!(
            "repocache_event_subscriber_failure_total",
            Unit::Count,
            "Total number of event subscribers that errored or panicked."
        );
    });
}
