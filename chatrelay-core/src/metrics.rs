//! Prometheus metrics for the relay path
//!
//! All metrics live in one registry and are exposed via the `/metrics`
//! endpoint for Prometheus scraping.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
    Encoder, HistogramVec, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Relay publishes, by kind (`local` or `peer`), target region and outcome
pub static RELAY_PUBLISH_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
    register_counter_vec_with_registry!(
        "relay_publish_total",
        "Total number of message events handed to an event channel",
        &["kind", "region", "outcome"],
        REGISTRY.clone()
    )
    .expect("Failed to register RELAY_PUBLISH_TOTAL")
});

/// Dispatcher pushes, by outcome (`delivered`, `gone`, `transport_error`)
pub static DISPATCH_PUSH_TOTAL: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
    register_counter_vec_with_registry!(
        "dispatch_push_total",
        "Total number of pushes attempted by the dispatcher",
        &["outcome"],
        REGISTRY.clone()
    )
    .expect("Failed to register DISPATCH_PUSH_TOTAL")
});

/// Time to dispatch one message event, by outcome (`ok`, `registry_unavailable`)
pub static DISPATCH_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
    register_histogram_vec_with_registry!(
        "dispatch_duration_seconds",
        "Time spent dispatching one message event",
        &["outcome"],
        REGISTRY.clone()
    )
    .expect("Failed to register DISPATCH_DURATION")
});

/// Registry operations, by operation and outcome
pub static REGISTRY_OPERATIONS_TOTAL: std::sync::LazyLock<CounterVec> =
    std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "registry_operations_total",
            "Total number of connection registry operations",
            &["operation", "outcome"],
            REGISTRY.clone()
        )
        .expect("Failed to register REGISTRY_OPERATIONS_TOTAL")
    });

/// Record one publish to the origin's own channel (`kind = "local"`) or to
/// a peer region's channel (`kind = "peer"`)
pub fn record_relay_publish(kind: &str, region: &str, outcome: &str) {
    RELAY_PUBLISH_TOTAL
        .with_label_values(&[kind, region, outcome])
        .inc();
}

/// Record the result of a registry call
pub fn record_registry_operation(operation: &str, ok: bool) {
    REGISTRY_OPERATIONS_TOTAL
        .with_label_values(&[operation, if ok { "ok" } else { "error" }])
        .inc();
}

/// Gather all metrics and encode them in Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_touched_metrics() {
        record_relay_publish("local", "eu", "ok");
        record_registry_operation("upsert", true);

        let text = gather_metrics().unwrap();
        assert!(text.contains("relay_publish_total"));
        assert!(text.contains(r#"kind="local""#));
        assert!(text.contains("registry_operations_total"));
    }
}
