//! Stats Emitter: a periodic (~5 min) instrumentation tick, independent of
//! the dispatch loop's own per-100-iteration queue-depth telemetry (that one
//! is tied to throughput, not wall-clock). Reads the gauges the dispatch
//! loop already maintains plus whatever the process collector gathered and
//! logs a single summary line — the same periodic `println!`-telemetry
//! style this codebase already uses for its renewal/expiry loops.

use std::sync::Arc;
use std::time::Duration;

use owo_colors::OwoColorize;
use prometheus::proto::MetricFamily;

use crate::util::metrics::ControllerMetrics;

const EMIT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Process RSS, if the platform process collector registered it. Stands in
/// for "allocated memory" / "system memory" — the standard library exposes
/// no allocator-level counter and there is no GC to report a collection
/// count for, so those two fields are omitted rather than fabricated.
fn process_resident_memory_bytes(families: &[MetricFamily]) -> Option<f64> {
    families
        .iter()
        .find(|f| f.get_name() == "process_resident_memory_bytes")
        .and_then(|f| f.get_metric().first())
        .map(|m| m.get_gauge().get_value())
}

pub async fn run(metrics: Arc<ControllerMetrics>) {
    let mut ticker = tokio::time::interval(EMIT_INTERVAL);
    loop {
        ticker.tick().await;

        let families = metrics.registry.gather();
        let rss = process_resident_memory_bytes(&families)
            .map(|bytes| format!("{:.1}MiB", bytes / (1024.0 * 1024.0)))
            .unwrap_or_else(|| "n/a".to_string());

        println!(
            "{}",
            format!(
                "📈 stats • rss={rss} inflight={} workflow_queue={}/{} pod_queue={}/{}",
                metrics.inflight_tasks.get(),
                metrics.workflow_queue_depth.get(),
                metrics.workflow_queue_capacity.get(),
                metrics.pod_queue_depth.get(),
                metrics.pod_queue_capacity.get(),
            )
            .dimmed()
        );
    }
}
