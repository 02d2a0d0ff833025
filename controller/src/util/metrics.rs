//! Prometheus registry for this controller, plus the HTTP endpoint that
//! exposes it alongside `/healthz` and `/readyz` — the same surface a
//! cluster-standard Prometheus scrape config and a Kubernetes liveness/
//! readiness probe both expect, with no bespoke wiring on either side.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use owo_colors::OwoColorize;
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};
use tokio::net::TcpListener;

/// Counters and histograms shared by the workflow operator and the pod
/// reconciler. One instance is constructed at startup and handed to both
/// via `Arc`.
pub struct ControllerMetrics {
    pub registry: Registry,
    pub invocations: IntCounterVec,
    pub actions: IntCounterVec,
    pub duration: HistogramVec,
    pub workflow_queue_depth: IntGauge,
    pub workflow_queue_capacity: IntGauge,
    pub pod_queue_depth: IntGauge,
    pub pod_queue_capacity: IntGauge,
    /// Count of dispatch-loop invocations of the operator or reconciler
    /// currently in flight. Dispatch is single-consumer so this is 0 or 1
    /// in practice; it is tracked anyway because the stats emitter contract
    /// calls out "concurrent-task count" explicitly and a future
    /// multi-consumer dispatch would make it meaningful.
    pub inflight_tasks: IntGauge,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let invocations = IntCounterVec::new(
            prometheus::opts!(
                "wfctl_component_invocations_total",
                "Number of times a component (operator or reconciler) ran"
            ),
            &["component"],
        )
        .unwrap();

        let actions = IntCounterVec::new(
            prometheus::opts!(
                "wfctl_component_actions_total",
                "Number of distinct actions taken by a component"
            ),
            &["component", "action"],
        )
        .unwrap();

        let duration = HistogramVec::new(
            prometheus::histogram_opts!(
                "wfctl_component_duration_seconds",
                "Time spent handling one event inside a component"
            ),
            &["component", "action"],
        )
        .unwrap();

        let workflow_queue_depth =
            IntGauge::new("wfctl_workflow_queue_depth", "Pending items in the workflow event queue").unwrap();
        let workflow_queue_capacity = IntGauge::new(
            "wfctl_workflow_queue_capacity",
            "Configured capacity of the workflow event queue",
        )
        .unwrap();
        let pod_queue_depth =
            IntGauge::new("wfctl_pod_queue_depth", "Pending items in the pod event queue").unwrap();
        let pod_queue_capacity =
            IntGauge::new("wfctl_pod_queue_capacity", "Configured capacity of the pod event queue").unwrap();
        let inflight_tasks =
            IntGauge::new("wfctl_inflight_tasks", "Dispatch-loop invocations currently executing").unwrap();

        registry.register(Box::new(invocations.clone())).unwrap();
        registry.register(Box::new(actions.clone())).unwrap();
        registry.register(Box::new(duration.clone())).unwrap();
        registry.register(Box::new(workflow_queue_depth.clone())).unwrap();
        registry.register(Box::new(workflow_queue_capacity.clone())).unwrap();
        registry.register(Box::new(pod_queue_depth.clone())).unwrap();
        registry.register(Box::new(pod_queue_capacity.clone())).unwrap();
        registry.register(Box::new(inflight_tasks.clone())).unwrap();

        // Process-level resident/virtual memory, open fds, cpu time. This is
        // the closest available proxy for the "allocated memory / system
        // memory" figures: the standard library exposes
        // no allocator-level allocation counter and there is no GC to count,
        // so those two fields are not emitted rather than fabricated.
        #[cfg(target_os = "linux")]
        {
            let process_collector = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(process_collector));
        }

        Self {
            registry,
            invocations,
            actions,
            duration,
            workflow_queue_depth,
            workflow_queue_capacity,
            pod_queue_depth,
            pod_queue_capacity,
            inflight_tasks,
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard incrementing `inflight_tasks` on construction and decrementing
/// it on drop, so a dispatch-loop invocation that returns early (or panics)
/// never leaves the gauge stuck above zero.
pub struct InflightGuard<'a>(&'a IntGauge);

impl<'a> InflightGuard<'a> {
    pub fn enter(gauge: &'a IntGauge) -> Self {
        gauge.inc();
        Self(gauge)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

async fn serve(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<ControllerMetrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" => Response::new(Full::new(Bytes::from_static(b"ok"))),
        "/readyz" => Response::new(Full::new(Bytes::from_static(b"ok"))),
        "/metrics" => {
            let families = metrics.registry.gather();
            let mut buf = Vec::new();
            TextEncoder::new().encode(&families, &mut buf).unwrap();
            Response::new(Full::new(Bytes::from(buf)))
        }
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from_static(b"not found")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    };
    Ok(response)
}

/// Serves `/healthz`, `/readyz`, and `/metrics` on `addr` until the process
/// exits. Intentionally has no graceful-shutdown wiring of its own: this
/// endpoint is purely observational and is fine to cut off mid-request when
/// the pod terminates.
pub async fn run_metrics_server(addr: SocketAddr, metrics: Arc<ControllerMetrics>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    println!(
        "{}{}",
        "📈 Starting metrics server • addr=".green(),
        addr.to_string().green().dimmed(),
    );
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| serve(req, metrics.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("metrics server connection error: {err}");
            }
        });
    }
}
