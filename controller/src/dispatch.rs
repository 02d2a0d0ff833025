//! Dispatch Loop: single-consumer, non-deterministic receive across
//! the workflow and pod queues. Single-threaded dispatch gives a total order
//! over observed events and is why nothing upstream needs per-workflow
//! locking.

use std::sync::Arc;

use kube::Client;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;

use crate::cache::CompletedPodCache;
use crate::config::ConfigStore;
use crate::sources::{PodEvent, WorkflowEvent};
use crate::util::metrics::{ControllerMetrics, InflightGuard};
use crate::{pods, workflow};

/// Queue-depth telemetry is emitted every this-many dispatch iterations,
/// not on a timer — cheap, and ties the cadence to actual throughput.
const TELEMETRY_EVERY: u64 = 100;

pub async fn run(
    client: Client,
    config: Arc<ConfigStore>,
    cache: Arc<CompletedPodCache>,
    metrics: Arc<ControllerMetrics>,
    mut workflow_rx: mpsc::Receiver<WorkflowEvent>,
    mut pod_rx: mpsc::Receiver<PodEvent>,
) {
    metrics.workflow_queue_capacity.set(crate::sources::WORKFLOW_QUEUE_CAPACITY as i64);
    metrics.pod_queue_capacity.set(crate::sources::POD_QUEUE_CAPACITY as i64);

    let mut iterations: u64 = 0;
    loop {
        tokio::select! {
            biased;
            event = workflow_rx.recv() => {
                let Some(event) = event else { break };
                let _guard = InflightGuard::enter(&metrics.inflight_tasks);
                metrics.invocations.with_label_values(&["operator"]).inc();
                if let Err(err) = dispatch_workflow(&client, &config, &metrics, event).await {
                    wfctl_common::print::error(format!("operator failed: {err}"));
                }
            }
            event = pod_rx.recv() => {
                let Some(event) = event else { break };
                let _guard = InflightGuard::enter(&metrics.inflight_tasks);
                metrics.invocations.with_label_values(&["reconciler"]).inc();
                if let Err(err) = dispatch_pod(&client, &config, &cache, &metrics, event).await {
                    wfctl_common::print::error(format!("reconciler failed: {err}"));
                }
            }
            else => break,
        }

        iterations += 1;
        if iterations % TELEMETRY_EVERY == 0 {
            metrics.workflow_queue_depth.set(workflow_rx.len() as i64);
            metrics.pod_queue_depth.set(pod_rx.len() as i64);
            println!(
                "{}",
                format!(
                    "📊 queues • workflow={} pod={}",
                    workflow_rx.len(),
                    pod_rx.len()
                )
                .dimmed()
            );
        }
    }
}

async fn dispatch_workflow(
    client: &Client,
    config: &ConfigStore,
    metrics: &ControllerMetrics,
    event: WorkflowEvent,
) -> Result<(), crate::util::Error> {
    match event {
        WorkflowEvent::Upsert(wf) => workflow::operate(client.clone(), config, &wf, metrics).await,
        WorkflowEvent::Delete(name, namespace) => {
            println!("{}", format!("workflow deleted • {namespace}/{name}").dimmed());
            Ok(())
        }
    }
}

async fn dispatch_pod(
    client: &Client,
    config: &ConfigStore,
    cache: &CompletedPodCache,
    metrics: &ControllerMetrics,
    event: PodEvent,
) -> Result<(), crate::util::Error> {
    match event {
        PodEvent::Upsert(pod) => pods::handle_pod_update(client.clone(), config, cache, &pod, metrics).await,
        PodEvent::Delete(name, namespace) => {
            println!("{}", format!("pod deleted • {namespace}/{name}").dimmed());
            Ok(())
        }
    }
}
