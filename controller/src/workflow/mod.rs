//! Workflow Operator: `operate(workflow)` is idempotent and
//! side-effect-free once the graph has made no progress. Each invocation
//! re-derives what to do from the workflow's own observed status rather than
//! carrying state across calls, so a partial prior failure (pod created,
//! status write lost) is corrected on the very next event.

pub mod actions;
pub mod planner;

use kube::Client;
use wfctl_types::Workflow;

use crate::config::ConfigStore;
use crate::util::Error;
use crate::util::metrics::ControllerMetrics;

pub async fn operate(
    client: Client,
    config: &ConfigStore,
    workflow: &Workflow,
    metrics: &ControllerMetrics,
) -> Result<(), Error> {
    let Some(cfg) = config.load() else {
        wfctl_common::print::warning("operator skipped: no config loaded yet");
        return Ok(());
    };

    let name = workflow
        .metadata
        .name
        .clone()
        .ok_or_else(|| Error::UserInput("Workflow is missing metadata.name".to_string()))?;
    let namespace = workflow
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| Error::UserInput("Workflow is missing metadata.namespace".to_string()))?;

    let nodes_empty = workflow.status.as_ref().map(|s| s.nodes.is_empty()).unwrap_or(true);
    if nodes_empty {
        let root = planner::synthesize_root_node(&workflow.spec.entrypoint);
        actions::submit(client, workflow, root).await?;
        metrics.actions.with_label_values(&["operator", "submit"]).inc();
        println!("workflow {namespace}/{name}: submitted, root node '{}' pending", workflow.spec.entrypoint);
        return Ok(());
    }

    let nodes = &workflow.status.as_ref().unwrap().nodes;
    if !planner::all_terminal(nodes) {
        for node in nodes.values().filter(|n| planner::node_is_ready(n)) {
            if actions::pod_exists(client.clone(), &namespace, &node.id).await? {
                continue;
            }
            actions::create_pod(client.clone(), workflow, &node.id, &cfg).await?;
            actions::mark_node_running(client.clone(), workflow, &node.id).await?;
            metrics.actions.with_label_values(&["operator", "schedule_pod"]).inc();
            println!("workflow {namespace}/{name}: scheduled pod for node '{}'", node.id);
        }
        return Ok(());
    }

    let status = workflow.status.as_ref().unwrap();
    let (phase, message) = planner::rollup_phase(nodes);
    if status.phase == phase && status.finished_at.is_some() {
        return Ok(());
    }
    actions::finish(client, workflow, phase, message).await?;
    metrics.actions.with_label_values(&["operator", "finish"]).inc();
    println!("workflow {namespace}/{name}: finished as {phase}");
    Ok(())
}
