//! Pod Reconciler: `handlePodUpdate(pod)` translates one pod
//! observation into at most one workflow-status write, plus the completion
//! label that lets the watch filter stop delivering the pod.

pub mod actions;
pub mod logic;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt};
use wfctl_common::annotations;
use wfctl_types::{Template, Workflow};

use crate::cache::CompletedPodCache;
use crate::config::ConfigStore;
use crate::util::Error;
use crate::util::metrics::ControllerMetrics;

pub async fn handle_pod_update(
    client: Client,
    _config: &ConfigStore,
    cache: &CompletedPodCache,
    pod: &Pod,
    metrics: &ControllerMetrics,
) -> Result<(), Error> {
    let pod_name = pod.name_any();
    let namespace = pod.namespace().unwrap_or_default();

    // Step 1 + 4 of the invariant list: a pod already recorded terminal, by
    // cache or by its own label, produces no mutation.
    if cache.seen(&pod_name) {
        return Ok(());
    }
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    if labels.get(annotations::LABEL_COMPLETED).map(String::as_str) == Some("true") {
        return Ok(());
    }
    let Some(workflow_name) = labels.get(annotations::LABEL_WORKFLOW).cloned() else {
        println!("pod {namespace}/{pod_name}: missing workflow back-reference label, ignoring");
        return Ok(());
    };

    let template: Option<Template> = pod
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::ANNOTATION_TEMPLATE))
        .and_then(|raw| serde_json::from_str(raw).ok());

    let Some((new_phase, new_daemoned, message)) = logic::derive_from_pod_phase(pod, template.as_ref()) else {
        return Ok(());
    };

    let workflows: Api<Workflow> = Api::namespaced(client.clone(), &namespace);
    let workflow = match workflows.get(&workflow_name).await {
        Ok(wf) => wf,
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("pod {namespace}/{pod_name}: workflow '{workflow_name}' not found");
            return Ok(());
        }
        Err(e) => return Err(Error::from(e)),
    };
    let Some(mut node) = workflow
        .status
        .as_ref()
        .and_then(|s| s.nodes.get(&pod_name))
        .cloned()
    else {
        println!("pod {namespace}/{pod_name}: no node '{pod_name}' in workflow '{workflow_name}'");
        return Ok(());
    };

    let changed = logic::apply_updates(pod, &mut node, new_phase, new_daemoned, &message, chrono::Utc::now());
    if !changed {
        return Ok(());
    }

    let node_is_terminal = node.phase.is_terminal();
    let node_daemoned = node.daemoned.unwrap_or(false);
    if let Err(err) = actions::persist_node(client.clone(), &workflow, &pod_name, node).await {
        wfctl_common::print::warning(format!(
            "pod {namespace}/{pod_name}: failed to persist node update, deferring to resync: {err}"
        ));
        return Ok(());
    }
    metrics.actions.with_label_values(&["reconciler", "persist_node"]).inc();

    if node_is_terminal && !node_daemoned {
        match actions::label_completed(client, &namespace, &pod_name).await {
            Ok(()) => cache.mark(&pod_name),
            Err(err) => wfctl_common::print::warning(format!(
                "pod {namespace}/{pod_name}: failed to label completed, next event will retry: {err}"
            )),
        }
    }
    Ok(())
}
