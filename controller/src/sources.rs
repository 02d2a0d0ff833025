//! Event Sources: three independent list+watch streams feeding two
//! bounded queues. Producers never block on anything but the queue itself —
//! backpressure is by watch resync, not by dropping events.

use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, ResourceExt};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use wfctl_types::Workflow;

use crate::config::ConfigStore;

/// Capacity of the workflow event queue: workflow events are far
/// rarer than pod events, so this queue can be comparatively small.
pub const WORKFLOW_QUEUE_CAPACITY: usize = 10_240;
/// Capacity of the pod event queue: sized an order of magnitude
/// larger so a pod burst never backpressures workflow progress.
pub const POD_QUEUE_CAPACITY: usize = 102_400;

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Upsert(Workflow),
    Delete(String, String),
}

#[derive(Debug, Clone)]
pub enum PodEvent {
    Upsert(Pod),
    Delete(String, String),
}

fn build_label_selector(extra: &str, match_labels: &std::collections::BTreeMap<String, String>) -> String {
    let mut clauses: Vec<String> = match_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    clauses.push(extra.to_string());
    clauses.join(",")
}

/// Watches the controller's own ConfigMap and feeds every observed payload
/// straight into the Config Store. The only writer to the store.
pub async fn run_config_source(client: Client, namespace: String, name: String, store: std::sync::Arc<ConfigStore>) {
    let api: Api<ConfigMap> = Api::namespaced(client, &namespace);
    let watcher_config = watcher::Config::default().fields(&format!("metadata.name={name}"));
    let mut stream = Box::pin(watcher(api, watcher_config).default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(cm)) | Ok(watcher::Event::InitApply(cm)) => {
                let raw = cm.data.as_ref().and_then(|d| d.get("config")).map(String::as_str);
                if let Err(err) = store.update(raw) {
                    wfctl_common::print::warning(format!("rejected config update: {err}"));
                }
            }
            Ok(_) => {}
            Err(err) => eprintln!("{}", format!("config watch error: {err}").red()),
        }
    }
}

/// Watches workflows matching `matchLabels` that are not yet labelled
/// completed, pushing every Add/Update/Delete onto `tx`. Scoped to
/// `namespace` when non-empty, cluster-wide otherwise.
pub async fn run_workflow_source(
    client: Client,
    namespace: String,
    match_labels: std::collections::BTreeMap<String, String>,
    tx: mpsc::Sender<WorkflowEvent>,
) {
    let api: Api<Workflow> = if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, &namespace)
    };
    let selector = build_label_selector(
        &format!("{} notin (true)", wfctl_common::annotations::LABEL_COMPLETED),
        &match_labels,
    );
    let watcher_config = watcher::Config::default().labels(&selector);
    let mut stream = Box::pin(watcher(api, watcher_config).default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(wf)) | Ok(watcher::Event::InitApply(wf)) => {
                if tx.send(WorkflowEvent::Upsert(wf)).await.is_err() {
                    break;
                }
            }
            Ok(watcher::Event::Delete(wf)) => {
                if tx
                    .send(WorkflowEvent::Delete(wf.name_any(), wf.namespace().unwrap_or_default()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => eprintln!("{}", format!("workflow watch error: {err}").red()),
        }
    }
}

/// Watches pods matching `matchLabels` that have left `Pending` and are not
/// yet labelled completed, pushing every Add/Update/Delete onto `tx`. Scoped
/// to `namespace` when non-empty, cluster-wide otherwise.
pub async fn run_pod_source(
    client: Client,
    namespace: String,
    match_labels: std::collections::BTreeMap<String, String>,
    tx: mpsc::Sender<PodEvent>,
) {
    let api: Api<Pod> = if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, &namespace)
    };
    let selector = build_label_selector(
        &format!("{}=false", wfctl_common::annotations::LABEL_COMPLETED),
        &match_labels,
    );
    let watcher_config = watcher::Config::default()
        .labels(&selector)
        .fields("status.phase!=Pending");
    let mut stream = Box::pin(watcher(api, watcher_config).default_backoff());

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(pod)) | Ok(watcher::Event::InitApply(pod)) => {
                if tx.send(PodEvent::Upsert(pod)).await.is_err() {
                    break;
                }
            }
            Ok(watcher::Event::Delete(pod)) => {
                if tx
                    .send(PodEvent::Delete(pod.name_any(), pod.namespace().unwrap_or_default()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => eprintln!("{}", format!("pod watch error: {err}").red()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn selector_joins_match_labels_and_extra_clause() {
        let mut labels = BTreeMap::new();
        labels.insert("team".to_string(), "data".to_string());
        let selector = build_label_selector("completed notin (true)", &labels);
        assert_eq!(selector, "team=data,completed notin (true)");
    }

    #[test]
    fn selector_with_no_match_labels_is_just_the_extra_clause() {
        let selector = build_label_selector("completed=false", &BTreeMap::new());
        assert_eq!(selector, "completed=false");
    }
}
