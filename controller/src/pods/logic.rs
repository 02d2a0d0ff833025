//! Pure derivation rules behind the pod reconciler: turning one pod
//! observation into `(phase, daemoned, message)`, and folding that into a
//! node's status as the minimal patch `applyUpdates` calls for. Kept free of
//! any cluster I/O so every rule here is a plain function over plain data.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use wfctl_common::annotations;
use wfctl_types::{NodePhase, NodeStatus, Template};

fn node_message_override(pod: &Pod) -> Option<String> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::ANNOTATION_NODE_MESSAGE))
        .filter(|m| !m.is_empty())
        .cloned()
}

fn terminated_of(status: &ContainerStatus) -> Option<&k8s_openapi::api::core::v1::ContainerStateTerminated> {
    status.state.as_ref().and_then(|s| s.terminated.as_ref())
}

/// `inferFailedReason`: derives `(phase, message)` for a pod observed in
/// phase `Failed`. `daemoned` is always `false` here — only a `Running`
/// daemon-ready pod ever produces `daemoned = true`.
pub fn infer_failed_reason(pod: &Pod) -> (NodePhase, String) {
    if let Some(msg) = pod.status.as_ref().and_then(|s| s.message.as_deref()).filter(|m| !m.is_empty()) {
        return (NodePhase::Failed, msg.to_string());
    }

    let override_message = node_message_override(pod);

    if let Some(init_statuses) = pod.status.as_ref().and_then(|s| s.init_container_statuses.as_ref()) {
        for cs in init_statuses {
            let Some(term) = terminated_of(cs) else { continue };
            if term.exit_code == 0 {
                continue;
            }
            let suffix = override_message
                .clone()
                .or_else(|| term.message.clone().filter(|m| !m.is_empty()));
            let message = match suffix {
                Some(m) => format!("failed to load artifacts: {m}"),
                None => "failed to load artifacts".to_string(),
            };
            return (NodePhase::Error, message);
        }
    }

    let mut main_failure: Option<String> = None;
    let mut wait_failure: Option<String> = None;
    let mut sidecar_failure: Option<String> = None;
    if let Some(statuses) = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref()) {
        for cs in statuses {
            let Some(term) = terminated_of(cs) else { continue };
            if term.exit_code == 0 {
                continue;
            }
            let message = if cs.name == "wait" {
                let suffix = override_message
                    .clone()
                    .or_else(|| term.message.clone().filter(|m| !m.is_empty()));
                match suffix {
                    Some(m) => format!("failed to save artifacts: {m}"),
                    None => "failed to save artifacts".to_string(),
                }
            } else {
                term.message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| format!("failed with exit code {}", term.exit_code))
            };
            match cs.name.as_str() {
                "main" => main_failure.get_or_insert(message),
                "wait" => wait_failure.get_or_insert(message),
                _ => sidecar_failure.get_or_insert(message),
            };
        }
    }

    if let Some(m) = main_failure {
        return (NodePhase::Failed, m);
    }
    if let Some(m) = wait_failure {
        return (NodePhase::Error, m);
    }
    if let Some(m) = sidecar_failure {
        return (NodePhase::Failed, m);
    }
    (NodePhase::Failed, "pod failed for unknown reason".to_string())
}

/// Step 4 of `handlePodUpdate`: derives `(phase, daemoned, message)` from the
/// pod's own phase, or `None` when the phase table says "log and return".
/// `template` is the already-decoded template annotation; `None` stands for
/// "undecodable", which is itself a log-and-return case.
pub fn derive_from_pod_phase(pod: &Pod, template: Option<&Template>) -> Option<(NodePhase, bool, String)> {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or("");
    match phase {
        "Pending" => None,
        "Succeeded" => Some((NodePhase::Succeeded, false, String::new())),
        "Failed" => {
            let (phase, message) = infer_failed_reason(pod);
            Some((phase, false, message))
        }
        "Running" => {
            let template = template?;
            if !template.daemon {
                return None;
            }
            let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
            if statuses.is_empty() || !statuses.iter().all(|cs| cs.ready) {
                return None;
            }
            Some((NodePhase::Succeeded, true, String::new()))
        }
        other => Some((NodePhase::Error, false, format!("pod phase '{other}' is unrecognized"))),
    }
}

fn latest_terminated_finish(pod: &Pod) -> Option<Time> {
    let status = pod.status.as_ref()?;
    let init = status.init_container_statuses.iter().flatten();
    let main = status.container_statuses.iter().flatten();
    init.chain(main)
        .filter_map(|cs| terminated_of(cs).and_then(|t| t.finished_at.clone()))
        .max_by_key(|t| t.0)
}

/// `applyUpdates`: folds a derived `(phase, daemoned, message)` into `node`,
/// producing the minimal mutation the rules call for. Returns whether
/// anything changed.
pub fn apply_updates(
    pod: &Pod,
    node: &mut NodeStatus,
    new_phase: NodePhase,
    new_daemoned: bool,
    message: &str,
    now: DateTime<Utc>,
) -> bool {
    let mut changed = false;
    let was_daemoned = node.daemoned.unwrap_or(false);

    if new_phase != node.phase && (!node.phase.is_terminal() || was_daemoned) {
        node.phase = new_phase;
        changed = true;
    }

    if new_daemoned != was_daemoned {
        node.daemoned = if new_daemoned { Some(true) } else { None };
        if new_daemoned {
            node.pod_ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone());
        } else {
            node.pod_ip = None;
        }
        changed = true;
    }

    if node.outputs.is_none() {
        if let Some(raw) = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::ANNOTATION_OUTPUTS))
        {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(value) => {
                    node.outputs = Some(value);
                    changed = true;
                }
                Err(_) => {
                    if node.phase != NodePhase::Error {
                        node.phase = NodePhase::Error;
                        changed = true;
                    }
                }
            }
        }
    }

    if !message.is_empty() && node.message.as_deref() != Some(message) {
        node.message = Some(message.to_string());
        changed = true;
    }

    if node.started_at.is_none() {
        node.started_at = Some(Time(now));
        changed = true;
    }

    if node.phase.is_terminal() && node.finished_at.is_none() {
        node.finished_at = Some(latest_terminated_finish(pod).unwrap_or(Time(now)));
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated, PodStatus};
    use std::collections::BTreeMap;

    fn terminated_status(name: &str, exit_code: i32, message: Option<&str>) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            ready: exit_code == 0,
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    message: message.map(str::to_string),
                    finished_at: Some(Time(Utc::now())),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running_ready_status(name: &str) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            ready: true,
            state: Some(ContainerState {
                running: Some(Default::default()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_with(phase: &str, statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_with_init(phase: &str, init_statuses: Vec<ContainerStatus>, statuses: Vec<ContainerStatus>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                init_container_statuses: Some(init_statuses),
                container_statuses: Some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn node_in(phase: NodePhase) -> NodeStatus {
        NodeStatus {
            phase,
            ..Default::default()
        }
    }

    #[test]
    fn init_container_failure_is_classified_error() {
        let pod = pod_with_init(
            "Failed",
            vec![terminated_status("init", 1, Some("no such key"))],
            vec![],
        );
        let (phase, message) = infer_failed_reason(&pod);
        assert_eq!(phase, NodePhase::Error);
        assert_eq!(message, "failed to load artifacts: no such key");
    }

    #[test]
    fn main_failure_preempts_wait_failure() {
        let pod = pod_with(
            "Failed",
            vec![
                terminated_status("main", 2, Some("oom")),
                terminated_status("wait", 1, Some("upload 500")),
            ],
        );
        let (phase, message) = infer_failed_reason(&pod);
        assert_eq!(phase, NodePhase::Failed);
        assert_eq!(message, "oom");
    }

    #[test]
    fn sidecar_only_failure_is_failed_with_sidecar_message() {
        let pod = pod_with(
            "Failed",
            vec![
                terminated_status("main", 0, None),
                terminated_status("db", 137, None),
            ],
        );
        let (phase, message) = infer_failed_reason(&pod);
        assert_eq!(phase, NodePhase::Failed);
        assert_eq!(message, "failed with exit code 137");
    }

    #[test]
    fn wait_only_failure_is_classified_error() {
        let pod = pod_with(
            "Failed",
            vec![
                terminated_status("main", 0, None),
                terminated_status("wait", 1, Some("upload 500")),
            ],
        );
        let (phase, message) = infer_failed_reason(&pod);
        assert_eq!(phase, NodePhase::Error);
        assert_eq!(message, "failed to save artifacts: upload 500");
    }

    #[test]
    fn pod_message_short_circuits_container_scan() {
        let mut pod = pod_with("Failed", vec![terminated_status("main", 2, Some("oom"))]);
        pod.status.as_mut().unwrap().message = Some("node was preempted".to_string());
        let (phase, message) = infer_failed_reason(&pod);
        assert_eq!(phase, NodePhase::Failed);
        assert_eq!(message, "node was preempted");
    }

    #[test]
    fn inference_is_deterministic_across_repeated_calls() {
        let pod = pod_with(
            "Failed",
            vec![terminated_status("main", 2, Some("oom")), terminated_status("wait", 1, Some("x"))],
        );
        assert_eq!(infer_failed_reason(&pod), infer_failed_reason(&pod));
    }

    #[test]
    fn succeeded_pod_rolls_node_to_succeeded() {
        let pod = pod_with("Succeeded", vec![]);
        let derived = derive_from_pod_phase(&pod, None).expect("derived");
        assert_eq!(derived, (NodePhase::Succeeded, false, String::new()));
    }

    #[test]
    fn pending_pod_is_log_and_return() {
        let pod = pod_with("Pending", vec![]);
        assert_eq!(derive_from_pod_phase(&pod, None), None);
    }

    #[test]
    fn running_non_daemon_template_is_a_no_op() {
        let pod = pod_with("Running", vec![running_ready_status("main")]);
        let template = Template {
            name: "t".to_string(),
            container: None,
            dag: None,
            daemon: false,
        };
        assert_eq!(derive_from_pod_phase(&pod, Some(&template)), None);
    }

    #[test]
    fn running_daemon_with_all_ready_succeeds_as_daemon() {
        let pod = pod_with("Running", vec![running_ready_status("main"), running_ready_status("wait")]);
        let template = Template {
            name: "t".to_string(),
            container: None,
            dag: None,
            daemon: true,
        };
        let derived = derive_from_pod_phase(&pod, Some(&template)).expect("derived");
        assert_eq!(derived, (NodePhase::Succeeded, true, String::new()));
    }

    #[test]
    fn running_daemon_with_unready_container_waits() {
        let mut not_ready = running_ready_status("wait");
        not_ready.ready = false;
        let pod = pod_with("Running", vec![running_ready_status("main"), not_ready]);
        let template = Template {
            name: "t".to_string(),
            container: None,
            dag: None,
            daemon: true,
        };
        assert_eq!(derive_from_pod_phase(&pod, Some(&template)), None);
    }

    #[test]
    fn apply_updates_sets_phase_and_finished_at_for_succeeded_pod() {
        let pod = pod_with("Succeeded", vec![terminated_status("main", 0, None)]);
        let mut node = node_in(NodePhase::Running);
        let now = Utc::now();
        let changed = apply_updates(&pod, &mut node, NodePhase::Succeeded, false, "", now);
        assert!(changed);
        assert_eq!(node.phase, NodePhase::Succeeded);
        assert!(node.finished_at.is_some());
    }

    #[test]
    fn apply_updates_is_a_no_op_when_nothing_changes() {
        let pod = pod_with("Succeeded", vec![]);
        let mut node = NodeStatus {
            phase: NodePhase::Succeeded,
            started_at: Some(Time(Utc::now())),
            finished_at: Some(Time(Utc::now())),
            ..Default::default()
        };
        let before = node.clone();
        let changed = apply_updates(&pod, &mut node, NodePhase::Succeeded, false, "", Utc::now());
        assert!(!changed);
        assert_eq!(node, before);
    }

    #[test]
    fn apply_updates_leaves_terminal_non_daemon_node_phase_untouched() {
        let pod = pod_with("Running", vec![]);
        let mut node = node_in(NodePhase::Failed);
        let changed = apply_updates(&pod, &mut node, NodePhase::Succeeded, false, "", Utc::now());
        assert!(!changed);
        assert_eq!(node.phase, NodePhase::Failed);
    }

    #[test]
    fn apply_updates_allows_daemoned_succeeded_node_to_flip_to_failed() {
        let pod = pod_with("Failed", vec![terminated_status("main", 1, Some("died"))]);
        let mut node = NodeStatus {
            phase: NodePhase::Succeeded,
            daemoned: Some(true),
            started_at: Some(Time(Utc::now())),
            ..Default::default()
        };
        let changed = apply_updates(&pod, &mut node, NodePhase::Failed, false, "died", Utc::now());
        assert!(changed);
        assert_eq!(node.phase, NodePhase::Failed);
        assert_eq!(node.daemoned, None);
        assert_eq!(node.pod_ip, None);
    }

    #[test]
    fn apply_updates_copies_pod_ip_on_daemon_flip() {
        let mut pod = pod_with("Running", vec![]);
        pod.status.as_mut().unwrap().pod_ip = Some("10.0.0.5".to_string());
        let mut node = node_in(NodePhase::Running);
        let changed = apply_updates(&pod, &mut node, NodePhase::Succeeded, true, "", Utc::now());
        assert!(changed);
        assert_eq!(node.daemoned, Some(true));
        assert_eq!(node.pod_ip, Some("10.0.0.5".to_string()));
    }

    #[test]
    fn apply_updates_forces_error_on_undecodable_outputs() {
        let mut pod = pod_with("Succeeded", vec![]);
        pod.metadata.annotations = Some(BTreeMap::from([(
            annotations::ANNOTATION_OUTPUTS.to_string(),
            "{not json".to_string(),
        )]));
        let mut node = node_in(NodePhase::Running);
        let changed = apply_updates(&pod, &mut node, NodePhase::Succeeded, false, "", Utc::now());
        assert!(changed);
        assert_eq!(node.phase, NodePhase::Error);
    }
}
