use std::collections::BTreeMap;

use wfctl_types::{NodePhase, NodeStatus, NodeType, WorkflowPhase};

/// Synthesises the single root node a freshly-submitted workflow starts
/// from: `spec.entrypoint`, node id equal to the workflow's own entrypoint
/// name, in phase `Pending`.
pub fn synthesize_root_node(entrypoint: &str) -> NodeStatus {
    NodeStatus {
        id: entrypoint.to_string(),
        name: entrypoint.to_string(),
        display_name: entrypoint.to_string(),
        template_name: entrypoint.to_string(),
        node_type: NodeType::Pod,
        phase: NodePhase::Pending,
        ..Default::default()
    }
}

/// A node is ready for the operator to act on when it is a pending pod-type
/// node. Whether a pod already exists for it is a cluster read, not a pure
/// question, so it stays out of this function.
pub fn node_is_ready(node: &NodeStatus) -> bool {
    node.node_type == NodeType::Pod && node.phase == NodePhase::Pending
}

/// True once every node has reached a terminal phase. An empty node map is
/// never considered terminal — the root node is always synthesised before
/// this function is ever asked about the workflow.
pub fn all_terminal(nodes: &BTreeMap<String, NodeStatus>) -> bool {
    !nodes.is_empty() && nodes.values().all(|n| n.phase.is_terminal())
}

/// Rolls every terminal node's phase up to a single workflow phase and
/// message. The first `Failed`/`Error` node encountered in node-id order
/// drives the result; absent any failure the workflow succeeded.
pub fn rollup_phase(nodes: &BTreeMap<String, NodeStatus>) -> (WorkflowPhase, Option<String>) {
    for node in nodes.values() {
        match node.phase {
            NodePhase::Failed => return (WorkflowPhase::Failed, node.message.clone()),
            NodePhase::Error => return (WorkflowPhase::Error, node.message.clone()),
            _ => {}
        }
    }
    (WorkflowPhase::Succeeded, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(phase: NodePhase, message: Option<&str>) -> NodeStatus {
        NodeStatus {
            phase,
            message: message.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn root_node_starts_pending_and_is_ready() {
        let root = synthesize_root_node("main");
        assert_eq!(root.phase, NodePhase::Pending);
        assert_eq!(root.id, "main");
        assert!(node_is_ready(&root));
    }

    #[test]
    fn empty_node_map_is_never_terminal() {
        assert!(!all_terminal(&BTreeMap::new()));
    }

    #[test]
    fn not_terminal_while_any_node_is_running() {
        let mut nodes = BTreeMap::new();
        nodes.insert("a".to_string(), node(NodePhase::Succeeded, None));
        nodes.insert("b".to_string(), node(NodePhase::Running, None));
        assert!(!all_terminal(&nodes));
    }

    #[test]
    fn rollup_succeeds_when_every_node_succeeded() {
        let mut nodes = BTreeMap::new();
        nodes.insert("a".to_string(), node(NodePhase::Succeeded, None));
        nodes.insert("b".to_string(), node(NodePhase::Skipped, None));
        assert_eq!(rollup_phase(&nodes), (WorkflowPhase::Succeeded, None));
    }

    #[test]
    fn rollup_surfaces_first_failed_node_message_in_id_order() {
        let mut nodes = BTreeMap::new();
        nodes.insert("b-later".to_string(), node(NodePhase::Error, Some("boom".into())));
        nodes.insert(
            "a-first".to_string(),
            node(NodePhase::Failed, Some("exit code 1".into())),
        );
        assert_eq!(
            rollup_phase(&nodes),
            (WorkflowPhase::Failed, Some("exit code 1".to_string()))
        );
    }

    #[test]
    fn rollup_prefers_error_when_it_sorts_first() {
        let mut nodes = BTreeMap::new();
        nodes.insert("a-first".to_string(), node(NodePhase::Error, Some("bad artifacts".into())));
        nodes.insert("b-later".to_string(), node(NodePhase::Failed, Some("exit code 1".into())));
        assert_eq!(
            rollup_phase(&nodes),
            (WorkflowPhase::Error, Some("bad artifacts".to_string()))
        );
    }
}
