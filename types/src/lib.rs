use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// A single step in a workflow's graph. Templates are looked up by name from
/// `WorkflowSpec::templates` when the operator walks the DAG starting at
/// `entrypoint`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub container: Option<ContainerTemplate>,
    #[serde(default)]
    pub dag: Option<DagTemplate>,
    /// A daemon template's pod is allowed to keep running once its node is
    /// otherwise done; the pod reconciler treats "all containers ready" as
    /// success rather than waiting for the pod to exit.
    #[serde(default)]
    pub daemon: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ContainerTemplate {
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct DagTemplate {
    pub tasks: Vec<DagTask>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct DagTask {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_active_deadline_seconds() -> Option<i64> {
    None
}

fn default_parallelism() -> Option<u32> {
    None
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Workflow",
    plural = "workflows",
    derive = "PartialEq",
    status = "WorkflowStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.startedAt\", \"name\": \"STARTED\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.finishedAt\", \"name\": \"FINISHED\", \"type\": \"date\" }"
)]
pub struct WorkflowSpec {
    pub entrypoint: String,
    pub templates: Vec<Template>,
    #[serde(default = "default_active_deadline_seconds")]
    pub active_deadline_seconds: Option<i64>,
    #[serde(default = "default_parallelism")]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub service_account_name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum NodeType {
    Pod,
    Retry,
    Steps,
    Dag,
    Skipped,
}

impl Default for NodeType {
    fn default() -> Self {
        Self::Pod
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum NodePhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Skipped,
    Failed,
    Error,
}

impl FromStr for NodePhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(NodePhase::Pending),
            "Running" => Ok(NodePhase::Running),
            "Succeeded" => Ok(NodePhase::Succeeded),
            "Skipped" => Ok(NodePhase::Skipped),
            "Failed" => Ok(NodePhase::Failed),
            "Error" => Ok(NodePhase::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodePhase::Pending => write!(f, "Pending"),
            NodePhase::Running => write!(f, "Running"),
            NodePhase::Succeeded => write!(f, "Succeeded"),
            NodePhase::Skipped => write!(f, "Skipped"),
            NodePhase::Failed => write!(f, "Failed"),
            NodePhase::Error => write!(f, "Error"),
        }
    }
}

impl NodePhase {
    /// Nodes in a terminal phase are never revisited by the pod reconciler
    /// or rolled further by the workflow operator, with the single exception
    /// (enforced in `applyUpdates`, not here) of a daemoned node's late failure.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodePhase::Succeeded | NodePhase::Skipped | NodePhase::Failed | NodePhase::Error
        )
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct NodeStatus {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub template_name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub phase: NodePhase,
    pub message: Option<String>,
    /// Present iff this node is a daemon whose pod is expected to keep
    /// running after the node's own work is done. Absent and `Some(false)`
    /// are treated as equivalent by the reconciler.
    #[serde(default)]
    pub daemoned: Option<bool>,
    /// Only meaningful when `daemoned` is set.
    #[serde(default)]
    pub pod_ip: Option<String>,
    /// Set at most once; decode failure of the outputs annotation forces
    /// `phase` to `Error` rather than populating this field.
    #[serde(default)]
    pub outputs: Option<serde_json::Value>,
    #[serde(default)]
    pub boundary_id: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    pub started_at: Option<Time>,
    pub finished_at: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum WorkflowPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
}

impl FromStr for WorkflowPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(WorkflowPhase::Pending),
            "Running" => Ok(WorkflowPhase::Running),
            "Succeeded" => Ok(WorkflowPhase::Succeeded),
            "Failed" => Ok(WorkflowPhase::Failed),
            "Error" => Ok(WorkflowPhase::Error),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowPhase::Pending => write!(f, "Pending"),
            WorkflowPhase::Running => write!(f, "Running"),
            WorkflowPhase::Succeeded => write!(f, "Succeeded"),
            WorkflowPhase::Failed => write!(f, "Failed"),
            WorkflowPhase::Error => write!(f, "Error"),
        }
    }
}

impl WorkflowPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowPhase::Succeeded | WorkflowPhase::Failed | WorkflowPhase::Error
        )
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct WorkflowStatus {
    pub phase: WorkflowPhase,
    pub message: Option<String>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<Time>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<Time>,
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeStatus>,
}
