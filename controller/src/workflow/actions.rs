use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use kube::api::{ObjectMeta, Resource};
use kube::{Api, Client};
use wfctl_common::annotations;
use wfctl_types::{NodePhase, Template, Workflow, WorkflowPhase};

use crate::config::ControllerConfig;
use crate::util::{self, Error, patch::*};

fn instance_name(instance: &Workflow) -> Result<&str, Error> {
    instance
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::UserInput("Workflow is missing metadata.name".to_string()))
}

fn instance_namespace(instance: &Workflow) -> Result<&str, Error> {
    instance
        .meta()
        .namespace
        .as_deref()
        .ok_or_else(|| Error::UserInput("Workflow is missing metadata.namespace".to_string()))
}

fn find_template<'a>(workflow: &'a Workflow, name: &str) -> Result<&'a Template, Error> {
    workflow
        .spec
        .templates
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::UserInput(format!("template '{name}' not found in workflow spec")))
}

/// Renders the pod for `node_id`, mirroring this codebase's init/main/wait
/// container convention: an init container that loads artifacts and a wait
/// sidecar that saves them, both running `executorImage`, around the
/// template's own container.
pub fn pod_resource(workflow: &Workflow, node_id: &str, config: &ControllerConfig) -> Result<Pod, Error> {
    let node = workflow
        .status
        .as_ref()
        .and_then(|s| s.nodes.get(node_id))
        .ok_or_else(|| Error::UserInput(format!("node '{node_id}' not found in workflow status")))?;
    let template = find_template(workflow, &node.template_name)?;
    let container_template = template
        .container
        .as_ref()
        .ok_or_else(|| Error::UserInput(format!("template '{}' has no container", template.name)))?;

    let main = Container {
        name: "main".to_string(),
        image: Some(container_template.image.clone()),
        command: if container_template.command.is_empty() {
            None
        } else {
            Some(container_template.command.clone())
        },
        args: if container_template.args.is_empty() {
            None
        } else {
            Some(container_template.args.clone())
        },
        env: Some(
            container_template
                .env
                .iter()
                .map(|(k, v)| EnvVar {
                    name: k.clone(),
                    value: Some(v.clone()),
                    ..Default::default()
                })
                .collect(),
        ),
        ..Default::default()
    };
    let init = Container {
        name: "init".to_string(),
        image: Some(config.executor_image.clone()),
        ..Default::default()
    };
    let wait = Container {
        name: "wait".to_string(),
        image: Some(config.executor_image.clone()),
        ..Default::default()
    };

    let template_json = serde_json::to_string(template)?;
    let mut labels = BTreeMap::new();
    labels.insert(annotations::LABEL_WORKFLOW.to_string(), instance_name(workflow)?.to_string());
    labels.insert(annotations::LABEL_COMPLETED.to_string(), "false".to_string());
    for (k, v) in config.selector_labels() {
        labels.entry(k).or_insert(v);
    }

    let mut meta_annotations = BTreeMap::new();
    meta_annotations.insert(annotations::ANNOTATION_TEMPLATE.to_string(), template_json.clone());
    meta_annotations.insert(annotations::CREATED_BY.to_string(), "workflow-controller".to_string());
    meta_annotations.insert(annotations::SPEC_HASH.to_string(), util::hash_spec(&template_json));

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(node_id.to_string()),
            namespace: Some(instance_namespace(workflow)?.to_string()),
            labels: Some(labels),
            annotations: Some(meta_annotations),
            owner_references: Some(vec![workflow.controller_owner_ref(&()).unwrap()]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            init_containers: Some(vec![init]),
            containers: vec![main, wait],
            restart_policy: Some("Never".to_string()),
            service_account_name: workflow.spec.service_account_name.clone(),
            ..Default::default()
        }),
        status: None,
    })
}

/// Creates the pod for `node_id`; an "already exists" response is treated as
/// success, the idempotent-retry contract calls for.
pub async fn create_pod(client: Client, workflow: &Workflow, node_id: &str, config: &ControllerConfig) -> Result<(), Error> {
    let pod = pod_resource(workflow, node_id, config)?;
    let pods: Api<Pod> = Api::namespaced(client, instance_namespace(workflow)?);
    match pods.create(&Default::default(), &pod).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(Error::from(e)),
    }
}

pub async fn pod_exists(client: Client, namespace: &str, node_id: &str) -> Result<bool, Error> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    match pods.get(node_id).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(Error::from(e)),
    }
}

/// First-ever reconcile of a workflow: synthesises the root node and moves
/// the workflow to `Running`.
pub async fn submit(client: Client, workflow: &Workflow, root_node: wfctl_types::NodeStatus) -> Result<(), Error> {
    let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now());
    let root_id = root_node.id.clone();
    patch_status(client, workflow, move |status| {
        status.phase = WorkflowPhase::Running;
        status.started_at = Some(now);
        status.nodes.insert(root_id.clone(), root_node);
    })
    .await?;
    Ok(())
}

/// Marks `node_id` as `Running` once its pod has been created.
pub async fn mark_node_running(client: Client, workflow: &Workflow, node_id: &str) -> Result<(), Error> {
    let node_id = node_id.to_string();
    patch_status(client, workflow, move |status| {
        if let Some(node) = status.nodes.get_mut(&node_id) {
            if node.phase == NodePhase::Pending {
                node.phase = NodePhase::Running;
            }
        }
    })
    .await?;
    Ok(())
}

/// Rolls the workflow's own phase/message/finishedAt up from its nodes, once
/// every node has reached a terminal phase.
pub async fn finish(client: Client, workflow: &Workflow, phase: WorkflowPhase, message: Option<String>) -> Result<(), Error> {
    let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now());
    patch_status(client, workflow, move |status| {
        status.phase = phase;
        status.message = message;
        if status.finished_at.is_none() {
            status.finished_at = Some(now);
        }
    })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;
    use wfctl_types::{ContainerTemplate, NodeStatus, NodeType, Template, WorkflowSpec, WorkflowStatus};

    fn workflow_with_node(template: Template, node: NodeStatus) -> Workflow {
        let mut nodes = Map::new();
        nodes.insert(node.id.clone(), node);
        Workflow::new(
            "demo",
            wfctl_types::WorkflowSpec {
                entrypoint: template.name.clone(),
                templates: vec![template],
                active_deadline_seconds: None,
                parallelism: None,
                service_account_name: None,
            },
        )
        .with_status(WorkflowStatus {
            nodes,
            ..Default::default()
        })
        .with_namespace("argo")
    }

    trait TestExt {
        fn with_status(self, status: WorkflowStatus) -> Self;
        fn with_namespace(self, ns: &str) -> Self;
    }

    impl TestExt for Workflow {
        fn with_status(mut self, status: WorkflowStatus) -> Self {
            self.status = Some(status);
            self
        }

        fn with_namespace(mut self, ns: &str) -> Self {
            self.meta_mut().namespace = Some(ns.to_string());
            self
        }
    }

    fn template(daemon: bool) -> Template {
        Template {
            name: "main".to_string(),
            container: Some(ContainerTemplate {
                image: "busybox:latest".to_string(),
                command: vec!["echo".to_string()],
                args: vec!["hi".to_string()],
                env: Map::new(),
            }),
            dag: None,
            daemon,
        }
    }

    fn node() -> NodeStatus {
        NodeStatus {
            id: "main".to_string(),
            name: "main".to_string(),
            display_name: "main".to_string(),
            template_name: "main".to_string(),
            node_type: NodeType::Pod,
            phase: wfctl_types::NodePhase::Pending,
            ..Default::default()
        }
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            executor_image: "executor:v1".to_string(),
            artifact_repository: serde_json::Value::Null,
            namespace: String::new(),
            match_labels: Map::new(),
            instance_id: None,
        }
    }

    #[test]
    fn rendered_pod_has_init_main_and_wait_containers() {
        let workflow = workflow_with_node(template(false), node());
        let pod = pod_resource(&workflow, "main", &config()).expect("pod renders");
        let spec = pod.spec.unwrap();
        assert_eq!(spec.init_containers.as_ref().unwrap()[0].name, "init");
        assert_eq!(spec.containers[0].name, "main");
        assert_eq!(spec.containers[1].name, "wait");
        assert_eq!(spec.init_containers.as_ref().unwrap()[0].image.as_deref(), Some("executor:v1"));
    }

    #[test]
    fn rendered_pod_carries_workflow_back_reference_label() {
        let workflow = workflow_with_node(template(false), node());
        let pod = pod_resource(&workflow, "main", &config()).unwrap();
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels.get(annotations::LABEL_WORKFLOW), Some(&"demo".to_string()));
        assert_eq!(labels.get(annotations::LABEL_COMPLETED), Some(&"false".to_string()));
    }

    #[test]
    fn missing_template_is_rejected() {
        let workflow = workflow_with_node(template(false), node());
        let err = pod_resource(&workflow, "nonexistent", &config());
        assert!(err.is_err());
    }
}
