use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use wfctl_common::annotations;
use wfctl_types::{NodeStatus, Workflow};

use crate::util::patch::patch_status;
use crate::util::{Error, MANAGER_NAME};

/// Labels the pod `completed=true` — the at-most-once signal that lets the
/// watch filter stop delivering it. A 404 here means the pod is
/// already gone, which is as good as labelled.
pub async fn label_completed(client: Client, namespace: &str, name: &str) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let patch = json!({
        "metadata": {
            "labels": {
                annotations::LABEL_COMPLETED: "true",
            }
        }
    });
    match api.patch(name, &PatchParams::apply(MANAGER_NAME), &Patch::Merge(patch)).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Writes the mutated node back into the workflow's status, read-modify-write
/// against the `workflow` the caller last observed.
pub async fn persist_node(client: Client, workflow: &Workflow, node_id: &str, node: NodeStatus) -> Result<Workflow, Error> {
    let node_id = node_id.to_string();
    patch_status(client, workflow, move |status| {
        status.nodes.insert(node_id.clone(), node);
    })
    .await
    .map_err(Error::from)
}
