use kube::CustomResourceExt;
use std::fs;
use wfctl_types::*;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/argoproj.io_workflow_crd.yaml",
        serde_yaml::to_string(&Workflow::crd()).unwrap(),
    )
    .unwrap();
}
