use owo_colors::OwoColorize;
use rustls::{ClientConfig, RootCertStore, pki_types::CertificateDer};

pub mod shutdown;

pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

/// Label and annotation keys that make up the wire contract between the
/// controller and the executor sidecar. These must not change independently
/// of one another; pods already running reference them by exact string.
pub mod annotations {
    pub const LABEL_WORKFLOW: &str = "workflows.argoproj.io/workflow";
    pub const LABEL_COMPLETED: &str = "workflows.argoproj.io/completed";
    pub const LABEL_CONTROLLER_INSTANCEID: &str = "workflows.argoproj.io/controller-instanceid";

    pub const ANNOTATION_TEMPLATE: &str = "workflows.argoproj.io/template";
    pub const ANNOTATION_OUTPUTS: &str = "workflows.argoproj.io/outputs";
    pub const ANNOTATION_NODE_MESSAGE: &str = "workflows.argoproj.io/node-message";

    pub const CREATED_BY: &str = "workflows.argoproj.io/created-by";
    pub const SPEC_HASH: &str = "workflows.argoproj.io/pod-spec-hash";
}

/// Default namespace and ConfigMap name the controller resolves its own
/// configuration from when the environment does not override them.
pub const DEFAULT_NAMESPACE: &str = "argo";
pub const DEFAULT_CONFIGMAP_NAME: &str = "workflow-controller-configmap";
pub const NAMESPACE_ENV_VAR: &str = "NAMESPACE";
pub const CONFIGMAP_ENV_VAR: &str = "CONFIGMAP_NAME";

pub fn controller_namespace() -> String {
    std::env::var(NAMESPACE_ENV_VAR).unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string())
}

pub fn configmap_name() -> String {
    std::env::var(CONFIGMAP_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIGMAP_NAME.to_string())
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    install_rustls_provider();
}

pub fn install_rustls_provider() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install aws-lc-rs provider");
}

/// Builds a rustls `ClientConfig` trusting the platform roots plus any extra
/// certificates supplied by the caller. Kept around because the cluster
/// client's TLS stack and any artifact-repository endpoint the operator
/// talks to both need a configured root store.
pub fn make_rustls(certs: Vec<CertificateDer<'_>>) -> anyhow::Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().expect("could not load platform certs") {
        roots.add(cert).unwrap();
    }
    for cert in certs {
        roots.add(cert)?;
    }
    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

pub mod print {
    use super::*;

    pub fn warning(msg: impl std::fmt::Display) {
        eprintln!("{}", format!("⚠️  {msg}").yellow());
    }

    pub fn error(msg: impl std::fmt::Display) {
        eprintln!("{}", format!("❌ {msg}").red());
    }
}
