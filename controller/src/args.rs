use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "wfctl")]
#[command(about = "Reconciles Workflow graphs against pod execution state")]
pub struct Cli {
    /// Namespace the controller's own ConfigMap and leader-election lease
    /// live in. Falls back to `NAMESPACE`/the compiled-in default.
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Name of the ConfigMap the Config Store resolves on startup and
    /// reloads from on every change.
    #[arg(long, env = "CONFIGMAP_NAME")]
    pub configmap_name: Option<String>,

    /// Address the `/healthz`, `/readyz`, and `/metrics` endpoints bind to.
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: std::net::SocketAddr,
}
