mod args;
mod cache;
mod config;
mod dispatch;
mod pods;
mod sources;
mod stats;
mod util;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use args::Cli;
use cache::CompletedPodCache;
use config::ConfigStore;
use util::metrics::{ControllerMetrics, run_metrics_server};

const LEASE_NAME: &str = "workflow-controller-lock";
const LEASE_TTL: Duration = Duration::from_secs(15);
const RENEW_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wfctl_common::init();
    let cli = Cli::parse();

    println!("{}", "⚙️  Starting workflow controller...".green());

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(err) => {
            eprintln!(
                "{}",
                format!("fatal: could not construct Kubernetes client: {err}").red()
            );
            std::process::exit(1);
        }
    };

    let namespace = cli.namespace.unwrap_or_else(wfctl_common::controller_namespace);
    let configmap_name = cli.configmap_name.unwrap_or_else(wfctl_common::configmap_name);

    let config_store = Arc::new(ConfigStore::new());
    let cache = Arc::new(CompletedPodCache::new());
    let metrics = Arc::new(ControllerMetrics::new());

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("workflow-controller-{}", uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &namespace,
        LeaseLockParams {
            holder_id,
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: LEASE_TTL,
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        wfctl_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    {
        let metrics = metrics.clone();
        let addr = cli.metrics_addr;
        tokio::spawn(async move {
            if let Err(err) = run_metrics_server(addr, metrics).await {
                eprintln!("metrics server exited: {err}");
            }
        });
    }

    wfctl_common::signal_ready();
    println!("{}", "🌱 workflow controller ready; awaiting leadership".green());

    // Only the leader runs the controller; standbys hold the lease and take
    // over on the holder's failure. This is ambient HA infrastructure and
    // does not change any per-event guarantee the dispatch loop provides.
    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(RENEW_EVERY);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(());
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(lease) => lease,
            Err(err) => {
                eprintln!("leader election renew/acquire failed: {err}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted controller due to leader election error");
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 acquired leadership; starting controller".green());
                controller_task = Some(tokio::spawn(run_controller(
                    client.clone(),
                    namespace.clone(),
                    configmap_name.clone(),
                    config_store.clone(),
                    cache.clone(),
                    metrics.clone(),
                )));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

/// Runs the event sources, the completed-pod cache's expiry sweep, and the
/// dispatch loop for as long as this process holds the leader lease.
async fn run_controller(
    client: Client,
    namespace: String,
    configmap_name: String,
    config_store: Arc<ConfigStore>,
    cache: Arc<CompletedPodCache>,
    metrics: Arc<ControllerMetrics>,
) {
    let (workflow_tx, workflow_rx) = mpsc::channel(sources::WORKFLOW_QUEUE_CAPACITY);
    let (pod_tx, pod_rx) = mpsc::channel(sources::POD_QUEUE_CAPACITY);

    let config_task = tokio::spawn(sources::run_config_source(
        client.clone(),
        namespace.clone(),
        configmap_name,
        config_store.clone(),
    ));
    let expiry_task = tokio::spawn(cache::run_expiry_loop(cache.clone()));
    let stats_task = tokio::spawn(stats::run(metrics.clone()));

    // matchLabels/instanceId/namespace come from the Config Store, so the
    // workflow and pod watches wait for the first successful config resolve
    // before they start — starting them with an empty selector would mean
    // briefly watching every workflow and pod cluster-wide.
    let (watch_namespace, match_labels) = loop {
        if let Some(cfg) = config_store.load() {
            break (cfg.namespace.clone(), cfg.selector_labels());
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    };

    let workflow_task = tokio::spawn(sources::run_workflow_source(
        client.clone(),
        watch_namespace.clone(),
        match_labels.clone(),
        workflow_tx,
    ));
    let pod_task = tokio::spawn(sources::run_pod_source(
        client.clone(),
        watch_namespace,
        match_labels,
        pod_tx,
    ));

    dispatch::run(client, config_store, cache, metrics, workflow_rx, pod_rx).await;

    config_task.abort();
    expiry_task.abort();
    stats_task.abort();
    workflow_task.abort();
    pod_task.abort();
}
