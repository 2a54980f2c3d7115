use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use keel_core::params::{self, ParameterValue};
use keel_core::{
    kind, Action, ActionContext, EventKind, Gvk, Handler, Hook, ObjectRef, RawObject, ResourceKind,
};
use keel_engine::{spawn, KindRegistry, PipelineRegistry, ReconcileRequest, Reconciler};
use keel_store::{BackingStore, LabelSelector, MemStore};
use keel_status::{Aggregator, CompositeStatus, StatusFns};
use serde_json::json;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel reconciliation engine CLI")]
struct Cli {
    /// Kubernetes-style namespace the demo operates in
    #[arg(long = "ns", global = true, default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum StoreBackend {
    /// In-RAM store (self-contained)
    Mem,
    /// Live cluster via kubeconfig (requires the Keel CRDs to be served)
    Kube,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one end-to-end reconcile for a sample application configuration
    Demo {
        #[arg(long = "store", value_enum, default_value_t = StoreBackend::Mem)]
        store: StoreBackend,
    },
    /// Compute the readiness of a single object read from a JSON file
    Status {
        /// Path to a JSON-encoded API object
        #[arg(short = 'f', long = "file")]
        file: String,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn queue_cap() -> usize {
    std::env::var("KEEL_QUEUE_CAP")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(16)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Demo { store } => run_demo(&cli.namespace, store).await,
        Commands::Status { file } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file))?;
            let obj = RawObject::from_value(serde_json::from_str(&raw).context("parsing object")?);
            let state = StatusFns::new().status_of(&obj);
            println!("{} {}: {}", obj.kind().unwrap_or("?"), obj.object_ref(), state);
            Ok(())
        }
    }
}

/// Owner label stamped onto every child the demo handler stages.
const OWNER_LABEL: &str = "app.keel.dev/owner";

/// Pre-hook logging what the pipeline is about to see.
struct AuditHook;

#[async_trait::async_trait]
impl Hook for AuditHook {
    fn id(&self) -> &str {
        "audit"
    }

    async fn on_event(
        &self,
        cx: &mut ActionContext,
        obj: &RawObject,
        event: EventKind,
    ) -> Result<()> {
        info!(obj = %obj.object_ref(), ?event, "reconciling application configuration");
        cx.set_value("audited", true);
        Ok(())
    }
}

/// Handler turning each component of an ApplicationConfiguration into a
/// Deployment create.
struct WorkloadHandler;

#[async_trait::async_trait]
impl Handler for WorkloadHandler {
    fn id(&self) -> &str {
        "workload-handler"
    }

    async fn handle(
        &self,
        cx: &mut ActionContext,
        obj: &RawObject,
        event: EventKind,
    ) -> Result<()> {
        let components = obj
            .as_value()
            .pointer("/spec/components")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for comp in &components {
            let instance = comp
                .get("instanceName")
                .and_then(|v| v.as_str())
                .context("component missing instanceName")?;
            let params: Vec<ParameterValue> = comp
                .get("parameterValues")
                .map(|v| serde_json::from_value(v.clone()))
                .transpose()
                .context("parsing parameterValues")?
                .unwrap_or_default();
            let child = deployment_for(obj, instance, &params)?;
            match event {
                EventKind::CreateOrUpdate => cx.add(Action::create(child)),
                EventKind::Delete => cx.add(Action::delete(child)),
            }
        }
        debug!(staged = cx.staged(), "workload handler staged actions");
        Ok(())
    }
}

fn deployment_for(owner: &RawObject, instance: &str, params: &[ParameterValue]) -> Result<RawObject> {
    let replicas: i64 = params
        .iter()
        .find(|p| p.name == "replicaCount")
        .and_then(|p| p.value.parse().ok())
        .unwrap_or(1);
    let template = json!({
        "image": "${image}",
        "app": instance,
    });
    let props = params::extract_params(params, &template)?;
    let image = props
        .get("image")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("nginx:stable");

    Ok(RawObject::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": instance,
            "namespace": owner.namespace().unwrap_or("default"),
            "labels": { OWNER_LABEL: owner.name(), "app": instance },
        },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": { "app": instance } },
            "template": {
                "metadata": { "labels": { "app": instance } },
                "spec": { "containers": [ { "name": instance, "image": image } ] },
            },
        },
    })))
}

fn sample_app_config(namespace: &str) -> RawObject {
    RawObject::from_value(json!({
        "apiVersion": "core.keel.dev/v1alpha1",
        "kind": "ApplicationConfiguration",
        "metadata": { "name": "demo-app", "namespace": namespace },
        "spec": {
            "components": [
                {
                    "componentName": "web-server",
                    "instanceName": "demo-web",
                    "parameterValues": [
                        { "name": "replicaCount", "value": "2" },
                        { "name": "image", "value": "nginx:1.25" },
                    ],
                },
                { "componentName": "worker", "instanceName": "demo-worker" },
            ],
        },
    }))
}

async fn run_demo(namespace: &str, backend: StoreBackend) -> Result<()> {
    let store: Arc<dyn BackingStore> = match backend {
        StoreBackend::Mem => Arc::new(MemStore::new()),
        StoreBackend::Kube => Arc::new(keel_kubehub::KubeStore::connect().await?),
    };

    let kinds = Arc::new(KindRegistry::with_builtin_kinds());
    let pipelines = Arc::new(PipelineRegistry::new());
    let app_kind = ResourceKind::from(kind::APPLICATION_CONFIGURATION);
    pipelines.register_pre_hooks(&app_kind, [Arc::new(AuditHook) as Arc<dyn Hook>]);
    pipelines.register_handlers(&app_kind, [Arc::new(WorkloadHandler) as Arc<dyn Handler>]);

    let app = sample_app_config(namespace);
    store.create(&app).await?;

    let reconciler = Reconciler::new(app_kind, kinds, pipelines, store.clone());
    let (tx, worker) = spawn(reconciler, queue_cap());

    let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
    tx.send(ReconcileRequest {
        key: ObjectRef::namespaced(namespace, "demo-app"),
        reply: Some(reply_tx),
    })
    .await
    .context("worker unavailable")?;
    let outcome = reply_rx.await.context("worker dropped the request")??;
    info!(?outcome, "reconcile finished");

    // Roll the children the handler created into a composite status.
    let children = store
        .list(
            &Gvk::new("apps", "v1", "Deployment"),
            Some(namespace),
            &LabelSelector::new().eq(OWNER_LABEL, "demo-app"),
        )
        .await?;

    let aggregator = Aggregator::new(Arc::new(StatusFns::new()));
    let mut status = CompositeStatus::default();
    aggregator.aggregate(&mut status, &children, None);
    println!("{}", serde_json::to_string_pretty(&status)?);

    drop(tx);
    worker.await.context("worker task failed")?;
    Ok(())
}
