use k8s_openapi::{
    api::core::v1::{Event, Node, ObjectReference, Secret},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    api::{Api, PostParams},
    error::ErrorResponse,
    runtime::controller::Action,
    Client,
};
use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub mod config_file;
pub mod labeler;
pub mod node_config;
pub mod ownership;
pub mod tainter;
pub mod taints;
pub mod validation;

use node_config::NodeConfig;

const SERVICE_NAME: &str = "k3os-node-sync";
/// Annotation tracking the label keys this operator added to the node.
pub const ADDED_LABELS_ANNOTATION: &str = "k3os-node-sync.example.com/labels-added";
/// Annotation tracking the string forms of taints this operator added.
pub const ADDED_TAINTS_ANNOTATION: &str = "k3os-node-sync.example.com/taints-added";
pub const ANNOTATION_VALUE_SEPARATOR: &str = ",";
/// Delta value marking a label that was deleted rather than written.
pub const REMOVED_LABEL_MARKER: &str = "(removed)";
/// Config blobs live in one secret labeled for this operator.
pub const CONFIG_SECRET_LABEL_SELECTOR: &str = "app.kubernetes.io/managed-by=k3os-node-sync";
const DEFAULT_SECRET_NAME: &str = "k3os-node-configs";
const REQUEUE_TIME: Duration = Duration::from_secs(2);
const MAX_RETRY_TIME: Duration = Duration::from_secs(3600);

lazy_static! {
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();
    static ref NODES_SYNCED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("nodes_synced_total", "Total number of node sync passes"),
        &["outcome"]
    )
    .unwrap();
    static ref LABEL_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("label_updates_total", "Total number of label updates applied"),
        &["node"]
    )
    .unwrap();
    static ref TAINT_UPDATES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("taint_updates_total", "Total number of taint updates applied"),
        &["node", "action"]
    )
    .unwrap();
    static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("errors_total", "Total number of errors"),
        &["kind", "reason"]
    )
    .unwrap();
}

/// Initialize Prometheus metrics
pub fn init_metrics() {
    PROMETHEUS_REGISTRY
        .register(Box::new(NODES_SYNCED_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(LABEL_UPDATES_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(TAINT_UPDATES_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .ok();
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to get node name: {0:?}")]
    MissingNodeName(Box<Node>),
    #[error("Required environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("No config entry for node '{node}' in secret (entries: {available:?})")]
    MissingNodeConfig { node: String, available: Vec<String> },
    #[error("Node config data is empty")]
    EmptyNodeConfig,
    #[error("invalid taint spec: {0}")]
    InvalidTaintSpec(String),
    #[error("invalid taint effect: {0}, unsupported taint effect")]
    InvalidTaintEffect(String),
    #[error("duplicated taints with the same key and effect: {0}")]
    DuplicateTaint(String),
    #[error("taint {0:?} not found")]
    TaintNotFound(String),
    #[error("Unparseable taint {0:?} in ownership annotation")]
    InvalidOwnedTaint(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("Failed to parse node config: {0}")]
    NodeConfig(#[from] serde_yaml::Error),
    #[error("Config file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Delta report of one reconciliation pass: what changed on the node.
pub type Delta = BTreeMap<String, String>;

/// Result of reconciling one attribute family on a node snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The node already agrees with the desired state; nothing to persist.
    Unchanged,
    /// The snapshot was mutated and must be persisted. For labels the delta
    /// maps key to new value or [`REMOVED_LABEL_MARKER`]; for taints it maps
    /// the taint's string form to "added", "changed" or "removed".
    Updated(Delta),
}

/// Passed to the reconciler
pub struct Context {
    client: Client,
    /// Name of the node this instance manages, from the downward API.
    pub node_name: String,
    pub secret_namespace: String,
    pub secret_name: String,
    sync_labels: bool,
    sync_taints: bool,
    config_file_path: Option<PathBuf>,
    attempt: AtomicU32,
}

impl Context {
    /// Create a new Context from the environment. `NODE_NAME` must be set;
    /// everything else has defaults.
    pub fn new(client: Client) -> Result<Self> {
        let node_name =
            std::env::var("NODE_NAME").map_err(|_| Error::MissingEnv("NODE_NAME"))?;
        let secret_namespace =
            std::env::var("SECRET_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let secret_name =
            std::env::var("SECRET_NAME").unwrap_or_else(|_| DEFAULT_SECRET_NAME.to_string());
        let sync_labels = std::env::var("SYNC_NODE_LABELS")
            .map(|v| v != "false")
            .unwrap_or(true);
        let sync_taints = std::env::var("SYNC_NODE_TAINTS")
            .map(|v| v != "false")
            .unwrap_or(true);
        let config_file_path = std::env::var("NODE_CONFIG_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        init_metrics();

        Ok(Self {
            client,
            node_name,
            secret_namespace,
            secret_name,
            sync_labels,
            sync_taints,
            config_file_path,
            attempt: AtomicU32::new(0),
        })
    }

    fn secret_api(&self) -> Api<Secret> {
        Api::<Secret>::namespaced(self.client.clone(), &self.secret_namespace)
    }
}

/// Action to take on Node and config secret events
pub async fn reconcile(node: Arc<Node>, ctx: Arc<Context>) -> Result<Action> {
    let node_name = node
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::MissingNodeName(Box::new(node.as_ref().clone())))?
        .to_string();
    debug!("Reconciling node '{}'", node_name);

    let secret = match ctx.secret_api().get(&ctx.secret_name).await {
        Ok(secret) => secret,
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
            debug!(
                "Config secret '{}' not found, nothing to sync for node '{}'",
                ctx.secret_name, node_name
            );
            return Ok(Action::await_change());
        }
        Err(e) => {
            ERRORS_TOTAL
                .with_label_values(&["secret", "get_error"])
                .inc();
            return Err(Error::Kube(e));
        }
    };

    let data = secret.data.unwrap_or_default();
    let blob = data.get(&node_name).ok_or_else(|| {
        ERRORS_TOTAL
            .with_label_values(&["secret", "missing_entry"])
            .inc();
        Error::MissingNodeConfig {
            node: node_name.clone(),
            available: data.keys().cloned().collect(),
        }
    })?;
    let config = NodeConfig::parse(&blob.0)?;

    let mut updated = node.as_ref().clone();
    let mut applied: Vec<String> = Vec::new();

    if ctx.sync_labels {
        if let Outcome::Updated(delta) = labeler::reconcile(&mut updated, &config.k3os.labels) {
            LABEL_UPDATES_TOTAL
                .with_label_values(&[&node_name])
                .inc_by(delta.len() as u64);
            applied.push(format!("labels: {}", render_delta(&delta)));
        }
    }

    if ctx.sync_taints {
        match tainter::reconcile(&mut updated, &config.k3os.taints) {
            Ok(Outcome::Updated(delta)) => {
                for action in delta.values() {
                    TAINT_UPDATES_TOTAL
                        .with_label_values(&[&node_name, action])
                        .inc();
                }
                applied.push(format!("taints: {}", render_delta(&delta)));
            }
            Ok(Outcome::Unchanged) => {}
            Err(e) => {
                ERRORS_TOTAL
                    .with_label_values(&["taints", "reconcile_error"])
                    .inc();
                return Err(e);
            }
        }
    }

    if applied.is_empty() {
        debug!("Node '{}' already matches its config", node_name);
        NODES_SYNCED_TOTAL.with_label_values(&["unchanged"]).inc();
    } else {
        let node_api: Api<Node> = Api::all(ctx.client.clone());
        node_api
            .replace(&node_name, &PostParams::default(), &updated)
            .await
            .map_err(|e| {
                ERRORS_TOTAL
                    .with_label_values(&["node", "update_error"])
                    .inc();
                Error::Kube(e)
            })?;
        NODES_SYNCED_TOTAL.with_label_values(&["updated"]).inc();

        let message = format!("Applied node config: {}", applied.join("; "));
        emit_event(&ctx, &node_name, "NodeConfigApplied", &message, "Normal").await;
        info!("Node '{}': {}", node_name, message);
    }

    if let Some(path) = &ctx.config_file_path {
        match config_file::write_if_changed(path, &config.data) {
            Ok(true) => info!(
                "Node '{}': rewrote config file {}",
                node_name,
                path.display()
            ),
            Ok(false) => {}
            Err(e) => {
                ERRORS_TOTAL
                    .with_label_values(&["config_file", "write_error"])
                    .inc();
                return Err(e);
            }
        }
    }

    Ok(Action::await_change())
}

/// Render a delta for events and logs, truncated past 5 entries.
fn render_delta(delta: &Delta) -> String {
    if delta.len() <= 5 {
        serde_json::to_string(delta).unwrap_or_else(|_| format!("{:?}", delta))
    } else {
        let keys: Vec<&str> = delta.keys().take(5).map(String::as_str).collect();
        format!(
            "{} updates: {} ... (truncated)",
            delta.len(),
            keys.join(", ")
        )
    }
}

/// Emit a Kubernetes Event
async fn emit_event(ctx: &Context, node_name: &str, reason: &str, message: &str, event_type: &str) {
    let events_api: Api<Event> = Api::namespaced(ctx.client.clone(), &ctx.secret_namespace);
    let now = SystemTime::now();
    let timestamp = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let event_name = format!("{}.{}", node_name, timestamp);

    let event = Event {
        metadata: ObjectMeta {
            name: Some(event_name),
            namespace: Some(ctx.secret_namespace.clone()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(node_name.to_string()),
            ..Default::default()
        },
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        type_: Some(event_type.to_string()),
        action: Some("Reconcile".to_string()),
        reporting_component: Some(SERVICE_NAME.to_string()),
        reporting_instance: Some(
            std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        ),
        ..Default::default()
    };

    if let Err(e) = events_api.create(&PostParams::default(), &event).await {
        warn!("Failed to create event: {:?}", e);
    }
}

/// Exponential backoff on error
pub fn error_policy(_node: Arc<Node>, error: &Error, ctx: Arc<Context>) -> Action {
    error!("Reconciliation failed: {:?}", error);
    let attempt = ctx.attempt.fetch_add(1, Ordering::SeqCst) + 1;
    let base_secs = REQUEUE_TIME.as_secs();
    let max_secs = MAX_RETRY_TIME.as_secs();
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let delay_s = base_secs.saturating_mul(factor).min(max_secs);
    Action::requeue(Duration::from_secs(delay_s))
}
