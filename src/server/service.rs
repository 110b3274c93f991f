//! Protocol server setup and RPC handlers.
//!
//! # Responsibilities
//! - Create the axum Router with the capabilities/get/set/subscribe routes
//! - Wire up middleware (tracing, request timeout)
//! - Apply the concurrency contract: Get under the read lock, Set under
//!   the write lock, lock released before any downstream call
//! - Hand mutated snapshots to the synchronizer

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AdapterConfig;
use crate::observability::metrics;
use crate::server::collector::{collect, DataType};
use crate::server::error::ProtocolError;
use crate::server::subscribe::{subscribe_handler, SubscriptionRegistry};
use crate::sync::{SyncKind, Synchronizer};
use crate::tree::value::now_nanos;
use crate::tree::{store, Notification, Path, TreeStore, TypedValue};

/// Wire encodings for serialized sub-trees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Encoding {
    #[default]
    Json,
    JsonIetf,
    Proto,
    Ascii,
    Bytes,
}

impl Encoding {
    fn supported(&self) -> bool {
        matches!(self, Encoding::Json | Encoding::JsonIetf)
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TreeStore>,
    pub synchronizer: Arc<Synchronizer>,
    pub registry: Arc<SubscriptionRegistry>,
    pub sample_floor: Duration,
    pub queue_depth: usize,
}

/// The protocol server.
pub struct ProtocolServer {
    router: Router,
    config: AdapterConfig,
}

impl ProtocolServer {
    /// Create a new server over a tree store and synchronizer.
    pub fn new(
        config: AdapterConfig,
        store: Arc<TreeStore>,
        synchronizer: Arc<Synchronizer>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let state = AppState {
            store,
            synchronizer,
            registry,
            sample_floor: Duration::from_secs(config.subscribe.sample_floor_secs),
            queue_depth: config.subscribe.queue_depth,
        };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the axum router with all middleware layers.
    fn build_router(config: &AdapterConfig, state: AppState) -> Router {
        Router::new()
            .route("/capabilities", get(capabilities_handler))
            .route("/get", post(get_handler))
            .route("/set", post(set_handler))
            .route("/subscribe", get(subscribe_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "protocol server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("protocol server stopped");
        Ok(())
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// The router, for serving on a caller-owned listener in tests.
    pub fn into_router(self) -> Router {
        self.router
    }
}

#[derive(Serialize)]
pub struct CapabilitiesResponse {
    pub supported_models: Vec<crate::sync::ModelInfo>,
    pub supported_encodings: Vec<Encoding>,
    pub version: &'static str,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct GetRequest {
    pub target: String,
    pub prefix: String,
    pub paths: Vec<String>,
    pub data_type: DataType,
    pub encoding: Encoding,
    pub use_models: Vec<String>,
}

impl Default for GetRequest {
    fn default() -> Self {
        Self {
            target: String::new(),
            prefix: String::new(),
            paths: Vec::new(),
            data_type: DataType::All,
            encoding: Encoding::Json,
            use_models: Vec::new(),
        }
    }
}

#[derive(Serialize)]
pub struct GetResponse {
    pub notification: Vec<Notification>,
}

#[derive(Deserialize)]
pub struct UpdateRequest {
    pub path: String,
    pub value: TypedValue,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct SetRequest {
    pub target: String,
    pub prefix: String,
    pub updates: Vec<UpdateRequest>,
    pub deletes: Vec<String>,
    /// Request a Forced synchronization (full cache invalidation).
    pub forced: bool,
}

impl Default for SetRequest {
    fn default() -> Self {
        Self {
            target: String::new(),
            prefix: String::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            forced: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    Update,
    Delete,
}

#[derive(Serialize)]
pub struct OpResult {
    pub path: String,
    pub op: OpType,
}

#[derive(Serialize)]
pub struct SetResponse {
    pub results: Vec<OpResult>,
    pub timestamp: u64,
}

/// Static list of supported models and encodings. No I/O.
async fn capabilities_handler(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        supported_models: state.synchronizer.get_models(),
        supported_encodings: vec![Encoding::Json, Encoding::JsonIetf],
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Point and subtree reads under the read lock.
async fn get_handler(
    State(state): State<AppState>,
    Json(req): Json<GetRequest>,
) -> Result<Json<GetResponse>, ProtocolError> {
    let start = Instant::now();

    if !req.use_models.is_empty() {
        return Err(ProtocolError::Unimplemented(
            "model filtering is not supported".to_string(),
        ));
    }
    if !req.encoding.supported() {
        return Err(ProtocolError::Unimplemented(format!(
            "encoding {:?} is not supported",
            req.encoding
        )));
    }

    let prefix = Path::parse(&req.prefix)?;
    let mut paths = Vec::with_capacity(req.paths.len());
    for raw in &req.paths {
        paths.push(Path::parse(raw)?);
    }

    if req.target.is_empty() && (!prefix.is_root() || paths.iter().any(|p| !p.is_root())) {
        return Err(ProtocolError::InvalidArgument(
            "target must be set for non-root paths".to_string(),
        ));
    }

    let notification = {
        let tree = state.store.read().await;
        collect(&tree, &prefix, &paths, req.data_type)?
    };

    metrics::record_rpc("get", 200, start);
    Ok(Json(GetResponse {
        notification: vec![notification],
    }))
}

/// Tree mutation under the write lock, then synchronization.
///
/// Deletions reconcile synchronously so this RPC returns a definitive
/// result; updates enqueue an asynchronous apply.
async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>, ProtocolError> {
    let start = Instant::now();

    let prefix = Path::parse(&req.prefix)?;
    let mut updates = Vec::with_capacity(req.updates.len());
    for u in &req.updates {
        updates.push((prefix.join(&Path::parse(&u.path)?), u.value.clone()));
    }
    let mut deletes = Vec::with_capacity(req.deletes.len());
    for raw in &req.deletes {
        deletes.push(prefix.join(&Path::parse(raw)?));
    }

    // Mutations are staged on a copy; a failed update commits nothing.
    // The lock is released before any downstream call.
    let snapshot = {
        let mut tree = state.store.write().await;
        let mut staged = tree.clone();
        for (path, value) in &updates {
            store::apply_update(&mut staged, &path.elems, value)
                .map_err(|e| ProtocolError::InvalidArgument(e.to_string()))?;
        }
        for path in &deletes {
            store::apply_delete(&mut staged, &path.elems);
        }
        *tree = staged.clone();
        staged
    };

    for path in &deletes {
        state
            .synchronizer
            .synchronize(&snapshot, SyncKind::Delete, Some(path))
            .await
            .map_err(|e| ProtocolError::Internal(e.to_string()))?;
    }

    // Deletes enqueue an Apply too: a deleted sub-field changes its
    // entity's derived document without removing the entity downstream.
    if !updates.is_empty() || !deletes.is_empty() || req.forced {
        let kind = if req.forced {
            SyncKind::Forced
        } else {
            SyncKind::Apply
        };
        state
            .synchronizer
            .synchronize(&snapshot, kind, None)
            .await
            .map_err(|e| ProtocolError::Internal(e.to_string()))?;
    }

    state.registry.notify_changed(&snapshot);

    let mut results = Vec::new();
    for (path, _) in &updates {
        results.push(OpResult {
            path: path.to_string(),
            op: OpType::Update,
        });
    }
    for path in &deletes {
        results.push(OpResult {
            path: path.to_string(),
            op: OpType::Delete,
        });
    }

    metrics::record_rpc("set", 200, start);
    Ok(Json(SetResponse {
        results,
        timestamp: now_nanos(),
    }))
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install Ctrl+C handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
