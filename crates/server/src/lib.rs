//! Local HTTP control-plane surface.
//!
//! Thin endpoints over the profiler, install engine, devops cache and
//! audit trail. JSON request bodies; responses are JSON or
//! line-delimited event streams. The server trusts its local operator:
//! there is no authentication layer.

pub mod error;
pub mod handlers;
pub mod pool;
pub mod stream;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use opsdeck_engine::{ExecutionEvent, HostProbe, InstallEngine, Resolver, SystemProbe};
use opsdeck_profile::ProfileService;
use opsdeck_recipes::{load_registry, RecipeRegistry};
use opsdeck_state::{audit_path, cache_path, AuditWriter, DevopsCache};

pub use error::ApiError;
pub use pool::ExecutorPool;

/// Terminal events retained for reconnecting clients.
const COMPLETION_RETENTION: usize = 256;

/// Server state shared across handlers.
pub struct AppState {
    /// Cached host profile service.
    pub profiles: ProfileService,
    /// The install engine.
    pub engine: InstallEngine,
    /// Host probe shared with the engine.
    pub probe: Arc<dyn HostProbe>,
    /// Devops cache.
    pub cache: DevopsCache,
    /// Audit trail.
    pub audit: AuditWriter,
    /// Bounded plan-execution pool.
    pub pool: ExecutorPool,
    completions: Mutex<CompletionStore>,
}

#[derive(Default)]
struct CompletionStore {
    events: HashMap<String, ExecutionEvent>,
    order: VecDeque<String>,
}

impl AppState {
    /// Wire the full state for a project root, probing the live host.
    pub fn new(project_root: &Path, catalog_dir: Option<&Path>) -> Result<Arc<Self>> {
        let registry = Arc::new(load_registry(catalog_dir)?);
        let probe: Arc<dyn HostProbe> = Arc::new(SystemProbe);
        Ok(Self::with_parts(
            project_root,
            registry,
            probe,
            ExecutorPool::default(),
        ))
    }

    /// Wire state from explicit parts. Tests inject a scripted probe and
    /// a custom registry here.
    #[must_use]
    pub fn with_parts(
        project_root: &Path,
        registry: Arc<RecipeRegistry>,
        probe: Arc<dyn HostProbe>,
        pool: ExecutorPool,
    ) -> Arc<Self> {
        let resolver = Arc::new(Resolver::new(registry, Arc::clone(&probe)));
        let engine = InstallEngine::new(resolver, Arc::clone(&probe));

        let ttls = std::collections::BTreeMap::from([(
            handlers::TOOLS_STATUS_CARD.to_string(),
            Duration::from_secs(15),
        )]);

        Arc::new(Self {
            profiles: ProfileService::default(),
            engine,
            probe,
            cache: DevopsCache::open(&cache_path(project_root), ttls),
            audit: AuditWriter::new(&audit_path(project_root)),
            pool,
            completions: Mutex::new(CompletionStore::default()),
        })
    }

    /// Retain a terminal event for later replay.
    pub async fn store_completion(&self, plan_id: &str, event: ExecutionEvent) {
        let mut store = self.completions.lock().await;
        if store.events.insert(plan_id.to_string(), event).is_none() {
            store.order.push_back(plan_id.to_string());
            if store.order.len() > COMPLETION_RETENTION {
                if let Some(evicted) = store.order.pop_front() {
                    store.events.remove(&evicted);
                }
            }
        }
    }

    /// Fetch a retained terminal event.
    pub async fn completion(&self, plan_id: &str) -> Option<ExecutionEvent> {
        self.completions.lock().await.events.get(plan_id).cloned()
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/system-profile", get(handlers::system_profile))
        .route("/audit/install-plan", post(handlers::install_plan))
        .route("/audit/install-plan/execute", post(handlers::execute_plan))
        .route("/audit/remediate", post(handlers::remediate))
        .route("/audit/check-deps", post(handlers::check_deps))
        .route("/tools/status", get(handlers::tools_status))
        .route("/devops/cache/{card}", get(handlers::cache_get))
        .route("/devops/cache/bust", post(handlers::cache_bust))
        .route("/audit/activity", get(handlers::activity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until ctrl-c.
pub async fn run_server(state: Arc<AppState>, addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("opsdeck control plane listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining");
        })
        .await?;

    Ok(())
}
