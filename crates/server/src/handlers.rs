//! Endpoint handlers.
//!
//! Thin by design: each endpoint maps to at most one core operation and
//! one cache interaction, translates core errors into the JSON envelope,
//! and hands streams off to the stream module.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use opsdeck_engine::{action_for_option, OptionAction};
use opsdeck_recipes::{FailureHandlerDef, RemediationOptionDef, INFRA_HANDLERS};
use opsdeck_state::{new_operation_id, AuditEntry, AuditQuery, Invalidate};

use crate::error::ApiError;
use crate::stream::{execution_response, replay_response};
use crate::AppState;

/// Card holding the tools-status summary.
pub const TOOLS_STATUS_CARD: &str = "tools:status";

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub tool: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Tool to resolve and execute.
    #[serde(default)]
    pub tool: Option<String>,
    /// Re-observe the terminal event of a finished execution.
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Operator sudo password; piped to privileged steps, never logged.
    #[serde(default)]
    pub sudo_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemediateRequest {
    pub tool: String,
    pub failure_id: String,
    pub option_id: String,
    /// Chain to stitch this attempt onto.
    #[serde(default)]
    pub chain_id: Option<String>,
    /// Operator sudo password; piped to privileged steps, never logged.
    #[serde(default)]
    pub sudo_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckDepsRequest {
    pub packages: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckDepsResponse {
    pub installed: Vec<String>,
    pub missing: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ToolStatus {
    pub id: String,
    pub label: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct ToolsStatusResponse {
    pub tools: Vec<ToolStatus>,
    pub available: usize,
    pub missing_count: usize,
}

#[derive(Debug, Serialize)]
pub struct CacheCardResponse {
    pub value: serde_json::Value,
    pub captured_at: chrono::DateTime<chrono::Utc>,
    pub generation: u64,
    pub stale: bool,
}

#[derive(Debug, Deserialize)]
pub struct BustRequest {
    /// Card to invalidate; everything when absent.
    #[serde(default)]
    pub card: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BustResponse {
    pub ok: bool,
    pub generation: u64,
}

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check handler.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current system profile.
pub async fn system_profile(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let profile = state.profiles.get().await;
    Json((*profile).clone())
}

/// Resolve an install plan.
pub async fn install_plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlanRequest>,
) -> Result<Response, ApiError> {
    let profile = state.profiles.get().await;
    let plan = state
        .engine
        .resolver()
        .resolve(&request.tool, &profile)
        .await?;

    let operation_id = new_operation_id();
    let mut entry = AuditEntry::new(
        &format!("install:{}", request.tool),
        "plan",
        &request.tool,
        &operation_id,
    );
    entry.after_state = Some(serde_json::json!({
        "steps": plan.steps.len(),
        "already_installed": plan.already_installed,
    }));
    state.audit.record(&entry).await;

    Ok(Json(plan).into_response())
}

/// Execute a freshly resolved plan, or replay a terminal event.
pub async fn execute_plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Response, ApiError> {
    if let Some(plan_id) = &request.plan_id {
        let event = state
            .completion(plan_id)
            .await
            .ok_or_else(|| ApiError::not_found("execution", format!("no terminal event for plan '{plan_id}'")))?;
        return Ok(replay_response(&event));
    }

    let Some(tool) = request.tool.as_deref() else {
        return Err(ApiError::bad_request(
            "usage",
            "either 'tool' or 'plan_id' is required",
        ));
    };

    let profile = state.profiles.get().await;
    let plan = state.engine.resolver().resolve(tool, &profile).await?;

    let Some(permit) = state.pool.acquire().await else {
        return Err(ApiError::saturated());
    };

    let operation_id = new_operation_id();
    let mut entry = AuditEntry::new(&format!("install:{tool}"), "execute", tool, &operation_id);
    entry.before_state = Some(serde_json::json!({
        "steps": plan.steps.len(),
        "needs_sudo": plan.needs_sudo_overall,
    }));
    state.audit.record(&entry).await;
    record_post_env(&state, tool, &plan, &operation_id).await;

    info!("executing install plan for '{tool}' ({} steps)", plan.steps.len());
    let handle = state
        .engine
        .execute(plan, profile, request.sudo_secret.clone(), None);
    Ok(execution_response(
        state,
        handle,
        Some(permit),
        operation_id,
        tool.to_string(),
    ))
}

/// Execute a remediation option chosen by the operator.
pub async fn remediate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemediateRequest>,
) -> Result<Response, ApiError> {
    let handler = find_handler(&state, &request.tool, &request.failure_id).ok_or_else(|| {
        ApiError::not_found(
            "remediation",
            format!(
                "no failure '{}' known for '{}'",
                request.failure_id, request.tool
            ),
        )
    })?;
    let option = find_option(&handler, &request.option_id).ok_or_else(|| {
        ApiError::not_found(
            "remediation",
            format!(
                "failure '{}' has no option '{}'",
                request.failure_id, request.option_id
            ),
        )
    })?;

    let (exec_tool, overrides) = match action_for_option(&request.tool, &option) {
        OptionAction::Manual { instructions } => {
            return Err(ApiError::bad_request(
                "remediation",
                format!("option '{}' is manual: {instructions}", request.option_id),
            ));
        }
        OptionAction::Execute { tool_id, overrides } => (tool_id, overrides),
    };

    let profile = state.profiles.get().await;
    let plan = state
        .engine
        .resolver()
        .resolve_with(&exec_tool, &profile, &overrides)
        .await?;

    let Some(permit) = state.pool.acquire().await else {
        return Err(ApiError::saturated());
    };

    // Stitch the attempt onto the operator's chain when one is running.
    let chain_id = request.chain_id.as_deref().map(|cid| {
        state
            .engine
            .chains()
            .begin_attempt(cid, &exec_tool, &format!("Install {exec_tool}"))
    });

    let operation_id = new_operation_id();
    let mut entry = AuditEntry::new(
        &format!("install:{}", request.tool),
        "remediate",
        &exec_tool,
        &operation_id,
    );
    entry.before_state = Some(serde_json::json!({
        "failure_id": request.failure_id.clone(),
        "option_id": request.option_id.clone(),
        "chain_id": chain_id.clone(),
    }));
    state.audit.record(&entry).await;
    record_post_env(&state, &exec_tool, &plan, &operation_id).await;

    info!(
        "executing remediation '{}' for '{}' via '{exec_tool}'",
        request.option_id, request.tool
    );
    let handle = state
        .engine
        .execute(plan, profile, request.sudo_secret.clone(), chain_id);
    Ok(execution_response(
        state,
        handle,
        Some(permit),
        operation_id,
        exec_tool,
    ))
}

/// Presence check for native packages.
pub async fn check_deps(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckDepsRequest>,
) -> impl IntoResponse {
    let profile = state.profiles.get().await;
    let pm = profile.package_manager.primary;

    let mut installed = Vec::new();
    let mut missing = Vec::new();
    for package in &request.packages {
        if state.probe.package_installed(pm, package).await {
            installed.push(package.clone());
        } else {
            missing.push(package.clone());
        }
    }

    Json(CheckDepsResponse { installed, missing })
}

/// Per-tool availability, cached under `tools:status`.
pub async fn tools_status(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    if let Some(snapshot) = state.cache.get(TOOLS_STATUS_CARD).await {
        if !snapshot.stale {
            return Ok(Json(snapshot.value).into_response());
        }
    }

    let registry = state.engine.resolver().registry();
    let mut tools = Vec::new();
    for id in registry.all_ids() {
        let Some(recipe) = registry.lookup(&id) else {
            continue;
        };
        let available =
            state.probe.verify(&recipe.spec.verify).await || state.probe.which(&id);
        tools.push(ToolStatus {
            id,
            label: recipe.spec.label.clone(),
            available,
        });
    }

    let available = tools.iter().filter(|t| t.available).count();
    let response = ToolsStatusResponse {
        missing_count: tools.len() - available,
        available,
        tools,
    };

    let value = serde_json::to_value(&response)
        .map_err(|e| ApiError::bad_request("serialization", e.to_string()))?;
    state.cache.put(TOOLS_STATUS_CARD, value.clone(), &[]).await;
    Ok(Json(value).into_response())
}

/// Read one cache card.
pub async fn cache_get(
    State(state): State<Arc<AppState>>,
    Path(card): Path<String>,
) -> Result<Json<CacheCardResponse>, ApiError> {
    let snapshot = state
        .cache
        .get(&card)
        .await
        .ok_or_else(|| ApiError::not_found("cache", format!("no cached card '{card}'")))?;
    Ok(Json(CacheCardResponse {
        value: snapshot.value,
        captured_at: snapshot.captured_at,
        generation: snapshot.generation,
        stale: snapshot.stale,
    }))
}

/// Invalidate one card or everything.
pub async fn cache_bust(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BustRequest>,
) -> impl IntoResponse {
    let what = request
        .card
        .clone()
        .map_or(Invalidate::All, Invalidate::Card);
    let generation = state.cache.invalidate(&what).await;

    let target = request.card.as_deref().unwrap_or("all");
    let mut entry = AuditEntry::new("cache", "cache_bust", target, &new_operation_id());
    entry.after_state = Some(serde_json::json!({"generation": generation}));
    state.audit.record(&entry).await;

    Json(BustResponse {
        ok: true,
        generation,
    })
}

/// Scan the audit trail.
pub async fn activity(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivityParams>,
) -> impl IntoResponse {
    let page = state
        .audit
        .query(&AuditQuery {
            offset: params.offset,
            limit: params.limit,
            card: params.card,
            q: params.q,
        })
        .await;
    Json(page)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Environment exports are advisory: recorded for the operator, never
/// persisted into any shell state.
async fn record_post_env(
    state: &AppState,
    tool: &str,
    plan: &opsdeck_engine::InstallPlan,
    operation_id: &str,
) {
    let Some(step) = plan
        .steps
        .iter()
        .find(|s| s.kind == opsdeck_engine::StepKind::PostEnv)
    else {
        return;
    };
    let mut entry = AuditEntry::new(&format!("install:{tool}"), "post_env", tool, operation_id);
    entry.after_state = Some(serde_json::json!({"advisory": step.label.clone()}));
    state.audit.record(&entry).await;
}

fn find_handler(state: &AppState, tool: &str, failure_id: &str) -> Option<FailureHandlerDef> {
    let registry = state.engine.resolver().registry();
    if let Some(recipe) = registry.lookup(tool) {
        if let Some((handler, _)) = recipe.handler(failure_id) {
            return Some(handler.clone());
        }
    }
    INFRA_HANDLERS
        .iter()
        .find(|h| h.def.failure_id == failure_id)
        .map(|h| h.def.clone())
}

fn find_option(handler: &FailureHandlerDef, option_id: &str) -> Option<RemediationOptionDef> {
    handler.options.iter().find(|o| o.id == option_id).cloned()
}
