//! Read-only admin/observability HTTP surface.
//!
//! Exposes operational visibility over a [`WorkflowEventStore`] — workflow
//! status and history, queue depth, circuit breaker state, and dead-letter
//! entries — as a small `axum` router with an OpenAPI document mounted
//! alongside it via Swagger UI. Nothing here is part of a workflow author's
//! programming model; a deployment wires this in (or doesn't) independently
//! of the engine itself.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::persistence::{DlqFilter, Pagination, WorkflowEventStore, WorkflowStatus};
use crate::reliability::CircuitState;
use crate::workflow::WorkflowError;

/// Shared state for the admin router.
struct AdminState<S: WorkflowEventStore> {
    store: Arc<S>,
}

impl<S: WorkflowEventStore> Clone for AdminState<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
struct WorkflowInfoResponse {
    id: Uuid,
    workflow_type: String,
    status: WorkflowStatus,
    #[schema(value_type = Object)]
    input: serde_json::Value,
    #[schema(value_type = Object, nullable)]
    result: Option<serde_json::Value>,
    error: Option<WorkflowError>,
    parent_workflow_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
struct HistoryEntryResponse {
    sequence: i32,
    #[schema(value_type = Object)]
    event: serde_json::Value,
}

#[derive(Serialize, ToSchema)]
struct QueueDepthResponse {
    pending_tasks: u64,
}

#[derive(Serialize, ToSchema)]
struct CircuitBreakerResponse {
    key: String,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, ToSchema)]
struct DlqEntryResponse {
    id: Uuid,
    original_task_id: Uuid,
    workflow_id: Uuid,
    activity_id: String,
    activity_type: String,
    attempts: u32,
    last_error: String,
    dead_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
struct WorkerInfoResponse {
    id: String,
    worker_group: String,
    activity_types: Vec<String>,
    max_concurrency: u32,
    current_load: u32,
    status: String,
    accepting_tasks: bool,
    started_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct DlqQuery {
    workflow_id: Option<Uuid>,
    activity_type: Option<String>,
    offset: Option<u32>,
    limit: Option<u32>,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

/// Maps store errors to HTTP responses. A missing workflow/task is a 404;
/// everything else is a 500 with the underlying message.
fn store_error_response(err: crate::persistence::StoreError) -> Response {
    use crate::persistence::StoreError;
    let status = match &err {
        StoreError::WorkflowNotFound(_) | StoreError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Get a workflow's current status and metadata.
#[utoipa::path(
    get,
    path = "/admin/workflows/{id}",
    params(("id" = Uuid, Path, description = "Workflow run id")),
    responses(
        (status = 200, description = "Workflow found", body = WorkflowInfoResponse),
        (status = 404, description = "No workflow with that id")
    ),
    tag = "admin"
)]
async fn get_workflow<S: WorkflowEventStore>(
    State(state): State<AdminState<S>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.get_workflow_info(id).await {
        Ok(info) => Json(WorkflowInfoResponse {
            id: info.id,
            workflow_type: info.workflow_type,
            status: info.status,
            input: info.input,
            result: info.result,
            error: info.error,
            parent_workflow_id: info.parent_workflow_id,
        })
        .into_response(),
        Err(e) => store_error_response(e),
    }
}

/// Get the full event history for a workflow run, in sequence order.
#[utoipa::path(
    get,
    path = "/admin/workflows/{id}/history",
    params(("id" = Uuid, Path, description = "Workflow run id")),
    responses(
        (status = 200, description = "Event history", body = [HistoryEntryResponse]),
        (status = 404, description = "No workflow with that id")
    ),
    tag = "admin"
)]
async fn get_workflow_history<S: WorkflowEventStore>(
    State(state): State<AdminState<S>>,
    Path(id): Path<Uuid>,
) -> Response {
    match state.store.load_events(id).await {
        Ok(events) => {
            let body: Vec<HistoryEntryResponse> = events
                .into_iter()
                .map(|(sequence, event)| HistoryEntryResponse {
                    sequence,
                    event: serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
                })
                .collect();
            Json(body).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

/// Count of tasks still waiting to be claimed.
#[utoipa::path(
    get,
    path = "/admin/queue-depth",
    responses((status = 200, description = "Current pending task count", body = QueueDepthResponse)),
    tag = "admin"
)]
async fn get_queue_depth<S: WorkflowEventStore>(State(state): State<AdminState<S>>) -> Response {
    match state.store.queue_depth().await {
        Ok(depth) => Json(QueueDepthResponse {
            pending_tasks: depth,
        })
        .into_response(),
        Err(e) => store_error_response(e),
    }
}

/// Get the current state of a named circuit breaker.
#[utoipa::path(
    get,
    path = "/admin/circuit-breakers/{key}",
    params(("key" = String, Path, description = "Circuit breaker key")),
    responses(
        (status = 200, description = "Circuit breaker state", body = CircuitBreakerResponse),
        (status = 404, description = "No circuit breaker with that key")
    ),
    tag = "admin"
)]
async fn get_circuit_breaker<S: WorkflowEventStore>(
    State(state): State<AdminState<S>>,
    Path(key): Path<String>,
) -> Response {
    match state.store.get_circuit_breaker(&key).await {
        Ok(Some(cb)) => Json(CircuitBreakerResponse {
            key: cb.key,
            state: cb.state,
            failure_count: cb.failure_count,
            success_count: cb.success_count,
            last_failure_at: cb.last_failure_at,
            opened_at: cb.opened_at,
        })
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no circuit breaker registered for key: {key}"),
            }),
        )
            .into_response(),
        Err(e) => store_error_response(e),
    }
}

/// List dead-letter queue entries, optionally filtered by workflow or activity type.
#[utoipa::path(
    get,
    path = "/admin/dlq",
    params(
        ("workflow_id" = Option<Uuid>, Query, description = "Filter by workflow run id"),
        ("activity_type" = Option<String>, Query, description = "Filter by activity type"),
        ("offset" = Option<u32>, Query, description = "Pagination offset"),
        ("limit" = Option<u32>, Query, description = "Pagination limit"),
    ),
    responses((status = 200, description = "Matching dead-letter entries", body = [DlqEntryResponse])),
    tag = "admin"
)]
async fn list_dlq<S: WorkflowEventStore>(
    State(state): State<AdminState<S>>,
    Query(q): Query<DlqQuery>,
) -> Response {
    let filter = DlqFilter {
        workflow_id: q.workflow_id,
        activity_type: q.activity_type,
    };
    let pagination = Pagination {
        offset: q.offset.unwrap_or(0),
        limit: q.limit.unwrap_or(100),
    };
    match state.store.list_dlq(filter, pagination).await {
        Ok(entries) => {
            let body: Vec<DlqEntryResponse> = entries
                .into_iter()
                .map(|e| DlqEntryResponse {
                    id: e.id,
                    original_task_id: e.original_task_id,
                    workflow_id: e.workflow_id,
                    activity_id: e.activity_id,
                    activity_type: e.activity_type,
                    attempts: e.attempts,
                    last_error: e.last_error,
                    dead_at: e.dead_at,
                })
                .collect();
            Json(body).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

/// List currently registered workers.
#[utoipa::path(
    get,
    path = "/admin/workers",
    responses((status = 200, description = "Registered workers", body = [WorkerInfoResponse])),
    tag = "admin"
)]
async fn list_workers<S: WorkflowEventStore>(State(state): State<AdminState<S>>) -> Response {
    match state
        .store
        .list_workers(crate::persistence::WorkerFilter::default())
        .await
    {
        Ok(workers) => {
            let body: Vec<WorkerInfoResponse> = workers
                .into_iter()
                .map(|w| WorkerInfoResponse {
                    id: w.id,
                    worker_group: w.worker_group,
                    activity_types: w.activity_types,
                    max_concurrency: w.max_concurrency,
                    current_load: w.current_load,
                    status: w.status,
                    accepting_tasks: w.accepting_tasks,
                    started_at: w.started_at,
                    last_heartbeat_at: w.last_heartbeat_at,
                })
                .collect();
            Json(body).into_response()
        }
        Err(e) => store_error_response(e),
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        get_workflow,
        get_workflow_history,
        get_queue_depth,
        get_circuit_breaker,
        list_dlq,
        list_workers,
    ),
    components(schemas(
        WorkflowInfoResponse,
        HistoryEntryResponse,
        QueueDepthResponse,
        CircuitBreakerResponse,
        DlqEntryResponse,
        WorkerInfoResponse,
        ErrorResponse,
        WorkflowStatus,
        CircuitState,
        WorkflowError,
    )),
    tags((name = "admin", description = "Read-only operational visibility endpoints")),
    info(title = "Durable Engine Admin API", description = "Operator-facing read surface over the workflow store")
)]
struct ApiDoc;

/// Build the admin router over a concrete store, with Swagger UI and request
/// tracing mounted alongside the API routes.
pub fn router<S: WorkflowEventStore>(store: Arc<S>) -> Router {
    let state = AdminState { store };

    let api_routes = Router::new()
        .route("/admin/workflows/:id", get(get_workflow::<S>))
        .route("/admin/workflows/:id/history", get(get_workflow_history::<S>))
        .route("/admin/queue-depth", get(get_queue_depth::<S>))
        .route("/admin/circuit-breakers/:key", get(get_circuit_breaker::<S>))
        .route("/admin/dlq", get(list_dlq::<S>))
        .route("/admin/workers", get(list_workers::<S>))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve the admin router until the process is killed. A thin
/// convenience wrapper; callers that need graceful shutdown or TLS should
/// build their own listener around [`router`].
pub async fn serve<S: WorkflowEventStore>(
    store: Arc<S>,
    bind_addr: &str,
) -> std::io::Result<()> {
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "admin HTTP surface listening");
    axum::serve(listener, app).await
}
