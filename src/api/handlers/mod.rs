use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::*;
use crate::service::PointsService;
use crate::store::Store;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map a ledger error to a status code. Backend failures are logged in full
/// and returned to the client as a generic message.
fn api_error(e: LedgerError) -> (StatusCode, String) {
    let status = match &e {
        LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
        LedgerError::TaskNotFound(_)
        | LedgerError::EntryNotFound(_)
        | LedgerError::AlreadyReversed(_) => StatusCode::NOT_FOUND,
        LedgerError::InactiveTask(_) => StatusCode::CONFLICT,
        LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
        LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Store(inner) => {
            tracing::error!(error = ?inner, "Internal error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };

    if status == StatusCode::SERVICE_UNAVAILABLE {
        tracing::warn!(code = e.error_code(), "{}", e);
    } else {
        tracing::debug!(code = e.error_code(), "{}", e);
    }
    (status, e.to_string())
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Tasks
// ============================================================

pub async fn list_tasks<S: Store>(
    State(service): State<PointsService<S>>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult<Json<Vec<TaskDefinition>>> {
    service.list_tasks(filter).await.map(Json).map_err(api_error)
}

pub async fn get_task<S: Store>(
    State(service): State<PointsService<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskDefinition>> {
    service.get_task(id).await.map(Json).map_err(api_error)
}

pub async fn define_task<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Json(input): Json<CreateTaskInput>,
) -> ApiResult<(StatusCode, Json<TaskDefinition>)> {
    service
        .define_task(&caller, input)
        .await
        .map(|t| (StatusCode::CREATED, Json(t)))
        .map_err(api_error)
}

pub async fn update_task<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateTaskInput>,
) -> ApiResult<Json<TaskDefinition>> {
    service
        .update_task(&caller, id, input)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn activate_task<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskDefinition>> {
    service
        .activate_task(&caller, id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn deactivate_task<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskDefinition>> {
    service
        .deactivate_task(&caller, id)
        .await
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Ledger
// ============================================================

/// 201 for a new entry, 200 when the dedupe key was already recorded.
fn award_response(receipt: AwardReceipt) -> (StatusCode, Json<AwardReceipt>) {
    let status = if receipt.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(receipt))
}

pub async fn award<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Json(input): Json<AwardInput>,
) -> ApiResult<(StatusCode, Json<AwardReceipt>)> {
    service
        .award(&caller, input)
        .await
        .map(award_response)
        .map_err(api_error)
}

pub async fn award_to<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(user_id): Path<String>,
    Json(input): Json<AwardInput>,
) -> ApiResult<(StatusCode, Json<AwardReceipt>)> {
    service
        .award_to(&caller, &user_id, input)
        .await
        .map(award_response)
        .map_err(api_error)
}

pub async fn get_entry<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(id): Path<EntryId>,
) -> ApiResult<Json<LedgerEntry>> {
    service
        .get_entry(&caller, id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn reverse_entry<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(id): Path<EntryId>,
    Json(input): Json<ReverseInput>,
) -> ApiResult<(StatusCode, Json<LedgerEntry>)> {
    service
        .reverse(&caller, id, input)
        .await
        .map(|e| (StatusCode::CREATED, Json(e)))
        .map_err(api_error)
}

pub async fn user_total<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(user_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let total = service
        .total_for(&caller, &user_id)
        .await
        .map_err(api_error)?;
    Ok(Json(serde_json::json!({ "user_id": user_id, "total": total })))
}

pub async fn user_history<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(user_id): Path<String>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Json<HistoryPage>> {
    service
        .history_for(&caller, &user_id, page)
        .await
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Leveling & Ranking
// ============================================================

pub async fn user_summary<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(user_id): Path<String>,
) -> ApiResult<Json<UserPointsSummary>> {
    service
        .summary_for(&caller, &user_id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn upsert_profile<S: Store>(
    State(service): State<PointsService<S>>,
    caller: Identity,
    Path(user_id): Path<String>,
    Json(input): Json<UpsertProfileInput>,
) -> ApiResult<Json<UserProfile>> {
    service
        .upsert_profile(&caller, &user_id, input)
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub cohort: Option<String>,
    pub limit: Option<usize>,
}

pub async fn leaderboard<S: Store>(
    State(service): State<PointsService<S>>,
    _caller: Identity,
    Query(query): Query<LeaderboardQuery>,
) -> ApiResult<Json<Vec<RankedUser>>> {
    service
        .rank_all(query.cohort, query.limit)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn level_for<S: Store>(
    State(service): State<PointsService<S>>,
    Path(points): Path<i64>,
) -> Json<LevelProgress> {
    Json(service.level_progress(points))
}
