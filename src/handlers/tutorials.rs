// handlers/tutorials.rs - /api/tutorials handlers
//
// Every handler runs behind the tenant filter, so the tenant extension is
// always present and the request's TenantContext is set.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::{Tutorial, TutorialInput};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::tenancy::TenantId;
use crate::types::Page;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub size: Option<u32>,
}

impl ListQuery {
    fn page(&self) -> Option<Page> {
        match (self.page, self.size) {
            (None, None) => None,
            (page, size) => Some(Page::new(page.unwrap_or(0), size.unwrap_or(20))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchDelete {
    pub ids: Vec<Uuid>,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request(format!("Invalid id '{}'", raw)))
}

/// POST /api/tutorials
pub async fn create(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    payload: Result<Json<TutorialInput>, JsonRejection>,
) -> ApiResult<Tutorial> {
    let Json(input) = payload?;
    let tutorial = state.tutorials.create(&tenant, Tutorial::from(input)).await?;
    Ok(ApiResponse::created(tutorial))
}

/// GET /api/tutorials
pub async fn list(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Vec<Tutorial>> {
    let Query(query) = query?;
    let tutorials = state.tutorials.find_all(&tenant, query.page()).await?;
    Ok(ApiResponse::success(tutorials))
}

/// GET /api/tutorials/count
pub async fn count(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
) -> ApiResult<Value> {
    let count = state.tutorials.count(&tenant).await?;
    Ok(ApiResponse::success(json!({ "count": count })))
}

/// GET /api/tutorials/:id
pub async fn get(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
) -> ApiResult<Tutorial> {
    let tutorial = state.tutorials.find_by_id(&tenant, parse_id(&id)?).await?;
    Ok(ApiResponse::success(tutorial))
}

/// PUT /api/tutorials/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
    payload: Result<Json<TutorialInput>, JsonRejection>,
) -> ApiResult<Tutorial> {
    let id = parse_id(&id)?;
    let Json(input) = payload?;

    let mut tutorial = Tutorial::from(input);
    tutorial.id = Some(id);

    let updated = state.tutorials.update(&tenant, tutorial).await?;
    Ok(ApiResponse::success(updated))
}

/// DELETE /api/tutorials/:id
pub async fn delete(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Path(id): Path<String>,
) -> ApiResult<Tutorial> {
    let deleted = state.tutorials.delete(&tenant, parse_id(&id)?).await?;
    Ok(ApiResponse::success(deleted))
}

/// DELETE /api/tutorials with body {"ids": [...]}
pub async fn delete_all(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    payload: Result<Json<BatchDelete>, JsonRejection>,
) -> ApiResult<Vec<Tutorial>> {
    let Json(batch) = payload?;
    if batch.ids.is_empty() {
        return Err(ApiError::bad_request("No ids given"));
    }
    let deleted = state.tutorials.delete_all(&tenant, &batch.ids).await?;
    Ok(ApiResponse::success(deleted))
}
