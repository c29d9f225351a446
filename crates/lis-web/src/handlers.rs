//! HTTP处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use lis_core::{
    AmendRequest, BatchApproveRequest, NewPatient, NewResult, NewTestOrder, OverallStatus, Pagination, PatientFilter,
    PatientUpdate, ResultFilter, ResultStatus, ResultUpdate, TestCategory, TestFilter,
    TestPriority, TestStatus, TestUpdate,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::{CurrentActor, Permission};
use crate::error::ApiResult;
use crate::extract::OptionalJson;
use crate::server::AppState;

/// 统一的成功响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

fn created<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(data))
}

fn deleted(what: &str) -> Json<ApiResponse<serde_json::Value>> {
    ok(json!({ "message": format!("{} deleted", what) }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ========== 查询参数 ==========

#[derive(Debug, Deserialize)]
pub struct PatientQueryParams {
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TestQueryParams {
    pub status: Option<TestStatus>,
    pub priority: Option<TestPriority>,
    pub category: Option<TestCategory>,
    pub patient_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ResultQueryParams {
    pub status: Option<ResultStatus>,
    pub overall_status: Option<OverallStatus>,
    pub test_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub performed_from: Option<DateTime<Utc>>,
    pub performed_before: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TurnaroundQueryParams {
    pub category: Option<TestCategory>,
    pub completed_from: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignOffRequest {
    pub comments: Option<String>,
}

// ========== 患者 ==========

pub async fn create_patient(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(request): Json<NewPatient>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::ManagePatient)?;
    let patient = state.engine.create_patient(actor, request).await?;
    Ok(created(patient))
}

pub async fn list_patients(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(params): Query<PatientQueryParams>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    let filter = PatientFilter {
        search: params.search,
        created_from: params.created_from,
        created_before: params.created_before,
    };
    let page = state
        .engine
        .list_patients(&filter, Pagination::new(params.page, params.limit))
        .await?;
    Ok(ok(page))
}

pub async fn get_patient(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.get_patient(id).await?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
    Json(update): Json<PatientUpdate>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::ManagePatient)?;
    Ok(ok(state.engine.update_patient(id, update).await?))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::DeletePatient)?;
    state.engine.delete_patient(id, actor).await?;
    Ok(deleted("Patient"))
}

// ========== 检验 ==========

pub async fn order_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(order): Json<NewTestOrder>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::OrderTest)?;
    let test = state.engine.order_test(actor, order).await?;
    Ok(created(test))
}

pub async fn list_tests(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(params): Query<TestQueryParams>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    let filter = TestFilter {
        status: params.status,
        priority: params.priority,
        category: params.category,
        patient_id: params.patient_id,
        created_from: params.created_from,
        created_before: params.created_before,
        search: params.search,
        ..Default::default()
    };
    let page = state
        .engine
        .list_tests(&filter, Pagination::new(params.page, params.limit))
        .await?;
    Ok(ok(page))
}

pub async fn get_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.get_test(id).await?))
}

pub async fn update_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
    Json(update): Json<TestUpdate>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::ProcessTest)?;
    Ok(ok(state.engine.update_test(id, update).await?))
}

pub async fn collect_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::ProcessTest)?;
    Ok(ok(state.engine.collect_test(id, actor).await?))
}

pub async fn process_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::ProcessTest)?;
    Ok(ok(state.engine.process_test(id, actor).await?))
}

pub async fn complete_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::ProcessTest)?;
    Ok(ok(state.engine.complete_test(id, actor).await?))
}

pub async fn cancel_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
    body: OptionalJson<CancelRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::CancelTest)?;
    let request = body.into_inner_or_default();
    let test = state
        .engine
        .cancel_test(id, actor, request.reason.as_deref())
        .await?;
    Ok(ok(test))
}

pub async fn delete_test(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::CancelTest)?;
    state.engine.delete_test(id, actor).await?;
    Ok(deleted("Test"))
}

pub async fn test_stats(
    State(state): State<AppState>,
    actor: CurrentActor,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.test_stats(Utc::now()).await?))
}

pub async fn today_workload(
    State(state): State<AppState>,
    actor: CurrentActor,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.today_workload(Utc::now()).await?))
}

// ========== 结果 ==========

pub async fn create_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(request): Json<NewResult>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::RecordResult)?;
    let result = state.engine.create_result(actor, request).await?;
    Ok(created(result))
}

pub async fn list_results(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(params): Query<ResultQueryParams>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    let filter = ResultFilter {
        status: params.status,
        overall_status: params.overall_status,
        test_id: params.test_id,
        patient_id: params.patient_id,
        performed_from: params.performed_from,
        performed_before: params.performed_before,
        search: params.search,
        ..Default::default()
    };
    let page = state
        .engine
        .list_results(&filter, Pagination::new(params.page, params.limit))
        .await?;
    Ok(ok(page))
}

pub async fn get_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.get_result(id).await?))
}

pub async fn update_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
    Json(update): Json<ResultUpdate>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::RecordResult)?;
    Ok(ok(state.engine.update_result(id, actor, update).await?))
}

pub async fn review_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
    body: OptionalJson<SignOffRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::SignOffResult)?;
    let request = body.into_inner_or_default();
    Ok(ok(state.engine.review_result(id, actor, request.comments).await?))
}

pub async fn approve_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
    body: OptionalJson<SignOffRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::SignOffResult)?;
    let request = body.into_inner_or_default();
    Ok(ok(state.engine.approve_result(id, actor, request.comments).await?))
}

pub async fn batch_approve(
    State(state): State<AppState>,
    actor: CurrentActor,
    Json(request): Json<BatchApproveRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::BatchApprove)?;
    Ok(ok(state.engine.batch_approve(actor, request).await?))
}

pub async fn report_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::SignOffResult)?;
    let result = state.engine.report_result(id, actor).await?;
    info!("Result {} reported", result.result_code);
    Ok(ok(result))
}

pub async fn amend_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
    Json(request): Json<AmendRequest>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::RecordResult)?;
    Ok(ok(state.engine.amend_result(id, actor, request).await?))
}

pub async fn amendment_history(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.amendment_history(id).await?))
}

pub async fn notify_critical(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::RecordResult)?;
    Ok(ok(state.engine.notify_critical(id, actor).await?))
}

pub async fn delete_result(
    State(state): State<AppState>,
    actor: CurrentActor,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let actor = actor.require(Permission::DeleteResult)?;
    state.engine.delete_result(id, actor).await?;
    Ok(deleted("Result"))
}

pub async fn pending_reviews(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(params): Query<PageParams>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    let pagination = Pagination::new(params.page, params.limit);
    Ok(ok(state.engine.pending_reviews(pagination).await?))
}

pub async fn critical_results(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(params): Query<PageParams>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    let pagination = Pagination::new(params.page, params.limit);
    Ok(ok(state.engine.critical_results(pagination).await?))
}

pub async fn result_stats(
    State(state): State<AppState>,
    actor: CurrentActor,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.result_stats(Utc::now()).await?))
}

// ========== 报表 ==========

pub async fn dashboard(
    State(state): State<AppState>,
    actor: CurrentActor,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    Ok(ok(state.engine.dashboard(Utc::now()).await?))
}

pub async fn turnaround_report(
    State(state): State<AppState>,
    actor: CurrentActor,
    Query(params): Query<TurnaroundQueryParams>,
) -> ApiResult<impl IntoResponse> {
    actor.require(Permission::Read)?;
    let filter = TestFilter {
        category: params.category,
        completed_from: params.completed_from,
        completed_before: params.completed_before,
        ..Default::default()
    };
    Ok(ok(state.engine.turnaround_report(&filter).await?))
}
