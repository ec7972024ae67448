// ==========================================
// 工厂生产排程系统 - HTTP 接口层
// ==========================================
// 路由: /factories/:factory_id/... (工厂编号为每条路由的路径段)
// 身份: SessionResolver 从请求头解析操作人, 写操作缺少操作人返回 401
// 错误: ApiError → {code, message, details} + 状态码
// 执行: 业务 API 为同步实现, 统一放入 spawn_blocking
// ==========================================

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{
    Actor, AddDowntimeRequest, AddScheduleRequest, ApiError, ApiResult, ApprovalDecision,
    CreatePlanRequest, GenerateSlotsResult, InsertOrderRequest, Page, PageRequest,
    RecordSampleRequest, UpdateScheduleRequest, UpsertLineRequest, UrgentSchedule,
};
use crate::app::state::AppState;
use crate::config::UrgentThreshold;
use crate::domain::action_log::ActionLog;
use crate::domain::alert::SchedulingAlert;
use crate::domain::assignment::WorkerAssignment;
use crate::domain::line::{
    LineCapability, LineDowntime, LineProfile, MaterialStock, ProductionLine, ThroughputSample,
    Worker,
};
use crate::domain::plan::{LineSchedule, ProductionPlan, SchedulingPlan};
use crate::domain::slot::InsertSlot;
use crate::domain::types::{AlertSeverity, AlertStatus, AlertType, PlanStatus, PlanType};
use crate::engine::impact::ImpactAnalysis;
use crate::engine::probability::CompletionProbability;
use crate::engine::slot_scorer::{InsertRequest, ScoredSlot};
use crate::repository::{AlertFilter, PlanFilter};

/// 操作人请求头
pub const HEADER_USER_ID: &str = "x-user-id";
/// 角色请求头 (逗号分隔)
pub const HEADER_USER_ROLES: &str = "x-user-roles";

const DEFAULT_ACTION_LIMIT: i64 = 50;
const MAX_ACTION_LIMIT: i64 = 500;

// ==========================================
// 会话解析
// ==========================================

/// 从请求解析操作人 (外部认证中间件的接入点)
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Actor>;
}

/// 读取 X-User-Id / X-User-Roles 请求头
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderSessionResolver;

#[async_trait]
impl SessionResolver for HeaderSessionResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<Actor> {
        let user_id = headers.get(HEADER_USER_ID)?.to_str().ok()?.trim();
        if user_id.is_empty() {
            return None;
        }
        let roles = headers
            .get(HEADER_USER_ROLES)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Some(Actor::new(user_id, roles))
    }
}

// ==========================================
// 共享状态
// ==========================================

#[derive(Clone)]
pub struct HttpState {
    pub app: Arc<AppState>,
    pub sessions: Arc<dyn SessionResolver>,
}

impl HttpState {
    pub fn new(app: Arc<AppState>) -> Self {
        Self::with_resolver(app, Arc::new(HeaderSessionResolver))
    }

    pub fn with_resolver(app: Arc<AppState>, sessions: Arc<dyn SessionResolver>) -> Self {
        Self { app, sessions }
    }

    async fn actor(&self, headers: &HeaderMap) -> Result<Actor, HttpError> {
        self.sessions
            .resolve(headers)
            .await
            .ok_or(HttpError::MissingActor)
    }
}

// ==========================================
// 错误响应
// ==========================================

#[derive(Debug)]
pub enum HttpError {
    /// 写操作缺少操作人
    MissingActor,
    Api(ApiError),
}

impl From<ApiError> for HttpError {
    fn from(err: ApiError) -> Self {
        HttpError::Api(err)
    }
}

/// 错误响应体
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::MissingActor => StatusCode::UNAUTHORIZED,
            HttpError::Api(e) => match e {
                ApiError::NotFound(_) => StatusCode::NOT_FOUND,
                ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
                ApiError::InvalidStateTransition { .. }
                | ApiError::Conflict(_)
                | ApiError::OptimisticLockFailure(_) => StatusCode::CONFLICT,
                ApiError::SlotUnavailable { .. } => StatusCode::LOCKED,
                ApiError::Unauthorized(_) => StatusCode::FORBIDDEN,
                ApiError::ForceInsertRequired { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::DatabaseError(_) | ApiError::InternalError(_) | ApiError::Other(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            HttpError::MissingActor => ErrorBody {
                code: "UNAUTHORIZED".to_string(),
                message: format!("缺少操作人请求头 {}", HEADER_USER_ID),
                details: None,
            },
            HttpError::Api(e) => ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                details: e.details(),
            },
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        if status.is_server_error() {
            tracing::error!(code = %body.code, message = %body.message, "请求处理失败");
        } else {
            tracing::debug!(code = %body.code, message = %body.message, "请求被拒绝");
        }
        (status, Json(body)).into_response()
    }
}

pub type HttpResult<T> = Result<Json<T>, HttpError>;

/// 在阻塞线程池执行同步业务调用
async fn run_blocking<T, F>(f: F) -> HttpResult<T>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map(Json).map_err(HttpError::from),
        Err(e) => Err(HttpError::Api(ApiError::InternalError(format!(
            "后台任务异常: {}",
            e
        )))),
    }
}

// ==========================================
// 路由
// ==========================================

pub fn router(state: HttpState) -> Router {
    let factory: Router<HttpState> = Router::new()
        // 计划
        .route("/plans", post(create_plan).get(list_plans))
        .route("/plans/:plan_id", get(get_plan).put(update_plan))
        .route("/plans/:plan_id/confirm", post(confirm_plan))
        .route("/plans/:plan_id/cancel", post(cancel_plan))
        .route("/plans/:plan_id/schedules", post(add_schedule))
        .route("/plans/:plan_id/probabilities", get(plan_probabilities))
        // 排程
        .route("/schedules/:schedule_id", get(get_schedule).put(update_schedule))
        .route("/schedules/:schedule_id/start", post(start_schedule))
        .route("/schedules/:schedule_id/progress", post(report_progress))
        .route("/schedules/:schedule_id/complete", post(complete_schedule))
        .route("/schedules/:schedule_id/probability", get(schedule_probability))
        .route("/schedules/:schedule_id/assignments", get(list_assignments))
        .route("/urgent-schedules", get(list_urgent_schedules))
        // 派工
        .route("/workers", get(list_workers).post(upsert_worker))
        .route("/workers/assign", post(assign_workers))
        .route(
            "/workers/assignments/:assignment_id",
            axum::routing::delete(remove_assignment),
        )
        .route("/workers/assignments/:assignment_id/check-in", post(check_in))
        .route("/workers/assignments/:assignment_id/check-out", post(check_out))
        // 配置
        .route(
            "/config/urgent-threshold",
            get(get_urgent_threshold).put(set_urgent_threshold),
        )
        .route("/config", get(config_snapshot))
        .route("/config/keys/:key", put(update_config))
        // 紧急插单
        .route("/urgent-insert/slots", get(list_available_slots))
        .route("/urgent-insert/generate-slots", post(generate_slots))
        .route("/urgent-insert/slots/:slot_id", get(get_slot))
        .route("/urgent-insert/slots/:slot_id/impact", get(analyze_impact))
        .route(
            "/urgent-insert/slots/:slot_id/lock",
            post(lock_slot).delete(unlock_slot),
        )
        .route("/urgent-insert/confirm", post(confirm_insert))
        .route("/urgent-insert/force", post(force_insert))
        // 审批
        .route("/approvals/pending", get(list_pending_approvals))
        .route("/approvals/:plan_id/approve", post(approve_force_insert))
        .route("/approvals/:plan_id/reject", post(reject_force_insert))
        // 预警
        .route("/alerts", get(list_alerts))
        .route("/alerts/:alert_id", get(get_alert))
        .route("/alerts/:alert_id/acknowledge", post(acknowledge_alert))
        .route("/alerts/:alert_id/resolve", post(resolve_alert))
        // 产线与资源
        .route("/lines", get(list_lines).post(upsert_line))
        .route("/lines/capabilities", post(set_capability))
        .route("/lines/samples", post(record_sample))
        .route("/lines/downtime", post(add_downtime))
        .route("/stock/:product_type_id", put(upsert_stock))
        // 审计
        .route("/actions", get(list_actions));

    Router::new()
        .route("/health", get(health))
        .nest("/factories/:factory_id", factory)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn health() -> &'static str {
    "ok"
}

// ==========================================
// 请求体 / 查询参数
// ==========================================

#[derive(Debug, Default, Deserialize)]
pub struct PlanListQuery {
    pub status: Option<PlanStatus>,
    pub plan_type: Option<PlanType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertListQuery {
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub status: Option<AlertStatus>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePlanBody {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressBody {
    pub completed_quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteBody {
    pub completed_quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AssignBody {
    pub schedule_id: String,
    pub worker_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckOutBody {
    pub performance_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ThresholdBody {
    pub threshold: f64,
}

#[derive(Debug, Deserialize)]
pub struct ConfigValueBody {
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateBody {
    pub hours_ahead: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    #[serde(alias = "reason")]
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveBody {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StockBody {
    pub available_quantity: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    pub limit: Option<i64>,
}

// ==========================================
// 计划
// ==========================================

pub async fn create_plan(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CreatePlanRequest>,
) -> HttpResult<SchedulingPlan> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.create_plan(&factory_id, req, &actor)).await
}

pub async fn list_plans(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    Query(q): Query<PlanListQuery>,
) -> HttpResult<Page<SchedulingPlan>> {
    let page = PageRequest::new(q.page, q.page_size)?;
    let filter = PlanFilter {
        status: q.status,
        plan_type: q.plan_type,
        date_from: q.date_from,
        date_to: q.date_to,
    };
    let api = state.app.plan_api.clone();
    run_blocking(move || api.list_plans(&factory_id, &filter, page)).await
}

pub async fn get_plan(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
) -> HttpResult<ProductionPlan> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.get_plan(&factory_id, &plan_id)).await
}

pub async fn update_plan(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<UpdatePlanBody>,
) -> HttpResult<SchedulingPlan> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.update_plan(&factory_id, &plan_id, body.notes, &actor)).await
}

pub async fn confirm_plan(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> HttpResult<SchedulingPlan> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.confirm_plan(&factory_id, &plan_id, &actor)).await
}

pub async fn cancel_plan(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> HttpResult<ProductionPlan> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.cancel_plan(&factory_id, &plan_id, &actor)).await
}

pub async fn add_schedule(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<AddScheduleRequest>,
) -> HttpResult<LineSchedule> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.add_schedule(&factory_id, &plan_id, req, &actor)).await
}

pub async fn plan_probabilities(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
) -> HttpResult<Vec<CompletionProbability>> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.plan_probabilities(&factory_id, &plan_id)).await
}

// ==========================================
// 排程
// ==========================================

pub async fn get_schedule(
    State(state): State<HttpState>,
    Path((factory_id, schedule_id)): Path<(String, String)>,
) -> HttpResult<LineSchedule> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.get_schedule(&factory_id, &schedule_id)).await
}

pub async fn update_schedule(
    State(state): State<HttpState>,
    Path((factory_id, schedule_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<UpdateScheduleRequest>,
) -> HttpResult<LineSchedule> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.update_schedule(&factory_id, &schedule_id, req, &actor)).await
}

pub async fn start_schedule(
    State(state): State<HttpState>,
    Path((factory_id, schedule_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> HttpResult<LineSchedule> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.start_schedule(&factory_id, &schedule_id, &actor)).await
}

pub async fn report_progress(
    State(state): State<HttpState>,
    Path((factory_id, schedule_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ProgressBody>,
) -> HttpResult<LineSchedule> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || {
        api.report_progress(&factory_id, &schedule_id, body.completed_quantity, &actor)
    })
    .await
}

pub async fn complete_schedule(
    State(state): State<HttpState>,
    Path((factory_id, schedule_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<CompleteBody>,
) -> HttpResult<LineSchedule> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || {
        api.complete_schedule(&factory_id, &schedule_id, body.completed_quantity, &actor)
    })
    .await
}

pub async fn schedule_probability(
    State(state): State<HttpState>,
    Path((factory_id, schedule_id)): Path<(String, String)>,
) -> HttpResult<CompletionProbability> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.schedule_probability(&factory_id, &schedule_id)).await
}

pub async fn list_urgent_schedules(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
) -> HttpResult<Vec<UrgentSchedule>> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.list_urgent_schedules(&factory_id)).await
}

// ==========================================
// 派工
// ==========================================

pub async fn assign_workers(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AssignBody>,
) -> HttpResult<Vec<WorkerAssignment>> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || {
        api.assign_workers(&factory_id, &body.schedule_id, body.worker_ids, &actor)
    })
    .await
}

pub async fn list_assignments(
    State(state): State<HttpState>,
    Path((factory_id, schedule_id)): Path<(String, String)>,
) -> HttpResult<Vec<WorkerAssignment>> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.list_assignments(&factory_id, &schedule_id)).await
}

pub async fn remove_assignment(
    State(state): State<HttpState>,
    Path((factory_id, assignment_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, HttpError> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.remove_assignment(&factory_id, &assignment_id, &actor))
        .await
        .map(|_| StatusCode::NO_CONTENT)
}

pub async fn check_in(
    State(state): State<HttpState>,
    Path((factory_id, assignment_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> HttpResult<WorkerAssignment> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.check_in(&factory_id, &assignment_id, &actor)).await
}

pub async fn check_out(
    State(state): State<HttpState>,
    Path((factory_id, assignment_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<CheckOutBody>,
) -> HttpResult<WorkerAssignment> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || {
        api.check_out(&factory_id, &assignment_id, body.performance_score, &actor)
    })
    .await
}

// ==========================================
// 配置
// ==========================================

pub async fn get_urgent_threshold(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
) -> HttpResult<UrgentThreshold> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.get_urgent_threshold(&factory_id)).await
}

pub async fn set_urgent_threshold(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ThresholdBody>,
) -> HttpResult<UrgentThreshold> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.set_urgent_threshold(&factory_id, body.threshold, &actor)).await
}

pub async fn config_snapshot(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
) -> HttpResult<BTreeMap<String, String>> {
    let api = state.app.plan_api.clone();
    run_blocking(move || api.config_snapshot(&factory_id)).await
}

pub async fn update_config(
    State(state): State<HttpState>,
    Path((factory_id, key)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ConfigValueBody>,
) -> HttpResult<BTreeMap<String, String>> {
    let actor = state.actor(&headers).await?;
    let api = state.app.plan_api.clone();
    run_blocking(move || api.update_config(&factory_id, &key, &body.value, &actor)).await
}

// ==========================================
// 紧急插单
// ==========================================

pub async fn list_available_slots(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    Query(request): Query<InsertRequest>,
) -> HttpResult<Vec<ScoredSlot>> {
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.list_available_slots(&factory_id, &request)).await
}

pub async fn generate_slots(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<GenerateBody>,
) -> HttpResult<GenerateSlotsResult> {
    let actor = state.actor(&headers).await?;
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.generate_slots(&factory_id, body.hours_ahead, &actor)).await
}

pub async fn get_slot(
    State(state): State<HttpState>,
    Path((factory_id, slot_id)): Path<(String, String)>,
) -> HttpResult<InsertSlot> {
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.get_slot(&factory_id, &slot_id)).await
}

pub async fn analyze_impact(
    State(state): State<HttpState>,
    Path((factory_id, slot_id)): Path<(String, String)>,
    Query(request): Query<InsertRequest>,
) -> HttpResult<ImpactAnalysis> {
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.analyze_impact(&factory_id, &slot_id, &request)).await
}

pub async fn lock_slot(
    State(state): State<HttpState>,
    Path((factory_id, slot_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> HttpResult<InsertSlot> {
    let actor = state.actor(&headers).await?;
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.lock_slot(&factory_id, &slot_id, &actor)).await
}

pub async fn unlock_slot(
    State(state): State<HttpState>,
    Path((factory_id, slot_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> HttpResult<InsertSlot> {
    let actor = state.actor(&headers).await?;
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.unlock_slot(&factory_id, &slot_id, &actor)).await
}

pub async fn confirm_insert(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InsertOrderRequest>,
) -> HttpResult<ProductionPlan> {
    let actor = state.actor(&headers).await?;
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.confirm_insert(&factory_id, req, &actor)).await
}

pub async fn force_insert(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InsertOrderRequest>,
) -> HttpResult<ProductionPlan> {
    let actor = state.actor(&headers).await?;
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.force_insert(&factory_id, req, &actor)).await
}

// ==========================================
// 审批
// ==========================================

pub async fn list_pending_approvals(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
) -> HttpResult<Vec<ProductionPlan>> {
    let api = state.app.urgent_insert_api.clone();
    run_blocking(move || api.list_pending_approvals(&factory_id)).await
}

pub async fn approve_force_insert(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<DecisionBody>,
) -> HttpResult<ProductionPlan> {
    decide(state, factory_id, plan_id, headers, true, body.comment).await
}

pub async fn reject_force_insert(
    State(state): State<HttpState>,
    Path((factory_id, plan_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<DecisionBody>,
) -> HttpResult<ProductionPlan> {
    decide(state, factory_id, plan_id, headers, false, body.comment).await
}

async fn decide(
    state: HttpState,
    factory_id: String,
    plan_id: String,
    headers: HeaderMap,
    approve: bool,
    comment: Option<String>,
) -> HttpResult<ProductionPlan> {
    let actor = state.actor(&headers).await?;
    let api = state.app.urgent_insert_api.clone();
    let decision = ApprovalDecision { approve, comment };
    run_blocking(move || api.decide_force_insert(&factory_id, &plan_id, decision, &actor)).await
}

// ==========================================
// 预警
// ==========================================

pub async fn list_alerts(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    Query(q): Query<AlertListQuery>,
) -> HttpResult<Page<SchedulingAlert>> {
    let page = PageRequest::new(q.page, q.page_size)?;
    let filter = AlertFilter {
        severity: q.severity,
        alert_type: q.alert_type,
        status: q.status,
    };
    let manager = state.app.alert_manager.clone();
    run_blocking(move || manager.list(&factory_id, &filter, page)).await
}

pub async fn get_alert(
    State(state): State<HttpState>,
    Path((factory_id, alert_id)): Path<(String, String)>,
) -> HttpResult<SchedulingAlert> {
    let manager = state.app.alert_manager.clone();
    run_blocking(move || manager.get(&factory_id, &alert_id)).await
}

pub async fn acknowledge_alert(
    State(state): State<HttpState>,
    Path((factory_id, alert_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> HttpResult<SchedulingAlert> {
    let actor = state.actor(&headers).await?;
    let manager = state.app.alert_manager.clone();
    run_blocking(move || manager.acknowledge(&factory_id, &alert_id, &actor)).await
}

pub async fn resolve_alert(
    State(state): State<HttpState>,
    Path((factory_id, alert_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ResolveBody>,
) -> HttpResult<SchedulingAlert> {
    let actor = state.actor(&headers).await?;
    let manager = state.app.alert_manager.clone();
    run_blocking(move || manager.resolve(&factory_id, &alert_id, &actor, body.notes)).await
}

// ==========================================
// 产线与资源
// ==========================================

pub async fn list_lines(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
) -> HttpResult<Vec<LineProfile>> {
    let api = state.app.line_api.clone();
    run_blocking(move || api.list_lines(&factory_id)).await
}

pub async fn upsert_line(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpsertLineRequest>,
) -> HttpResult<ProductionLine> {
    let actor = state.actor(&headers).await?;
    let api = state.app.line_api.clone();
    run_blocking(move || api.upsert_line(&factory_id, req, &actor)).await
}

pub async fn set_capability(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(capability): Json<LineCapability>,
) -> HttpResult<LineProfile> {
    let actor = state.actor(&headers).await?;
    let api = state.app.line_api.clone();
    run_blocking(move || api.set_capability(&factory_id, capability, &actor)).await
}

pub async fn record_sample(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RecordSampleRequest>,
) -> HttpResult<ThroughputSample> {
    state.actor(&headers).await?;
    let api = state.app.line_api.clone();
    run_blocking(move || api.record_sample(&factory_id, req)).await
}

pub async fn add_downtime(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AddDowntimeRequest>,
) -> HttpResult<LineDowntime> {
    state.actor(&headers).await?;
    let api = state.app.line_api.clone();
    run_blocking(move || api.add_downtime(&factory_id, req)).await
}

pub async fn upsert_stock(
    State(state): State<HttpState>,
    Path((factory_id, product_type_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<StockBody>,
) -> HttpResult<MaterialStock> {
    state.actor(&headers).await?;
    let api = state.app.line_api.clone();
    run_blocking(move || {
        api.upsert_stock(&factory_id, &product_type_id, body.available_quantity)
    })
    .await
}

pub async fn list_workers(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
) -> HttpResult<Vec<Worker>> {
    let api = state.app.line_api.clone();
    run_blocking(move || api.list_workers(&factory_id)).await
}

pub async fn upsert_worker(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    headers: HeaderMap,
    Json(worker): Json<Worker>,
) -> HttpResult<Worker> {
    state.actor(&headers).await?;
    let api = state.app.line_api.clone();
    run_blocking(move || api.upsert_worker(&factory_id, worker)).await
}

// ==========================================
// 审计
// ==========================================

pub async fn list_actions(
    State(state): State<HttpState>,
    Path(factory_id): Path<String>,
    Query(q): Query<ActionQuery>,
) -> HttpResult<Vec<ActionLog>> {
    let limit = q.limit.unwrap_or(DEFAULT_ACTION_LIMIT);
    if !(1..=MAX_ACTION_LIMIT).contains(&limit) {
        return Err(HttpError::Api(ApiError::ValidationError(format!(
            "limit 必须在 1..={} 之间",
            MAX_ACTION_LIMIT
        ))));
    }
    let repo = state.app.action_log_repo.clone();
    run_blocking(move || Ok(repo.list_recent(&factory_id, limit)?)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_header_session_resolver() {
        let resolver = HeaderSessionResolver;
        let mut headers = HeaderMap::new();
        assert!(resolver.resolve(&headers).await.is_none());

        headers.insert(HEADER_USER_ID, HeaderValue::from_static(" u1 "));
        headers.insert(HEADER_USER_ROLES, HeaderValue::from_static("OPERATOR, approver,"));
        let actor = resolver.resolve(&headers).await.unwrap();
        assert_eq!(actor.user_id, "u1");
        assert_eq!(actor.roles, vec!["OPERATOR".to_string(), "approver".to_string()]);
        assert!(actor.has_approver_role());
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = vec![
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::slot_unavailable("S1", "x"), StatusCode::LOCKED),
            (ApiError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (ApiError::DatabaseError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(HttpError::from(err).status(), status);
        }
        assert_eq!(HttpError::MissingActor.status(), StatusCode::UNAUTHORIZED);

        let body = HttpError::from(ApiError::slot_unavailable("S1", "taken")).body();
        assert_eq!(body.code, "SLOT_UNAVAILABLE");
        assert_eq!(body.details.unwrap()["slot_id"], "S1");
    }
}
