// ==========================================
// 工厂生产排程系统 - 排程计划 API
// ==========================================
// 职责:
// 1. 计划管理 (创建 / 查询 / 更新 / 确认 / 取消)
// 2. 产线排程 (新增 / 更新 / 开工 / 报工 / 完工)
// 3. 工人派工 (派工 / 撤销 / 签到 / 签退)
// 4. 完成概率与紧急阈值 (单条 / 批量 / 紧急排程清单)
// 红线: 所有状态变化走领域转换函数; 所有写操作记录 ActionLog
// ==========================================

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::api::actor::Actor;
use crate::api::alert_api::AlertManager;
use crate::api::error::{ApiError, ApiResult};
use crate::api::page::{Page, PageRequest};
use crate::config::{ConfigManager, UrgentThreshold};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::alert::NewAlert;
use crate::domain::assignment::WorkerAssignment;
use crate::domain::line::ThroughputSample;
use crate::domain::plan::{LineSchedule, ProductionPlan, SchedulingPlan, UrgentInsertApproval};
use crate::domain::types::{
    AlertSeverity, AlertType, ApprovalStatus, AssignmentEvent, AssignmentStatus, PlanEvent,
    PlanStatus, PlanType, ScheduleEvent, ScheduleStatus,
};
use crate::engine::probability::{
    CompletionProbability, CompletionProbabilityEstimator, ProbabilityInput,
};
use crate::repository::{
    ActionLogRepository, AssignmentRepository, AssignmentTransition, LineRepository, PlanFilter,
    PlanRepository, RepositoryError, ScheduleRepository,
};

/// 参与估算的最近历史样本数
const SAMPLE_WINDOW: i64 = 20;

// ==========================================
// 请求 / 响应 DTO
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlanRequest {
    pub plan_date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddScheduleRequest {
    pub production_line_id: String,
    pub product_type_id: String,
    pub planned_quantity: i64,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateScheduleRequest {
    pub product_type_id: Option<String>,
    pub planned_quantity: Option<i64>,
    pub scheduled_start: Option<NaiveDateTime>,
    pub scheduled_end: Option<NaiveDateTime>,
    /// 客户端读取时的 revision, 不一致则拒绝
    pub revision: Option<i32>,
}

/// 紧急排程 (概率低于阈值)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgentSchedule {
    pub schedule: LineSchedule,
    pub probability: CompletionProbability,
    pub threshold: f64,
}

// ==========================================
// PlanApi - 排程计划 API
// ==========================================
pub struct PlanApi {
    plan_repo: Arc<PlanRepository>,
    schedule_repo: Arc<ScheduleRepository>,
    assignment_repo: Arc<AssignmentRepository>,
    line_repo: Arc<LineRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    config_manager: Arc<ConfigManager>,
    alert_manager: Arc<AlertManager>,
    estimator: CompletionProbabilityEstimator,
}

impl PlanApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plan_repo: Arc<PlanRepository>,
        schedule_repo: Arc<ScheduleRepository>,
        assignment_repo: Arc<AssignmentRepository>,
        line_repo: Arc<LineRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        config_manager: Arc<ConfigManager>,
        alert_manager: Arc<AlertManager>,
    ) -> Self {
        Self {
            plan_repo,
            schedule_repo,
            assignment_repo,
            line_repo,
            action_log_repo,
            config_manager,
            alert_manager,
            estimator: CompletionProbabilityEstimator::new(),
        }
    }

    // ==========================================
    // 计划管理
    // ==========================================

    /// 创建日常排程计划
    ///
    /// # 错误
    /// - `Conflict`: 该工厂当日已有未取消的计划
    #[instrument(skip(self, req, actor), fields(plan_date = %req.plan_date, actor = %actor.user_id))]
    pub fn create_plan(
        &self,
        factory_id: &str,
        req: CreatePlanRequest,
        actor: &Actor,
    ) -> ApiResult<SchedulingPlan> {
        let actor_id = actor.require_id()?;
        if factory_id.trim().is_empty() {
            return Err(ApiError::ValidationError("工厂编号不能为空".to_string()));
        }

        let now = crate::db::now();
        let plan = SchedulingPlan {
            plan_id: uuid::Uuid::new_v4().to_string(),
            factory_id: factory_id.to_string(),
            plan_date: req.plan_date,
            plan_type: PlanType::Regular,
            status: PlanStatus::Draft,
            source_slot_id: None,
            approval: UrgentInsertApproval::none(),
            notes: req.notes,
            created_by: actor_id.to_string(),
            created_at: now,
            updated_at: now,
            revision: 0,
        };

        match self.plan_repo.create(&plan) {
            Ok(_) => {}
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                return Err(ApiError::Conflict(format!(
                    "工厂 {} 在 {} 已有排程计划",
                    factory_id, req.plan_date
                )));
            }
            Err(e) => return Err(e.into()),
        }

        self.log(
            factory_id,
            ActionType::CreatePlan,
            "PLAN",
            &plan.plan_id,
            actor_id,
            Some(json!({ "plan_date": plan.plan_date.to_string() })),
            "创建排程计划",
        )?;
        tracing::info!(plan_id = %plan.plan_id, "排程计划已创建");
        Ok(plan)
    }

    /// 查询计划及其排程
    pub fn get_plan(&self, factory_id: &str, plan_id: &str) -> ApiResult<ProductionPlan> {
        let plan = self.load_plan(factory_id, plan_id)?;
        let schedules = self.schedule_repo.list_by_plan(plan_id)?;
        Ok(ProductionPlan { plan, schedules })
    }

    /// 分页查询计划
    ///
    /// # 错误
    /// - `ValidationError`: date_from 晚于 date_to
    pub fn list_plans(
        &self,
        factory_id: &str,
        filter: &PlanFilter,
        page: PageRequest,
    ) -> ApiResult<Page<SchedulingPlan>> {
        if let (Some(from), Some(to)) = (filter.date_from, filter.date_to) {
            if from > to {
                return Err(ApiError::ValidationError(format!(
                    "日期范围非法: {} > {}",
                    from, to
                )));
            }
        }
        let (items, total) = self
            .plan_repo
            .list(factory_id, filter, page.limit(), page.offset())?;
        Ok(Page::new(items, total, page))
    }

    /// 更新计划备注 (仅 DRAFT)
    pub fn update_plan(
        &self,
        factory_id: &str,
        plan_id: &str,
        notes: Option<String>,
        actor: &Actor,
    ) -> ApiResult<SchedulingPlan> {
        let actor_id = actor.require_id()?;
        let mut plan = self.load_plan(factory_id, plan_id)?;
        plan.status = plan.status.apply(PlanEvent::Edit)?;
        plan.notes = notes;
        plan.updated_at = crate::db::now();
        self.plan_repo.update(&plan)?;

        self.log(factory_id, ActionType::UpdatePlan, "PLAN", plan_id, actor_id, None, "更新计划")?;
        self.load_plan(factory_id, plan_id)
    }

    /// 确认计划
    ///
    /// 待审批的强制插单计划只能通过审批生效
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn confirm_plan(
        &self,
        factory_id: &str,
        plan_id: &str,
        actor: &Actor,
    ) -> ApiResult<SchedulingPlan> {
        let actor_id = actor.require_id()?;
        let mut plan = self.load_plan(factory_id, plan_id)?;
        if plan.approval.status == ApprovalStatus::PendingApproval {
            return Err(ApiError::InvalidStateTransition {
                entity: "SchedulingPlan".to_string(),
                from: ApprovalStatus::PendingApproval.to_string(),
                event: "CONFIRM".to_string(),
            });
        }
        plan.status = plan.status.apply(PlanEvent::Confirm)?;
        plan.updated_at = crate::db::now();
        self.plan_repo.update(&plan)?;

        self.log(factory_id, ActionType::ConfirmPlan, "PLAN", plan_id, actor_id, None, "确认计划")?;
        self.load_plan(factory_id, plan_id)
    }

    /// 取消计划, 其未终结排程一并取消
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn cancel_plan(
        &self,
        factory_id: &str,
        plan_id: &str,
        actor: &Actor,
    ) -> ApiResult<ProductionPlan> {
        let actor_id = actor.require_id()?;
        let mut plan = self.load_plan(factory_id, plan_id)?;
        if plan.approval.status == ApprovalStatus::PendingApproval {
            return Err(ApiError::InvalidStateTransition {
                entity: "SchedulingPlan".to_string(),
                from: ApprovalStatus::PendingApproval.to_string(),
                event: "CANCEL".to_string(),
            });
        }
        plan.status = plan.status.apply(PlanEvent::Cancel)?;
        let now = crate::db::now();
        plan.updated_at = now;

        let mut schedules = Vec::new();
        for mut schedule in self.schedule_repo.list_by_plan(plan_id)? {
            if schedule.status.is_terminal() {
                continue;
            }
            schedule.status = schedule.status.apply(ScheduleEvent::Cancel)?;
            schedule.updated_at = now;
            schedules.push(schedule);
        }

        // 计划与排程同一事务落库, 任一行并发修改则整体回滚
        let log = ActionLog::record(
            factory_id,
            ActionType::CancelPlan,
            "PLAN",
            plan_id,
            actor_id,
            Some(json!({ "cancelled_schedules": schedules.len() })),
            "取消计划",
        );
        self.plan_repo.update_with_schedules(&plan, &schedules, &log)?;
        self.get_plan(factory_id, plan_id)
    }

    // ==========================================
    // 产线排程
    // ==========================================

    /// 向 DRAFT 计划新增产线排程
    ///
    /// # 错误
    /// - `ValidationError`: 数量 ≤ 0 / 时间范围非法 / 产线不存在或不支持该产品
    /// - `Conflict`: 计划内该产线已有排程
    #[instrument(skip(self, req, actor), fields(line_id = %req.production_line_id))]
    pub fn add_schedule(
        &self,
        factory_id: &str,
        plan_id: &str,
        req: AddScheduleRequest,
        actor: &Actor,
    ) -> ApiResult<LineSchedule> {
        let actor_id = actor.require_id()?;
        let plan = self.load_plan(factory_id, plan_id)?;
        plan.status.apply(PlanEvent::Edit)?;
        validate_quantity(req.planned_quantity)?;
        validate_window(req.scheduled_start, req.scheduled_end)?;
        self.validate_line_product(factory_id, &req.production_line_id, &req.product_type_id)?;

        let schedule = LineSchedule {
            schedule_id: uuid::Uuid::new_v4().to_string(),
            plan_id: plan_id.to_string(),
            factory_id: factory_id.to_string(),
            production_line_id: req.production_line_id,
            product_type_id: req.product_type_id,
            planned_quantity: req.planned_quantity,
            completed_quantity: 0,
            status: ScheduleStatus::Pending,
            scheduled_start: req.scheduled_start,
            scheduled_end: req.scheduled_end,
            actual_start: None,
            actual_end: None,
            urgent_flag: false,
            updated_at: crate::db::now(),
            revision: 0,
        };

        match self.schedule_repo.insert(&schedule) {
            Ok(_) => {}
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                return Err(ApiError::Conflict(format!(
                    "计划 {} 内产线 {} 已有排程",
                    plan_id, schedule.production_line_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        self.log(
            factory_id,
            ActionType::AddSchedule,
            "SCHEDULE",
            &schedule.schedule_id,
            actor_id,
            serde_json::to_value(&schedule).ok(),
            "新增产线排程",
        )?;
        Ok(schedule)
    }

    pub fn get_schedule(&self, factory_id: &str, schedule_id: &str) -> ApiResult<LineSchedule> {
        self.load_schedule(factory_id, schedule_id)
    }

    /// 更新排程 (仅 PENDING)
    pub fn update_schedule(
        &self,
        factory_id: &str,
        schedule_id: &str,
        req: UpdateScheduleRequest,
        actor: &Actor,
    ) -> ApiResult<LineSchedule> {
        let actor_id = actor.require_id()?;
        let mut schedule = self.load_schedule(factory_id, schedule_id)?;
        if let Some(expected) = req.revision {
            if expected != schedule.revision {
                return Err(RepositoryError::OptimisticLockFailure {
                    entity: "LineSchedule".to_string(),
                    id: schedule_id.to_string(),
                    expected,
                    actual: schedule.revision,
                }
                .into());
            }
        }
        schedule.status = schedule.status.apply(ScheduleEvent::Edit)?;

        if let Some(product) = req.product_type_id {
            self.validate_line_product(factory_id, &schedule.production_line_id, &product)?;
            schedule.product_type_id = product;
        }
        if let Some(qty) = req.planned_quantity {
            validate_quantity(qty)?;
            schedule.planned_quantity = qty;
        }
        schedule.scheduled_start = req.scheduled_start.unwrap_or(schedule.scheduled_start);
        schedule.scheduled_end = req.scheduled_end.unwrap_or(schedule.scheduled_end);
        validate_window(schedule.scheduled_start, schedule.scheduled_end)?;
        schedule.updated_at = crate::db::now();
        self.schedule_repo.update(&schedule)?;

        self.log(
            factory_id,
            ActionType::UpdateSchedule,
            "SCHEDULE",
            schedule_id,
            actor_id,
            serde_json::to_value(&schedule).ok(),
            "更新产线排程",
        )?;
        self.load_schedule(factory_id, schedule_id)
    }

    /// 开工 (所属计划必须已生效)
    pub fn start_schedule(
        &self,
        factory_id: &str,
        schedule_id: &str,
        actor: &Actor,
    ) -> ApiResult<LineSchedule> {
        let actor_id = actor.require_id()?;
        let mut schedule = self.load_schedule(factory_id, schedule_id)?;
        let plan = self.load_plan(factory_id, &schedule.plan_id)?;
        if !plan.is_effective() {
            return Err(ApiError::InvalidStateTransition {
                entity: "SchedulingPlan".to_string(),
                from: plan.status.to_string(),
                event: "START_SCHEDULE".to_string(),
            });
        }
        schedule.status = schedule.status.apply(ScheduleEvent::Start)?;
        let now = crate::db::now();
        schedule.actual_start = Some(now);
        schedule.updated_at = now;
        self.schedule_repo.update(&schedule)?;

        self.log(factory_id, ActionType::StartSchedule, "SCHEDULE", schedule_id, actor_id, None, "开工")?;
        self.load_schedule(factory_id, schedule_id)
    }

    /// 报工
    ///
    /// # 错误
    /// - `ValidationError`: 完成数量不在 [0, planned_quantity]
    pub fn report_progress(
        &self,
        factory_id: &str,
        schedule_id: &str,
        completed_quantity: i64,
        actor: &Actor,
    ) -> ApiResult<LineSchedule> {
        let actor_id = actor.require_id()?;
        let mut schedule = self.load_schedule(factory_id, schedule_id)?;
        schedule.status = schedule.status.apply(ScheduleEvent::Progress)?;
        if completed_quantity < 0 || completed_quantity > schedule.planned_quantity {
            return Err(ApiError::ValidationError(format!(
                "完成数量 {} 超出 [0, {}]",
                completed_quantity, schedule.planned_quantity
            )));
        }
        schedule.completed_quantity = completed_quantity;
        schedule.updated_at = crate::db::now();
        self.schedule_repo.update(&schedule)?;

        self.log(
            factory_id,
            ActionType::ReportProgress,
            "SCHEDULE",
            schedule_id,
            actor_id,
            Some(json!({ "completed_quantity": completed_quantity })),
            "报工",
        )?;
        self.load_schedule(factory_id, schedule_id)
    }

    /// 完工, 并记录一条历史产出样本
    pub fn complete_schedule(
        &self,
        factory_id: &str,
        schedule_id: &str,
        completed_quantity: Option<i64>,
        actor: &Actor,
    ) -> ApiResult<LineSchedule> {
        let actor_id = actor.require_id()?;
        let mut schedule = self.load_schedule(factory_id, schedule_id)?;
        schedule.status = schedule.status.apply(ScheduleEvent::Complete)?;
        if let Some(qty) = completed_quantity {
            if qty < 0 {
                return Err(ApiError::ValidationError("完成数量不能为负".to_string()));
            }
            schedule.completed_quantity = qty;
        }
        let now = crate::db::now();
        schedule.actual_end = Some(now);
        schedule.updated_at = now;
        self.schedule_repo.update(&schedule)?;

        let started = schedule.actual_start.unwrap_or(schedule.scheduled_start);
        let hours = (now - started).num_seconds() as f64 / 3600.0;
        if hours > 0.0 && schedule.completed_quantity > 0 {
            self.line_repo.insert_sample(&ThroughputSample {
                sample_id: uuid::Uuid::new_v4().to_string(),
                line_id: schedule.production_line_id.clone(),
                product_type_id: schedule.product_type_id.clone(),
                quantity: schedule.completed_quantity,
                hours,
                recorded_at: now,
            })?;
        }

        self.log(
            factory_id,
            ActionType::CompleteSchedule,
            "SCHEDULE",
            schedule_id,
            actor_id,
            Some(json!({ "completed_quantity": schedule.completed_quantity })),
            "完工",
        )?;
        self.load_schedule(factory_id, schedule_id)
    }

    // ==========================================
    // 工人派工
    // ==========================================

    /// 批量派工
    ///
    /// # 错误
    /// - `ValidationError`: 工人列表为空 / 工人不在在岗名册
    /// - `Conflict`: 工人已派到该排程
    #[instrument(skip(self, worker_ids, actor), fields(count = worker_ids.len()))]
    pub fn assign_workers(
        &self,
        factory_id: &str,
        schedule_id: &str,
        worker_ids: Vec<String>,
        actor: &Actor,
    ) -> ApiResult<Vec<WorkerAssignment>> {
        let actor_id = actor.require_id()?;
        let schedule = self.load_schedule(factory_id, schedule_id)?;
        if schedule.status.is_terminal() {
            return Err(ApiError::InvalidStateTransition {
                entity: "LineSchedule".to_string(),
                from: schedule.status.to_string(),
                event: "ASSIGN_WORKERS".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let worker_ids: Vec<String> = worker_ids
            .into_iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty() && seen.insert(w.clone()))
            .collect();
        if worker_ids.is_empty() {
            return Err(ApiError::ValidationError("工人列表不能为空".to_string()));
        }

        let roster: HashSet<String> = self
            .line_repo
            .list_active_workers(factory_id)?
            .into_iter()
            .map(|w| w.worker_id)
            .collect();
        let unknown: Vec<&String> = worker_ids.iter().filter(|w| !roster.contains(*w)).collect();
        if !unknown.is_empty() {
            return Err(ApiError::ValidationError(format!(
                "工人不在在岗名册: {:?}",
                unknown
            )));
        }

        let now = crate::db::now();
        let assignments: Vec<WorkerAssignment> = worker_ids
            .iter()
            .map(|w| WorkerAssignment {
                assignment_id: uuid::Uuid::new_v4().to_string(),
                schedule_id: schedule_id.to_string(),
                worker_id: w.clone(),
                status: AssignmentStatus::Assigned,
                assigned_by: actor_id.to_string(),
                assigned_at: now,
                check_in_time: None,
                check_out_time: None,
                performance_score: None,
            })
            .collect();

        match self.assignment_repo.insert_batch(&assignments) {
            Ok(_) => {}
            Err(RepositoryError::UniqueConstraintViolation(_)) => {
                return Err(ApiError::Conflict(format!(
                    "部分工人已派到排程 {}",
                    schedule_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        self.log(
            factory_id,
            ActionType::AssignWorkers,
            "SCHEDULE",
            schedule_id,
            actor_id,
            Some(json!({ "worker_ids": worker_ids })),
            "派工",
        )?;
        Ok(assignments)
    }

    pub fn list_assignments(
        &self,
        factory_id: &str,
        schedule_id: &str,
    ) -> ApiResult<Vec<WorkerAssignment>> {
        self.load_schedule(factory_id, schedule_id)?;
        Ok(self.assignment_repo.list_by_schedule(schedule_id)?)
    }

    /// 撤销派工 (仅 ASSIGNED)
    pub fn remove_assignment(
        &self,
        factory_id: &str,
        assignment_id: &str,
        actor: &Actor,
    ) -> ApiResult<()> {
        let actor_id = actor.require_id()?;
        let assignment = self.load_assignment(factory_id, assignment_id)?;
        assignment.status.apply(AssignmentEvent::Remove)?;
        self.assignment_repo.delete_if_assigned(assignment_id)?;

        self.log(
            factory_id,
            ActionType::RemoveAssignment,
            "ASSIGNMENT",
            assignment_id,
            actor_id,
            Some(json!({ "worker_id": assignment.worker_id })),
            "撤销派工",
        )?;
        Ok(())
    }

    /// 签到
    pub fn check_in(
        &self,
        factory_id: &str,
        assignment_id: &str,
        actor: &Actor,
    ) -> ApiResult<WorkerAssignment> {
        let actor_id = actor.require_id()?;
        let assignment = self.load_assignment(factory_id, assignment_id)?;
        let next = assignment.status.apply(AssignmentEvent::CheckIn)?;

        let updated = self.assignment_repo.transition(
            assignment_id,
            &AssignmentTransition {
                expected: assignment.status,
                next,
                check_in_time: Some(crate::db::now()),
                check_out_time: None,
                performance_score: None,
            },
        )?;

        self.log(factory_id, ActionType::CheckIn, "ASSIGNMENT", assignment_id, actor_id, None, "签到")?;
        Ok(updated)
    }

    /// 签退
    ///
    /// # 错误
    /// - `ValidationError`: 绩效分不在 [0, 100]
    pub fn check_out(
        &self,
        factory_id: &str,
        assignment_id: &str,
        performance_score: Option<f64>,
        actor: &Actor,
    ) -> ApiResult<WorkerAssignment> {
        let actor_id = actor.require_id()?;
        if let Some(score) = performance_score {
            if !(0.0..=100.0).contains(&score) {
                return Err(ApiError::ValidationError(format!(
                    "绩效分必须在 [0, 100], 实际 {}",
                    score
                )));
            }
        }
        let assignment = self.load_assignment(factory_id, assignment_id)?;
        let next = assignment.status.apply(AssignmentEvent::CheckOut)?;

        let updated = self.assignment_repo.transition(
            assignment_id,
            &AssignmentTransition {
                expected: assignment.status,
                next,
                check_in_time: assignment.check_in_time,
                check_out_time: Some(crate::db::now()),
                performance_score,
            },
        )?;

        self.log(
            factory_id,
            ActionType::CheckOut,
            "ASSIGNMENT",
            assignment_id,
            actor_id,
            Some(json!({ "performance_score": performance_score })),
            "签退",
        )?;
        Ok(updated)
    }

    // ==========================================
    // 完成概率 / 紧急阈值
    // ==========================================

    /// 单条排程的完成概率 (同时刷新紧急标记)
    pub fn schedule_probability(
        &self,
        factory_id: &str,
        schedule_id: &str,
    ) -> ApiResult<CompletionProbability> {
        let schedule = self.load_schedule(factory_id, schedule_id)?;
        let threshold = self.config_manager.get_urgent_threshold(factory_id)?.threshold;
        let input = self.probability_input(schedule)?;
        let result = self
            .estimator
            .estimate(&input.schedule, &input.samples, input.rated_rate, crate::db::now());
        self.refresh_urgency(&input.schedule, &result, threshold)?;
        Ok(result)
    }

    /// 计划内所有排程的完成概率
    pub fn plan_probabilities(
        &self,
        factory_id: &str,
        plan_id: &str,
    ) -> ApiResult<Vec<CompletionProbability>> {
        self.load_plan(factory_id, plan_id)?;
        let schedules = self.schedule_repo.list_by_plan(plan_id)?;
        self.evaluate(factory_id, schedules)
            .map(|pairs| pairs.into_iter().map(|(_, p)| p).collect())
    }

    /// 工厂内概率低于阈值的未终结排程 (概率升序)
    #[instrument(skip(self))]
    pub fn list_urgent_schedules(&self, factory_id: &str) -> ApiResult<Vec<UrgentSchedule>> {
        let threshold = self.config_manager.get_urgent_threshold(factory_id)?.threshold;
        let schedules = self.schedule_repo.list_active_by_factory(factory_id)?;
        let mut urgent: Vec<UrgentSchedule> = self
            .evaluate(factory_id, schedules)?
            .into_iter()
            .filter(|(_, p)| p.probability < threshold)
            .map(|(schedule, probability)| UrgentSchedule {
                schedule,
                probability,
                threshold,
            })
            .collect();
        urgent.sort_by(|a, b| {
            a.probability
                .probability
                .partial_cmp(&b.probability.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(urgent)
    }

    pub fn get_urgent_threshold(&self, factory_id: &str) -> ApiResult<UrgentThreshold> {
        Ok(self.config_manager.get_urgent_threshold(factory_id)?)
    }

    /// 设置紧急阈值
    ///
    /// # 错误
    /// - `ValidationError`: 阈值不在 [0, 1]
    pub fn set_urgent_threshold(
        &self,
        factory_id: &str,
        threshold: f64,
        actor: &Actor,
    ) -> ApiResult<UrgentThreshold> {
        let actor_id = actor.require_id()?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ApiError::ValidationError(format!(
                "紧急阈值必须在 [0, 1], 实际 {}",
                threshold
            )));
        }
        let updated = self
            .config_manager
            .set_urgent_threshold(factory_id, threshold, actor_id)?;

        self.log(
            factory_id,
            ActionType::SetUrgentThreshold,
            "CONFIG",
            factory_id,
            actor_id,
            Some(json!({ "threshold": threshold })),
            "设置紧急阈值",
        )?;
        Ok(updated)
    }

    /// 工厂全部显式配置
    pub fn config_snapshot(&self, factory_id: &str) -> ApiResult<BTreeMap<String, String>> {
        Ok(self.config_manager.snapshot(factory_id)?)
    }

    /// 写入单项工厂配置
    ///
    /// # 错误
    /// - `ValidationError`: 已知键的取值非法
    pub fn update_config(
        &self,
        factory_id: &str,
        key: &str,
        value: &str,
        actor: &Actor,
    ) -> ApiResult<BTreeMap<String, String>> {
        let actor_id = actor.require_id()?;
        if key.trim().is_empty() {
            return Err(ApiError::ValidationError("配置键不能为空".to_string()));
        }
        self.config_manager
            .set_value(factory_id, key.trim(), value.trim(), actor_id)?;

        self.log(
            factory_id,
            ActionType::UpdateConfig,
            "CONFIG",
            key.trim(),
            actor_id,
            Some(json!({ "value": value.trim() })),
            "更新工厂配置",
        )?;
        self.config_snapshot(factory_id)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn load_plan(&self, factory_id: &str, plan_id: &str) -> ApiResult<SchedulingPlan> {
        self.plan_repo
            .find_by_id(plan_id)?
            .filter(|p| p.factory_id == factory_id)
            .ok_or_else(|| ApiError::not_found("SchedulingPlan", plan_id))
    }

    fn load_schedule(&self, factory_id: &str, schedule_id: &str) -> ApiResult<LineSchedule> {
        self.schedule_repo
            .find_by_id(schedule_id)?
            .filter(|s| s.factory_id == factory_id)
            .ok_or_else(|| ApiError::not_found("LineSchedule", schedule_id))
    }

    fn load_assignment(&self, factory_id: &str, assignment_id: &str) -> ApiResult<WorkerAssignment> {
        let assignment = self
            .assignment_repo
            .find_by_id(assignment_id)?
            .ok_or_else(|| ApiError::not_found("WorkerAssignment", assignment_id))?;
        // 通过排程校验工厂归属
        self.load_schedule(factory_id, &assignment.schedule_id)
            .map_err(|_| ApiError::not_found("WorkerAssignment", assignment_id))?;
        Ok(assignment)
    }

    fn validate_line_product(
        &self,
        factory_id: &str,
        line_id: &str,
        product_type_id: &str,
    ) -> ApiResult<()> {
        if product_type_id.trim().is_empty() {
            return Err(ApiError::ValidationError("产品类型不能为空".to_string()));
        }
        let profile = self
            .line_repo
            .find_profile(line_id)?
            .filter(|p| p.line.factory_id == factory_id)
            .ok_or_else(|| ApiError::ValidationError(format!("产线 {} 未登记", line_id)))?;
        if !profile.supports(product_type_id) {
            return Err(ApiError::ValidationError(format!(
                "产线 {} 不支持产品 {}",
                line_id, product_type_id
            )));
        }
        Ok(())
    }

    fn probability_input(&self, schedule: LineSchedule) -> ApiResult<ProbabilityInput> {
        load_probability_input(&self.line_repo, schedule)
    }

    /// 批量估算并刷新紧急标记
    fn evaluate(
        &self,
        factory_id: &str,
        schedules: Vec<LineSchedule>,
    ) -> ApiResult<Vec<(LineSchedule, CompletionProbability)>> {
        let threshold = self.config_manager.get_urgent_threshold(factory_id)?.threshold;
        let inputs = schedules
            .into_iter()
            .map(|s| self.probability_input(s))
            .collect::<ApiResult<Vec<_>>>()?;
        let results = self.estimator.estimate_batch(&inputs, crate::db::now());

        let mut out = Vec::with_capacity(results.len());
        for (input, result) in inputs.into_iter().zip(results) {
            self.refresh_urgency(&input.schedule, &result, threshold)?;
            out.push((input.schedule, result));
        }
        Ok(out)
    }

    /// 写入紧急标记; false → true 翻转时产生 URGENCY 预警
    fn refresh_urgency(
        &self,
        schedule: &LineSchedule,
        result: &CompletionProbability,
        threshold: f64,
    ) -> ApiResult<()> {
        if schedule.status.is_terminal() {
            return Ok(());
        }
        let urgent = result.probability < threshold;
        let flipped = self.schedule_repo.set_urgent_flag(&schedule.schedule_id, urgent)?;
        if flipped && urgent {
            self.alert_manager.raise(NewAlert {
                factory_id: schedule.factory_id.clone(),
                alert_type: AlertType::Urgency,
                severity: urgency_severity(result.probability, threshold),
                related_schedule_id: Some(schedule.schedule_id.clone()),
                related_plan_id: Some(schedule.plan_id.clone()),
                message: format!(
                    "产线 {} 排程完成概率 {:.2} 低于阈值 {:.2}",
                    schedule.production_line_id, result.probability, threshold
                ),
            })?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        factory_id: &str,
        action_type: ActionType,
        entity_type: &str,
        entity_id: &str,
        actor_id: &str,
        payload: Option<serde_json::Value>,
        detail: &str,
    ) -> ApiResult<()> {
        self.action_log_repo.insert(&ActionLog::record(
            factory_id,
            action_type,
            entity_type,
            entity_id,
            actor_id,
            payload,
            detail,
        ))?;
        Ok(())
    }
}

/// 组装估算输入 (最近样本 + 额定产能)
pub(crate) fn load_probability_input(
    line_repo: &LineRepository,
    schedule: LineSchedule,
) -> ApiResult<ProbabilityInput> {
    let samples = line_repo.list_recent_samples(
        &schedule.production_line_id,
        &schedule.product_type_id,
        SAMPLE_WINDOW,
    )?;
    let rated_rate = line_repo
        .find_profile(&schedule.production_line_id)?
        .map(|p| p.rate_for(Some(&schedule.product_type_id)));
    Ok(ProbabilityInput {
        schedule,
        samples,
        rated_rate,
    })
}

/// 概率低于阈值一半为 CRITICAL, 否则 WARNING
pub fn urgency_severity(probability: f64, threshold: f64) -> AlertSeverity {
    if probability < threshold / 2.0 {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    }
}

fn validate_quantity(qty: i64) -> ApiResult<()> {
    if qty <= 0 {
        return Err(ApiError::ValidationError(format!("数量必须 > 0, 实际 {}", qty)));
    }
    Ok(())
}

fn validate_window(start: NaiveDateTime, end: NaiveDateTime) -> ApiResult<()> {
    if start >= end {
        return Err(ApiError::ValidationError(format!(
            "时间范围非法: {} ≥ {}",
            start, end
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgency_severity() {
        assert_eq!(urgency_severity(0.2, 0.6), AlertSeverity::Critical);
        assert_eq!(urgency_severity(0.5, 0.6), AlertSeverity::Warning);
    }

    #[test]
    fn test_validate_window_and_quantity() {
        let t = chrono::NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        assert!(validate_window(t, t).is_err());
        assert!(validate_window(t, t + chrono::Duration::hours(1)).is_ok());
        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(1).is_ok());
    }
}
