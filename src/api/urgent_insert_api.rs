// ==========================================
// 工厂生产排程系统 - 紧急插单 API
// ==========================================
// 流程: 生成时段 → 查询推荐 → 影响分析 → 锁定 → 确认插单 / 强制插单 → 审批
// 红线:
// - 确认插单必须由锁定人在时段互斥锁内完成
// - 影响等级 HIGH 不允许直接确认, 只能走强制插单 + 审批
// - 时段占用 + 计划 + 排程 + 顺延 + 日志 在同一事务内落库
// ==========================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::api::actor::Actor;
use crate::api::alert_api::AlertManager;
use crate::api::error::{ApiError, ApiResult};
use crate::api::plan_api::load_probability_input;
use crate::api::slot_lock::SlotLockManager;
use crate::config::ConfigManager;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::alert::NewAlert;
use crate::domain::line::LineProfile;
use crate::domain::plan::{LineSchedule, ProductionPlan, SchedulingPlan, UrgentInsertApproval};
use crate::domain::slot::InsertSlot;
use crate::domain::types::{
    AlertSeverity, AlertType, ApprovalEvent, ApprovalStatus, LineStatus, PlanEvent, PlanStatus,
    PlanType, ScheduleEvent, ScheduleStatus, SlotEvent, SlotStatus,
};
use crate::engine::impact::{ImpactAnalysis, ImpactAnalyzer, ImpactInput};
use crate::engine::probability::CompletionProbabilityEstimator;
use crate::engine::slot_generator::{InsertSlotGenerator, LineWindowInput};
use crate::engine::slot_scorer::{InsertRequest, ScoredSlot, ScoringCandidate, SlotScorer};
use crate::repository::{
    ActionLogRepository, AssignmentRepository, DecisionCommit, InsertCommit, LineRepository, PlanRepository,
    ScheduleRepository, SlotCas, SlotRepository, UrgentInsertRepository,
};

/// 时段生成默认前瞻小时数
pub const DEFAULT_HORIZON_HOURS: i64 = 48;
/// 时段生成最大前瞻小时数
pub const MAX_HORIZON_HOURS: i64 = 720;
/// 影响分析的下游前瞻天数
const IMPACT_LOOKAHEAD_DAYS: i64 = 7;
/// 判断前序产品时的回看小时数
const PREVIOUS_LOOKBACK_HOURS: i64 = 24;
/// SlotUnavailable 附带的备选时段数
const ALTERNATIVES_LIMIT: usize = 10;

// ==========================================
// 请求 / 响应 DTO
// ==========================================

/// 插单请求 (确认插单与强制插单共用)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertOrderRequest {
    pub slot_id: String,
    pub product_type_id: String,
    pub quantity: i64,
    pub deadline: Option<NaiveDateTime>,
    pub notes: Option<String>,
    /// 强制插单原因
    pub reason: Option<String>,
}

impl InsertOrderRequest {
    fn as_insert_request(&self) -> InsertRequest {
        InsertRequest {
            product_type_id: Some(self.product_type_id.clone()),
            required_quantity: Some(self.quantity),
            deadline: self.deadline,
        }
    }
}

/// 审批决定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approve: bool,
    pub comment: Option<String>,
}

/// 时段生成 / 清扫结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateSlotsResult {
    pub generated: usize,
    /// 窗口已结束而过期
    pub expired: usize,
    /// 超时锁回收
    pub reclaimed: usize,
    /// 与新排程/停机重叠而失效
    pub invalidated: usize,
}

// ==========================================
// UrgentInsertApi - 紧急插单 API
// ==========================================
pub struct UrgentInsertApi {
    slot_repo: Arc<SlotRepository>,
    plan_repo: Arc<PlanRepository>,
    schedule_repo: Arc<ScheduleRepository>,
    line_repo: Arc<LineRepository>,
    assignment_repo: Arc<AssignmentRepository>,
    urgent_repo: Arc<UrgentInsertRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    config_manager: Arc<ConfigManager>,
    lock_manager: Arc<SlotLockManager>,
    alert_manager: Arc<AlertManager>,
    generator: InsertSlotGenerator,
    scorer: SlotScorer,
    analyzer: ImpactAnalyzer,
    estimator: CompletionProbabilityEstimator,
}

impl UrgentInsertApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        slot_repo: Arc<SlotRepository>,
        plan_repo: Arc<PlanRepository>,
        schedule_repo: Arc<ScheduleRepository>,
        line_repo: Arc<LineRepository>,
        assignment_repo: Arc<AssignmentRepository>,
        urgent_repo: Arc<UrgentInsertRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        config_manager: Arc<ConfigManager>,
        lock_manager: Arc<SlotLockManager>,
        alert_manager: Arc<AlertManager>,
    ) -> Self {
        Self {
            slot_repo,
            plan_repo,
            schedule_repo,
            line_repo,
            assignment_repo,
            urgent_repo,
            action_log_repo,
            config_manager,
            lock_manager,
            alert_manager,
            generator: InsertSlotGenerator::new(),
            scorer: SlotScorer::new(),
            analyzer: ImpactAnalyzer::new(),
            estimator: CompletionProbabilityEstimator::new(),
        }
    }

    // ==========================================
    // 时段生成与查询
    // ==========================================

    /// 生成候选插单时段
    ///
    /// 生成前先过期窗口已结束的时段、回收超时锁、失效与新占用重叠的空闲时段
    ///
    /// # 参数
    /// - `hours_ahead`: 前瞻小时数, 缺省 48, 范围 1..=720
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn generate_slots(
        &self,
        factory_id: &str,
        hours_ahead: Option<i64>,
        actor: &Actor,
    ) -> ApiResult<GenerateSlotsResult> {
        let actor_id = actor.require_id()?;
        let hours = hours_ahead.unwrap_or(DEFAULT_HORIZON_HOURS);
        if !(1..=MAX_HORIZON_HOURS).contains(&hours) {
            return Err(ApiError::ValidationError(format!(
                "前瞻小时数必须在 1..={} 之间, 实际 {}",
                MAX_HORIZON_HOURS, hours
            )));
        }

        let now = crate::db::now();
        let horizon_end = now + Duration::hours(hours);
        let mut result = GenerateSlotsResult {
            expired: self.slot_repo.expire_passed(factory_id, now)?,
            reclaimed: self.lock_manager.reclaim_stale(factory_id, now)?,
            ..Default::default()
        };

        let settings = self.config_manager.slot_settings(factory_id)?;
        let threshold = self.config_manager.get_urgent_threshold(factory_id)?.threshold;
        let weights = self.config_manager.scoring_weights(factory_id)?;
        let live = self.slot_repo.list_by_status(
            factory_id,
            &[SlotStatus::Available, SlotStatus::Locked, SlotStatus::Consumed],
        )?;

        let mut new_slots = Vec::new();
        for profile in self.line_repo.list_profiles(factory_id)? {
            let line_id = profile.line.line_id.clone();
            let schedules = self
                .schedule_repo
                .list_committed_by_line(&line_id, now, horizon_end)?;
            let downtime = self.line_repo.list_downtime(&line_id, now, horizon_end)?;

            // 1. 失效与新占用重叠的空闲时段
            let line_slots: Vec<InsertSlot> = live
                .iter()
                .filter(|s| s.production_line_id == line_id)
                .cloned()
                .collect();
            let stale: HashSet<String> = self
                .generator
                .stale_idle_slots(&line_slots, &schedules, &downtime)
                .into_iter()
                .collect();
            for slot in line_slots.iter().filter(|s| stale.contains(&s.slot_id)) {
                if self.lock_manager.expire_available(slot)? {
                    result.invalidated += 1;
                }
            }
            let existing: Vec<InsertSlot> = line_slots
                .into_iter()
                .filter(|s| !stale.contains(&s.slot_id))
                .collect();

            // 2. 生成 + 基础评分
            let input = LineWindowInput {
                profile: &profile,
                schedules: &schedules,
                downtime: &downtime,
                existing_slots: &existing,
            };
            for candidate in self
                .generator
                .generate_for_line(&input, &settings, now, horizon_end)
            {
                let urgent_deficits = self.urgent_deficits(
                    &schedules,
                    candidate.window_start,
                    candidate.window_end,
                    threshold,
                    now,
                )?;
                let slot = InsertSlot {
                    slot_id: uuid::Uuid::new_v4().to_string(),
                    factory_id: factory_id.to_string(),
                    production_line_id: candidate.production_line_id,
                    slot_kind: candidate.slot_kind,
                    window_start: candidate.window_start,
                    window_end: candidate.window_end,
                    available_capacity: candidate.available_capacity,
                    recommendation_score: 0.0,
                    status: SlotStatus::Available,
                    locked_by: None,
                    locked_at: None,
                    consumed_by_plan_id: None,
                    created_at: now,
                    updated_at: now,
                    revision: 0,
                };
                let scored = self.scorer.rank(
                    vec![ScoringCandidate {
                        slot,
                        compatible: true,
                        previous_product: None,
                        urgent_deficits,
                    }],
                    &InsertRequest::default(),
                    &weights,
                    threshold,
                );
                new_slots.extend(scored.into_iter().map(|s| s.slot));
            }
        }

        result.generated = self.slot_repo.insert_batch(&new_slots)?;
        self.log(
            factory_id,
            ActionType::GenerateSlots,
            "FACTORY",
            factory_id,
            actor_id,
            Some(json!({
                "hours_ahead": hours,
                "generated": result.generated,
                "expired": result.expired,
                "reclaimed": result.reclaimed,
                "invalidated": result.invalidated,
            })),
            "生成插单时段",
        )?;
        tracing::info!(
            factory_id,
            generated = result.generated,
            expired = result.expired,
            reclaimed = result.reclaimed,
            invalidated = result.invalidated,
            "插单时段生成完成"
        );
        Ok(result)
    }

    /// 按请求评分排序可用时段
    ///
    /// # 返回
    /// - 仅包含产线运行中且支持请求产品的 AVAILABLE 时段, 按总分降序
    #[instrument(skip(self, request))]
    pub fn list_available_slots(
        &self,
        factory_id: &str,
        request: &InsertRequest,
    ) -> ApiResult<Vec<ScoredSlot>> {
        validate_request(request)?;
        let now = crate::db::now();
        let threshold = self.config_manager.get_urgent_threshold(factory_id)?.threshold;
        let weights = self.config_manager.scoring_weights(factory_id)?;
        let profiles: HashMap<String, LineProfile> = self
            .line_repo
            .list_profiles(factory_id)?
            .into_iter()
            .map(|p| (p.line.line_id.clone(), p))
            .collect();

        let mut candidates = Vec::new();
        for slot in self
            .slot_repo
            .list_by_status(factory_id, &[SlotStatus::Available])?
            .into_iter()
            .filter(|s| s.window_end > now)
        {
            let Some(profile) = profiles.get(&slot.production_line_id) else {
                continue;
            };
            let compatible = profile.line.status == LineStatus::Active
                && request
                    .product_type_id
                    .as_deref()
                    .map(|p| profile.supports(p))
                    .unwrap_or(true);
            if !compatible {
                continue;
            }

            let nearby = self.schedule_repo.list_committed_by_line(
                &slot.production_line_id,
                slot.window_start - Duration::hours(PREVIOUS_LOOKBACK_HOURS),
                slot.window_end,
            )?;
            let previous_product = previous_product(&nearby, slot.window_start);
            let urgent_deficits =
                self.urgent_deficits(&nearby, slot.window_start, slot.window_end, threshold, now)?;
            candidates.push(ScoringCandidate {
                slot,
                compatible,
                previous_product,
                urgent_deficits,
            });
        }

        Ok(self.scorer.rank(candidates, request, &weights, threshold))
    }

    pub fn get_slot(&self, factory_id: &str, slot_id: &str) -> ApiResult<InsertSlot> {
        self.load_slot(factory_id, slot_id)
    }

    /// 分析在时段插单对下游的影响 (只读)
    ///
    /// # 错误
    /// - `SlotUnavailable`: 时段已占用或已过期
    pub fn analyze_impact(
        &self,
        factory_id: &str,
        slot_id: &str,
        request: &InsertRequest,
    ) -> ApiResult<ImpactAnalysis> {
        validate_request(request)?;
        let slot = self.load_slot(factory_id, slot_id)?;
        if !matches!(slot.status, SlotStatus::Available | SlotStatus::Locked) {
            return self.with_alternatives(
                factory_id,
                Err(ApiError::slot_unavailable(
                    slot_id,
                    format!("时段当前状态为 {}", slot.status),
                )),
            );
        }
        self.impact_for(&slot, request, None)
    }

    // ==========================================
    // 锁定 / 释放
    // ==========================================

    pub fn lock_slot(&self, factory_id: &str, slot_id: &str, actor: &Actor) -> ApiResult<InsertSlot> {
        let result = self.lock_manager.lock(factory_id, slot_id, actor);
        self.with_alternatives(factory_id, result)
    }

    pub fn unlock_slot(
        &self,
        factory_id: &str,
        slot_id: &str,
        actor: &Actor,
    ) -> ApiResult<InsertSlot> {
        let result = self.lock_manager.unlock(factory_id, slot_id, actor);
        self.with_alternatives(factory_id, result)
    }

    // ==========================================
    // 插单
    // ==========================================

    /// 确认插单 (影响等级 ≤ MEDIUM)
    ///
    /// # 错误
    /// - `InvalidStateTransition`: 时段未锁定
    /// - `SlotUnavailable`: 时段由他人锁定或已被占用
    /// - `ForceInsertRequired`: 影响等级 HIGH, 附完整影响分析
    #[instrument(skip(self, req, actor), fields(slot_id = %req.slot_id, actor = %actor.user_id))]
    pub fn confirm_insert(
        &self,
        factory_id: &str,
        req: InsertOrderRequest,
        actor: &Actor,
    ) -> ApiResult<ProductionPlan> {
        let actor_id = actor.require_id()?;
        validate_order(&req)?;
        let request = req.as_insert_request();

        let result = self.lock_manager.with_slot(&req.slot_id, || {
            let slot = self.lock_manager.require_held(factory_id, &req.slot_id, actor_id)?;
            self.require_supported(&slot, &req.product_type_id)?;
            let impact = self.impact_for(&slot, &request, None)?;
            if !impact.impact_level.allows_direct_confirm() {
                return Err(ApiError::ForceInsertRequired {
                    impact: Box::new(impact),
                });
            }

            let now = crate::db::now();
            let status = PlanStatus::Draft.apply(PlanEvent::Confirm)?;
            let plan = new_insert_plan(
                factory_id,
                &slot,
                status,
                UrgentInsertApproval::none(),
                req.notes.clone(),
                actor_id,
                now,
            );
            let schedule = new_insert_schedule(&plan, &slot, &req, &impact, now);
            let cas = consume_cas(&slot, &plan.plan_id, now)?;
            let shifts = impact.shifts();
            let log = ActionLog::record(
                factory_id,
                ActionType::ConfirmInsert,
                "PLAN",
                &plan.plan_id,
                actor_id,
                Some(json!({
                    "slot_id": slot.slot_id,
                    "product_type_id": req.product_type_id,
                    "quantity": req.quantity,
                    "impact_level": impact.impact_level.to_string(),
                    "shifted": shifts.len(),
                })),
                "确认紧急插单",
            );
            self.urgent_repo.commit_insert(&InsertCommit {
                slot_cas: &cas,
                plan: &plan,
                schedule: &schedule,
                shifts: &shifts,
                log: &log,
            })?;
            tracing::info!(
                plan_id = %plan.plan_id,
                impact_level = %impact.impact_level,
                shifted = shifts.len(),
                "紧急插单已确认"
            );
            Ok((plan.plan_id, schedule.schedule_id, impact))
        });

        let (plan_id, schedule_id, impact) = self.with_alternatives(factory_id, result)?;
        self.raise_impact_alert(factory_id, &plan_id, &schedule_id, &impact)?;
        self.load_production_plan(factory_id, &plan_id)
    }

    /// 强制插单: 计划保持 DRAFT, 审批状态 PENDING_APPROVAL, 时段立即占用
    ///
    /// 下游顺延在批准时按当时的排程重新计算
    #[instrument(skip(self, req, actor), fields(slot_id = %req.slot_id, actor = %actor.user_id))]
    pub fn force_insert(
        &self,
        factory_id: &str,
        req: InsertOrderRequest,
        actor: &Actor,
    ) -> ApiResult<ProductionPlan> {
        let actor_id = actor.require_id()?;
        validate_order(&req)?;
        let request = req.as_insert_request();
        let reason = req
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let result = self.lock_manager.with_slot(&req.slot_id, || {
            let slot = self.lock_manager.require_held(factory_id, &req.slot_id, actor_id)?;
            self.require_supported(&slot, &req.product_type_id)?;
            let impact = self.impact_for(&slot, &request, None)?;

            let now = crate::db::now();
            let approval = UrgentInsertApproval {
                status: ApprovalStatus::None.apply(ApprovalEvent::Submit)?,
                requested_by: Some(actor_id.to_string()),
                request_reason: reason.clone(),
                ..UrgentInsertApproval::none()
            };
            let plan = new_insert_plan(
                factory_id,
                &slot,
                PlanStatus::Draft,
                approval,
                req.notes.clone(),
                actor_id,
                now,
            );
            let schedule = new_insert_schedule(&plan, &slot, &req, &impact, now);
            let cas = consume_cas(&slot, &plan.plan_id, now)?;
            let log = ActionLog::record(
                factory_id,
                ActionType::ForceInsert,
                "PLAN",
                &plan.plan_id,
                actor_id,
                Some(json!({
                    "slot_id": slot.slot_id,
                    "product_type_id": req.product_type_id,
                    "quantity": req.quantity,
                    "impact_level": impact.impact_level.to_string(),
                    "reason": reason,
                })),
                "强制插单, 等待审批",
            );
            self.urgent_repo.commit_insert(&InsertCommit {
                slot_cas: &cas,
                plan: &plan,
                schedule: &schedule,
                shifts: &[],
                log: &log,
            })?;
            tracing::warn!(
                plan_id = %plan.plan_id,
                impact_level = %impact.impact_level,
                "强制插单已提交审批"
            );
            Ok((plan.plan_id, schedule.schedule_id, impact))
        });

        let (plan_id, schedule_id, impact) = self.with_alternatives(factory_id, result)?;
        self.raise_impact_alert(factory_id, &plan_id, &schedule_id, &impact)?;
        self.load_production_plan(factory_id, &plan_id)
    }

    // ==========================================
    // 审批
    // ==========================================

    pub fn list_pending_approvals(&self, factory_id: &str) -> ApiResult<Vec<ProductionPlan>> {
        self.plan_repo
            .list_pending_approvals(factory_id)?
            .into_iter()
            .map(|plan| {
                let schedules = self.schedule_repo.list_by_plan(&plan.plan_id)?;
                Ok(ProductionPlan { plan, schedules })
            })
            .collect()
    }

    /// 审批强制插单
    ///
    /// - 批准: 计划生效, 按当前排程重新计算并顺延下游
    /// - 驳回: 计划与排程取消, 时段窗口未结束则归还, 否则过期
    ///
    /// # 错误
    /// - `Unauthorized`: 非审批人
    /// - `InvalidStateTransition`: 计划不在待审批状态 (含重复审批)
    /// - `ValidationError`: 驳回未填写原因
    /// - `OptimisticLockFailure`: 并发审批
    #[instrument(skip(self, decision, actor), fields(approve = decision.approve, actor = %actor.user_id))]
    pub fn decide_force_insert(
        &self,
        factory_id: &str,
        plan_id: &str,
        decision: ApprovalDecision,
        actor: &Actor,
    ) -> ApiResult<ProductionPlan> {
        let actor_id = actor.require_id()?;
        self.require_approver(factory_id, actor, actor_id)?;

        let plan = self.load_plan(factory_id, plan_id)?;
        let event = if decision.approve {
            ApprovalEvent::Approve
        } else {
            ApprovalEvent::Reject
        };
        let next_approval = plan.approval.status.apply(event)?;
        let comment = decision
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if !decision.approve && comment.is_none() {
            return Err(ApiError::ValidationError("驳回必须填写原因".to_string()));
        }

        let guard_key = plan.source_slot_id.clone().unwrap_or_else(|| plan_id.to_string());
        self.lock_manager.with_slot(&guard_key, || {
            let now = crate::db::now();
            let schedules = self.schedule_repo.list_by_plan(plan_id)?;
            let slot = match plan.source_slot_id.as_deref() {
                Some(id) => self.slot_repo.find_by_id(id)?,
                None => None,
            };

            let mut decided = plan.clone();
            decided.approval = UrgentInsertApproval {
                status: next_approval,
                approver_id: Some(actor_id.to_string()),
                decision_comment: comment.clone(),
                decided_at: Some(now),
                ..plan.approval.clone()
            };
            decided.updated_at = now;

            if decision.approve {
                decided.status = plan.status.apply(PlanEvent::Confirm)?;
                let shifts = match (slot.as_ref(), schedules.first()) {
                    (Some(slot), Some(own)) => {
                        let request = InsertRequest {
                            product_type_id: Some(own.product_type_id.clone()),
                            required_quantity: Some(own.planned_quantity),
                            deadline: None,
                        };
                        self.impact_for(slot, &request, Some(plan_id))?.shifts()
                    }
                    _ => Vec::new(),
                };
                let log = ActionLog::record(
                    factory_id,
                    ActionType::ApproveInsert,
                    "PLAN",
                    plan_id,
                    actor_id,
                    Some(json!({ "comment": comment, "shifted": shifts.len() })),
                    "批准强制插单",
                );
                self.urgent_repo.commit_decision(&DecisionCommit {
                    plan: &decided,
                    slot_cas: None,
                    schedules: &[],
                    shifts: &shifts,
                    log: &log,
                })?;
                tracing::info!(plan_id, shifted = shifts.len(), "强制插单已批准");
            } else {
                decided.status = plan.status.apply(PlanEvent::Cancel)?;
                let mut cancelled = Vec::new();
                for s in schedules.iter().filter(|s| !s.status.is_terminal()) {
                    let mut s = s.clone();
                    s.status = s.status.apply(ScheduleEvent::Cancel)?;
                    s.updated_at = now;
                    cancelled.push(s);
                }
                let cas = match slot.as_ref() {
                    Some(slot)
                        if slot.status == SlotStatus::Consumed
                            && slot.consumed_by_plan_id.as_deref() == Some(plan_id) =>
                    {
                        Some(release_cas(slot, now)?)
                    }
                    _ => None,
                };
                let log = ActionLog::record(
                    factory_id,
                    ActionType::RejectInsert,
                    "PLAN",
                    plan_id,
                    actor_id,
                    Some(json!({
                        "comment": comment,
                        "slot_status": cas.as_ref().map(|c| c.next_status.to_string()),
                    })),
                    "驳回强制插单",
                );
                self.urgent_repo.commit_decision(&DecisionCommit {
                    plan: &decided,
                    slot_cas: cas.as_ref(),
                    schedules: &cancelled,
                    shifts: &[],
                    log: &log,
                })?;
                tracing::info!(plan_id, "强制插单已驳回");
            }
            Ok(())
        })?;

        if !decision.approve {
            let requester = plan.approval.requested_by.as_deref().unwrap_or("-");
            self.alert_manager.raise(NewAlert {
                factory_id: factory_id.to_string(),
                alert_type: AlertType::ForceInsertRejected,
                severity: AlertSeverity::Warning,
                related_schedule_id: None,
                related_plan_id: Some(plan_id.to_string()),
                message: format!(
                    "{} 提交的强制插单被 {} 驳回: {}",
                    requester,
                    actor_id,
                    comment.as_deref().unwrap_or("-")
                ),
            })?;
        }
        self.load_production_plan(factory_id, plan_id)
    }

    // ==========================================
    // 定时清扫
    // ==========================================

    /// 已登记产线的工厂
    pub fn factory_ids(&self) -> ApiResult<Vec<String>> {
        Ok(self.line_repo.list_factory_ids()?)
    }

    /// 定时清扫: 过期 / 回收 / 失效 / 补充生成
    pub fn sweep(&self, factory_id: &str, horizon_hours: i64) -> ApiResult<GenerateSlotsResult> {
        let result = self.generate_slots(factory_id, Some(horizon_hours), &Actor::system())?;
        let pruned = self.lock_manager.prune_guards();
        tracing::debug!(factory_id, pruned, "时段互斥锁条目已清理");
        Ok(result)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn impact_for(
        &self,
        slot: &InsertSlot,
        request: &InsertRequest,
        exclude_plan_id: Option<&str>,
    ) -> ApiResult<ImpactAnalysis> {
        let profile = self
            .line_repo
            .find_profile(&slot.production_line_id)?
            .ok_or_else(|| ApiError::not_found("ProductionLine", &slot.production_line_id))?;
        let settings = self.config_manager.impact_settings(&slot.factory_id)?;
        let horizon = slot.window_start + Duration::days(IMPACT_LOOKAHEAD_DAYS);

        let nearby: Vec<LineSchedule> = self
            .schedule_repo
            .list_committed_by_line(
                &slot.production_line_id,
                slot.window_start - Duration::hours(PREVIOUS_LOOKBACK_HOURS),
                horizon,
            )?
            .into_iter()
            .filter(|s| Some(s.plan_id.as_str()) != exclude_plan_id)
            .collect();
        let previous = previous_product(&nearby, slot.window_start);
        let downstream: Vec<LineSchedule> = nearby
            .into_iter()
            .filter(|s| s.scheduled_end > slot.window_start)
            .collect();
        let downtime =
            self.line_repo
                .list_downtime(&slot.production_line_id, slot.window_start, horizon)?;

        let material_available = match request.product_type_id.as_deref() {
            Some(product) => self
                .line_repo
                .find_stock(&slot.factory_id, product)?
                .map(|s| s.available_quantity),
            None => None,
        };
        let busy: HashSet<String> = self
            .assignment_repo
            .list_busy_worker_ids(&slot.factory_id, slot.window_start, slot.window_end)?
            .into_iter()
            .collect();
        let available_workers = self
            .line_repo
            .list_active_workers(&slot.factory_id)?
            .iter()
            .filter(|w| !busy.contains(&w.worker_id))
            .count();

        let input = ImpactInput {
            slot,
            profile: &profile,
            request,
            previous_product: previous.as_deref(),
            downstream: &downstream,
            downtime: &downtime,
            material_available,
            available_workers,
        };
        Ok(self.analyzer.analyze(&input, &settings))
    }

    /// 窗口内同产线紧急排程的概率缺口
    fn urgent_deficits(
        &self,
        schedules: &[LineSchedule],
        start: NaiveDateTime,
        end: NaiveDateTime,
        threshold: f64,
        now: NaiveDateTime,
    ) -> ApiResult<Vec<f64>> {
        let inputs = schedules
            .iter()
            .filter(|s| s.overlaps(start, end))
            .map(|s| load_probability_input(&self.line_repo, s.clone()))
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(self
            .estimator
            .estimate_batch(&inputs, now)
            .into_iter()
            .filter(|p| p.probability < threshold)
            .map(|p| threshold - p.probability)
            .collect())
    }

    /// SlotUnavailable 时附带当前可用的备选时段
    fn with_alternatives<T>(&self, factory_id: &str, result: ApiResult<T>) -> ApiResult<T> {
        match result {
            Err(ApiError::SlotUnavailable { slot_id, reason, .. }) => {
                let now = crate::db::now();
                let mut alternatives = self
                    .slot_repo
                    .list_by_status(factory_id, &[SlotStatus::Available])
                    .unwrap_or_else(|e| {
                        tracing::warn!(error = %e, "查询备选时段失败");
                        Vec::new()
                    });
                alternatives.retain(|s| s.slot_id != slot_id && s.window_end > now);
                alternatives.sort_by(|a, b| {
                    b.recommendation_score
                        .partial_cmp(&a.recommendation_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.window_start.cmp(&b.window_start))
                });
                alternatives.truncate(ALTERNATIVES_LIMIT);
                Err(ApiError::SlotUnavailable {
                    slot_id,
                    reason,
                    alternatives,
                })
            }
            other => other,
        }
    }

    fn raise_impact_alert(
        &self,
        factory_id: &str,
        plan_id: &str,
        schedule_id: &str,
        impact: &ImpactAnalysis,
    ) -> ApiResult<()> {
        let Some(severity) = impact.impact_level.alert_severity() else {
            return Ok(());
        };
        self.alert_manager.raise(NewAlert {
            factory_id: factory_id.to_string(),
            alert_type: AlertType::InsertImpact,
            severity,
            related_schedule_id: Some(schedule_id.to_string()),
            related_plan_id: Some(plan_id.to_string()),
            message: format!(
                "插单影响等级 {}: {}",
                impact.impact_level,
                impact.reasons.join("; ")
            ),
        })?;
        Ok(())
    }

    fn require_supported(&self, slot: &InsertSlot, product_type_id: &str) -> ApiResult<()> {
        let profile = self
            .line_repo
            .find_profile(&slot.production_line_id)?
            .ok_or_else(|| ApiError::not_found("ProductionLine", &slot.production_line_id))?;
        if !profile.supports(product_type_id) {
            return Err(ApiError::ValidationError(format!(
                "产线 {} 不支持产品 {}",
                slot.production_line_id, product_type_id
            )));
        }
        Ok(())
    }

    fn require_approver(&self, factory_id: &str, actor: &Actor, actor_id: &str) -> ApiResult<()> {
        if actor.has_approver_role()
            || self
                .config_manager
                .approver_ids(factory_id)?
                .iter()
                .any(|id| id == actor_id)
        {
            return Ok(());
        }
        Err(ApiError::Unauthorized(format!("{} 无审批权限", actor_id)))
    }

    fn load_slot(&self, factory_id: &str, slot_id: &str) -> ApiResult<InsertSlot> {
        self.slot_repo
            .find_by_id(slot_id)?
            .filter(|s| s.factory_id == factory_id)
            .ok_or_else(|| ApiError::not_found("InsertSlot", slot_id))
    }

    fn load_plan(&self, factory_id: &str, plan_id: &str) -> ApiResult<SchedulingPlan> {
        self.plan_repo
            .find_by_id(plan_id)?
            .filter(|p| p.factory_id == factory_id)
            .ok_or_else(|| ApiError::not_found("SchedulingPlan", plan_id))
    }

    fn load_production_plan(&self, factory_id: &str, plan_id: &str) -> ApiResult<ProductionPlan> {
        let plan = self.load_plan(factory_id, plan_id)?;
        let schedules = self.schedule_repo.list_by_plan(plan_id)?;
        Ok(ProductionPlan { plan, schedules })
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

// ==========================================
// 纯函数
// ==========================================

/// 窗口开始前最近一条排程的产品
fn previous_product(schedules: &[LineSchedule], at: NaiveDateTime) -> Option<String> {
    schedules
        .iter()
        .filter(|s| s.scheduled_start < at)
        .max_by_key(|s| s.scheduled_start)
        .map(|s| s.product_type_id.clone())
}

fn new_insert_plan(
    factory_id: &str,
    slot: &InsertSlot,
    status: PlanStatus,
    approval: UrgentInsertApproval,
    notes: Option<String>,
    actor_id: &str,
    now: NaiveDateTime,
) -> SchedulingPlan {
    SchedulingPlan {
        plan_id: uuid::Uuid::new_v4().to_string(),
        factory_id: factory_id.to_string(),
        plan_date: slot.window_start.date(),
        plan_type: PlanType::UrgentInsert,
        status,
        source_slot_id: Some(slot.slot_id.clone()),
        approval,
        notes,
        created_by: actor_id.to_string(),
        created_at: now,
        updated_at: now,
        revision: 0,
    }
}

fn new_insert_schedule(
    plan: &SchedulingPlan,
    slot: &InsertSlot,
    req: &InsertOrderRequest,
    impact: &ImpactAnalysis,
    now: NaiveDateTime,
) -> LineSchedule {
    let start = impact.insert_start;
    let end = impact.insert_end.max(start + Duration::minutes(1));
    LineSchedule {
        schedule_id: uuid::Uuid::new_v4().to_string(),
        plan_id: plan.plan_id.clone(),
        factory_id: plan.factory_id.clone(),
        production_line_id: slot.production_line_id.clone(),
        product_type_id: req.product_type_id.clone(),
        planned_quantity: req.quantity,
        completed_quantity: 0,
        status: ScheduleStatus::Pending,
        scheduled_start: start,
        scheduled_end: end,
        actual_start: None,
        actual_end: None,
        urgent_flag: false,
        updated_at: now,
        revision: 0,
    }
}

/// LOCKED → CONSUMED
fn consume_cas(slot: &InsertSlot, plan_id: &str, now: NaiveDateTime) -> ApiResult<SlotCas> {
    Ok(SlotCas {
        slot_id: slot.slot_id.clone(),
        expected_status: slot.status,
        expected_revision: slot.revision,
        next_status: slot.status.apply(SlotEvent::Consume)?,
        locked_by: slot.locked_by.clone(),
        locked_at: slot.locked_at,
        consumed_by_plan_id: Some(plan_id.to_string()),
        updated_at: now,
    })
}

/// 驳回后的时段: 窗口未结束归还, 否则过期
fn release_cas(slot: &InsertSlot, now: NaiveDateTime) -> ApiResult<SlotCas> {
    let event = if slot.window_end > now {
        SlotEvent::Reinstate
    } else {
        SlotEvent::Expire
    };
    Ok(SlotCas {
        slot_id: slot.slot_id.clone(),
        expected_status: slot.status,
        expected_revision: slot.revision,
        next_status: slot.status.apply(event)?,
        locked_by: None,
        locked_at: None,
        consumed_by_plan_id: None,
        updated_at: now,
    })
}

fn validate_request(request: &InsertRequest) -> ApiResult<()> {
    if let Some(qty) = request.required_quantity {
        if qty <= 0 {
            return Err(ApiError::ValidationError(format!(
                "需求数量必须 > 0, 实际 {}",
                qty
            )));
        }
    }
    Ok(())
}

fn validate_order(req: &InsertOrderRequest) -> ApiResult<()> {
    if req.slot_id.trim().is_empty() || req.product_type_id.trim().is_empty() {
        return Err(ApiError::ValidationError("时段与产品类型不能为空".to_string()));
    }
    if req.quantity <= 0 {
        return Err(ApiError::ValidationError(format!(
            "插单数量必须 > 0, 实际 {}",
            req.quantity
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn schedule(id: &str, product: &str, start: u32, end: u32) -> LineSchedule {
        LineSchedule {
            schedule_id: id.to_string(),
            plan_id: "P1".to_string(),
            factory_id: "F1".to_string(),
            production_line_id: "L1".to_string(),
            product_type_id: product.to_string(),
            planned_quantity: 100,
            completed_quantity: 0,
            status: ScheduleStatus::Pending,
            scheduled_start: ts(start),
            scheduled_end: ts(end),
            actual_start: None,
            actual_end: None,
            urgent_flag: false,
            updated_at: ts(0),
            revision: 0,
        }
    }

    fn slot(status: SlotStatus, window_end: NaiveDateTime) -> InsertSlot {
        InsertSlot {
            slot_id: "S1".to_string(),
            factory_id: "F1".to_string(),
            production_line_id: "L1".to_string(),
            slot_kind: crate::domain::types::SlotKind::Idle,
            window_start: ts(8),
            window_end,
            available_capacity: 100,
            recommendation_score: 0.5,
            status,
            locked_by: Some("u1".to_string()),
            locked_at: Some(ts(7)),
            consumed_by_plan_id: Some("P9".to_string()),
            created_at: ts(0),
            updated_at: ts(0),
            revision: 3,
        }
    }

    #[test]
    fn test_previous_product_picks_latest_before_window() {
        let schedules = vec![
            schedule("A", "X", 2, 4),
            schedule("B", "Y", 5, 8),
            schedule("C", "Z", 8, 10),
        ];
        assert_eq!(previous_product(&schedules, ts(8)).as_deref(), Some("Y"));
        assert_eq!(previous_product(&schedules, ts(2)), None);
    }

    #[test]
    fn test_release_cas_reinstates_or_expires() {
        let open = slot(SlotStatus::Consumed, ts(12));
        let cas = release_cas(&open, ts(9)).unwrap();
        assert_eq!(cas.next_status, SlotStatus::Available);
        assert_eq!(cas.expected_revision, 3);
        assert!(cas.locked_by.is_none());
        assert!(cas.consumed_by_plan_id.is_none());

        let passed = slot(SlotStatus::Consumed, ts(12));
        let cas = release_cas(&passed, ts(13)).unwrap();
        assert_eq!(cas.next_status, SlotStatus::Expired);
    }

    #[test]
    fn test_consume_requires_locked_slot() {
        let locked = slot(SlotStatus::Locked, ts(12));
        let cas = consume_cas(&locked, "P2", ts(9)).unwrap();
        assert_eq!(cas.next_status, SlotStatus::Consumed);
        assert_eq!(cas.consumed_by_plan_id.as_deref(), Some("P2"));

        let available = slot(SlotStatus::Available, ts(12));
        assert!(consume_cas(&available, "P2", ts(9)).is_err());
    }

    #[test]
    fn test_validate_order() {
        let mut req = InsertOrderRequest {
            slot_id: "S1".to_string(),
            product_type_id: "X".to_string(),
            quantity: 10,
            deadline: None,
            notes: None,
            reason: None,
        };
        assert!(validate_order(&req).is_ok());
        req.quantity = 0;
        assert!(matches!(validate_order(&req), Err(ApiError::ValidationError(_))));
        assert!(validate_request(&InsertRequest {
            required_quantity: Some(-1),
            ..Default::default()
        })
        .is_err());
    }
}
