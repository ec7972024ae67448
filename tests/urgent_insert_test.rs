// ==========================================
// 紧急插单集成测试
// ==========================================
// 测试范围:
// 1. 时段生成 / 失效 / 锁定 / 释放 / 超时回收
// 2. 确认插单 (LOW / MEDIUM + 下游顺延)
// 3. HIGH 影响 → 强制插单 → 审批 (批准 / 驳回)
// ==========================================

mod test_helpers;

use chrono::Duration;
use std::thread;

use factory_scheduling::api::{Actor, ApiError, ApprovalDecision, InsertOrderRequest, PageRequest};
use factory_scheduling::domain::types::{
    AlertSeverity, AlertType, ApprovalStatus, ImpactLevel, PlanStatus, PlanType, ScheduleStatus,
    SlotKind, SlotStatus,
};
use factory_scheduling::repository::row_mapping::fmt_ts;
use factory_scheduling::repository::{AlertFilter, PlanFilter};
use test_helpers::*;

fn order(slot_id: &str, quantity: i64) -> InsertOrderRequest {
    InsertOrderRequest {
        slot_id: slot_id.to_string(),
        product_type_id: PRODUCT.to_string(),
        quantity,
        deadline: None,
        notes: Some("客户加急".to_string()),
        reason: None,
    }
}

fn approve(comment: Option<&str>) -> ApprovalDecision {
    ApprovalDecision {
        approve: true,
        comment: comment.map(str::to_string),
    }
}

fn reject(comment: Option<&str>) -> ApprovalDecision {
    ApprovalDecision {
        approve: false,
        comment: comment.map(str::to_string),
    }
}

fn alerts_of(
    state: &factory_scheduling::app::AppState,
    alert_type: AlertType,
) -> Vec<factory_scheduling::domain::alert::SchedulingAlert> {
    state
        .alert_manager
        .list(
            FACTORY,
            &AlertFilter {
                alert_type: Some(alert_type),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .unwrap()
        .items
}

// ==========================================
// 时段生成
// ==========================================

#[test]
fn test_generate_slots_on_idle_line() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);

    let result = state
        .urgent_insert_api
        .generate_slots(FACTORY, Some(48), &planner())
        .unwrap();
    assert_eq!(result.generated, 1);

    let slots = state
        .urgent_insert_api
        .list_available_slots(FACTORY, &insert_request(100))
        .unwrap();
    assert_eq!(slots.len(), 1);
    let slot = &slots[0].slot;
    assert_eq!(slot.slot_kind, SlotKind::Idle);
    assert_eq!(slot.status, SlotStatus::Available);
    assert_eq!(slot.available_capacity, 4800);

    // 重复生成不产生重叠时段
    let again = state
        .urgent_insert_api
        .generate_slots(FACTORY, Some(48), &planner())
        .unwrap();
    assert_eq!(again.generated, 0);
}

#[test]
fn test_generate_slots_rejects_bad_horizon() {
    let (_tmp, state) = create_test_state();
    for hours in [0, 721] {
        let err = state
            .urgent_insert_api
            .generate_slots(FACTORY, Some(hours), &planner())
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }
}

#[test]
fn test_new_schedule_invalidates_overlapping_idle_slot() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let stale = generate_top_slot(&state, 100);

    let base = hours_from_now(0);
    create_plan_with_schedule(
        &state,
        days_from_today(1),
        "L1",
        200,
        base + Duration::hours(5),
        base + Duration::hours(7),
    );

    let result = state
        .urgent_insert_api
        .generate_slots(FACTORY, Some(48), &planner())
        .unwrap();
    assert_eq!(result.invalidated, 1);
    assert!(result.generated >= 2);

    let expired = state
        .urgent_insert_api
        .get_slot(FACTORY, &stale.slot_id)
        .unwrap();
    assert_eq!(expired.status, SlotStatus::Expired);

    let fresh = state
        .urgent_insert_api
        .list_available_slots(FACTORY, &insert_request(100))
        .unwrap();
    assert!(fresh.iter().all(|s| s.slot.slot_id != stale.slot_id));
    assert!(fresh.iter().all(|s| {
        s.slot.slot_kind != SlotKind::Idle
            || s.slot.window_end <= base + Duration::hours(5)
            || s.slot.window_start >= base + Duration::hours(7)
    }));
}

// ==========================================
// 锁定 / 释放
// ==========================================

#[test]
fn test_lock_and_unlock_slot() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);
    let other = Actor::new("planner-2", vec![]);

    let locked = state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    assert_eq!(locked.status, SlotStatus::Locked);
    assert_eq!(locked.locked_by.as_deref(), Some("planner-1"));

    // 已锁定的时段不能再次锁定, 持有人本人也不例外
    let err = state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::SlotUnavailable { .. }));
    let still = state
        .urgent_insert_api
        .get_slot(FACTORY, &slot.slot_id)
        .unwrap();
    assert_eq!(still.locked_at, locked.locked_at);
    assert_eq!(still.revision, locked.revision);

    let err = state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &other)
        .unwrap_err();
    assert!(matches!(err, ApiError::SlotUnavailable { .. }));

    let err = state
        .urgent_insert_api
        .unlock_slot(FACTORY, &slot.slot_id, &other)
        .unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(_)));

    let released = state
        .urgent_insert_api
        .unlock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    assert_eq!(released.status, SlotStatus::Available);
    assert!(released.locked_by.is_none());

    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &other)
        .unwrap();
}

#[test]
fn test_stale_lock_is_reclaimed() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    state
        .plan_api
        .update_config(FACTORY, "slot_lock_ttl_seconds", "1", &planner())
        .unwrap();
    let slot = generate_top_slot(&state, 100);

    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    thread::sleep(std::time::Duration::from_millis(2100));

    let result = state
        .urgent_insert_api
        .generate_slots(FACTORY, Some(48), &planner())
        .unwrap();
    assert_eq!(result.reclaimed, 1);
    let reclaimed = state
        .urgent_insert_api
        .get_slot(FACTORY, &slot.slot_id)
        .unwrap();
    assert_eq!(reclaimed.status, SlotStatus::Available);

    // 锁被回收后原持有人不能再确认
    let err = state
        .urgent_insert_api
        .confirm_insert(FACTORY, order(&slot.slot_id, 100), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
}

#[test]
fn test_expired_lock_can_be_taken_over() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    state
        .plan_api
        .update_config(FACTORY, "slot_lock_ttl_seconds", "1", &planner())
        .unwrap();
    let slot = generate_top_slot(&state, 100);
    let other = Actor::new("planner-2", vec![]);

    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    thread::sleep(std::time::Duration::from_millis(2100));

    let taken = state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &other)
        .unwrap();
    assert_eq!(taken.locked_by.as_deref(), Some("planner-2"));
}

// ==========================================
// 确认插单
// ==========================================

#[test]
fn test_confirm_insert_round_trip() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);

    // 未锁定不能确认
    let err = state
        .urgent_insert_api
        .confirm_insert(FACTORY, order(&slot.slot_id, 100), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

    let impact = state
        .urgent_insert_api
        .analyze_impact(FACTORY, &slot.slot_id, &insert_request(100))
        .unwrap();
    assert_eq!(impact.impact_level, ImpactLevel::Low);
    assert!(impact.affected_schedules.is_empty());

    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    let produced = state
        .urgent_insert_api
        .confirm_insert(FACTORY, order(&slot.slot_id, 100), &planner())
        .unwrap();

    assert_eq!(produced.plan.plan_type, PlanType::UrgentInsert);
    assert_eq!(produced.plan.status, PlanStatus::Confirmed);
    assert_eq!(produced.plan.source_slot_id.as_deref(), Some(slot.slot_id.as_str()));
    assert_eq!(produced.plan.approval.status, ApprovalStatus::None);
    assert_eq!(produced.schedules.len(), 1);
    assert_eq!(produced.schedules[0].planned_quantity, 100);
    assert_eq!(produced.schedules[0].production_line_id, "L1");

    let consumed = state
        .urgent_insert_api
        .get_slot(FACTORY, &slot.slot_id)
        .unwrap();
    assert_eq!(consumed.status, SlotStatus::Consumed);
    assert_eq!(
        consumed.consumed_by_plan_id.as_deref(),
        Some(produced.plan.plan_id.as_str())
    );

    // 已占用时段不能再插单
    let err = state
        .urgent_insert_api
        .confirm_insert(FACTORY, order(&slot.slot_id, 100), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::SlotUnavailable { .. }));

    // LOW 影响不产生预警
    assert!(alerts_of(&state, AlertType::InsertImpact).is_empty());
}

#[test]
fn test_confirm_insert_rejects_elapsed_window() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);
    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();

    // 锁定后窗口已结束 (清扫尚未运行)
    let conn = rusqlite::Connection::open(&state.db_path).unwrap();
    conn.execute(
        "UPDATE insert_slot SET window_start = ?1, window_end = ?2 WHERE slot_id = ?3",
        rusqlite::params![
            fmt_ts(&hours_from_now(-3)),
            fmt_ts(&hours_from_now(-1)),
            slot.slot_id
        ],
    )
    .unwrap();

    let err = state
        .urgent_insert_api
        .confirm_insert(FACTORY, order(&slot.slot_id, 100), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::SlotUnavailable { .. }));

    let err = state
        .urgent_insert_api
        .force_insert(FACTORY, order(&slot.slot_id, 100), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::SlotUnavailable { .. }));

    let still = state
        .urgent_insert_api
        .get_slot(FACTORY, &slot.slot_id)
        .unwrap();
    assert_eq!(still.status, SlotStatus::Locked);
    assert!(still.consumed_by_plan_id.is_none());
    let urgent_plans = state
        .plan_api
        .list_plans(
            FACTORY,
            &PlanFilter {
                plan_type: Some(PlanType::UrgentInsert),
                ..Default::default()
            },
            PageRequest::new(None, None).unwrap(),
        )
        .unwrap();
    assert_eq!(urgent_plans.total, 0);
}

#[test]
fn test_confirm_insert_shifts_downstream_schedule() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);

    // 下游排程: 2h 窗口, 需 1h, 富余 1h
    let base = hours_from_now(0);
    let (_, downstream) = create_plan_with_schedule(
        &state,
        days_from_today(1),
        "L1",
        100,
        base + Duration::hours(2),
        base + Duration::hours(4),
    );

    state
        .urgent_insert_api
        .generate_slots(FACTORY, Some(48), &planner())
        .unwrap();
    let slot = state
        .urgent_insert_api
        .list_available_slots(FACTORY, &insert_request(400))
        .unwrap()
        .into_iter()
        .map(|s| s.slot)
        .find(|s| s.window_end <= downstream.scheduled_start)
        .expect("应有位于下游排程之前的空闲时段");

    // 插单 400 件占用 4h: 推入 2h, 富余吸收 1h → 延误约 60 分钟
    let impact = state
        .urgent_insert_api
        .analyze_impact(FACTORY, &slot.slot_id, &insert_request(400))
        .unwrap();
    assert_eq!(impact.impact_level, ImpactLevel::Medium);
    assert_eq!(impact.affected_schedules.len(), 1);
    let delay = impact.affected_schedules[0].delay_minutes;
    assert!((60..=61).contains(&delay), "delay = {}", delay);

    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    state
        .urgent_insert_api
        .confirm_insert(FACTORY, order(&slot.slot_id, 400), &planner())
        .unwrap();

    let shifted = state
        .plan_api
        .get_schedule(FACTORY, &downstream.schedule_id)
        .unwrap();
    assert_eq!(shifted.status, ScheduleStatus::Pending);
    assert_eq!(
        shifted.scheduled_start,
        downstream.scheduled_start + Duration::minutes(delay)
    );
    assert_eq!(
        shifted.scheduled_end,
        downstream.scheduled_end + Duration::minutes(delay)
    );

    let alerts = alerts_of(&state, AlertType::InsertImpact);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Warning);

    // 已占用时段的影响分析附带备选时段
    match state
        .urgent_insert_api
        .analyze_impact(FACTORY, &slot.slot_id, &insert_request(100))
        .unwrap_err()
    {
        ApiError::SlotUnavailable {
            slot_id,
            alternatives,
            ..
        } => {
            assert_eq!(slot_id, slot.slot_id);
            assert!(!alternatives.is_empty());
            assert!(alternatives.iter().all(|a| a.slot_id != slot.slot_id));
            assert!(alternatives.iter().all(|a| a.status == SlotStatus::Available));
        }
        other => panic!("期望 SlotUnavailable, 实际 {:?}", other),
    }
}

// ==========================================
// 强制插单与审批
// ==========================================

/// 物料为 0 且无可用工人 → 两项资源失败 → HIGH
fn setup_high_impact(state: &factory_scheduling::app::AppState) -> String {
    register_line(state, "L1", 100.0, 2);
    state.line_api.upsert_stock(FACTORY, PRODUCT, 0).unwrap();
    let slot = generate_top_slot(state, 100);
    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    slot.slot_id
}

#[test]
fn test_high_impact_requires_force_insert() {
    let (_tmp, state) = create_test_state();
    let slot_id = setup_high_impact(&state);

    match state
        .urgent_insert_api
        .confirm_insert(FACTORY, order(&slot_id, 100), &planner())
        .unwrap_err()
    {
        ApiError::ForceInsertRequired { impact } => {
            assert_eq!(impact.impact_level, ImpactLevel::High);
            assert_eq!(impact.resource_failures(), 2);
        }
        other => panic!("期望 ForceInsertRequired, 实际 {:?}", other),
    }

    // 拒绝确认后时段仍由本人锁定
    let slot = state.urgent_insert_api.get_slot(FACTORY, &slot_id).unwrap();
    assert!(slot.is_held_by("planner-1"));

    let mut req = order(&slot_id, 100);
    req.reason = Some("重点客户, 必须今日交付".to_string());
    let pending = state
        .urgent_insert_api
        .force_insert(FACTORY, req, &planner())
        .unwrap();
    assert_eq!(pending.plan.status, PlanStatus::Draft);
    assert_eq!(pending.plan.approval.status, ApprovalStatus::PendingApproval);
    assert_eq!(pending.plan.approval.requested_by.as_deref(), Some("planner-1"));
    assert_eq!(
        pending.plan.approval.request_reason.as_deref(),
        Some("重点客户, 必须今日交付")
    );
    assert_eq!(
        state.urgent_insert_api.get_slot(FACTORY, &slot_id).unwrap().status,
        SlotStatus::Consumed
    );

    let queue = state.urgent_insert_api.list_pending_approvals(FACTORY).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].plan.plan_id, pending.plan.plan_id);

    let alerts = alerts_of(&state, AlertType::InsertImpact);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);

    // 待审批计划不能走普通确认
    let err = state
        .plan_api
        .confirm_plan(FACTORY, &pending.plan.plan_id, &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
}

#[test]
fn test_force_insert_approval_flow() {
    let (_tmp, state) = create_test_state();
    let slot_id = setup_high_impact(&state);
    let pending = state
        .urgent_insert_api
        .force_insert(FACTORY, order(&slot_id, 100), &planner())
        .unwrap();
    let plan_id = pending.plan.plan_id;

    // 无审批权限
    let err = state
        .urgent_insert_api
        .decide_force_insert(FACTORY, &plan_id, approve(None), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(_)));

    let approved = state
        .urgent_insert_api
        .decide_force_insert(FACTORY, &plan_id, approve(Some("同意")), &approver())
        .unwrap();
    assert_eq!(approved.plan.status, PlanStatus::Confirmed);
    assert_eq!(approved.plan.approval.status, ApprovalStatus::Approved);
    assert_eq!(approved.plan.approval.approver_id.as_deref(), Some("manager-1"));
    assert_eq!(approved.plan.approval.decision_comment.as_deref(), Some("同意"));
    assert!(approved.plan.approval.decided_at.is_some());

    // 重复审批
    let err = state
        .urgent_insert_api
        .decide_force_insert(FACTORY, &plan_id, approve(None), &approver())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

    assert!(state
        .urgent_insert_api
        .list_pending_approvals(FACTORY)
        .unwrap()
        .is_empty());

    // 批准后排程可开工
    let started = state
        .plan_api
        .start_schedule(FACTORY, &approved.schedules[0].schedule_id, &planner())
        .unwrap();
    assert_eq!(started.status, ScheduleStatus::Running);
}

#[test]
fn test_force_insert_rejection_releases_slot() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);
    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    let pending = state
        .urgent_insert_api
        .force_insert(FACTORY, order(&slot.slot_id, 100), &planner())
        .unwrap();
    let plan_id = pending.plan.plan_id;

    // 配置中的审批人无需角色
    state
        .plan_api
        .update_config(FACTORY, "approver_ids", r#"["boss"]"#, &planner())
        .unwrap();
    let boss = Actor::new("boss", vec![]);

    let err = state
        .urgent_insert_api
        .decide_force_insert(FACTORY, &plan_id, reject(Some("  ")), &boss)
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let rejected = state
        .urgent_insert_api
        .decide_force_insert(FACTORY, &plan_id, reject(Some("产能已满")), &boss)
        .unwrap();
    assert_eq!(rejected.plan.status, PlanStatus::Cancelled);
    assert_eq!(rejected.plan.approval.status, ApprovalStatus::Rejected);
    assert_eq!(rejected.plan.approval.approver_id.as_deref(), Some("boss"));
    assert!(rejected
        .schedules
        .iter()
        .all(|s| s.status == ScheduleStatus::Cancelled));

    // 窗口未结束, 时段归还
    let released = state
        .urgent_insert_api
        .get_slot(FACTORY, &slot.slot_id)
        .unwrap();
    assert_eq!(released.status, SlotStatus::Available);
    assert!(released.consumed_by_plan_id.is_none());

    let alerts = alerts_of(&state, AlertType::ForceInsertRejected);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].related_plan_id.as_deref(), Some(plan_id.as_str()));

    // 驳回后不能再批准
    let err = state
        .urgent_insert_api
        .decide_force_insert(FACTORY, &plan_id, approve(None), &approver())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
}

#[test]
fn test_insert_requires_supported_product() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    state
        .line_api
        .set_capability(
            FACTORY,
            factory_scheduling::domain::line::LineCapability {
                line_id: "L1".to_string(),
                product_type_id: "P-200".to_string(),
                rate_per_hour: 80.0,
            },
            &planner(),
        )
        .unwrap();
    state
        .urgent_insert_api
        .generate_slots(FACTORY, Some(48), &planner())
        .unwrap();

    // 产线只登记了 P-200, 请求 P-100 时无可用时段
    assert!(state
        .urgent_insert_api
        .list_available_slots(FACTORY, &insert_request(100))
        .unwrap()
        .is_empty());
}
