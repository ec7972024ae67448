// ==========================================
// 排程计划生命周期集成测试
// ==========================================
// 测试范围:
// 1. 计划: 创建 / 重复日期冲突 / 确认 / 取消 / 分页查询
// 2. 排程: 新增 / 更新 / 开工 / 报工 / 完工 / 乐观锁
// 3. 派工: 派工 / 签到 / 签退 / 撤销
// 4. 配置: 紧急阈值与工厂配置校验
// 5. 审计: 操作日志
// ==========================================

mod test_helpers;

use std::sync::{Arc, Mutex};

use factory_scheduling::api::{ApiError, PageRequest, UpdateScheduleRequest};
use factory_scheduling::domain::action_log::{ActionLog, ActionType};
use factory_scheduling::domain::types::{AssignmentStatus, PlanStatus, ScheduleStatus};
use factory_scheduling::repository::{PlanFilter, PlanRepository, RepositoryError};
use test_helpers::*;

// ==========================================
// 计划与排程
// ==========================================

#[test]
fn test_plan_lifecycle_confirm_start_complete_cancel() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);

    let (plan, schedule) = create_plan_with_schedule(
        &state,
        days_from_today(1),
        "L1",
        1000,
        hours_from_now(24),
        hours_from_now(34),
    );
    assert_eq!(plan.status, PlanStatus::Draft);
    assert_eq!(schedule.status, ScheduleStatus::Pending);

    // DRAFT 计划的排程不能开工
    let err = state
        .plan_api
        .start_schedule(FACTORY, &schedule.schedule_id, &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

    let confirmed = state
        .plan_api
        .confirm_plan(FACTORY, &plan.plan_id, &planner())
        .unwrap();
    assert_eq!(confirmed.status, PlanStatus::Confirmed);

    // 已确认计划不能再新增排程
    register_line(&state, "L2", 100.0, 0);
    let err = state
        .plan_api
        .add_schedule(
            FACTORY,
            &plan.plan_id,
            factory_scheduling::api::AddScheduleRequest {
                production_line_id: "L2".to_string(),
                product_type_id: PRODUCT.to_string(),
                planned_quantity: 10,
                scheduled_start: hours_from_now(24),
                scheduled_end: hours_from_now(25),
            },
            &planner(),
        )
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

    let running = state
        .plan_api
        .start_schedule(FACTORY, &schedule.schedule_id, &planner())
        .unwrap();
    assert_eq!(running.status, ScheduleStatus::Running);
    assert!(running.actual_start.is_some());

    // 报工超出计划数量
    let err = state
        .plan_api
        .report_progress(FACTORY, &schedule.schedule_id, 1001, &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let progressed = state
        .plan_api
        .report_progress(FACTORY, &schedule.schedule_id, 400, &planner())
        .unwrap();
    assert_eq!(progressed.completed_quantity, 400);

    let completed = state
        .plan_api
        .complete_schedule(FACTORY, &schedule.schedule_id, Some(950), &planner())
        .unwrap();
    assert_eq!(completed.status, ScheduleStatus::Completed);
    assert_eq!(completed.completed_quantity, 950);
    assert!(completed.actual_end.is_some());

    // 终态排程不可再报工
    let err = state
        .plan_api
        .report_progress(FACTORY, &schedule.schedule_id, 960, &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

    // 取消计划不改动已完工排程
    let cancelled = state
        .plan_api
        .cancel_plan(FACTORY, &plan.plan_id, &planner())
        .unwrap();
    assert_eq!(cancelled.plan.status, PlanStatus::Cancelled);
    assert_eq!(cancelled.schedules[0].status, ScheduleStatus::Completed);
}

#[test]
fn test_duplicate_plan_date_conflicts() {
    let (_tmp, state) = create_test_state();
    create_plan(&state, days_from_today(1));

    let err = state
        .plan_api
        .create_plan(
            FACTORY,
            factory_scheduling::api::CreatePlanRequest {
                plan_date: days_from_today(1),
                notes: None,
            },
            &planner(),
        )
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[test]
fn test_cancel_plan_cancels_open_schedules() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let (plan, schedule) = create_plan_with_schedule(
        &state,
        days_from_today(1),
        "L1",
        500,
        hours_from_now(24),
        hours_from_now(30),
    );

    let cancelled = state
        .plan_api
        .cancel_plan(FACTORY, &plan.plan_id, &planner())
        .unwrap();
    assert_eq!(cancelled.plan.status, PlanStatus::Cancelled);
    assert_eq!(cancelled.schedules.len(), 1);
    assert_eq!(cancelled.schedules[0].schedule_id, schedule.schedule_id);
    assert_eq!(cancelled.schedules[0].status, ScheduleStatus::Cancelled);

    // 已取消的日期可以重新建计划
    let again = create_plan(&state, days_from_today(1));
    assert_ne!(again.plan_id, plan.plan_id);
}

#[test]
fn test_cancel_plan_rolls_back_on_concurrent_schedule_edit() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    register_line(&state, "L2", 100.0, 0);
    let (plan, first) = create_plan_with_schedule(
        &state,
        days_from_today(1),
        "L1",
        500,
        hours_from_now(24),
        hours_from_now(30),
    );
    let second = add_schedule(
        &state,
        &plan.plan_id,
        "L2",
        300,
        hours_from_now(24),
        hours_from_now(28),
    );

    // 取消方读取后, 另一请求修改了第二条排程
    state
        .plan_api
        .update_schedule(
            FACTORY,
            &second.schedule_id,
            UpdateScheduleRequest {
                planned_quantity: Some(350),
                revision: Some(second.revision),
                ..Default::default()
            },
            &planner(),
        )
        .unwrap();

    let mut cancelled_plan = state
        .plan_api
        .get_plan(FACTORY, &plan.plan_id)
        .unwrap()
        .plan;
    cancelled_plan.status = PlanStatus::Cancelled;
    let stale: Vec<_> = [first, second]
        .into_iter()
        .map(|mut s| {
            s.status = ScheduleStatus::Cancelled;
            s
        })
        .collect();
    let log = ActionLog::record(
        FACTORY,
        ActionType::CancelPlan,
        "PLAN",
        &plan.plan_id,
        "planner-1",
        None,
        "取消计划",
    );

    let conn = factory_scheduling::db::open_sqlite_connection(&state.db_path).unwrap();
    let repo = PlanRepository::new(Arc::new(Mutex::new(conn)));
    let err = repo
        .update_with_schedules(&cancelled_plan, &stale, &log)
        .unwrap_err();
    assert!(matches!(err, RepositoryError::OptimisticLockFailure { .. }));

    // 整体回滚: 计划与第一条排程均未被取消, 也没有取消日志
    let current = state.plan_api.get_plan(FACTORY, &plan.plan_id).unwrap();
    assert_eq!(current.plan.status, PlanStatus::Draft);
    assert!(current
        .schedules
        .iter()
        .all(|s| s.status == ScheduleStatus::Pending));
    let logs = state.action_log_repo.list_recent(FACTORY, 50).unwrap();
    assert!(logs.iter().all(|l| l.action_type != "CANCEL_PLAN"));

    // 重新读取后取消成功
    let cancelled = state
        .plan_api
        .cancel_plan(FACTORY, &plan.plan_id, &planner())
        .unwrap();
    assert_eq!(cancelled.plan.status, PlanStatus::Cancelled);
    assert_eq!(cancelled.schedules.len(), 2);
    assert!(cancelled
        .schedules
        .iter()
        .all(|s| s.status == ScheduleStatus::Cancelled));
}

#[test]
fn test_add_schedule_validation() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let plan = create_plan(&state, days_from_today(1));

    let req = |line: &str, qty: i64, start_h: i64, end_h: i64| {
        factory_scheduling::api::AddScheduleRequest {
            production_line_id: line.to_string(),
            product_type_id: PRODUCT.to_string(),
            planned_quantity: qty,
            scheduled_start: hours_from_now(start_h),
            scheduled_end: hours_from_now(end_h),
        }
    };

    // 未登记产线
    let err = state
        .plan_api
        .add_schedule(FACTORY, &plan.plan_id, req("LX", 10, 1, 2), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    // 数量非正
    let err = state
        .plan_api
        .add_schedule(FACTORY, &plan.plan_id, req("L1", 0, 1, 2), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    // 时间倒置
    let err = state
        .plan_api
        .add_schedule(FACTORY, &plan.plan_id, req("L1", 10, 3, 2), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    state
        .plan_api
        .add_schedule(FACTORY, &plan.plan_id, req("L1", 10, 1, 2), &planner())
        .unwrap();

    // 同计划同产线重复
    let err = state
        .plan_api
        .add_schedule(FACTORY, &plan.plan_id, req("L1", 10, 3, 4), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[test]
fn test_update_schedule_rejects_stale_revision() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let (_plan, schedule) = create_plan_with_schedule(
        &state,
        days_from_today(1),
        "L1",
        500,
        hours_from_now(24),
        hours_from_now(30),
    );

    let updated = state
        .plan_api
        .update_schedule(
            FACTORY,
            &schedule.schedule_id,
            UpdateScheduleRequest {
                planned_quantity: Some(600),
                revision: Some(schedule.revision),
                ..Default::default()
            },
            &planner(),
        )
        .unwrap();
    assert_eq!(updated.planned_quantity, 600);
    assert!(updated.revision > schedule.revision);

    // 使用旧 revision 再次更新
    let err = state
        .plan_api
        .update_schedule(
            FACTORY,
            &schedule.schedule_id,
            UpdateScheduleRequest {
                planned_quantity: Some(700),
                revision: Some(schedule.revision),
                ..Default::default()
            },
            &planner(),
        )
        .unwrap_err();
    assert!(matches!(err, ApiError::OptimisticLockFailure(_)));
}

#[test]
fn test_list_plans_filters_and_pages() {
    let (_tmp, state) = create_test_state();
    let p1 = create_plan(&state, days_from_today(1));
    create_plan(&state, days_from_today(2));
    create_plan(&state, days_from_today(3));
    state
        .plan_api
        .confirm_plan(FACTORY, &p1.plan_id, &planner())
        .unwrap();

    let all = state
        .plan_api
        .list_plans(FACTORY, &PlanFilter::default(), PageRequest::new(Some(1), Some(2)).unwrap())
        .unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(all.items.len(), 2);

    let confirmed = state
        .plan_api
        .list_plans(
            FACTORY,
            &PlanFilter {
                status: Some(PlanStatus::Confirmed),
                ..Default::default()
            },
            PageRequest::new(None, None).unwrap(),
        )
        .unwrap();
    assert_eq!(confirmed.total, 1);
    assert_eq!(confirmed.items[0].plan_id, p1.plan_id);

    let err = state
        .plan_api
        .list_plans(
            FACTORY,
            &PlanFilter {
                date_from: Some(days_from_today(3)),
                date_to: Some(days_from_today(1)),
                ..Default::default()
            },
            PageRequest::new(None, None).unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    // 其他工厂不可见
    let other = state
        .plan_api
        .list_plans("F2", &PlanFilter::default(), PageRequest::new(None, None).unwrap())
        .unwrap();
    assert_eq!(other.total, 0);
    assert!(matches!(
        state.plan_api.get_plan("F2", &p1.plan_id).unwrap_err(),
        ApiError::NotFound(_)
    ));
}

// ==========================================
// 工人派工
// ==========================================

#[test]
fn test_worker_assignment_lifecycle() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    register_worker(&state, "W1");
    register_worker(&state, "W2");
    let (_plan, schedule) = create_plan_with_schedule(
        &state,
        days_from_today(1),
        "L1",
        500,
        hours_from_now(24),
        hours_from_now(30),
    );

    // 重复工号去重
    let assigned = state
        .plan_api
        .assign_workers(
            FACTORY,
            &schedule.schedule_id,
            vec!["W1".to_string(), "W2".to_string(), "W1".to_string()],
            &planner(),
        )
        .unwrap();
    assert_eq!(assigned.len(), 2);
    assert!(assigned.iter().all(|a| a.status == AssignmentStatus::Assigned));

    // 重复派工
    let err = state
        .plan_api
        .assign_workers(FACTORY, &schedule.schedule_id, vec!["W1".to_string()], &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    // 不在名册
    let err = state
        .plan_api
        .assign_workers(FACTORY, &schedule.schedule_id, vec!["W9".to_string()], &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let w1 = assigned.iter().find(|a| a.worker_id == "W1").unwrap();
    let w2 = assigned.iter().find(|a| a.worker_id == "W2").unwrap();

    // 未签到不能签退
    let err = state
        .plan_api
        .check_out(FACTORY, &w1.assignment_id, None, &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

    let checked_in = state
        .plan_api
        .check_in(FACTORY, &w1.assignment_id, &planner())
        .unwrap();
    assert_eq!(checked_in.status, AssignmentStatus::CheckedIn);
    assert!(checked_in.check_in_time.is_some());

    let err = state
        .plan_api
        .check_out(FACTORY, &w1.assignment_id, Some(120.0), &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let checked_out = state
        .plan_api
        .check_out(FACTORY, &w1.assignment_id, Some(92.5), &planner())
        .unwrap();
    assert_eq!(checked_out.status, AssignmentStatus::CheckedOut);
    assert_eq!(checked_out.performance_score, Some(92.5));

    // 已签退不可撤销
    let err = state
        .plan_api
        .remove_assignment(FACTORY, &w1.assignment_id, &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

    state
        .plan_api
        .remove_assignment(FACTORY, &w2.assignment_id, &planner())
        .unwrap();
    let remaining = state
        .plan_api
        .list_assignments(FACTORY, &schedule.schedule_id)
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].worker_id, "W1");
}

// ==========================================
// 配置
// ==========================================

#[test]
fn test_urgent_threshold_validation() {
    let (_tmp, state) = create_test_state();

    let default = state.plan_api.get_urgent_threshold(FACTORY).unwrap();
    assert!((default.threshold - 0.6).abs() < 1e-9);

    for bad in [-0.1, 1.5] {
        let err = state
            .plan_api
            .set_urgent_threshold(FACTORY, bad, &planner())
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    let updated = state
        .plan_api
        .set_urgent_threshold(FACTORY, 0.75, &planner())
        .unwrap();
    assert!((updated.threshold - 0.75).abs() < 1e-9);
    assert_eq!(updated.updated_by.as_deref(), Some("planner-1"));

    // 工厂间互不影响
    let other = state.plan_api.get_urgent_threshold("F2").unwrap();
    assert!((other.threshold - 0.6).abs() < 1e-9);
}

#[test]
fn test_update_config_validates_known_keys() {
    let (_tmp, state) = create_test_state();

    let err = state
        .plan_api
        .update_config(FACTORY, "slot_lock_ttl_seconds", "abc", &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let err = state
        .plan_api
        .update_config(FACTORY, "approver_ids", "manager-1", &planner())
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));

    let snapshot = state
        .plan_api
        .update_config(FACTORY, "slot_lock_ttl_seconds", "900", &planner())
        .unwrap();
    assert_eq!(snapshot.get("slot_lock_ttl_seconds").map(String::as_str), Some("900"));
}

// ==========================================
// 审计
// ==========================================

#[test]
fn test_mutations_are_audited() {
    let (_tmp, state) = create_test_state();
    let plan = create_plan(&state, days_from_today(1));
    state
        .plan_api
        .confirm_plan(FACTORY, &plan.plan_id, &planner())
        .unwrap();

    let logs = state.action_log_repo.list_recent(FACTORY, 10).unwrap();
    let types: Vec<&str> = logs.iter().map(|l| l.action_type.as_str()).collect();
    assert!(types.contains(&"CREATE_PLAN"));
    assert!(types.contains(&"CONFIRM_PLAN"));
    assert!(logs.iter().all(|l| l.actor == "planner-1"));
}
