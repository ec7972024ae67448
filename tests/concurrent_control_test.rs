// ==========================================
// 并发控制测试
// ==========================================
// 1. 多人同时锁定同一时段: 恰好一人成功 (同一人并发锁定同样只成功一次)
// 2. 多人同时确认插单: 同一时段只产生一个计划
// 3. 两名审批人同时审批: 恰好一次成功
// ==========================================

mod test_helpers;

use std::sync::{Arc, Barrier};
use std::thread;

use factory_scheduling::api::{Actor, ApiError, ApprovalDecision, InsertOrderRequest};
use factory_scheduling::domain::types::{PlanType, SlotStatus};
use factory_scheduling::repository::PlanFilter;
use test_helpers::*;

const THREADS: usize = 8;

fn order(slot_id: &str) -> InsertOrderRequest {
    InsertOrderRequest {
        slot_id: slot_id.to_string(),
        product_type_id: PRODUCT.to_string(),
        quantity: 100,
        deadline: None,
        notes: None,
        reason: None,
    }
}

#[test]
fn test_concurrent_lock_single_winner() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);
    let state = Arc::new(state);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let state = state.clone();
            let barrier = barrier.clone();
            let slot_id = slot.slot_id.clone();
            thread::spawn(move || {
                let actor = Actor::new(format!("planner-{}", i), vec![]);
                barrier.wait();
                state.urgent_insert_api.lock_slot(FACTORY, &slot_id, &actor)
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("线程异常"))
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(r, Err(ApiError::SlotUnavailable { .. })), "{:?}", r);
    }

    let locked = state
        .urgent_insert_api
        .get_slot(FACTORY, &slot.slot_id)
        .unwrap();
    assert_eq!(locked.status, SlotStatus::Locked);
    assert_eq!(locked.locked_by, winners[0].locked_by);
}

#[test]
fn test_concurrent_lock_same_actor_single_winner() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);
    let state = Arc::new(state);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let state = state.clone();
            let barrier = barrier.clone();
            let slot_id = slot.slot_id.clone();
            thread::spawn(move || {
                barrier.wait();
                state.urgent_insert_api.lock_slot(FACTORY, &slot_id, &planner())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("线程异常"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(ApiError::SlotUnavailable { .. }))));

    let locked = state
        .urgent_insert_api
        .get_slot(FACTORY, &slot.slot_id)
        .unwrap();
    assert_eq!(locked.locked_by.as_deref(), Some("planner-1"));
    assert_eq!(locked.revision, slot.revision + 1);
}

#[test]
fn test_concurrent_confirm_consumes_slot_once() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);
    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    let state = Arc::new(state);
    let barrier = Arc::new(Barrier::new(THREADS));

    // 同一持有人重复提交
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let state = state.clone();
            let barrier = barrier.clone();
            let slot_id = slot.slot_id.clone();
            thread::spawn(move || {
                barrier.wait();
                state
                    .urgent_insert_api
                    .confirm_insert(FACTORY, order(&slot_id), &planner())
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("线程异常"))
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(r, Err(ApiError::SlotUnavailable { .. })), "{:?}", r);
    }

    let urgent_plans = state
        .plan_api
        .list_plans(
            FACTORY,
            &PlanFilter {
                plan_type: Some(PlanType::UrgentInsert),
                ..Default::default()
            },
            Default::default(),
        )
        .unwrap();
    assert_eq!(urgent_plans.total, 1);
}

#[test]
fn test_concurrent_approval_single_decision() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let slot = generate_top_slot(&state, 100);
    state
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &planner())
        .unwrap();
    let plan_id = state
        .urgent_insert_api
        .force_insert(FACTORY, order(&slot.slot_id), &planner())
        .unwrap()
        .plan
        .plan_id;

    let state = Arc::new(state);
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["manager-1", "manager-2"]
        .into_iter()
        .map(|approver_id| {
            let state = state.clone();
            let barrier = barrier.clone();
            let plan_id = plan_id.clone();
            thread::spawn(move || {
                let actor = Actor::new(approver_id, vec!["APPROVER".to_string()]);
                barrier.wait();
                state.urgent_insert_api.decide_force_insert(
                    FACTORY,
                    &plan_id,
                    ApprovalDecision {
                        approve: true,
                        comment: None,
                    },
                    &actor,
                )
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("线程异常"))
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(
                r,
                Err(ApiError::InvalidStateTransition { .. })
                    | Err(ApiError::OptimisticLockFailure(_))
            ),
            "{:?}",
            r
        );
    }
}
