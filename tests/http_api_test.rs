// ==========================================
// HTTP 层测试
// ==========================================
// 直接调用 handler: 操作人解析 / 错误映射 / 清扫任务
// ==========================================

mod test_helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;

use factory_scheduling::api::Actor;
use factory_scheduling::app::http::{self, GenerateBody};
use factory_scheduling::app::{router, HttpState, SlotSweeper, SweeperConfig};
use factory_scheduling::domain::types::SlotStatus;
use test_helpers::*;

fn headers_for(user_id: &str, roles: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-user-id", HeaderValue::from_str(user_id).unwrap());
    headers.insert("x-user-roles", HeaderValue::from_str(roles).unwrap());
    headers
}

fn http_state() -> (tempfile::NamedTempFile, HttpState) {
    let (tmp, state) = create_test_state();
    (tmp, HttpState::new(Arc::new(state)))
}

#[tokio::test]
async fn test_health_and_router() {
    assert_eq!(http::health().await, "ok");
    let (_tmp, state) = http_state();
    let _app = router(state);
}

#[tokio::test]
async fn test_write_without_actor_is_unauthorized() {
    let (_tmp, state) = http_state();
    let err = http::generate_slots(
        State(state),
        Path(FACTORY.to_string()),
        HeaderMap::new(),
        Json(GenerateBody::default()),
    )
    .await
    .unwrap_err();

    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(err.body().code, "UNAUTHORIZED");
}

#[tokio::test]
async fn test_generate_and_lock_over_http() {
    let (_tmp, state) = http_state();
    register_line(&state.app, "L1", 100.0, 0);
    register_line(&state.app, "L2", 100.0, 0);

    let Json(result) = http::generate_slots(
        State(state.clone()),
        Path(FACTORY.to_string()),
        headers_for("planner-1", "PLANNER"),
        Json(GenerateBody {
            hours_ahead: Some(24),
        }),
    )
    .await
    .unwrap();
    assert_eq!(result.generated, 2);

    let slot = state
        .app
        .urgent_insert_api
        .list_available_slots(FACTORY, &insert_request(100))
        .unwrap()
        .remove(0)
        .slot;
    state
        .app
        .urgent_insert_api
        .lock_slot(FACTORY, &slot.slot_id, &Actor::new("planner-2", vec![]))
        .unwrap();

    // 他人已锁定 → 423, 附另一产线的备选时段
    let err = http::lock_slot(
        State(state.clone()),
        Path((FACTORY.to_string(), slot.slot_id.clone())),
        headers_for("planner-1", "PLANNER"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::LOCKED);
    let body = err.body();
    assert_eq!(body.code, "SLOT_UNAVAILABLE");
    let details = body.details.expect("应附带备选时段");
    assert_eq!(details["slot_id"], slot.slot_id.as_str());
    let alternatives = details["alternatives"].as_array().unwrap();
    assert_eq!(alternatives.len(), 1);
    assert_ne!(alternatives[0]["slot_id"], slot.slot_id.as_str());

    // 持有人释放
    let Json(released) = http::unlock_slot(
        State(state.clone()),
        Path((FACTORY.to_string(), slot.slot_id.clone())),
        headers_for("planner-2", ""),
    )
    .await
    .unwrap();
    assert_eq!(released.status, SlotStatus::Available);

    // 读操作不要求操作人
    let Json(fetched) = http::get_slot(
        State(state),
        Path((FACTORY.to_string(), slot.slot_id.clone())),
    )
    .await
    .unwrap();
    assert_eq!(fetched.slot_id, slot.slot_id);
}

#[tokio::test]
async fn test_not_found_maps_to_404() {
    let (_tmp, state) = http_state();
    let err = http::get_slot(
        State(state),
        Path((FACTORY.to_string(), "missing".to_string())),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
    assert_eq!(err.body().code, "NOT_FOUND");
}

#[tokio::test]
async fn test_sweeper_sweeps_registered_factories() {
    let (_tmp, state) = create_test_state();
    register_line(&state, "L1", 100.0, 0);
    let app = Arc::new(state);

    let sweeper = SlotSweeper::new(
        app.urgent_insert_api.clone(),
        SweeperConfig {
            interval: Duration::from_secs(60),
            horizon_hours: 24,
        },
    );
    assert_eq!(sweeper.sweep_all().await, 1);
    assert_eq!(
        app.urgent_insert_api
            .list_available_slots(FACTORY, &insert_request(100))
            .unwrap()
            .len(),
        1
    );

    sweeper.shutdown();
    assert!(sweeper.is_done());
}
