// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 提供测试所需的数据库初始化、测试数据生成等功能
// ==========================================

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::error::Error;
use tempfile::NamedTempFile;

use factory_scheduling::api::{
    Actor, AddScheduleRequest, CreatePlanRequest, RecordSampleRequest, UpsertLineRequest,
};
use factory_scheduling::app::AppState;
use factory_scheduling::domain::line::Worker;
use factory_scheduling::domain::plan::{LineSchedule, SchedulingPlan};
use factory_scheduling::domain::slot::InsertSlot;
use factory_scheduling::domain::types::LineStatus;
use factory_scheduling::engine::InsertRequest;

pub const FACTORY: &str = "F1";
pub const PRODUCT: &str = "P-100";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    factory_scheduling::db::open_and_migrate(&db_path)?;

    Ok((temp_file, db_path))
}

/// 创建测试用 AppState
pub fn create_test_state() -> (NamedTempFile, AppState) {
    factory_scheduling::logging::init_test();
    let (temp_file, db_path) = create_test_db().expect("创建测试数据库失败");
    let state = AppState::new(&db_path).expect("初始化 AppState 失败");
    (temp_file, state)
}

// ==========================================
// 操作人
// ==========================================

pub fn planner() -> Actor {
    Actor::new("planner-1", vec!["PLANNER".to_string()])
}

pub fn approver() -> Actor {
    Actor::new("manager-1", vec!["APPROVER".to_string()])
}

// ==========================================
// 时间
// ==========================================

/// 当前时刻 + 整点偏移 (秒级截断, 与库内精度一致)
pub fn hours_from_now(hours: i64) -> NaiveDateTime {
    factory_scheduling::db::now() + Duration::hours(hours)
}

pub fn days_from_today(days: i64) -> NaiveDate {
    factory_scheduling::db::now().date() + Duration::days(days)
}

// ==========================================
// 测试数据
// ==========================================

/// 登记一条运行中的产线
pub fn register_line(state: &AppState, line_id: &str, rate: f64, required_workers: i64) {
    state
        .line_api
        .upsert_line(
            FACTORY,
            UpsertLineRequest {
                line_id: line_id.to_string(),
                line_name: format!("{} 产线", line_id),
                throughput_per_hour: rate,
                required_workers,
                status: LineStatus::Active,
            },
            &planner(),
        )
        .expect("登记产线失败");
}

/// 登记一条历史产出样本 (速率 = quantity / hours)
pub fn record_sample(state: &AppState, line_id: &str, quantity: i64, hours: f64) {
    state
        .line_api
        .record_sample(
            FACTORY,
            RecordSampleRequest {
                line_id: line_id.to_string(),
                product_type_id: PRODUCT.to_string(),
                quantity,
                hours,
            },
        )
        .expect("登记产出样本失败");
}

pub fn register_worker(state: &AppState, worker_id: &str) {
    state
        .line_api
        .upsert_worker(
            FACTORY,
            Worker {
                worker_id: worker_id.to_string(),
                factory_id: FACTORY.to_string(),
                worker_name: format!("工人 {}", worker_id),
                active: true,
            },
        )
        .expect("登记工人失败");
}

pub fn create_plan(state: &AppState, plan_date: NaiveDate) -> SchedulingPlan {
    state
        .plan_api
        .create_plan(
            FACTORY,
            CreatePlanRequest {
                plan_date,
                notes: None,
            },
            &planner(),
        )
        .expect("创建计划失败")
}

pub fn add_schedule(
    state: &AppState,
    plan_id: &str,
    line_id: &str,
    quantity: i64,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> LineSchedule {
    state
        .plan_api
        .add_schedule(
            FACTORY,
            plan_id,
            AddScheduleRequest {
                production_line_id: line_id.to_string(),
                product_type_id: PRODUCT.to_string(),
                planned_quantity: quantity,
                scheduled_start: start,
                scheduled_end: end,
            },
            &planner(),
        )
        .expect("新增排程失败")
}

/// 创建含一条排程的 DRAFT 计划
pub fn create_plan_with_schedule(
    state: &AppState,
    plan_date: NaiveDate,
    line_id: &str,
    quantity: i64,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> (SchedulingPlan, LineSchedule) {
    let plan = create_plan(state, plan_date);
    let schedule = add_schedule(state, &plan.plan_id, line_id, quantity, start, end);
    (plan, schedule)
}

pub fn insert_request(quantity: i64) -> InsertRequest {
    InsertRequest {
        product_type_id: Some(PRODUCT.to_string()),
        required_quantity: Some(quantity),
        deadline: None,
    }
}

/// 生成时段并返回评分最高的可用时段
pub fn generate_top_slot(state: &AppState, quantity: i64) -> InsertSlot {
    let result = state
        .urgent_insert_api
        .generate_slots(FACTORY, Some(48), &planner())
        .expect("生成时段失败");
    assert!(result.generated > 0, "应生成至少一个时段");

    state
        .urgent_insert_api
        .list_available_slots(FACTORY, &insert_request(quantity))
        .expect("查询可用时段失败")
        .into_iter()
        .next()
        .expect("应有可用时段")
        .slot
}
