// ==========================================
// 工厂生产排程系统 - 排程计划领域模型
// ==========================================
// 实体: scheduling_plan / line_schedule
// 归属: SchedulingPlan 独占其 LineSchedule
// ==========================================

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::domain::types::{ApprovalStatus, PlanStatus, PlanType, ScheduleStatus};

// ==========================================
// SchedulingPlan - 排程计划
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingPlan {
    pub plan_id: String,
    pub factory_id: String,
    pub plan_date: NaiveDate,
    pub plan_type: PlanType,
    pub status: PlanStatus,
    pub source_slot_id: Option<String>, // 紧急插单: 占用的时段
    pub approval: UrgentInsertApproval, // 仅强制插单路径非 NONE
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub revision: i32, // 乐观锁
}

impl SchedulingPlan {
    /// 计划是否已生效（已确认 或 强制插单已批准）
    pub fn is_effective(&self) -> bool {
        self.status == PlanStatus::Confirmed
    }

    pub fn is_urgent_insert(&self) -> bool {
        self.plan_type == PlanType::UrgentInsert
    }
}

// ==========================================
// UrgentInsertApproval - 强制插单审批 (内嵌于计划)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgentInsertApproval {
    pub status: ApprovalStatus,
    pub requested_by: Option<String>,
    pub request_reason: Option<String>,
    pub approver_id: Option<String>,
    pub decision_comment: Option<String>,
    pub decided_at: Option<NaiveDateTime>,
}

impl UrgentInsertApproval {
    pub fn none() -> Self {
        Self {
            status: ApprovalStatus::None,
            requested_by: None,
            request_reason: None,
            approver_id: None,
            decision_comment: None,
            decided_at: None,
        }
    }
}

// ==========================================
// LineSchedule - 产线排程
// ==========================================
// 红线: RUNNING 期间 completed_quantity ≤ planned_quantity; 终态不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSchedule {
    pub schedule_id: String,
    pub plan_id: String,
    pub factory_id: String,
    pub production_line_id: String,
    pub product_type_id: String,
    pub planned_quantity: i64,
    pub completed_quantity: i64,
    pub status: ScheduleStatus,
    pub scheduled_start: NaiveDateTime,
    pub scheduled_end: NaiveDateTime,
    pub actual_start: Option<NaiveDateTime>,
    pub actual_end: Option<NaiveDateTime>,
    pub urgent_flag: bool, // 最近一次评估是否低于紧急阈值
    pub updated_at: NaiveDateTime,
    pub revision: i32,
}

impl LineSchedule {
    pub fn remaining_quantity(&self) -> i64 {
        (self.planned_quantity - self.completed_quantity).max(0)
    }

    pub fn duration_hours(&self) -> f64 {
        (self.scheduled_end - self.scheduled_start).num_seconds() as f64 / 3600.0
    }

    /// 与 [start, end) 区间是否重叠
    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.scheduled_start < end && start < self.scheduled_end
    }
}

// ==========================================
// ProductionPlan - 插单产出的生产计划视图
// ==========================================
// 用途: confirm/force 插单与审批接口的返回类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionPlan {
    pub plan: SchedulingPlan,
    pub schedules: Vec<LineSchedule>,
}

// ==========================================
// ScheduleShift - 插单生效时对下游排程的顺延
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleShift {
    pub schedule_id: String,
    pub delay_minutes: i64,
}
