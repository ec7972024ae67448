// ==========================================
// 工厂生产排程系统 - 插单时段领域模型
// ==========================================
// 红线: available_capacity ≥ 0; 同一时段同一时刻只允许一个状态转换成功
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{SlotKind, SlotStatus};

// ==========================================
// InsertSlot - 候选/预留插单时段
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertSlot {
    pub slot_id: String,
    pub factory_id: String,
    pub production_line_id: String,
    pub slot_kind: SlotKind,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub available_capacity: i64,
    pub recommendation_score: f64,
    pub status: SlotStatus,
    pub locked_by: Option<String>,
    pub locked_at: Option<NaiveDateTime>,
    pub consumed_by_plan_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub revision: i32,
}

impl InsertSlot {
    pub fn window_hours(&self) -> f64 {
        (self.window_end - self.window_start).num_seconds() as f64 / 3600.0
    }

    pub fn is_held_by(&self, actor: &str) -> bool {
        self.status == SlotStatus::Locked && self.locked_by.as_deref() == Some(actor)
    }
}
