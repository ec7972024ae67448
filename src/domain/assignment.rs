// ==========================================
// 工厂生产排程系统 - 工人派工领域模型
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::AssignmentStatus;

// ==========================================
// WorkerAssignment - 工人派工
// ==========================================
// 弱引用 LineSchedule (不拥有)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAssignment {
    pub assignment_id: String,
    pub schedule_id: String,
    pub worker_id: String,
    pub status: AssignmentStatus,
    pub assigned_by: String,
    pub assigned_at: NaiveDateTime,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub performance_score: Option<f64>, // 签退时填写, 0-100
}
