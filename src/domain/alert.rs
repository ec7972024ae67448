// ==========================================
// 工厂生产排程系统 - 排程预警领域模型
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{AlertSeverity, AlertStatus, AlertType};

// ==========================================
// SchedulingAlert - 排程预警
// ==========================================
// 生命周期: OPEN → ACKNOWLEDGED → RESOLVED, 每步记录操作人与时间
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingAlert {
    pub alert_id: String,
    pub factory_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub related_schedule_id: Option<String>,
    pub related_plan_id: Option<String>,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: NaiveDateTime,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<NaiveDateTime>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolution_notes: Option<String>,
}

/// 新预警（尚未落库）
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub factory_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub related_schedule_id: Option<String>,
    pub related_plan_id: Option<String>,
    pub message: String,
}
