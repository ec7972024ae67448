// ==========================================
// 工厂生产排程系统 - 操作日志领域模型
// ==========================================
// 红线: 所有写操作必须记录 (操作人 + 时间 + 参数)
// 用途: 审计追踪
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub factory_id: String,
    pub action_type: String,  // ActionType::as_str
    pub entity_type: String,  // PLAN / SCHEDULE / ASSIGNMENT / SLOT / ALERT / CONFIG / LINE
    pub entity_id: String,
    pub actor: String,
    pub action_ts: NaiveDateTime,
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

impl ActionLog {
    /// 构造一条当前时间的操作日志
    pub fn record(
        factory_id: &str,
        action_type: ActionType,
        entity_type: &str,
        entity_id: &str,
        actor: &str,
        payload: Option<JsonValue>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            factory_id: factory_id.to_string(),
            action_type: action_type.as_str().to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: actor.to_string(),
            action_ts: crate::db::now(),
            payload_json: payload,
            detail: Some(detail.into()),
        }
    }
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    CreatePlan,
    UpdatePlan,
    ConfirmPlan,
    CancelPlan,
    AddSchedule,
    UpdateSchedule,
    StartSchedule,
    ReportProgress,
    CompleteSchedule,
    AssignWorkers,
    RemoveAssignment,
    CheckIn,
    CheckOut,
    SetUrgentThreshold,
    UpdateConfig,
    GenerateSlots,
    LockSlot,
    UnlockSlot,
    ConfirmInsert,
    ForceInsert,
    ApproveInsert,
    RejectInsert,
    AcknowledgeAlert,
    ResolveAlert,
    UpsertLine,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreatePlan => "CREATE_PLAN",
            ActionType::UpdatePlan => "UPDATE_PLAN",
            ActionType::ConfirmPlan => "CONFIRM_PLAN",
            ActionType::CancelPlan => "CANCEL_PLAN",
            ActionType::AddSchedule => "ADD_SCHEDULE",
            ActionType::UpdateSchedule => "UPDATE_SCHEDULE",
            ActionType::StartSchedule => "START_SCHEDULE",
            ActionType::ReportProgress => "REPORT_PROGRESS",
            ActionType::CompleteSchedule => "COMPLETE_SCHEDULE",
            ActionType::AssignWorkers => "ASSIGN_WORKERS",
            ActionType::RemoveAssignment => "REMOVE_ASSIGNMENT",
            ActionType::CheckIn => "CHECK_IN",
            ActionType::CheckOut => "CHECK_OUT",
            ActionType::SetUrgentThreshold => "SET_URGENT_THRESHOLD",
            ActionType::UpdateConfig => "UPDATE_CONFIG",
            ActionType::GenerateSlots => "GENERATE_SLOTS",
            ActionType::LockSlot => "LOCK_SLOT",
            ActionType::UnlockSlot => "UNLOCK_SLOT",
            ActionType::ConfirmInsert => "CONFIRM_INSERT",
            ActionType::ForceInsert => "FORCE_INSERT",
            ActionType::ApproveInsert => "APPROVE_INSERT",
            ActionType::RejectInsert => "REJECT_INSERT",
            ActionType::AcknowledgeAlert => "ACKNOWLEDGE_ALERT",
            ActionType::ResolveAlert => "RESOLVE_ALERT",
            ActionType::UpsertLine => "UPSERT_LINE",
        }
    }
}
