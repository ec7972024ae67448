// ==========================================
// 工厂生产排程系统 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型, 转换 Repository / 状态机错误为可展示的错误
// 约定: 每个错误都带稳定的 code, 调用方按 code 决定是否重新查询
// ==========================================

use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::slot::InsertSlot;
use crate::domain::types::TransitionError;
use crate::engine::impact::ImpactAnalysis;
use crate::repository::error::RepositoryError;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("无效的状态转换: {entity} 当前状态={from}, 操作={event}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        event: String,
    },

    #[error("无权限: {0}")]
    Unauthorized(String),

    #[error("数据冲突: {0}")]
    Conflict(String),

    // ==========================================
    // 插单专用错误
    // ==========================================
    /// 时段已被其他请求锁定/占用; alternatives 为最新可用时段
    #[error("时段不可用: slot_id={slot_id}, {reason}")]
    SlotUnavailable {
        slot_id: String,
        reason: String,
        alternatives: Vec<InsertSlot>,
    },

    /// 影响等级为 HIGH, 必须走强制插单
    #[error("插单影响等级为 {}, 需走强制插单审批", .impact.impact_level)]
    ForceInsertRequired { impact: Box<ImpactAnalysis> },

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("乐观锁冲突: {0}")]
    OptimisticLockFailure(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    /// 稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::SlotUnavailable { .. } => "SLOT_UNAVAILABLE",
            ApiError::ForceInsertRequired { .. } => "FORCE_INSERT_REQUIRED",
            ApiError::OptimisticLockFailure(_) => "OPTIMISTIC_LOCK_FAILURE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// 供调用方重新渲染的附加信息
    pub fn details(&self) -> Option<Value> {
        match self {
            ApiError::InvalidStateTransition { entity, from, event } => Some(json!({
                "entity": entity,
                "from": from,
                "event": event,
            })),
            ApiError::SlotUnavailable {
                slot_id,
                alternatives,
                ..
            } => Some(json!({
                "slot_id": slot_id,
                "alternatives": alternatives,
            })),
            ApiError::ForceInsertRequired { impact } => serde_json::to_value(impact).ok(),
            _ => None,
        }
    }

    pub fn slot_unavailable(slot_id: &str, reason: impl Into<String>) -> Self {
        ApiError::SlotUnavailable {
            slot_id: slot_id.to_string(),
            reason: reason.into(),
            alternatives: Vec::new(),
        }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        ApiError::NotFound(format!("{}(id={})不存在", entity, id))
    }
}

// ==========================================
// 从 TransitionError 转换
// ==========================================
impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::InvalidStateTransition {
            entity: err.entity.to_string(),
            from: err.from,
            event: err.event,
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            // 并发控制错误
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
                actual,
            } => ApiError::OptimisticLockFailure(format!(
                "{}({})已被其他用户修改（期望revision={}，实际revision={}）",
                entity, id, expected, actual
            )),
            RepositoryError::StatusConflict {
                entity,
                id,
                expected,
                actual,
            } => {
                if entity == "InsertSlot" {
                    ApiError::slot_unavailable(
                        &id,
                        format!("期望状态 {}, 实际状态 {}", expected, actual),
                    )
                } else {
                    ApiError::InvalidStateTransition {
                        entity,
                        from: actual,
                        event: format!("EXPECT_{}", expected),
                    }
                }
            }

            // 数据库错误
            RepositoryError::NotFound { entity, id } => ApiError::not_found(&entity, &id),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::Conflict(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::ValidationError(format!("引用的记录不存在: {}", msg))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),

            // 数据质量错误
            RepositoryError::FieldValueError { field, message } => {
                ApiError::ValidationError(format!("字段{}错误: {}", field, message))
            }

            // 通用错误
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{PlanEvent, PlanStatus};

    #[test]
    fn test_repository_error_conversion() {
        let api_err: ApiError = RepositoryError::not_found("SchedulingPlan", "P001").into();
        match &api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("SchedulingPlan"));
                assert!(msg.contains("P001"));
            }
            other => panic!("Expected NotFound, got {:?}", other),
        }

        let api_err: ApiError = RepositoryError::UniqueConstraintViolation("x".into()).into();
        assert_eq!(api_err.code(), "CONFLICT");

        let api_err: ApiError = RepositoryError::OptimisticLockFailure {
            entity: "LineSchedule".to_string(),
            id: "S1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        match api_err {
            ApiError::OptimisticLockFailure(msg) => assert!(msg.contains("已被其他用户修改")),
            other => panic!("Expected OptimisticLockFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_slot_status_conflict_becomes_slot_unavailable() {
        let api_err: ApiError = RepositoryError::StatusConflict {
            entity: "InsertSlot".to_string(),
            id: "SLOT1".to_string(),
            expected: "LOCKED".to_string(),
            actual: "CONSUMED".to_string(),
        }
        .into();
        assert_eq!(api_err.code(), "SLOT_UNAVAILABLE");
        let details = api_err.details().unwrap();
        assert_eq!(details["slot_id"], "SLOT1");
    }

    #[test]
    fn test_transition_error_conversion() {
        let err = PlanStatus::Cancelled.apply(PlanEvent::Confirm).unwrap_err();
        let api_err: ApiError = err.into();
        match api_err {
            ApiError::InvalidStateTransition { entity, from, event } => {
                assert_eq!(entity, "SchedulingPlan");
                assert_eq!(from, "CANCELLED");
                assert_eq!(event, "CONFIRM");
            }
            other => panic!("Expected InvalidStateTransition, got {:?}", other),
        }
    }
}
