// ==========================================
// 工厂生产排程系统 - 领域类型定义
// ==========================================
// 职责: 状态枚举 + 每个实体唯一的状态转换函数
// 红线: 非法转换一律返回 TransitionError, 不允许散落的状态字符串判断
// 存储: 所有枚举以 SCREAMING_SNAKE_CASE 文本落库
// ==========================================

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ==========================================
// 状态转换错误
// ==========================================

/// 状态转换错误（实体 + 当前状态 + 触发事件）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("无效的状态转换: {entity} 当前状态={from}, 事件={event}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub event: String,
}

impl TransitionError {
    fn new(entity: &'static str, from: impl fmt::Display, event: impl fmt::Debug) -> Self {
        Self {
            entity,
            from: from.to_string(),
            event: format!("{:?}", event).to_uppercase(),
        }
    }
}

/// 为落库枚举生成 as_str / parse / Display / ToSql / FromSql
macro_rules! db_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s.trim().to_uppercase().as_str() {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::parse(text).ok_or_else(|| {
                    FromSqlError::Other(format!("未知的{}取值: {}", stringify!($name), text).into())
                })
            }
        }
    };
}

// ==========================================
// 排程计划状态 (Plan Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Draft,     // 草稿
    Confirmed, // 已确认
    Cancelled, // 已取消 (终态)
}

db_enum!(PlanStatus {
    Draft => "DRAFT",
    Confirmed => "CONFIRMED",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanEvent {
    Edit,
    Confirm,
    Cancel,
}

impl PlanStatus {
    pub fn apply(self, event: PlanEvent) -> Result<PlanStatus, TransitionError> {
        use PlanEvent::*;
        use PlanStatus::*;
        match (self, event) {
            (Draft, Edit) => Ok(Draft),
            (Draft, Confirm) => Ok(Confirmed),
            (Draft, Cancel) | (Confirmed, Cancel) => Ok(Cancelled),
            (from, ev) => Err(TransitionError::new("SchedulingPlan", from, ev)),
        }
    }
}

// ==========================================
// 计划类型 (Plan Type)
// ==========================================
// REGULAR: 日常排程计划 (工厂+日期唯一)
// URGENT_INSERT: 紧急插单生成的生产计划
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    Regular,
    UrgentInsert,
}

db_enum!(PlanType {
    Regular => "REGULAR",
    UrgentInsert => "URGENT_INSERT",
});

// ==========================================
// 产线排程状态 (Line Schedule Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Pending,   // 待开工
    Running,   // 生产中
    Completed, // 已完工 (终态)
    Cancelled, // 已取消 (终态)
}

db_enum!(ScheduleStatus {
    Pending => "PENDING",
    Running => "RUNNING",
    Completed => "COMPLETED",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    Edit,
    Start,
    Progress,
    Complete,
    Cancel,
    /// 插单连锁顺延
    Shift,
}

impl ScheduleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduleStatus::Completed | ScheduleStatus::Cancelled)
    }

    pub fn apply(self, event: ScheduleEvent) -> Result<ScheduleStatus, TransitionError> {
        use ScheduleEvent::*;
        use ScheduleStatus::*;
        match (self, event) {
            (Pending, Edit) | (Pending, Shift) => Ok(Pending),
            (Pending, Start) => Ok(Running),
            (Running, Progress) | (Running, Shift) => Ok(Running),
            (Running, Complete) => Ok(Completed),
            (Pending, Cancel) | (Running, Cancel) => Ok(Cancelled),
            (from, ev) => Err(TransitionError::new("LineSchedule", from, ev)),
        }
    }
}

// ==========================================
// 工人派工状态 (Worker Assignment Status)
// ==========================================
// 严格顺序: ASSIGNED → CHECKED_IN → CHECKED_OUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Assigned,
    CheckedIn,
    CheckedOut,
}

db_enum!(AssignmentStatus {
    Assigned => "ASSIGNED",
    CheckedIn => "CHECKED_IN",
    CheckedOut => "CHECKED_OUT",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentEvent {
    CheckIn,
    CheckOut,
    Remove,
}

impl AssignmentStatus {
    /// Remove 事件合法时返回原状态（由调用方删除记录）
    pub fn apply(self, event: AssignmentEvent) -> Result<AssignmentStatus, TransitionError> {
        use AssignmentEvent::*;
        use AssignmentStatus::*;
        match (self, event) {
            (Assigned, CheckIn) => Ok(CheckedIn),
            (CheckedIn, CheckOut) => Ok(CheckedOut),
            (Assigned, Remove) => Ok(Assigned),
            (from, ev) => Err(TransitionError::new("WorkerAssignment", from, ev)),
        }
    }
}

// ==========================================
// 插单时段状态 (Insert Slot Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    Available, // 可用
    Locked,    // 已锁定
    Consumed,  // 已占用
    Expired,   // 已过期 (终态)
}

db_enum!(SlotStatus {
    Available => "AVAILABLE",
    Locked => "LOCKED",
    Consumed => "CONSUMED",
    Expired => "EXPIRED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotEvent {
    Lock,
    Unlock,
    Consume,
    /// 强制插单被驳回, 归还时段
    Reinstate,
    Expire,
    /// 锁超时回收
    Reclaim,
}

impl SlotStatus {
    pub fn apply(self, event: SlotEvent) -> Result<SlotStatus, TransitionError> {
        use SlotEvent::*;
        use SlotStatus::*;
        match (self, event) {
            (Available, Lock) => Ok(Locked),
            (Locked, Unlock) | (Locked, Reclaim) => Ok(Available),
            (Locked, Consume) => Ok(Consumed),
            (Consumed, Reinstate) => Ok(Available),
            (Available, Expire) | (Locked, Expire) | (Consumed, Expire) => Ok(Expired),
            (from, ev) => Err(TransitionError::new("InsertSlot", from, ev)),
        }
    }
}

// ==========================================
// 时段来源 (Slot Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotKind {
    Idle,           // 产线空闲区间
    UnderCommitted, // 已排程但产能未吃满的区间
}

db_enum!(SlotKind {
    Idle => "IDLE",
    UnderCommitted => "UNDER_COMMITTED",
});

// ==========================================
// 插单审批状态 (Urgent Insert Approval Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    None,
    PendingApproval,
    Approved,
    Rejected,
}

db_enum!(ApprovalStatus {
    None => "NONE",
    PendingApproval => "PENDING_APPROVAL",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalEvent {
    Submit,
    Approve,
    Reject,
}

impl ApprovalStatus {
    pub fn apply(self, event: ApprovalEvent) -> Result<ApprovalStatus, TransitionError> {
        use ApprovalEvent::*;
        use ApprovalStatus::*;
        match (self, event) {
            (None, Submit) => Ok(PendingApproval),
            (PendingApproval, Approve) => Ok(Approved),
            (PendingApproval, Reject) => Ok(Rejected),
            (from, ev) => Err(TransitionError::new("UrgentInsertApproval", from, ev)),
        }
    }
}

// ==========================================
// 预警状态 (Alert Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

db_enum!(AlertStatus {
    Open => "OPEN",
    Acknowledged => "ACKNOWLEDGED",
    Resolved => "RESOLVED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEvent {
    Acknowledge,
    Resolve,
}

impl AlertStatus {
    pub fn apply(self, event: AlertEvent) -> Result<AlertStatus, TransitionError> {
        use AlertEvent::*;
        use AlertStatus::*;
        match (self, event) {
            (Open, Acknowledge) => Ok(Acknowledged),
            (Acknowledged, Resolve) => Ok(Resolved),
            (from, ev) => Err(TransitionError::new("SchedulingAlert", from, ev)),
        }
    }
}

// ==========================================
// 预警类型 / 严重度
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Urgency,             // 排程完成概率低于阈值
    InsertImpact,        // 插单产生中/高影响
    ForceInsertRejected, // 强制插单被驳回
}

db_enum!(AlertType {
    Urgency => "URGENCY",
    InsertImpact => "INSERT_IMPACT",
    ForceInsertRejected => "FORCE_INSERT_REJECTED",
});

// 顺序: Info < Warning < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

db_enum!(AlertSeverity {
    Info => "INFO",
    Warning => "WARNING",
    Critical => "CRITICAL",
});

// ==========================================
// 插单影响等级 (Impact Level)
// ==========================================
// 顺序: Low < Medium < High; High 必须走强制插单审批
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

db_enum!(ImpactLevel {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
});

impl ImpactLevel {
    /// 是否允许直接确认（不走审批）
    pub fn allows_direct_confirm(&self) -> bool {
        *self <= ImpactLevel::Medium
    }

    /// 影响等级对应的预警严重度（LOW 不预警）
    pub fn alert_severity(&self) -> Option<AlertSeverity> {
        match self {
            ImpactLevel::Low => None,
            ImpactLevel::Medium => Some(AlertSeverity::Warning),
            ImpactLevel::High => Some(AlertSeverity::Critical),
        }
    }
}

// ==========================================
// 产线状态 (Line Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    Active,
    Maintenance,
}

db_enum!(LineStatus {
    Active => "ACTIVE",
    Maintenance => "MAINTENANCE",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_never_leaves_cancelled() {
        for ev in [PlanEvent::Edit, PlanEvent::Confirm, PlanEvent::Cancel] {
            assert!(PlanStatus::Cancelled.apply(ev).is_err());
        }
        assert_eq!(
            PlanStatus::Draft.apply(PlanEvent::Confirm).unwrap(),
            PlanStatus::Confirmed
        );
        assert!(PlanStatus::Confirmed.apply(PlanEvent::Confirm).is_err());
    }

    #[test]
    fn test_schedule_terminal_states_are_immutable() {
        for from in [ScheduleStatus::Completed, ScheduleStatus::Cancelled] {
            for ev in [
                ScheduleEvent::Edit,
                ScheduleEvent::Start,
                ScheduleEvent::Progress,
                ScheduleEvent::Complete,
                ScheduleEvent::Cancel,
                ScheduleEvent::Shift,
            ] {
                assert!(from.apply(ev).is_err(), "{} 不应接受 {:?}", from, ev);
            }
        }
        assert!(ScheduleStatus::Pending.apply(ScheduleEvent::Complete).is_err());
    }

    #[test]
    fn test_assignment_lifecycle_is_strict() {
        let s = AssignmentStatus::Assigned;
        assert!(s.apply(AssignmentEvent::CheckOut).is_err());
        let s = s.apply(AssignmentEvent::CheckIn).unwrap();
        assert!(s.apply(AssignmentEvent::Remove).is_err());
        assert!(s.apply(AssignmentEvent::CheckIn).is_err());
        let s = s.apply(AssignmentEvent::CheckOut).unwrap();
        assert_eq!(s, AssignmentStatus::CheckedOut);
    }

    #[test]
    fn test_slot_transitions() {
        assert_eq!(SlotStatus::Available.apply(SlotEvent::Lock).unwrap(), SlotStatus::Locked);
        assert!(SlotStatus::Locked.apply(SlotEvent::Lock).is_err());
        assert!(SlotStatus::Available.apply(SlotEvent::Consume).is_err());
        assert_eq!(SlotStatus::Locked.apply(SlotEvent::Consume).unwrap(), SlotStatus::Consumed);
        assert_eq!(
            SlotStatus::Consumed.apply(SlotEvent::Reinstate).unwrap(),
            SlotStatus::Available
        );
        assert!(SlotStatus::Expired.apply(SlotEvent::Unlock).is_err());
    }

    #[test]
    fn test_approval_cannot_be_decided_twice() {
        let s = ApprovalStatus::None.apply(ApprovalEvent::Submit).unwrap();
        let s = s.apply(ApprovalEvent::Approve).unwrap();
        let err = s.apply(ApprovalEvent::Reject).unwrap_err();
        assert_eq!(err.from, "APPROVED");
        assert_eq!(err.event, "REJECT");
    }

    #[test]
    fn test_enum_text_round_trip_and_order() {
        assert_eq!(SlotStatus::parse("locked"), Some(SlotStatus::Locked));
        assert_eq!(ApprovalStatus::parse("PENDING_APPROVAL"), Some(ApprovalStatus::PendingApproval));
        assert_eq!(SlotKind::parse("bogus"), None);
        assert!(ImpactLevel::High > ImpactLevel::Medium);
        assert!(!ImpactLevel::High.allows_direct_confirm());
        assert_eq!(ImpactLevel::Low.alert_severity(), None);
    }
}
