// ==========================================
// 工厂生产排程系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、状态枚举、状态转换规则
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod alert;
pub mod assignment;
pub mod line;
pub mod plan;
pub mod slot;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use alert::{NewAlert, SchedulingAlert};
pub use assignment::WorkerAssignment;
pub use line::{
    LineCapability, LineDowntime, LineProfile, MaterialStock, ProductionLine, ThroughputSample,
    Worker,
};
pub use plan::{LineSchedule, ProductionPlan, ScheduleShift, SchedulingPlan, UrgentInsertApproval};
pub use slot::InsertSlot;
pub use types::{
    AlertEvent, AlertSeverity, AlertStatus, AlertType, ApprovalEvent, ApprovalStatus,
    AssignmentEvent, AssignmentStatus, ImpactLevel, LineStatus, PlanEvent, PlanStatus, PlanType,
    ScheduleEvent, ScheduleStatus, SlotEvent, SlotKind, SlotStatus, TransitionError,
};
