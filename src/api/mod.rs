// ==========================================
// 工厂生产排程系统 - API 层
// ==========================================
// 职责: 业务用例服务, 供 HTTP 层与定时任务调用
// 约定: 所有写操作显式接收 Actor
// ==========================================

pub mod actor;
pub mod alert_api;
pub mod error;
pub mod line_api;
pub mod page;
pub mod plan_api;
pub mod slot_lock;
pub mod urgent_insert_api;

// 重导出核心类型
pub use actor::Actor;
pub use alert_api::AlertManager;
pub use error::{ApiError, ApiResult};
pub use line_api::{AddDowntimeRequest, LineApi, RecordSampleRequest, UpsertLineRequest};
pub use page::{Page, PageRequest};
pub use plan_api::{
    AddScheduleRequest, CreatePlanRequest, PlanApi, UpdateScheduleRequest, UrgentSchedule,
};
pub use slot_lock::SlotLockManager;
pub use urgent_insert_api::{
    ApprovalDecision, GenerateSlotsResult, InsertOrderRequest, UrgentInsertApi,
};
