// ==========================================
// 工厂生产排程系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod action_log_repo;
pub mod alert_repo;
pub mod assignment_repo;
pub mod error;
pub mod line_repo;
pub mod plan_repo;
pub mod row_mapping;
pub mod schedule_repo;
pub mod slot_repo;
pub mod urgent_insert_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use alert_repo::{AlertFilter, AlertRepository};
pub use assignment_repo::{AssignmentRepository, AssignmentTransition};
pub use error::{RepositoryError, RepositoryResult};
pub use line_repo::LineRepository;
pub use plan_repo::{PlanFilter, PlanRepository};
pub use schedule_repo::ScheduleRepository;
pub use slot_repo::{SlotCas, SlotRepository};
pub use urgent_insert_repo::{DecisionCommit, InsertCommit, UrgentInsertRepository};
