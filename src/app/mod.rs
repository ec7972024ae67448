// ==========================================
// 工厂生产排程系统 - 应用层
// ==========================================
// 职责: 共享状态装配、HTTP 接口、定时清扫
// ==========================================

pub mod http;
pub mod state;
pub mod sweeper;

// 重导出
pub use http::{router, HeaderSessionResolver, HttpError, HttpState, SessionResolver};
pub use state::AppState;
pub use sweeper::{SlotSweeper, SweeperConfig};
