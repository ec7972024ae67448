// ==========================================
// 工厂生产排程系统 - 操作日志数据仓储
// ==========================================
// 表: action_log
// 红线: 所有写入必须记录
// ==========================================

mod core;
mod queries;


pub use core::ActionLogRepository;
