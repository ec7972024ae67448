// ==========================================
// 工厂生产排程系统 - 核心库
// ==========================================
// 能力: 排程计划 / 完成概率 / 紧急插单 / 预警 / 派工
// 技术栈: axum + Rust + SQLite
// 多工厂: 每条记录与每个操作都带 factory_id
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 纯计算 (概率 / 时段生成 / 评分 / 影响分析)
pub mod engine;

// 配置层 - 工厂配置与进程配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/schema）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - HTTP / 定时清扫
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域实体
pub use domain::{
    ActionLog, ActionType, InsertSlot, LineSchedule, ProductionPlan, SchedulingAlert,
    SchedulingPlan, WorkerAssignment,
};

// 引擎
pub use engine::{CompletionProbabilityEstimator, ImpactAnalyzer, InsertSlotGenerator, SlotScorer};

// API
pub use api::{Actor, AlertManager, ApiError, ApiResult, LineApi, PlanApi, UrgentInsertApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "工厂生产排程系统";
