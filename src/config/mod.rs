// ==========================================
// 工厂生产排程系统 - 配置层
// ==========================================
// 职责: 工厂级可调参数 (config_kv) + 进程级配置 (环境变量)
// ==========================================

pub mod config_manager;
pub mod service_config;

// 重导出核心配置管理器
pub use config_manager::{
    config_keys, defaults, ConfigManager, ImpactSettings, ScoringWeights, SlotSettings,
    UrgentThreshold,
};
pub use service_config::ServiceConfig;
