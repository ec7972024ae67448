// ==========================================
// 工厂生产排程系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和 API 实例
// 连接: 所有仓储共享同一个 Arc<Mutex<Connection>>
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{AlertManager, LineApi, PlanApi, SlotLockManager, UrgentInsertApi};
use crate::config::ConfigManager;
use crate::repository::{
    ActionLogRepository, AlertRepository, AssignmentRepository, LineRepository, PlanRepository,
    ScheduleRepository, SlotRepository, UrgentInsertRepository,
};

/// 应用状态
///
/// 包含所有 API 实例和共享资源, 由 HTTP 层与定时清扫共享
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 排程计划 / 排程 / 派工 / 概率 API
    pub plan_api: Arc<PlanApi>,

    /// 紧急插单 API
    pub urgent_insert_api: Arc<UrgentInsertApi>,

    /// 预警管理
    pub alert_manager: Arc<AlertManager>,

    /// 产线与资源 API
    pub line_api: Arc<LineApi>,

    /// 工厂配置
    pub config_manager: Arc<ConfigManager>,

    /// 操作日志仓储（用于审计追踪）
    pub action_log_repo: Arc<ActionLogRepository>,
}

impl AppState {
    /// 创建新的 AppState 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径 (不存在时创建并初始化 schema)
    ///
    /// # 错误
    /// - 数据库无法打开或 schema 初始化失败
    pub fn new(db_path: &str) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);
        let conn = crate::db::open_and_migrate(db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        Self::from_connection(db_path, conn)
    }

    /// 基于已打开 (且已初始化 schema) 的连接构建
    pub fn from_connection(db_path: &str, conn: Connection) -> Result<Self, String> {
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let plan_repo = Arc::new(PlanRepository::new(conn.clone()));
        let schedule_repo = Arc::new(ScheduleRepository::new(conn.clone()));
        let assignment_repo = Arc::new(AssignmentRepository::new(conn.clone()));
        let slot_repo = Arc::new(SlotRepository::new(conn.clone()));
        let alert_repo = Arc::new(AlertRepository::new(conn.clone()));
        let line_repo = Arc::new(LineRepository::new(conn.clone()));
        let urgent_repo = Arc::new(UrgentInsertRepository::new(conn.clone()));
        let action_log_repo = Arc::new(ActionLogRepository::new(conn.clone()));

        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        // ==========================================
        // 初始化API层
        // ==========================================
        let alert_manager = Arc::new(AlertManager::new(alert_repo, action_log_repo.clone()));
        let lock_manager = Arc::new(SlotLockManager::new(
            slot_repo.clone(),
            action_log_repo.clone(),
            config_manager.clone(),
        ));

        let plan_api = Arc::new(PlanApi::new(
            plan_repo.clone(),
            schedule_repo.clone(),
            assignment_repo.clone(),
            line_repo.clone(),
            action_log_repo.clone(),
            config_manager.clone(),
            alert_manager.clone(),
        ));

        let urgent_insert_api = Arc::new(UrgentInsertApi::new(
            slot_repo,
            plan_repo,
            schedule_repo,
            line_repo.clone(),
            assignment_repo,
            urgent_repo,
            action_log_repo.clone(),
            config_manager.clone(),
            lock_manager,
            alert_manager.clone(),
        ));

        let line_api = Arc::new(LineApi::new(line_repo, action_log_repo.clone()));

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path: db_path.to_string(),
            plan_api,
            urgent_insert_api,
            alert_manager,
            line_api,
            config_manager,
            action_log_repo,
        })
    }
}
