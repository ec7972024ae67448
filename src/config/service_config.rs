// ==========================================
// 工厂生产排程系统 - 进程级配置
// ==========================================
// 来源: 环境变量 (未设置时使用默认值)
// ==========================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "FACTORY_SCHEDULING_DB";
pub const ENV_BIND: &str = "FACTORY_SCHEDULING_BIND";
pub const ENV_SWEEP_SECS: &str = "FACTORY_SCHEDULING_SWEEP_SECS";
pub const ENV_SWEEP_HORIZON_HOURS: &str = "FACTORY_SCHEDULING_SWEEP_HORIZON_HOURS";

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_SWEEP_SECS: u64 = 300;
const DEFAULT_SWEEP_HORIZON_HOURS: i64 = 48;

/// 服务进程配置
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub db_path: String,
    pub bind_addr: SocketAddr,
    /// 时段生成/过期清扫周期
    pub sweep_interval: Duration,
    pub sweep_horizon_hours: i64,
}

impl ServiceConfig {
    /// 从环境变量加载
    ///
    /// # 错误
    /// - 监听地址无法解析
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_raw = env_trimmed(ENV_BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind_raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{} 无法解析: {} ({})", ENV_BIND, bind_raw, e))?;

        let sweep_secs = env_trimmed(ENV_SWEEP_SECS)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SWEEP_SECS);

        let sweep_horizon_hours = env_trimmed(ENV_SWEEP_HORIZON_HOURS)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SWEEP_HORIZON_HOURS);

        Ok(Self {
            db_path: env_trimmed(ENV_DB_PATH).unwrap_or_else(default_db_path),
            bind_addr,
            sweep_interval: Duration::from_secs(sweep_secs),
            sweep_horizon_hours,
        })
    }
}

fn env_trimmed(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 默认数据库路径: 用户数据目录/factory-scheduling/scheduling.db
pub fn default_db_path() -> String {
    let mut path = PathBuf::from("./scheduling.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("factory-scheduling");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("scheduling.db");
        }
    }

    path.to_string_lossy().to_string()
}
