// ==========================================
// 工厂生产排程系统 - 配置管理器
// ==========================================
// 职责: 工厂级可调参数的加载、查询、覆写
// 存储: config_kv 表 (scope_id = factory_id)
// 缺省: 未配置的键一律使用 defaults 中的默认值
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::{fmt_ts, get_ts};

// ==========================================
// 配置快照结构
// ==========================================

/// 紧急阈值配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgentThreshold {
    pub factory_id: String,
    pub threshold: f64,
    pub updated_by: Option<String>,
    pub updated_at: NaiveDateTime,
}

/// 时段生成参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotSettings {
    pub min_duration_minutes: i64,
    /// 已排产量 / 区间产能 低于该比例视为产能未吃满
    pub under_commit_ratio: f64,
    /// 0 = 锁不过期
    pub lock_ttl_seconds: i64,
}

/// 插单影响分析参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactSettings {
    pub delay_threshold_minutes: i64,
    pub high_count: usize,
    pub high_delay_minutes: i64,
    pub changeover_minutes: i64,
}

/// 时段评分权重 (使用前归一化)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub deadline: f64,
    pub capacity: f64,
    pub changeover: f64,
    pub disruption: f64,
}

impl ScoringWeights {
    /// 归一化到和为 1; 全部非正时退回默认权重
    pub fn normalized(&self) -> ScoringWeights {
        let clamp = |v: f64| if v.is_finite() && v > 0.0 { v } else { 0.0 };
        let w = ScoringWeights {
            deadline: clamp(self.deadline),
            capacity: clamp(self.capacity),
            changeover: clamp(self.changeover),
            disruption: clamp(self.disruption),
        };
        let sum = w.deadline + w.capacity + w.changeover + w.disruption;
        if sum <= 0.0 {
            return ScoringWeights::default().normalized();
        }
        ScoringWeights {
            deadline: w.deadline / sum,
            capacity: w.capacity / sum,
            changeover: w.changeover / sum,
            disruption: w.disruption / sum,
        }
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            deadline: defaults::SCORE_WEIGHT_DEADLINE,
            capacity: defaults::SCORE_WEIGHT_CAPACITY,
            changeover: defaults::SCORE_WEIGHT_CHANGEOVER,
            disruption: defaults::SCORE_WEIGHT_DISRUPTION,
        }
    }
}

impl Default for ImpactSettings {
    fn default() -> Self {
        Self {
            delay_threshold_minutes: defaults::IMPACT_DELAY_THRESHOLD_MINUTES,
            high_count: defaults::IMPACT_HIGH_COUNT,
            high_delay_minutes: defaults::IMPACT_HIGH_DELAY_MINUTES,
            changeover_minutes: defaults::CHANGEOVER_MINUTES,
        }
    }
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            min_duration_minutes: defaults::SLOT_MIN_DURATION_MINUTES,
            under_commit_ratio: defaults::SLOT_UNDER_COMMIT_RATIO,
            lock_ttl_seconds: defaults::SLOT_LOCK_TTL_SECONDS,
        }
    }
}

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取工厂配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_value(&self, factory_id: &str, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        match conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![factory_id, key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入工厂配置值 (校验已知键的取值范围)
    ///
    /// # 错误
    /// - `FieldValueError`: 取值非法
    pub fn set_value(
        &self,
        factory_id: &str,
        key: &str,
        value: &str,
        updated_by: &str,
    ) -> RepositoryResult<()> {
        validate_value(key, value)?;
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO config_kv (scope_id, key, value, updated_by, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(scope_id, key) DO UPDATE SET
                   value = excluded.value,
                   updated_by = excluded.updated_by,
                   updated_at = excluded.updated_at"#,
            params![factory_id, key, value, updated_by, fmt_ts(&crate::db::now())],
        )?;
        Ok(())
    }

    /// 工厂全部显式配置 (键 → 值)
    pub fn snapshot(&self, factory_id: &str) -> RepositoryResult<BTreeMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![factory_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    fn get_f64_or(&self, factory_id: &str, key: &str, default: f64) -> RepositoryResult<f64> {
        Ok(match self.get_value(factory_id, key)? {
            Some(raw) => raw.trim().parse::<f64>().unwrap_or_else(|_| {
                tracing::warn!(factory_id, key, raw = %raw, "配置值无法解析为数值, 使用默认值");
                default
            }),
            None => default,
        })
    }

    fn get_i64_or(&self, factory_id: &str, key: &str, default: i64) -> RepositoryResult<i64> {
        Ok(match self.get_value(factory_id, key)? {
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|_| {
                tracing::warn!(factory_id, key, raw = %raw, "配置值无法解析为整数, 使用默认值");
                default
            }),
            None => default,
        })
    }

    // ===== 紧急阈值 =====

    /// 获取紧急阈值 (首次访问时写入默认记录)
    pub fn get_urgent_threshold(&self, factory_id: &str) -> RepositoryResult<UrgentThreshold> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT OR IGNORE INTO config_kv (scope_id, key, value, updated_by, updated_at)
               VALUES (?1, ?2, ?3, NULL, ?4)"#,
            params![
                factory_id,
                config_keys::URGENT_THRESHOLD,
                defaults::URGENT_THRESHOLD.to_string(),
                fmt_ts(&crate::db::now()),
            ],
        )?;

        conn.query_row(
            "SELECT value, updated_by, updated_at FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![factory_id, config_keys::URGENT_THRESHOLD],
            |row| {
                let raw: String = row.get(0)?;
                Ok(UrgentThreshold {
                    factory_id: factory_id.to_string(),
                    threshold: raw.trim().parse::<f64>().unwrap_or(defaults::URGENT_THRESHOLD),
                    updated_by: row.get(1)?,
                    updated_at: get_ts(row, 2)?,
                })
            },
        )
        .map_err(Into::into)
    }

    /// 设置紧急阈值
    ///
    /// # 错误
    /// - `FieldValueError`: 阈值不在 [0, 1]
    pub fn set_urgent_threshold(
        &self,
        factory_id: &str,
        threshold: f64,
        updated_by: &str,
    ) -> RepositoryResult<UrgentThreshold> {
        self.set_value(
            factory_id,
            config_keys::URGENT_THRESHOLD,
            &threshold.to_string(),
            updated_by,
        )?;
        self.get_urgent_threshold(factory_id)
    }

    // ===== 时段 / 影响 / 评分 =====

    pub fn slot_settings(&self, factory_id: &str) -> RepositoryResult<SlotSettings> {
        Ok(SlotSettings {
            min_duration_minutes: self
                .get_i64_or(factory_id, config_keys::SLOT_MIN_DURATION_MINUTES, defaults::SLOT_MIN_DURATION_MINUTES)?
                .max(1),
            under_commit_ratio: self.get_f64_or(
                factory_id,
                config_keys::SLOT_UNDER_COMMIT_RATIO,
                defaults::SLOT_UNDER_COMMIT_RATIO,
            )?,
            lock_ttl_seconds: self
                .get_i64_or(factory_id, config_keys::SLOT_LOCK_TTL_SECONDS, defaults::SLOT_LOCK_TTL_SECONDS)?
                .max(0),
        })
    }

    pub fn impact_settings(&self, factory_id: &str) -> RepositoryResult<ImpactSettings> {
        Ok(ImpactSettings {
            delay_threshold_minutes: self.get_i64_or(
                factory_id,
                config_keys::IMPACT_DELAY_THRESHOLD_MINUTES,
                defaults::IMPACT_DELAY_THRESHOLD_MINUTES,
            )?,
            high_count: self
                .get_i64_or(factory_id, config_keys::IMPACT_HIGH_COUNT, defaults::IMPACT_HIGH_COUNT as i64)?
                .max(1) as usize,
            high_delay_minutes: self.get_i64_or(
                factory_id,
                config_keys::IMPACT_HIGH_DELAY_MINUTES,
                defaults::IMPACT_HIGH_DELAY_MINUTES,
            )?,
            changeover_minutes: self.get_i64_or(
                factory_id,
                config_keys::CHANGEOVER_MINUTES,
                defaults::CHANGEOVER_MINUTES,
            )?,
        })
    }

    pub fn scoring_weights(&self, factory_id: &str) -> RepositoryResult<ScoringWeights> {
        Ok(ScoringWeights {
            deadline: self.get_f64_or(factory_id, config_keys::SCORE_WEIGHT_DEADLINE, defaults::SCORE_WEIGHT_DEADLINE)?,
            capacity: self.get_f64_or(factory_id, config_keys::SCORE_WEIGHT_CAPACITY, defaults::SCORE_WEIGHT_CAPACITY)?,
            changeover: self.get_f64_or(factory_id, config_keys::SCORE_WEIGHT_CHANGEOVER, defaults::SCORE_WEIGHT_CHANGEOVER)?,
            disruption: self.get_f64_or(factory_id, config_keys::SCORE_WEIGHT_DISRUPTION, defaults::SCORE_WEIGHT_DISRUPTION)?,
        })
    }

    /// 审批人白名单 (JSON 数组, 未配置为空)
    pub fn approver_ids(&self, factory_id: &str) -> RepositoryResult<Vec<String>> {
        match self.get_value(factory_id, config_keys::APPROVER_IDS)? {
            Some(raw) => Ok(serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|e| {
                tracing::warn!(factory_id, error = %e, "approver_ids 不是合法的 JSON 数组, 视为空");
                Vec::new()
            })),
            None => Ok(Vec::new()),
        }
    }
}

/// 已知键的取值校验
fn validate_value(key: &str, value: &str) -> RepositoryResult<()> {
    let invalid = |message: String| RepositoryError::FieldValueError {
        field: key.to_string(),
        message,
    };

    match key {
        config_keys::URGENT_THRESHOLD | config_keys::SLOT_UNDER_COMMIT_RATIO => {
            let v: f64 = value
                .trim()
                .parse()
                .map_err(|_| invalid(format!("不是数值: {}", value)))?;
            if !(0.0..=1.0).contains(&v) {
                return Err(invalid(format!("取值必须在 [0, 1] 之间: {}", v)));
            }
        }
        config_keys::SCORE_WEIGHT_DEADLINE
        | config_keys::SCORE_WEIGHT_CAPACITY
        | config_keys::SCORE_WEIGHT_CHANGEOVER
        | config_keys::SCORE_WEIGHT_DISRUPTION => {
            let v: f64 = value
                .trim()
                .parse()
                .map_err(|_| invalid(format!("不是数值: {}", value)))?;
            if !v.is_finite() || v < 0.0 {
                return Err(invalid(format!("权重不能为负: {}", v)));
            }
        }
        config_keys::SLOT_MIN_DURATION_MINUTES
        | config_keys::SLOT_LOCK_TTL_SECONDS
        | config_keys::IMPACT_DELAY_THRESHOLD_MINUTES
        | config_keys::IMPACT_HIGH_COUNT
        | config_keys::IMPACT_HIGH_DELAY_MINUTES
        | config_keys::CHANGEOVER_MINUTES => {
            let v: i64 = value
                .trim()
                .parse()
                .map_err(|_| invalid(format!("不是整数: {}", value)))?;
            if v < 0 {
                return Err(invalid(format!("不能为负: {}", v)));
            }
        }
        config_keys::APPROVER_IDS => {
            serde_json::from_str::<Vec<String>>(value)
                .map_err(|e| invalid(format!("必须是字符串数组: {}", e)))?;
        }
        _ => {}
    }
    Ok(())
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 紧急阈值
    pub const URGENT_THRESHOLD: &str = "urgent_threshold";

    // 时段生成
    pub const SLOT_MIN_DURATION_MINUTES: &str = "slot_min_duration_minutes";
    pub const SLOT_UNDER_COMMIT_RATIO: &str = "slot_under_commit_ratio";
    pub const SLOT_LOCK_TTL_SECONDS: &str = "slot_lock_ttl_seconds";

    // 影响分析
    pub const IMPACT_DELAY_THRESHOLD_MINUTES: &str = "impact_delay_threshold_minutes";
    pub const IMPACT_HIGH_COUNT: &str = "impact_high_count";
    pub const IMPACT_HIGH_DELAY_MINUTES: &str = "impact_high_delay_minutes";
    pub const CHANGEOVER_MINUTES: &str = "changeover_minutes";

    // 评分权重
    pub const SCORE_WEIGHT_DEADLINE: &str = "score_weight_deadline";
    pub const SCORE_WEIGHT_CAPACITY: &str = "score_weight_capacity";
    pub const SCORE_WEIGHT_CHANGEOVER: &str = "score_weight_changeover";
    pub const SCORE_WEIGHT_DISRUPTION: &str = "score_weight_disruption";

    // 审批
    pub const APPROVER_IDS: &str = "approver_ids"; // JSON 数组
}

// ==========================================
// 默认值
// ==========================================
pub mod defaults {
    pub const URGENT_THRESHOLD: f64 = 0.6;
    pub const SLOT_MIN_DURATION_MINUTES: i64 = 60;
    pub const SLOT_UNDER_COMMIT_RATIO: f64 = 0.3;
    pub const SLOT_LOCK_TTL_SECONDS: i64 = 0;
    pub const IMPACT_DELAY_THRESHOLD_MINUTES: i64 = 30;
    pub const IMPACT_HIGH_COUNT: usize = 3;
    pub const IMPACT_HIGH_DELAY_MINUTES: i64 = 240;
    pub const CHANGEOVER_MINUTES: i64 = 30;
    pub const SCORE_WEIGHT_DEADLINE: f64 = 0.35;
    pub const SCORE_WEIGHT_CAPACITY: f64 = 0.30;
    pub const SCORE_WEIGHT_CHANGEOVER: f64 = 0.15;
    pub const SCORE_WEIGHT_DISRUPTION: f64 = 0.20;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_urgent_threshold_default_created_on_first_access() {
        let cm = manager();
        assert!(cm.get_value("F1", config_keys::URGENT_THRESHOLD).unwrap().is_none());

        let t = cm.get_urgent_threshold("F1").unwrap();
        assert_eq!(t.threshold, defaults::URGENT_THRESHOLD);
        assert!(t.updated_by.is_none());
        assert!(cm.get_value("F1", config_keys::URGENT_THRESHOLD).unwrap().is_some());
    }

    #[test]
    fn test_set_urgent_threshold_bounds() {
        let cm = manager();
        for ok in [0.0, 0.5, 1.0] {
            let t = cm.set_urgent_threshold("F1", ok, "planner").unwrap();
            assert_eq!(t.threshold, ok);
            assert_eq!(t.updated_by.as_deref(), Some("planner"));
        }
        for bad in [-0.01, 1.01, f64::NAN] {
            let err = cm.set_urgent_threshold("F1", bad, "planner").unwrap_err();
            assert!(matches!(err, RepositoryError::FieldValueError { .. }));
        }
        assert_eq!(cm.get_urgent_threshold("F1").unwrap().threshold, 1.0);
    }

    #[test]
    fn test_thresholds_are_scoped_per_factory() {
        let cm = manager();
        cm.set_urgent_threshold("F1", 0.2, "u").unwrap();
        assert_eq!(cm.get_urgent_threshold("F2").unwrap().threshold, defaults::URGENT_THRESHOLD);
    }

    #[test]
    fn test_weights_normalized() {
        let w = ScoringWeights {
            deadline: 2.0,
            capacity: 1.0,
            changeover: 1.0,
            disruption: 0.0,
        }
        .normalized();
        assert!((w.deadline - 0.5).abs() < 1e-9);
        assert!((w.deadline + w.capacity + w.changeover + w.disruption - 1.0).abs() < 1e-9);

        let zero = ScoringWeights {
            deadline: 0.0,
            capacity: 0.0,
            changeover: 0.0,
            disruption: 0.0,
        }
        .normalized();
        assert!((zero.capacity - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_approver_ids_validation() {
        let cm = manager();
        assert!(cm.set_value("F1", config_keys::APPROVER_IDS, "not json", "u").is_err());
        cm.set_value("F1", config_keys::APPROVER_IDS, r#"["boss"]"#, "u").unwrap();
        assert_eq!(cm.approver_ids("F1").unwrap(), vec!["boss".to_string()]);
    }
}
