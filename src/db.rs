// ==========================================
// 工厂生产排程系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表 (CREATE TABLE IF NOT EXISTS) + schema_version 记录
// ==========================================

use chrono::{NaiveDateTime, Timelike};
use rusqlite::{Connection, OptionalExtension};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 慢 SQL 阈值（毫秒，0 = 关闭）
static SLOW_SQL_THRESHOLD_MS: AtomicU64 = AtomicU64::new(0);

/// 当前本地时间（截断到秒，保证文本存储可按字典序比较）
pub fn now() -> NaiveDateTime {
    let ts = chrono::Local::now().naive_local();
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    install_slow_sql_profile(&mut conn);
    Ok(conn)
}

/// 安装慢 SQL 日志
///
/// 开关: `FACTORY_SCHEDULING_SLOW_SQL_MS=50` 配置慢 SQL 阈值（毫秒）, 未配置则不安装
pub fn install_slow_sql_profile(conn: &mut Connection) {
    let slow_ms = std::env::var("FACTORY_SCHEDULING_SLOW_SQL_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    SLOW_SQL_THRESHOLD_MS.store(slow_ms, Ordering::Relaxed);

    if slow_ms == 0 {
        conn.profile(None);
        return;
    }
    conn.profile(Some(sql_profile_callback));
}

fn sql_profile_callback(sql: &str, duration: Duration) {
    let threshold = SLOW_SQL_THRESHOLD_MS.load(Ordering::Relaxed);
    let ms = duration.as_millis() as u64;
    if threshold > 0 && ms >= threshold {
        let sql_short: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        let sql_short: String = sql_short.chars().take(240).collect();
        tracing::warn!(target: "factory_scheduling::sql", elapsed_ms = ms, sql = %sql_short, "慢 SQL");
    }
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等建表
///
/// 所有时间字段以 `YYYY-MM-DD HH:MM:SS` 文本存储（本地时间）
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime'))
        );

        -- 配置 (scope_id = factory_id)
        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_by TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now', 'localtime')),
            PRIMARY KEY (scope_id, key)
        );

        -- 产线与资源
        CREATE TABLE IF NOT EXISTS production_line (
            line_id TEXT PRIMARY KEY,
            factory_id TEXT NOT NULL,
            line_name TEXT NOT NULL,
            throughput_per_hour REAL NOT NULL CHECK(throughput_per_hour > 0),
            required_workers INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL CHECK(status IN ('ACTIVE', 'MAINTENANCE')),
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_line_factory ON production_line(factory_id);

        CREATE TABLE IF NOT EXISTS line_capability (
            line_id TEXT NOT NULL REFERENCES production_line(line_id) ON DELETE CASCADE,
            product_type_id TEXT NOT NULL,
            rate_per_hour REAL NOT NULL CHECK(rate_per_hour > 0),
            PRIMARY KEY (line_id, product_type_id)
        );

        CREATE TABLE IF NOT EXISTS throughput_sample (
            sample_id TEXT PRIMARY KEY,
            line_id TEXT NOT NULL,
            product_type_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            hours REAL NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sample_line_product
            ON throughput_sample(line_id, product_type_id, recorded_at DESC);

        CREATE TABLE IF NOT EXISTS line_downtime (
            downtime_id TEXT PRIMARY KEY,
            line_id TEXT NOT NULL REFERENCES production_line(line_id) ON DELETE CASCADE,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            reason TEXT,
            CHECK(start_time < end_time)
        );

        CREATE TABLE IF NOT EXISTS material_stock (
            factory_id TEXT NOT NULL,
            product_type_id TEXT NOT NULL,
            available_quantity INTEGER NOT NULL CHECK(available_quantity >= 0),
            updated_at TEXT NOT NULL,
            PRIMARY KEY (factory_id, product_type_id)
        );

        CREATE TABLE IF NOT EXISTS worker (
            worker_id TEXT PRIMARY KEY,
            factory_id TEXT NOT NULL,
            worker_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        );

        -- 排程计划
        CREATE TABLE IF NOT EXISTS scheduling_plan (
            plan_id TEXT PRIMARY KEY,
            factory_id TEXT NOT NULL,
            plan_date TEXT NOT NULL,
            plan_type TEXT NOT NULL CHECK(plan_type IN ('REGULAR', 'URGENT_INSERT')),
            status TEXT NOT NULL CHECK(status IN ('DRAFT', 'CONFIRMED', 'CANCELLED')),
            source_slot_id TEXT,
            approval_status TEXT NOT NULL DEFAULT 'NONE'
                CHECK(approval_status IN ('NONE', 'PENDING_APPROVAL', 'APPROVED', 'REJECTED')),
            requested_by TEXT,
            request_reason TEXT,
            approver_id TEXT,
            decision_comment TEXT,
            decided_at TEXT,
            notes TEXT,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_plan_factory_date
            ON scheduling_plan(factory_id, plan_date)
            WHERE plan_type = 'REGULAR' AND status != 'CANCELLED';
        CREATE INDEX IF NOT EXISTS idx_plan_approval
            ON scheduling_plan(factory_id, approval_status);

        CREATE TABLE IF NOT EXISTS line_schedule (
            schedule_id TEXT PRIMARY KEY,
            plan_id TEXT NOT NULL REFERENCES scheduling_plan(plan_id) ON DELETE CASCADE,
            factory_id TEXT NOT NULL,
            production_line_id TEXT NOT NULL,
            product_type_id TEXT NOT NULL,
            planned_quantity INTEGER NOT NULL CHECK(planned_quantity > 0),
            completed_quantity INTEGER NOT NULL DEFAULT 0 CHECK(completed_quantity >= 0),
            status TEXT NOT NULL CHECK(status IN ('PENDING', 'RUNNING', 'COMPLETED', 'CANCELLED')),
            scheduled_start TEXT NOT NULL,
            scheduled_end TEXT NOT NULL,
            actual_start TEXT,
            actual_end TEXT,
            urgent_flag INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            UNIQUE(plan_id, production_line_id),
            CHECK(scheduled_start < scheduled_end)
        );
        CREATE INDEX IF NOT EXISTS idx_schedule_line_time
            ON line_schedule(production_line_id, scheduled_start);
        CREATE INDEX IF NOT EXISTS idx_schedule_factory_status
            ON line_schedule(factory_id, status);

        CREATE TABLE IF NOT EXISTS worker_assignment (
            assignment_id TEXT PRIMARY KEY,
            schedule_id TEXT NOT NULL REFERENCES line_schedule(schedule_id) ON DELETE CASCADE,
            worker_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('ASSIGNED', 'CHECKED_IN', 'CHECKED_OUT')),
            assigned_by TEXT NOT NULL,
            assigned_at TEXT NOT NULL,
            check_in_time TEXT,
            check_out_time TEXT,
            performance_score REAL,
            UNIQUE(schedule_id, worker_id)
        );

        -- 插单时段
        CREATE TABLE IF NOT EXISTS insert_slot (
            slot_id TEXT PRIMARY KEY,
            factory_id TEXT NOT NULL,
            production_line_id TEXT NOT NULL,
            slot_kind TEXT NOT NULL CHECK(slot_kind IN ('IDLE', 'UNDER_COMMITTED')),
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            available_capacity INTEGER NOT NULL CHECK(available_capacity >= 0),
            recommendation_score REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL CHECK(status IN ('AVAILABLE', 'LOCKED', 'CONSUMED', 'EXPIRED')),
            locked_by TEXT,
            locked_at TEXT,
            consumed_by_plan_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            revision INTEGER NOT NULL DEFAULT 0,
            CHECK(window_start < window_end)
        );
        CREATE INDEX IF NOT EXISTS idx_slot_factory_status
            ON insert_slot(factory_id, status, window_start);

        -- 预警
        CREATE TABLE IF NOT EXISTS scheduling_alert (
            alert_id TEXT PRIMARY KEY,
            factory_id TEXT NOT NULL,
            alert_type TEXT NOT NULL,
            severity TEXT NOT NULL CHECK(severity IN ('INFO', 'WARNING', 'CRITICAL')),
            related_schedule_id TEXT,
            related_plan_id TEXT,
            message TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('OPEN', 'ACKNOWLEDGED', 'RESOLVED')),
            created_at TEXT NOT NULL,
            acknowledged_by TEXT,
            acknowledged_at TEXT,
            resolved_by TEXT,
            resolved_at TEXT,
            resolution_notes TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_alert_factory_status
            ON scheduling_alert(factory_id, status, created_at DESC);

        -- 操作日志
        CREATE TABLE IF NOT EXISTS action_log (
            action_id TEXT PRIMARY KEY,
            factory_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            actor TEXT NOT NULL,
            action_ts TEXT NOT NULL,
            payload_json TEXT,
            detail TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_action_log_factory_ts
            ON action_log(factory_id, action_ts DESC);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// 打开数据库、建表，并在版本不符时告警（不做自动迁移）
pub fn open_and_migrate(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;

    match read_schema_version(&conn)? {
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            tracing::warn!(
                "数据库 schema_version={} 高于程序期望的 {}，请确认程序版本",
                v,
                CURRENT_SCHEMA_VERSION
            );
        }
        _ => {}
    }

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_now_is_truncated_to_seconds() {
        assert_eq!(now().nanosecond(), 0);
    }
}
