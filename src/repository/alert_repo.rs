// ==========================================
// 工厂生产排程系统 - 排程预警仓储
// ==========================================
// 表: scheduling_alert
// 生命周期更新使用状态条件更新, 重复确认/解决不会重复写入
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::domain::alert::SchedulingAlert;
use crate::domain::types::{AlertSeverity, AlertStatus, AlertType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::{fmt_opt_ts, fmt_ts, get_opt_ts, get_ts};

const ALERT_COLUMNS: &str = r#"alert_id, factory_id, alert_type, severity, related_schedule_id,
    related_plan_id, message, status, created_at, acknowledged_by, acknowledged_at,
    resolved_by, resolved_at, resolution_notes"#;

/// 预警列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<AlertType>,
    pub status: Option<AlertStatus>,
}

// ==========================================
// AlertRepository - 排程预警仓储
// ==========================================
pub struct AlertRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AlertRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, alert: &SchedulingAlert) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO scheduling_alert (
                alert_id, factory_id, alert_type, severity, related_schedule_id,
                related_plan_id, message, status, created_at, acknowledged_by,
                acknowledged_at, resolved_by, resolved_at, resolution_notes
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &alert.alert_id,
                &alert.factory_id,
                alert.alert_type,
                alert.severity,
                &alert.related_schedule_id,
                &alert.related_plan_id,
                &alert.message,
                alert.status,
                fmt_ts(&alert.created_at),
                &alert.acknowledged_by,
                fmt_opt_ts(&alert.acknowledged_at),
                &alert.resolved_by,
                fmt_opt_ts(&alert.resolved_at),
                &alert.resolution_notes,
            ],
        )?;
        Ok(alert.alert_id.clone())
    }

    pub fn find_by_id(&self, alert_id: &str) -> RepositoryResult<Option<SchedulingAlert>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, alert_id)
    }

    fn find_by_id_tx(conn: &Connection, alert_id: &str) -> RepositoryResult<Option<SchedulingAlert>> {
        let sql = format!("SELECT {} FROM scheduling_alert WHERE alert_id = ?", ALERT_COLUMNS);
        match conn.query_row(&sql, params![alert_id], Self::map_row) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查找同类型、同关联排程的 OPEN 预警
    pub fn find_open(
        &self,
        factory_id: &str,
        alert_type: AlertType,
        related_schedule_id: &str,
    ) -> RepositoryResult<Option<SchedulingAlert>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM scheduling_alert
               WHERE factory_id = ? AND alert_type = ? AND related_schedule_id = ? AND status = ?
               ORDER BY created_at DESC LIMIT 1"#,
            ALERT_COLUMNS
        );
        match conn.query_row(
            &sql,
            params![factory_id, alert_type, related_schedule_id, AlertStatus::Open],
            Self::map_row,
        ) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 分页查询预警 (按创建时间降序)
    pub fn list(
        &self,
        factory_id: &str,
        filter: &AlertFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<(Vec<SchedulingAlert>, i64)> {
        let conn = self.get_conn()?;

        let mut where_sql = String::from("factory_id = ?");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(factory_id.to_string())];
        if let Some(severity) = filter.severity {
            where_sql.push_str(" AND severity = ?");
            args.push(Box::new(severity));
        }
        if let Some(alert_type) = filter.alert_type {
            where_sql.push_str(" AND alert_type = ?");
            args.push(Box::new(alert_type));
        }
        if let Some(status) = filter.status {
            where_sql.push_str(" AND status = ?");
            args.push(Box::new(status));
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM scheduling_alert WHERE {}", where_sql),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        args.push(Box::new(limit));
        args.push(Box::new(offset));
        let sql = format!(
            "SELECT {} FROM scheduling_alert WHERE {} ORDER BY created_at DESC, alert_id LIMIT ? OFFSET ?",
            ALERT_COLUMNS, where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((items, total))
    }

    /// 确认预警 (仅 OPEN 生效)
    ///
    /// # 返回
    /// - `Ok(true)`: 本次写入
    /// - `Ok(false)`: 状态已不是 OPEN
    pub fn mark_acknowledged(
        &self,
        alert_id: &str,
        actor: &str,
        at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"UPDATE scheduling_alert
               SET status = ?, acknowledged_by = ?, acknowledged_at = ?
               WHERE alert_id = ? AND status = ?"#,
            params![AlertStatus::Acknowledged, actor, fmt_ts(&at), alert_id, AlertStatus::Open],
        )?;
        Ok(rows == 1)
    }

    /// 解决预警 (仅 ACKNOWLEDGED 生效)
    pub fn mark_resolved(
        &self,
        alert_id: &str,
        actor: &str,
        at: NaiveDateTime,
        notes: Option<&str>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"UPDATE scheduling_alert
               SET status = ?, resolved_by = ?, resolved_at = ?, resolution_notes = ?
               WHERE alert_id = ? AND status = ?"#,
            params![
                AlertStatus::Resolved,
                actor,
                fmt_ts(&at),
                notes,
                alert_id,
                AlertStatus::Acknowledged
            ],
        )?;
        Ok(rows == 1)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<SchedulingAlert> {
        Ok(SchedulingAlert {
            alert_id: row.get(0)?,
            factory_id: row.get(1)?,
            alert_type: row.get(2)?,
            severity: row.get(3)?,
            related_schedule_id: row.get(4)?,
            related_plan_id: row.get(5)?,
            message: row.get(6)?,
            status: row.get(7)?,
            created_at: get_ts(row, 8)?,
            acknowledged_by: row.get(9)?,
            acknowledged_at: get_opt_ts(row, 10)?,
            resolved_by: row.get(11)?,
            resolved_at: get_opt_ts(row, 12)?,
            resolution_notes: row.get(13)?,
        })
    }
}
