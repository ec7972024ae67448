// ==========================================
// 工厂生产排程系统 - 插单时段仓储
// ==========================================
// 表: insert_slot
// 并发控制: 状态 + revision 双条件更新 (CAS), 同一时段每次转换只有一个成功
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::domain::slot::InsertSlot;
use crate::domain::types::SlotStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::{fmt_opt_ts, fmt_ts, get_opt_ts, get_ts};

const SLOT_COLUMNS: &str = r#"slot_id, factory_id, production_line_id, slot_kind, window_start,
    window_end, available_capacity, recommendation_score, status, locked_by, locked_at,
    consumed_by_plan_id, created_at, updated_at, revision"#;

/// 时段条件更新 (compare-and-set)
///
/// 仅当库中 status/revision 与期望值一致时写入 next 状态及锁字段
#[derive(Debug, Clone)]
pub struct SlotCas {
    pub slot_id: String,
    pub expected_status: SlotStatus,
    pub expected_revision: i32,
    pub next_status: SlotStatus,
    pub locked_by: Option<String>,
    pub locked_at: Option<NaiveDateTime>,
    pub consumed_by_plan_id: Option<String>,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// SlotRepository - 插单时段仓储
// ==========================================
pub struct SlotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SlotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量写入新生成的时段
    pub fn insert_batch(&self, slots: &[InsertSlot]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO insert_slot (
                    slot_id, factory_id, production_line_id, slot_kind, window_start,
                    window_end, available_capacity, recommendation_score, status, locked_by,
                    locked_at, consumed_by_plan_id, created_at, updated_at, revision
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for s in slots {
                stmt.execute(params![
                    &s.slot_id,
                    &s.factory_id,
                    &s.production_line_id,
                    s.slot_kind,
                    fmt_ts(&s.window_start),
                    fmt_ts(&s.window_end),
                    s.available_capacity,
                    s.recommendation_score,
                    s.status,
                    &s.locked_by,
                    fmt_opt_ts(&s.locked_at),
                    &s.consumed_by_plan_id,
                    fmt_ts(&s.created_at),
                    fmt_ts(&s.updated_at),
                    s.revision,
                ])?;
            }
        }
        tx.commit()?;
        Ok(slots.len())
    }

    pub fn find_by_id(&self, slot_id: &str) -> RepositoryResult<Option<InsertSlot>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, slot_id)
    }

    pub(crate) fn find_by_id_tx(
        conn: &Connection,
        slot_id: &str,
    ) -> RepositoryResult<Option<InsertSlot>> {
        let sql = format!("SELECT {} FROM insert_slot WHERE slot_id = ?", SLOT_COLUMNS);
        match conn.query_row(&sql, params![slot_id], Self::map_row) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按状态查询工厂的时段 (按窗口开始时间)
    pub fn list_by_status(
        &self,
        factory_id: &str,
        statuses: &[SlotStatus],
    ) -> RepositoryResult<Vec<InsertSlot>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn()?;
        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT {} FROM insert_slot WHERE factory_id = ? AND status IN ({}) ORDER BY window_start, production_line_id",
            SLOT_COLUMNS, placeholders
        );
        let mut args: Vec<&dyn rusqlite::ToSql> = vec![&factory_id];
        for s in statuses {
            args.push(s);
        }
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args.as_slice(), Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 条件状态更新
    ///
    /// # 返回
    /// - `Ok(true)`: 本次转换成功
    /// - `Ok(false)`: 状态或 revision 已被其他请求改变
    pub fn compare_and_set(&self, cas: &SlotCas) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        Self::compare_and_set_tx(&conn, cas)
    }

    pub(crate) fn compare_and_set_tx(conn: &Connection, cas: &SlotCas) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"UPDATE insert_slot
               SET status = ?, locked_by = ?, locked_at = ?, consumed_by_plan_id = ?,
                   updated_at = ?, revision = revision + 1
               WHERE slot_id = ? AND status = ? AND revision = ?"#,
            params![
                cas.next_status,
                &cas.locked_by,
                fmt_opt_ts(&cas.locked_at),
                &cas.consumed_by_plan_id,
                fmt_ts(&cas.updated_at),
                &cas.slot_id,
                cas.expected_status,
                cas.expected_revision,
            ],
        )?;
        Ok(rows == 1)
    }

    /// 窗口已结束且未被占用的时段置为 EXPIRED
    ///
    /// # 返回
    /// - 本次过期的时段数 (重复执行幂等)
    pub fn expire_passed(&self, factory_id: &str, now: NaiveDateTime) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"UPDATE insert_slot
               SET status = ?, updated_at = ?, revision = revision + 1
               WHERE factory_id = ? AND status IN (?, ?) AND window_end <= ?"#,
            params![
                SlotStatus::Expired,
                fmt_ts(&now),
                factory_id,
                SlotStatus::Available,
                SlotStatus::Locked,
                fmt_ts(&now),
            ],
        )?;
        Ok(rows)
    }

    /// 回收锁定时间早于 cutoff 的时段
    pub fn reclaim_stale_locks(
        &self,
        factory_id: &str,
        cutoff: NaiveDateTime,
        now: NaiveDateTime,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"UPDATE insert_slot
               SET status = ?, locked_by = NULL, locked_at = NULL,
                   updated_at = ?, revision = revision + 1
               WHERE factory_id = ? AND status = ? AND locked_at IS NOT NULL AND locked_at <= ?"#,
            params![
                SlotStatus::Available,
                fmt_ts(&now),
                factory_id,
                SlotStatus::Locked,
                fmt_ts(&cutoff),
            ],
        )?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<InsertSlot> {
        Ok(InsertSlot {
            slot_id: row.get(0)?,
            factory_id: row.get(1)?,
            production_line_id: row.get(2)?,
            slot_kind: row.get(3)?,
            window_start: get_ts(row, 4)?,
            window_end: get_ts(row, 5)?,
            available_capacity: row.get(6)?,
            recommendation_score: row.get(7)?,
            status: row.get(8)?,
            locked_by: row.get(9)?,
            locked_at: get_opt_ts(row, 10)?,
            consumed_by_plan_id: row.get(11)?,
            created_at: get_ts(row, 12)?,
            updated_at: get_ts(row, 13)?,
            revision: row.get(14)?,
        })
    }
}
