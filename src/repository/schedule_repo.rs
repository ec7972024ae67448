// ==========================================
// 工厂生产排程系统 - 产线排程仓储
// ==========================================
// 表: line_schedule
// 并发控制: revision 乐观锁; urgent_flag 以条件更新检测翻转
// 约束: (plan_id, production_line_id) 唯一
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::domain::plan::LineSchedule;
use crate::domain::types::{PlanStatus, ScheduleStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::{fmt_opt_ts, fmt_ts, get_opt_ts, get_ts};

const SCHEDULE_COLUMNS: &str = r#"s.schedule_id, s.plan_id, s.factory_id, s.production_line_id,
    s.product_type_id, s.planned_quantity, s.completed_quantity, s.status, s.scheduled_start,
    s.scheduled_end, s.actual_start, s.actual_end, s.urgent_flag, s.updated_at, s.revision"#;

// ==========================================
// ScheduleRepository - 产线排程仓储
// ==========================================
pub struct ScheduleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增产线排程
    ///
    /// # 返回
    /// - `Err(UniqueConstraintViolation)`: 同一计划同一产线已存在排程
    /// - `Err(ForeignKeyViolation)`: 计划不存在
    pub fn insert(&self, schedule: &LineSchedule) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, schedule)?;
        Ok(schedule.schedule_id.clone())
    }

    pub(crate) fn insert_tx(conn: &Connection, s: &LineSchedule) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO line_schedule (
                schedule_id, plan_id, factory_id, production_line_id, product_type_id,
                planned_quantity, completed_quantity, status, scheduled_start, scheduled_end,
                actual_start, actual_end, urgent_flag, updated_at, revision
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &s.schedule_id,
                &s.plan_id,
                &s.factory_id,
                &s.production_line_id,
                &s.product_type_id,
                s.planned_quantity,
                s.completed_quantity,
                s.status,
                fmt_ts(&s.scheduled_start),
                fmt_ts(&s.scheduled_end),
                fmt_opt_ts(&s.actual_start),
                fmt_opt_ts(&s.actual_end),
                s.urgent_flag,
                fmt_ts(&s.updated_at),
                s.revision,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, schedule_id: &str) -> RepositoryResult<Option<LineSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM line_schedule s WHERE s.schedule_id = ?",
            SCHEDULE_COLUMNS
        );
        match conn.query_row(&sql, params![schedule_id], Self::map_row) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 查询计划下的全部排程 (按开工时间)
    pub fn list_by_plan(&self, plan_id: &str) -> RepositoryResult<Vec<LineSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM line_schedule s WHERE s.plan_id = ? ORDER BY s.scheduled_start, s.production_line_id",
            SCHEDULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![plan_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 查询工厂内所有未终结排程 (所属计划未取消)
    pub fn list_active_by_factory(&self, factory_id: &str) -> RepositoryResult<Vec<LineSchedule>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM line_schedule s
               JOIN scheduling_plan p ON p.plan_id = s.plan_id
               WHERE s.factory_id = ? AND s.status IN (?, ?) AND p.status != ?
               ORDER BY s.scheduled_start"#,
            SCHEDULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    factory_id,
                    ScheduleStatus::Pending,
                    ScheduleStatus::Running,
                    PlanStatus::Cancelled
                ],
                Self::map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 查询产线在 [from, to) 内占用时间的排程
    ///
    /// 口径: 未终结 + 所属计划未取消 + 时间重叠
    pub fn list_committed_by_line(
        &self,
        line_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> RepositoryResult<Vec<LineSchedule>> {
        let conn = self.get_conn()?;
        Self::list_committed_by_line_tx(&conn, line_id, from, to)
    }

    pub(crate) fn list_committed_by_line_tx(
        conn: &Connection,
        line_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> RepositoryResult<Vec<LineSchedule>> {
        let sql = format!(
            r#"SELECT {} FROM line_schedule s
               JOIN scheduling_plan p ON p.plan_id = s.plan_id
               WHERE s.production_line_id = ? AND s.status IN (?, ?) AND p.status != ?
                 AND s.scheduled_start < ? AND s.scheduled_end > ?
               ORDER BY s.scheduled_start"#,
            SCHEDULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    line_id,
                    ScheduleStatus::Pending,
                    ScheduleStatus::Running,
                    PlanStatus::Cancelled,
                    fmt_ts(&to),
                    fmt_ts(&from),
                ],
                Self::map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 更新排程 (带乐观锁检查, 不含 urgent_flag)
    pub fn update(&self, schedule: &LineSchedule) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::update_tx(&conn, schedule)
    }

    pub(crate) fn update_tx(conn: &Connection, s: &LineSchedule) -> RepositoryResult<()> {
        let rows_affected = conn.execute(
            r#"UPDATE line_schedule
               SET product_type_id = ?, planned_quantity = ?, completed_quantity = ?, status = ?,
                   scheduled_start = ?, scheduled_end = ?, actual_start = ?, actual_end = ?,
                   updated_at = ?, revision = revision + 1
               WHERE schedule_id = ? AND revision = ?"#,
            params![
                &s.product_type_id,
                s.planned_quantity,
                s.completed_quantity,
                s.status,
                fmt_ts(&s.scheduled_start),
                fmt_ts(&s.scheduled_end),
                fmt_opt_ts(&s.actual_start),
                fmt_opt_ts(&s.actual_end),
                fmt_ts(&s.updated_at),
                &s.schedule_id,
                s.revision,
            ],
        )?;

        if rows_affected == 0 {
            let exists: Result<i32, _> = conn.query_row(
                "SELECT revision FROM line_schedule WHERE schedule_id = ?",
                params![&s.schedule_id],
                |row| row.get(0),
            );
            return match exists {
                Ok(actual) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "LineSchedule".to_string(),
                    id: s.schedule_id.clone(),
                    expected: s.revision,
                    actual,
                }),
                Err(_) => Err(RepositoryError::not_found("LineSchedule", &s.schedule_id)),
            };
        }
        Ok(())
    }

    /// 顺延未终结排程的起止时间
    ///
    /// # 返回
    /// - `Ok(true)`: 已顺延
    /// - `Ok(false)`: 排程已终结, 未改动
    pub(crate) fn shift_tx(
        conn: &Connection,
        schedule_id: &str,
        delay_minutes: i64,
        updated_at: NaiveDateTime,
    ) -> RepositoryResult<bool> {
        let modifier = format!("+{} minutes", delay_minutes);
        let rows = conn.execute(
            r#"UPDATE line_schedule
               SET scheduled_start = datetime(scheduled_start, ?1),
                   scheduled_end = datetime(scheduled_end, ?1),
                   updated_at = ?2, revision = revision + 1
               WHERE schedule_id = ?3 AND status IN (?4, ?5)"#,
            params![
                modifier,
                fmt_ts(&updated_at),
                schedule_id,
                ScheduleStatus::Pending,
                ScheduleStatus::Running
            ],
        )?;
        Ok(rows > 0)
    }

    /// 写入紧急标记
    ///
    /// # 返回
    /// - `Ok(true)`: 标记发生翻转
    /// - `Ok(false)`: 与现值相同
    pub fn set_urgent_flag(&self, schedule_id: &str, urgent: bool) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE line_schedule SET urgent_flag = ? WHERE schedule_id = ? AND urgent_flag != ?",
            params![urgent, schedule_id, urgent],
        )?;
        Ok(rows > 0)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<LineSchedule> {
        Ok(LineSchedule {
            schedule_id: row.get(0)?,
            plan_id: row.get(1)?,
            factory_id: row.get(2)?,
            production_line_id: row.get(3)?,
            product_type_id: row.get(4)?,
            planned_quantity: row.get(5)?,
            completed_quantity: row.get(6)?,
            status: row.get(7)?,
            scheduled_start: get_ts(row, 8)?,
            scheduled_end: get_ts(row, 9)?,
            actual_start: get_opt_ts(row, 10)?,
            actual_end: get_opt_ts(row, 11)?,
            urgent_flag: row.get(12)?,
            updated_at: get_ts(row, 13)?,
            revision: row.get(14)?,
        })
    }
}
