// ==========================================
// 工厂生产排程系统 - 工人派工仓储
// ==========================================
// 表: worker_assignment
// 并发控制: 状态条件更新 (WHERE status = 期望状态), 同一派工并发只有一个成功
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::domain::assignment::WorkerAssignment;
use crate::domain::types::{AssignmentStatus, PlanStatus, ScheduleStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_mapping::{fmt_opt_ts, fmt_ts, get_opt_ts, get_ts};

const ASSIGNMENT_COLUMNS: &str = r#"assignment_id, schedule_id, worker_id, status, assigned_by,
    assigned_at, check_in_time, check_out_time, performance_score"#;

/// 派工状态变更
#[derive(Debug, Clone)]
pub struct AssignmentTransition {
    pub expected: AssignmentStatus,
    pub next: AssignmentStatus,
    pub check_in_time: Option<NaiveDateTime>,
    pub check_out_time: Option<NaiveDateTime>,
    pub performance_score: Option<f64>,
}

// ==========================================
// AssignmentRepository - 工人派工仓储
// ==========================================
pub struct AssignmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AssignmentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量派工 (事务内全部成功或全部回滚)
    ///
    /// # 返回
    /// - `Err(UniqueConstraintViolation)`: 同一工人已派到该排程
    pub fn insert_batch(&self, assignments: &[WorkerAssignment]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO worker_assignment (
                    assignment_id, schedule_id, worker_id, status, assigned_by,
                    assigned_at, check_in_time, check_out_time, performance_score
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )?;
            for a in assignments {
                stmt.execute(params![
                    &a.assignment_id,
                    &a.schedule_id,
                    &a.worker_id,
                    a.status,
                    &a.assigned_by,
                    fmt_ts(&a.assigned_at),
                    fmt_opt_ts(&a.check_in_time),
                    fmt_opt_ts(&a.check_out_time),
                    a.performance_score,
                ])?;
            }
        }
        tx.commit()?;
        Ok(assignments.len())
    }

    pub fn find_by_id(&self, assignment_id: &str) -> RepositoryResult<Option<WorkerAssignment>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, assignment_id)
    }

    fn find_by_id_tx(
        conn: &Connection,
        assignment_id: &str,
    ) -> RepositoryResult<Option<WorkerAssignment>> {
        let sql = format!(
            "SELECT {} FROM worker_assignment WHERE assignment_id = ?",
            ASSIGNMENT_COLUMNS
        );
        match conn.query_row(&sql, params![assignment_id], Self::map_row) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_by_schedule(&self, schedule_id: &str) -> RepositoryResult<Vec<WorkerAssignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM worker_assignment WHERE schedule_id = ? ORDER BY assigned_at, worker_id",
            ASSIGNMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![schedule_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 条件状态更新
    ///
    /// # 错误
    /// - `StatusConflict`: 当前状态已不是期望状态 (并发变更或非法顺序)
    /// - `NotFound`: 派工不存在
    pub fn transition(
        &self,
        assignment_id: &str,
        change: &AssignmentTransition,
    ) -> RepositoryResult<WorkerAssignment> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"UPDATE worker_assignment
               SET status = ?,
                   check_in_time = COALESCE(?, check_in_time),
                   check_out_time = COALESCE(?, check_out_time),
                   performance_score = COALESCE(?, performance_score)
               WHERE assignment_id = ? AND status = ?"#,
            params![
                change.next,
                fmt_opt_ts(&change.check_in_time),
                fmt_opt_ts(&change.check_out_time),
                change.performance_score,
                assignment_id,
                change.expected,
            ],
        )?;

        let current = Self::find_by_id_tx(&conn, assignment_id)?
            .ok_or_else(|| RepositoryError::not_found("WorkerAssignment", assignment_id))?;
        if rows == 0 {
            return Err(RepositoryError::StatusConflict {
                entity: "WorkerAssignment".to_string(),
                id: assignment_id.to_string(),
                expected: change.expected.to_string(),
                actual: current.status.to_string(),
            });
        }
        Ok(current)
    }

    /// 删除仍处于 ASSIGNED 的派工
    pub fn delete_if_assigned(&self, assignment_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "DELETE FROM worker_assignment WHERE assignment_id = ? AND status = ?",
            params![assignment_id, AssignmentStatus::Assigned],
        )?;
        if rows == 0 {
            let current = Self::find_by_id_tx(&conn, assignment_id)?
                .ok_or_else(|| RepositoryError::not_found("WorkerAssignment", assignment_id))?;
            return Err(RepositoryError::StatusConflict {
                entity: "WorkerAssignment".to_string(),
                id: assignment_id.to_string(),
                expected: AssignmentStatus::Assigned.to_string(),
                actual: current.status.to_string(),
            });
        }
        Ok(())
    }

    /// 查询 [from, to) 内已被占用的工人
    ///
    /// 口径: 派工未签退 + 排程未终结 + 计划未取消 + 时间重叠
    pub fn list_busy_worker_ids(
        &self,
        factory_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT a.worker_id
               FROM worker_assignment a
               JOIN line_schedule s ON s.schedule_id = a.schedule_id
               JOIN scheduling_plan p ON p.plan_id = s.plan_id
               WHERE s.factory_id = ? AND a.status != ? AND s.status IN (?, ?) AND p.status != ?
                 AND s.scheduled_start < ? AND s.scheduled_end > ?"#,
        )?;
        let ids = stmt
            .query_map(
                params![
                    factory_id,
                    AssignmentStatus::CheckedOut,
                    ScheduleStatus::Pending,
                    ScheduleStatus::Running,
                    PlanStatus::Cancelled,
                    fmt_ts(&to),
                    fmt_ts(&from),
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<WorkerAssignment> {
        Ok(WorkerAssignment {
            assignment_id: row.get(0)?,
            schedule_id: row.get(1)?,
            worker_id: row.get(2)?,
            status: row.get(3)?,
            assigned_by: row.get(4)?,
            assigned_at: get_ts(row, 5)?,
            check_in_time: get_opt_ts(row, 6)?,
            check_out_time: get_opt_ts(row, 7)?,
            performance_score: row.get(8)?,
        })
    }
}
