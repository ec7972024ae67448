// ==========================================
// 工厂生产排程系统 - 排程计划仓储
// ==========================================
// 表: scheduling_plan
// 并发控制: revision 乐观锁
// 约束: 同一工厂同一日期只允许一个未取消的 REGULAR 计划 (部分唯一索引)
// ==========================================

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use crate::domain::action_log::ActionLog;
use crate::domain::plan::{LineSchedule, SchedulingPlan, UrgentInsertApproval};
use crate::domain::types::{ApprovalStatus, PlanStatus, PlanType};
use crate::repository::action_log_repo::ActionLogRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::schedule_repo::ScheduleRepository;
use crate::repository::row_mapping::{fmt_date, fmt_opt_ts, fmt_ts, get_date, get_opt_ts, get_ts};

const PLAN_COLUMNS: &str = r#"plan_id, factory_id, plan_date, plan_type, status, source_slot_id,
    approval_status, requested_by, request_reason, approver_id, decision_comment, decided_at,
    notes, created_by, created_at, updated_at, revision"#;

/// 计划列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub status: Option<PlanStatus>,
    pub plan_type: Option<PlanType>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

// ==========================================
// PlanRepository - 排程计划仓储
// ==========================================
pub struct PlanRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PlanRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 创建计划
    ///
    /// # 返回
    /// - `Err(UniqueConstraintViolation)`: 同工厂同日期已存在未取消的常规计划
    pub fn create(&self, plan: &SchedulingPlan) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, plan)?;
        Ok(plan.plan_id.clone())
    }

    /// 在给定连接/事务上插入计划
    pub(crate) fn insert_tx(conn: &Connection, plan: &SchedulingPlan) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO scheduling_plan (
                plan_id, factory_id, plan_date, plan_type, status, source_slot_id,
                approval_status, requested_by, request_reason, approver_id, decision_comment,
                decided_at, notes, created_by, created_at, updated_at, revision
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &plan.plan_id,
                &plan.factory_id,
                fmt_date(&plan.plan_date),
                plan.plan_type,
                plan.status,
                &plan.source_slot_id,
                plan.approval.status,
                &plan.approval.requested_by,
                &plan.approval.request_reason,
                &plan.approval.approver_id,
                &plan.approval.decision_comment,
                fmt_opt_ts(&plan.approval.decided_at),
                &plan.notes,
                &plan.created_by,
                fmt_ts(&plan.created_at),
                fmt_ts(&plan.updated_at),
                plan.revision,
            ],
        )?;
        Ok(())
    }

    /// 按 plan_id 查询计划
    ///
    /// # 返回
    /// - `Ok(Some(plan))`: 找到
    /// - `Ok(None)`: 未找到
    pub fn find_by_id(&self, plan_id: &str) -> RepositoryResult<Option<SchedulingPlan>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, plan_id)
    }

    pub(crate) fn find_by_id_tx(
        conn: &Connection,
        plan_id: &str,
    ) -> RepositoryResult<Option<SchedulingPlan>> {
        let sql = format!("SELECT {} FROM scheduling_plan WHERE plan_id = ?", PLAN_COLUMNS);
        match conn.query_row(&sql, params![plan_id], Self::map_row) {
            Ok(plan) => Ok(Some(plan)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 分页查询工厂的计划
    ///
    /// # 返回
    /// - `Ok((items, total))`: 按 plan_date 降序、created_at 降序
    pub fn list(
        &self,
        factory_id: &str,
        filter: &PlanFilter,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<(Vec<SchedulingPlan>, i64)> {
        let conn = self.get_conn()?;

        let mut where_sql = String::from("factory_id = ?");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(factory_id.to_string())];
        if let Some(status) = filter.status {
            where_sql.push_str(" AND status = ?");
            args.push(Box::new(status));
        }
        if let Some(plan_type) = filter.plan_type {
            where_sql.push_str(" AND plan_type = ?");
            args.push(Box::new(plan_type));
        }
        if let Some(from) = filter.date_from {
            where_sql.push_str(" AND plan_date >= ?");
            args.push(Box::new(fmt_date(&from)));
        }
        if let Some(to) = filter.date_to {
            where_sql.push_str(" AND plan_date <= ?");
            args.push(Box::new(fmt_date(&to)));
        }

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM scheduling_plan WHERE {}", where_sql),
            rusqlite::params_from_iter(args.iter()),
            |row| row.get(0),
        )?;

        args.push(Box::new(limit));
        args.push(Box::new(offset));
        let sql = format!(
            "SELECT {} FROM scheduling_plan WHERE {} ORDER BY plan_date DESC, created_at DESC LIMIT ? OFFSET ?",
            PLAN_COLUMNS, where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let plans = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((plans, total))
    }

    /// 查询待审批的强制插单计划
    pub fn list_pending_approvals(&self, factory_id: &str) -> RepositoryResult<Vec<SchedulingPlan>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM scheduling_plan
             WHERE factory_id = ? AND approval_status = ? AND status = ?
             ORDER BY created_at ASC",
            PLAN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let plans = stmt
            .query_map(
                params![factory_id, ApprovalStatus::PendingApproval, PlanStatus::Draft],
                Self::map_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    /// 更新计划 (带乐观锁检查)
    ///
    /// 成功后 plan.revision 在库中 +1, 调用方持有的对象不会自动更新
    ///
    /// # 错误
    /// - `OptimisticLockFailure`: revision 不匹配
    /// - `NotFound`: plan_id 不存在
    pub fn update(&self, plan: &SchedulingPlan) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::update_tx(&conn, plan)
    }

    /// 在同一事务内写入计划及其排程 (用于取消计划)
    ///
    /// # 错误
    /// - `OptimisticLockFailure`: 计划或任一排程已被并发修改, 整体回滚
    pub fn update_with_schedules(
        &self,
        plan: &SchedulingPlan,
        schedules: &[LineSchedule],
        log: &ActionLog,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        Self::update_tx(&tx, plan)?;
        for schedule in schedules {
            ScheduleRepository::update_tx(&tx, schedule)?;
        }
        ActionLogRepository::insert_tx(&tx, log)?;

        tx.commit()?;
        Ok(())
    }

    pub(crate) fn update_tx(conn: &Connection, plan: &SchedulingPlan) -> RepositoryResult<()> {
        let rows_affected = conn.execute(
            r#"UPDATE scheduling_plan
               SET status = ?, approval_status = ?, requested_by = ?, request_reason = ?,
                   approver_id = ?, decision_comment = ?, decided_at = ?, notes = ?,
                   updated_at = ?, revision = revision + 1
               WHERE plan_id = ? AND revision = ?"#,
            params![
                plan.status,
                plan.approval.status,
                &plan.approval.requested_by,
                &plan.approval.request_reason,
                &plan.approval.approver_id,
                &plan.approval.decision_comment,
                fmt_opt_ts(&plan.approval.decided_at),
                &plan.notes,
                fmt_ts(&plan.updated_at),
                &plan.plan_id,
                plan.revision,
            ],
        )?;

        if rows_affected == 0 {
            let exists: Result<i32, _> = conn.query_row(
                "SELECT revision FROM scheduling_plan WHERE plan_id = ?",
                params![&plan.plan_id],
                |row| row.get(0),
            );
            return match exists {
                Ok(actual) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "SchedulingPlan".to_string(),
                    id: plan.plan_id.clone(),
                    expected: plan.revision,
                    actual,
                }),
                Err(_) => Err(RepositoryError::not_found("SchedulingPlan", &plan.plan_id)),
            };
        }

        Ok(())
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<SchedulingPlan> {
        Ok(SchedulingPlan {
            plan_id: row.get(0)?,
            factory_id: row.get(1)?,
            plan_date: get_date(row, 2)?,
            plan_type: row.get(3)?,
            status: row.get(4)?,
            source_slot_id: row.get(5)?,
            approval: UrgentInsertApproval {
                status: row.get(6)?,
                requested_by: row.get(7)?,
                request_reason: row.get(8)?,
                approver_id: row.get(9)?,
                decision_comment: row.get(10)?,
                decided_at: get_opt_ts(row, 11)?,
            },
            notes: row.get(12)?,
            created_by: row.get(13)?,
            created_at: get_ts(row, 14)?,
            updated_at: get_ts(row, 15)?,
            revision: row.get(16)?,
        })
    }
}
