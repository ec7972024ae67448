// ==========================================
// 工厂生产排程系统 - 紧急插单事务仓储
// ==========================================
// 职责: 跨表原子写入 (时段 + 计划 + 排程 + 顺延 + 操作日志)
// 红线: 时段 CAS 失败时整个事务回滚, 不留下半成品计划
// ==========================================

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use crate::domain::action_log::ActionLog;
use crate::domain::plan::{LineSchedule, ScheduleShift, SchedulingPlan};
use crate::repository::action_log_repo::ActionLogRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::plan_repo::PlanRepository;
use crate::repository::schedule_repo::ScheduleRepository;
use crate::repository::slot_repo::{SlotCas, SlotRepository};

/// 插单落库请求
#[derive(Debug, Clone)]
pub struct InsertCommit<'a> {
    pub slot_cas: &'a SlotCas,
    pub plan: &'a SchedulingPlan,
    pub schedule: &'a LineSchedule,
    /// 计划直接生效时的下游顺延; 待审批时为空
    pub shifts: &'a [ScheduleShift],
    pub log: &'a ActionLog,
}

/// 审批决定落库请求
#[derive(Debug, Clone)]
pub struct DecisionCommit<'a> {
    /// 已完成状态变更的计划 (revision 为读取时的值)
    pub plan: &'a SchedulingPlan,
    /// 驳回时归还/过期时段
    pub slot_cas: Option<&'a SlotCas>,
    /// 驳回时需要取消的排程 (revision 为读取时的值)
    pub schedules: &'a [LineSchedule],
    pub shifts: &'a [ScheduleShift],
    pub log: &'a ActionLog,
}

// ==========================================
// UrgentInsertRepository - 紧急插单事务仓储
// ==========================================
pub struct UrgentInsertRepository {
    conn: Arc<Mutex<Connection>>,
}

impl UrgentInsertRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 原子写入插单结果
    ///
    /// # 错误
    /// - `StatusConflict`: 时段已被其他请求改变 (整个事务回滚)
    pub fn commit_insert(&self, req: &InsertCommit<'_>) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        // 1. 时段 CAS
        if !SlotRepository::compare_and_set_tx(&tx, req.slot_cas)? {
            let actual = SlotRepository::find_by_id_tx(&tx, &req.slot_cas.slot_id)?
                .map(|s| s.status.to_string())
                .unwrap_or_else(|| "MISSING".to_string());
            return Err(RepositoryError::StatusConflict {
                entity: "InsertSlot".to_string(),
                id: req.slot_cas.slot_id.clone(),
                expected: req.slot_cas.expected_status.to_string(),
                actual,
            });
        }

        // 2. 计划 + 排程
        PlanRepository::insert_tx(&tx, req.plan)?;
        ScheduleRepository::insert_tx(&tx, req.schedule)?;

        // 3. 下游顺延
        for shift in req.shifts {
            ScheduleRepository::shift_tx(&tx, &shift.schedule_id, shift.delay_minutes, req.plan.updated_at)?;
        }

        // 4. 操作日志
        ActionLogRepository::insert_tx(&tx, req.log)?;

        tx.commit()?;
        Ok(())
    }

    /// 原子写入审批决定
    ///
    /// # 错误
    /// - `OptimisticLockFailure`: 计划已被其他审批改变
    pub fn commit_decision(&self, req: &DecisionCommit<'_>) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        PlanRepository::update_tx(&tx, req.plan)?;

        if let Some(cas) = req.slot_cas {
            if !SlotRepository::compare_and_set_tx(&tx, cas)? {
                tracing::warn!(slot_id = %cas.slot_id, "审批时时段状态已变化, 跳过归还");
            }
        }

        for schedule in req.schedules {
            ScheduleRepository::update_tx(&tx, schedule)?;
        }

        for shift in req.shifts {
            ScheduleRepository::shift_tx(&tx, &shift.schedule_id, shift.delay_minutes, req.plan.updated_at)?;
        }

        ActionLogRepository::insert_tx(&tx, req.log)?;

        tx.commit()?;
        Ok(())
    }
}
