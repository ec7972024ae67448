// ==========================================
// 工厂生产排程系统 - 插单时段锁管理
// ==========================================
// 互斥: 进程内按 slot_id 的互斥锁 + 库内 status/revision 条件更新
// 同一时段的 lock / unlock / consume / expire 串行执行, 竞争失败方得到 SlotUnavailable
// TTL: slot_lock_ttl_seconds > 0 时, 超时的锁可被新请求接管, 也会被清扫回收
// ==========================================

use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDateTime};
use dashmap::DashMap;
use tracing::instrument;

use crate::api::actor::Actor;
use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::slot::InsertSlot;
use crate::domain::types::{SlotEvent, SlotStatus};
use crate::repository::{ActionLogRepository, SlotCas, SlotRepository};

// ==========================================
// SlotLockManager - 时段锁管理
// ==========================================
pub struct SlotLockManager {
    slot_repo: Arc<SlotRepository>,
    action_log_repo: Arc<ActionLogRepository>,
    config_manager: Arc<ConfigManager>,
    guards: DashMap<String, Arc<Mutex<()>>>,
}

impl SlotLockManager {
    pub fn new(
        slot_repo: Arc<SlotRepository>,
        action_log_repo: Arc<ActionLogRepository>,
        config_manager: Arc<ConfigManager>,
    ) -> Self {
        Self {
            slot_repo,
            action_log_repo,
            config_manager,
            guards: DashMap::new(),
        }
    }

    /// 在时段互斥锁内执行 f
    pub fn with_slot<R>(&self, slot_id: &str, f: impl FnOnce() -> ApiResult<R>) -> ApiResult<R> {
        let guard = self
            .guards
            .entry(slot_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        // 互斥锁不保护数据, 中毒后直接继续
        let _held = guard.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }

    /// 锁定时段
    ///
    /// # 错误
    /// - `SlotUnavailable`: 时段非 AVAILABLE (且不是可接管的超时锁) 或窗口已结束
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn lock(&self, factory_id: &str, slot_id: &str, actor: &Actor) -> ApiResult<InsertSlot> {
        let actor_id = actor.require_id()?;
        self.with_slot(slot_id, || {
            let slot = self.load(factory_id, slot_id)?;
            let now = crate::db::now();
            if slot.window_end <= now {
                return Err(ApiError::slot_unavailable(slot_id, "时段窗口已结束"));
            }

            let ttl = self.config_manager.slot_settings(factory_id)?.lock_ttl_seconds;
            if slot.status == SlotStatus::Locked && lock_expired(&slot, ttl, now) {
                SlotStatus::Locked
                    .apply(SlotEvent::Reclaim)?
                    .apply(SlotEvent::Lock)?;
                tracing::info!(previous = ?slot.locked_by, "锁已超时, 由新请求接管");
            } else {
                slot.status.apply(SlotEvent::Lock).map_err(|_| {
                    ApiError::slot_unavailable(slot_id, describe_holder(&slot))
                })?;
            }

            let cas = SlotCas {
                slot_id: slot_id.to_string(),
                expected_status: slot.status,
                expected_revision: slot.revision,
                next_status: SlotStatus::Locked,
                locked_by: Some(actor_id.to_string()),
                locked_at: Some(now),
                consumed_by_plan_id: None,
                updated_at: now,
            };
            if !self.slot_repo.compare_and_set(&cas)? {
                return Err(ApiError::slot_unavailable(slot_id, "时段已被其他请求改变"));
            }

            self.action_log_repo.insert(&ActionLog::record(
                factory_id,
                ActionType::LockSlot,
                "SLOT",
                slot_id,
                actor_id,
                None,
                "锁定时段",
            ))?;
            self.load(factory_id, slot_id)
        })
    }

    /// 释放时段 (仅锁定人)
    ///
    /// # 错误
    /// - `InvalidStateTransition`: 时段未锁定
    /// - `Unauthorized`: 时段由其他人锁定
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn unlock(&self, factory_id: &str, slot_id: &str, actor: &Actor) -> ApiResult<InsertSlot> {
        let actor_id = actor.require_id()?;
        self.with_slot(slot_id, || {
            let slot = self.load(factory_id, slot_id)?;
            let next = slot.status.apply(SlotEvent::Unlock)?;
            if !slot.is_held_by(actor_id) {
                return Err(ApiError::Unauthorized(format!(
                    "时段由 {} 锁定",
                    slot.locked_by.as_deref().unwrap_or("-")
                )));
            }

            let now = crate::db::now();
            let cas = SlotCas {
                slot_id: slot_id.to_string(),
                expected_status: slot.status,
                expected_revision: slot.revision,
                next_status: next,
                locked_by: None,
                locked_at: None,
                consumed_by_plan_id: None,
                updated_at: now,
            };
            if !self.slot_repo.compare_and_set(&cas)? {
                return Err(ApiError::slot_unavailable(slot_id, "时段已被其他请求改变"));
            }

            self.action_log_repo.insert(&ActionLog::record(
                factory_id,
                ActionType::UnlockSlot,
                "SLOT",
                slot_id,
                actor_id,
                None,
                "释放时段",
            ))?;
            self.load(factory_id, slot_id)
        })
    }

    /// 校验时段由 actor 持有 (供插单在互斥锁内调用)
    ///
    /// # 错误
    /// - `InvalidStateTransition`: 时段未被锁定
    /// - `SlotUnavailable`: 时段由他人锁定 / 已占用 / 已过期 / 窗口已结束
    pub fn require_held(
        &self,
        factory_id: &str,
        slot_id: &str,
        actor_id: &str,
    ) -> ApiResult<InsertSlot> {
        let slot = self.load(factory_id, slot_id)?;
        if slot.window_end <= crate::db::now() {
            return Err(ApiError::slot_unavailable(slot_id, "时段窗口已结束"));
        }
        match slot.status {
            SlotStatus::Locked if slot.is_held_by(actor_id) => Ok(slot),
            SlotStatus::Available => Err(ApiError::InvalidStateTransition {
                entity: "InsertSlot".to_string(),
                from: slot.status.to_string(),
                event: "CONSUME".to_string(),
            }),
            _ => Err(ApiError::slot_unavailable(slot_id, describe_holder(&slot))),
        }
    }

    /// 将不再可用的 AVAILABLE 时段置为 EXPIRED
    pub fn expire_available(&self, slot: &InsertSlot) -> ApiResult<bool> {
        self.with_slot(&slot.slot_id, || {
            let current = match self.slot_repo.find_by_id(&slot.slot_id)? {
                Some(s) if s.status == SlotStatus::Available => s,
                _ => return Ok(false),
            };
            let next = current.status.apply(SlotEvent::Expire)?;
            Ok(self.slot_repo.compare_and_set(&SlotCas {
                slot_id: current.slot_id.clone(),
                expected_status: current.status,
                expected_revision: current.revision,
                next_status: next,
                locked_by: None,
                locked_at: None,
                consumed_by_plan_id: None,
                updated_at: crate::db::now(),
            })?)
        })
    }

    /// 回收超时锁
    ///
    /// # 返回
    /// - 回收的时段数; 未配置 TTL 时为 0
    pub fn reclaim_stale(&self, factory_id: &str, now: NaiveDateTime) -> ApiResult<usize> {
        let ttl = self.config_manager.slot_settings(factory_id)?.lock_ttl_seconds;
        if ttl <= 0 {
            return Ok(0);
        }
        let cutoff = now - Duration::seconds(ttl);
        let reclaimed = self.slot_repo.reclaim_stale_locks(factory_id, cutoff, now)?;
        if reclaimed > 0 {
            tracing::info!(factory_id, reclaimed, "已回收超时锁");
        }
        Ok(reclaimed)
    }

    /// 清理当前无人持有的互斥锁条目
    pub fn prune_guards(&self) -> usize {
        let before = self.guards.len();
        self.guards.retain(|_, g| Arc::strong_count(g) > 1);
        before - self.guards.len()
    }

    fn load(&self, factory_id: &str, slot_id: &str) -> ApiResult<InsertSlot> {
        self.slot_repo
            .find_by_id(slot_id)?
            .filter(|s| s.factory_id == factory_id)
            .ok_or_else(|| ApiError::not_found("InsertSlot", slot_id))
    }
}

fn lock_expired(slot: &InsertSlot, ttl_seconds: i64, now: NaiveDateTime) -> bool {
    ttl_seconds > 0
        && slot
            .locked_at
            .map(|at| at + Duration::seconds(ttl_seconds) <= now)
            .unwrap_or(false)
}

fn describe_holder(slot: &InsertSlot) -> String {
    match (slot.status, slot.locked_by.as_deref()) {
        (SlotStatus::Locked, Some(holder)) => format!("时段已被 {} 锁定", holder),
        (status, _) => format!("时段当前状态为 {}", status),
    }
}
