// ==========================================
// 工厂生产排程系统 - 预警管理 API
// ==========================================
// 职责: 预警的产生、查询、确认、解决
// 生命周期: OPEN → ACKNOWLEDGED → RESOLVED
// 幂等: 对已确认/已解决的预警重复操作不产生第二次写入
// ==========================================

use std::sync::Arc;

use serde_json::json;
use tracing::instrument;

use crate::api::actor::Actor;
use crate::api::error::{ApiError, ApiResult};
use crate::api::page::{Page, PageRequest};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::alert::{NewAlert, SchedulingAlert};
use crate::domain::types::{AlertEvent, AlertStatus};
use crate::repository::{ActionLogRepository, AlertFilter, AlertRepository};

// ==========================================
// AlertManager - 预警管理
// ==========================================
pub struct AlertManager {
    alert_repo: Arc<AlertRepository>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl AlertManager {
    pub fn new(alert_repo: Arc<AlertRepository>, action_log_repo: Arc<ActionLogRepository>) -> Self {
        Self {
            alert_repo,
            action_log_repo,
        }
    }

    /// 产生预警
    ///
    /// 同类型、同关联排程已有 OPEN 预警时直接返回该预警;
    /// 已确认的预警不参与去重, 条件再次触发时产生新预警
    #[instrument(skip(self, alert), fields(factory_id = %alert.factory_id, alert_type = %alert.alert_type))]
    pub fn raise(&self, alert: NewAlert) -> ApiResult<SchedulingAlert> {
        if let Some(schedule_id) = alert.related_schedule_id.as_deref() {
            if let Some(existing) =
                self.alert_repo
                    .find_open(&alert.factory_id, alert.alert_type, schedule_id)?
            {
                tracing::debug!(alert_id = %existing.alert_id, "已有未处理预警, 跳过");
                return Ok(existing);
            }
        }

        let record = SchedulingAlert {
            alert_id: uuid::Uuid::new_v4().to_string(),
            factory_id: alert.factory_id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            related_schedule_id: alert.related_schedule_id,
            related_plan_id: alert.related_plan_id,
            message: alert.message,
            status: AlertStatus::Open,
            created_at: crate::db::now(),
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
        };
        self.alert_repo.insert(&record)?;
        tracing::info!(alert_id = %record.alert_id, severity = %record.severity, "预警已产生");
        Ok(record)
    }

    /// 分页查询预警
    pub fn list(
        &self,
        factory_id: &str,
        filter: &AlertFilter,
        page: PageRequest,
    ) -> ApiResult<Page<SchedulingAlert>> {
        let (items, total) = self
            .alert_repo
            .list(factory_id, filter, page.limit(), page.offset())?;
        Ok(Page::new(items, total, page))
    }

    pub fn get(&self, factory_id: &str, alert_id: &str) -> ApiResult<SchedulingAlert> {
        self.alert_repo
            .find_by_id(alert_id)?
            .filter(|a| a.factory_id == factory_id)
            .ok_or_else(|| ApiError::not_found("SchedulingAlert", alert_id))
    }

    /// 确认预警
    ///
    /// # 返回
    /// - 当前预警; 已确认/已解决时原样返回
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn acknowledge(
        &self,
        factory_id: &str,
        alert_id: &str,
        actor: &Actor,
    ) -> ApiResult<SchedulingAlert> {
        let actor_id = actor.require_id()?;
        let alert = self.get(factory_id, alert_id)?;
        if alert.status != AlertStatus::Open {
            return Ok(alert);
        }
        alert.status.apply(AlertEvent::Acknowledge)?;

        let now = crate::db::now();
        if self.alert_repo.mark_acknowledged(alert_id, actor_id, now)? {
            self.action_log_repo.insert(&ActionLog::record(
                factory_id,
                ActionType::AcknowledgeAlert,
                "ALERT",
                alert_id,
                actor_id,
                None,
                "确认预警",
            ))?;
        }
        self.get(factory_id, alert_id)
    }

    /// 解决预警 (需先确认)
    ///
    /// # 错误
    /// - `InvalidStateTransition`: 预警仍为 OPEN
    #[instrument(skip(self, actor, notes), fields(actor = %actor.user_id))]
    pub fn resolve(
        &self,
        factory_id: &str,
        alert_id: &str,
        actor: &Actor,
        notes: Option<String>,
    ) -> ApiResult<SchedulingAlert> {
        let actor_id = actor.require_id()?;
        let alert = self.get(factory_id, alert_id)?;
        if alert.status == AlertStatus::Resolved {
            return Ok(alert);
        }
        alert.status.apply(AlertEvent::Resolve)?;

        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let now = crate::db::now();
        if self
            .alert_repo
            .mark_resolved(alert_id, actor_id, now, notes.as_deref())?
        {
            self.action_log_repo.insert(&ActionLog::record(
                factory_id,
                ActionType::ResolveAlert,
                "ALERT",
                alert_id,
                actor_id,
                Some(json!({ "resolution_notes": notes })),
                "解决预警",
            ))?;
        }
        self.get(factory_id, alert_id)
    }
}
