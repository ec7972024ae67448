// ==========================================
// 工厂生产排程系统 - 产线与资源 API
// ==========================================
// 职责: 产线登记、专用产能、历史产出、停机窗口、物料库存、工人名册
// 用途: 为概率估算 / 时段生成 / 影响分析提供输入
// ==========================================

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::api::actor::Actor;
use crate::api::error::{ApiError, ApiResult};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::line::{
    LineCapability, LineDowntime, LineProfile, MaterialStock, ProductionLine, ThroughputSample,
    Worker,
};
use crate::domain::types::LineStatus;
use crate::repository::{ActionLogRepository, LineRepository};

/// 产线登记请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertLineRequest {
    pub line_id: String,
    pub line_name: String,
    pub throughput_per_hour: f64,
    #[serde(default)]
    pub required_workers: i64,
    #[serde(default = "default_line_status")]
    pub status: LineStatus,
}

fn default_line_status() -> LineStatus {
    LineStatus::Active
}

/// 历史产出登记请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSampleRequest {
    pub line_id: String,
    pub product_type_id: String,
    pub quantity: i64,
    pub hours: f64,
}

/// 停机窗口登记请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddDowntimeRequest {
    pub line_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub reason: Option<String>,
}

// ==========================================
// LineApi - 产线与资源 API
// ==========================================
pub struct LineApi {
    line_repo: Arc<LineRepository>,
    action_log_repo: Arc<ActionLogRepository>,
}

impl LineApi {
    pub fn new(line_repo: Arc<LineRepository>, action_log_repo: Arc<ActionLogRepository>) -> Self {
        Self {
            line_repo,
            action_log_repo,
        }
    }

    // ==========================================
    // 产线
    // ==========================================

    /// 登记或更新产线
    #[instrument(skip(self, req, actor), fields(line_id = %req.line_id))]
    pub fn upsert_line(
        &self,
        factory_id: &str,
        req: UpsertLineRequest,
        actor: &Actor,
    ) -> ApiResult<ProductionLine> {
        let actor_id = actor.require_id()?;
        if req.line_id.trim().is_empty() || req.line_name.trim().is_empty() {
            return Err(ApiError::ValidationError("产线编号与名称不能为空".to_string()));
        }
        if !(req.throughput_per_hour.is_finite() && req.throughput_per_hour > 0.0) {
            return Err(ApiError::ValidationError(format!(
                "产线产能必须 > 0, 实际 {}",
                req.throughput_per_hour
            )));
        }
        if req.required_workers < 0 {
            return Err(ApiError::ValidationError("开线人数不能为负".to_string()));
        }
        if let Some(existing) = self.line_repo.find_line(&req.line_id)? {
            if existing.factory_id != factory_id {
                return Err(ApiError::Conflict(format!(
                    "产线 {} 已属于工厂 {}",
                    req.line_id, existing.factory_id
                )));
            }
        }

        let line = ProductionLine {
            line_id: req.line_id.trim().to_string(),
            factory_id: factory_id.to_string(),
            line_name: req.line_name.trim().to_string(),
            throughput_per_hour: req.throughput_per_hour,
            required_workers: req.required_workers,
            status: req.status,
            updated_at: crate::db::now(),
        };
        self.line_repo.upsert_line(&line)?;

        self.action_log_repo.insert(&ActionLog::record(
            factory_id,
            ActionType::UpsertLine,
            "LINE",
            &line.line_id,
            actor_id,
            serde_json::to_value(&line).ok(),
            "登记产线",
        ))?;
        Ok(line)
    }

    /// 设置产线对某产品类型的专用产能
    pub fn set_capability(
        &self,
        factory_id: &str,
        capability: LineCapability,
        actor: &Actor,
    ) -> ApiResult<LineProfile> {
        let actor_id = actor.require_id()?;
        self.require_line(factory_id, &capability.line_id)?;
        if capability.product_type_id.trim().is_empty() {
            return Err(ApiError::ValidationError("产品类型不能为空".to_string()));
        }
        if !(capability.rate_per_hour.is_finite() && capability.rate_per_hour > 0.0) {
            return Err(ApiError::ValidationError("专用产能必须 > 0".to_string()));
        }
        self.line_repo.set_capability(&capability)?;

        self.action_log_repo.insert(&ActionLog::record(
            factory_id,
            ActionType::UpsertLine,
            "LINE",
            &capability.line_id,
            actor_id,
            Some(json!({
                "product_type_id": capability.product_type_id,
                "rate_per_hour": capability.rate_per_hour,
            })),
            "设置专用产能",
        ))?;

        self.line_repo
            .find_profile(&capability.line_id)?
            .ok_or_else(|| ApiError::not_found("ProductionLine", &capability.line_id))
    }

    pub fn list_lines(&self, factory_id: &str) -> ApiResult<Vec<LineProfile>> {
        Ok(self.line_repo.list_profiles(factory_id)?)
    }

    // ==========================================
    // 历史产出 / 停机 / 库存 / 工人
    // ==========================================

    pub fn record_sample(
        &self,
        factory_id: &str,
        req: RecordSampleRequest,
    ) -> ApiResult<ThroughputSample> {
        self.require_line(factory_id, &req.line_id)?;
        if req.quantity < 0 || !(req.hours.is_finite() && req.hours > 0.0) {
            return Err(ApiError::ValidationError(
                "产出数量不能为负, 工时必须 > 0".to_string(),
            ));
        }
        let sample = ThroughputSample {
            sample_id: uuid::Uuid::new_v4().to_string(),
            line_id: req.line_id,
            product_type_id: req.product_type_id,
            quantity: req.quantity,
            hours: req.hours,
            recorded_at: crate::db::now(),
        };
        self.line_repo.insert_sample(&sample)?;
        Ok(sample)
    }

    pub fn add_downtime(&self, factory_id: &str, req: AddDowntimeRequest) -> ApiResult<LineDowntime> {
        self.require_line(factory_id, &req.line_id)?;
        if req.start_time >= req.end_time {
            return Err(ApiError::ValidationError(
                "停机开始时间必须早于结束时间".to_string(),
            ));
        }
        let downtime = LineDowntime {
            downtime_id: uuid::Uuid::new_v4().to_string(),
            line_id: req.line_id,
            start_time: req.start_time,
            end_time: req.end_time,
            reason: req.reason,
        };
        self.line_repo.insert_downtime(&downtime)?;
        Ok(downtime)
    }

    pub fn upsert_stock(
        &self,
        factory_id: &str,
        product_type_id: &str,
        available_quantity: i64,
    ) -> ApiResult<MaterialStock> {
        if available_quantity < 0 {
            return Err(ApiError::ValidationError("库存数量不能为负".to_string()));
        }
        let stock = MaterialStock {
            factory_id: factory_id.to_string(),
            product_type_id: product_type_id.to_string(),
            available_quantity,
            updated_at: crate::db::now(),
        };
        self.line_repo.upsert_stock(&stock)?;
        Ok(stock)
    }

    pub fn upsert_worker(&self, factory_id: &str, worker: Worker) -> ApiResult<Worker> {
        if worker.worker_id.trim().is_empty() {
            return Err(ApiError::ValidationError("工号不能为空".to_string()));
        }
        let worker = Worker {
            factory_id: factory_id.to_string(),
            ..worker
        };
        self.line_repo.upsert_worker(&worker)?;
        Ok(worker)
    }

    pub fn list_workers(&self, factory_id: &str) -> ApiResult<Vec<Worker>> {
        Ok(self.line_repo.list_active_workers(factory_id)?)
    }

    fn require_line(&self, factory_id: &str, line_id: &str) -> ApiResult<ProductionLine> {
        self.line_repo
            .find_line(line_id)?
            .filter(|l| l.factory_id == factory_id)
            .ok_or_else(|| ApiError::not_found("ProductionLine", line_id))
    }
}
