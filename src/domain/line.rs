// ==========================================
// 工厂生产排程系统 - 产线与资源领域模型
// ==========================================
// 职责: 产线产能、历史产出、停机窗口、物料库存、工人名册
// 用途: 完成概率估算 / 时段生成 / 插单资源校验的输入
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::LineStatus;

// ==========================================
// ProductionLine - 产线
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionLine {
    pub line_id: String,
    pub factory_id: String,
    pub line_name: String,
    pub throughput_per_hour: f64, // 默认产能 (件/小时)
    pub required_workers: i64,    // 开线所需人数
    pub status: LineStatus,
    pub updated_at: NaiveDateTime,
}

/// 产线对某产品类型的专用产能
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineCapability {
    pub line_id: String,
    pub product_type_id: String,
    pub rate_per_hour: f64,
}

/// 产线的产能画像（产线 + 专用产能）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineProfile {
    pub line: ProductionLine,
    pub capabilities: Vec<LineCapability>,
}

impl LineProfile {
    /// 未登记专用产能的产线视为通用产线
    pub fn supports(&self, product_type_id: &str) -> bool {
        self.capabilities.is_empty()
            || self
                .capabilities
                .iter()
                .any(|c| c.product_type_id == product_type_id)
    }

    /// 指定产品类型的产能; 无专用产能时取默认产能
    pub fn rate_for(&self, product_type_id: Option<&str>) -> f64 {
        product_type_id
            .and_then(|p| self.capabilities.iter().find(|c| c.product_type_id == p))
            .map(|c| c.rate_per_hour)
            .unwrap_or(self.line.throughput_per_hour)
    }
}

// ==========================================
// ThroughputSample - 历史产出样本
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub sample_id: String,
    pub line_id: String,
    pub product_type_id: String,
    pub quantity: i64,
    pub hours: f64,
    pub recorded_at: NaiveDateTime,
}

impl ThroughputSample {
    pub fn rate_per_hour(&self) -> Option<f64> {
        if self.hours > 0.0 {
            Some(self.quantity as f64 / self.hours)
        } else {
            None
        }
    }
}

// ==========================================
// LineDowntime - 停机窗口
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDowntime {
    pub downtime_id: String,
    pub line_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub reason: Option<String>,
}

// ==========================================
// MaterialStock - 物料库存 (按产品类型)
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialStock {
    pub factory_id: String,
    pub product_type_id: String,
    pub available_quantity: i64,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// Worker - 工人名册
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub factory_id: String,
    pub worker_name: String,
    pub active: bool,
}
