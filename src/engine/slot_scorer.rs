// ==========================================
// 工厂生产排程系统 - 插单时段评分引擎
// ==========================================
// 红线: 四个子分均归一化到 [0, 1]; 请求缺省字段对应子分取 1.0
// ==========================================
// 子分:
// - 交期: 窗口结束 ≤ 交期 → 1.0, 否则 exp(−迟到小时 / 12)
// - 产能: min(1, 可用产能 / 需求数量)
// - 换型: 同产品 1.0 / 不同 0.4 / 无前序 0.7
// - 扰动: 1 / (1 + Σ(1 + 概率缺口 / 阈值)), 求和范围为窗口内同线紧急排程
// 排序: 总分降序, 同分按窗口开始时间升序
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::instrument;

use crate::config::ScoringWeights;
use crate::domain::slot::InsertSlot;

const DEADLINE_DECAY_HOURS: f64 = 12.0;
const CHANGEOVER_SAME: f64 = 1.0;
const CHANGEOVER_DIFFERENT: f64 = 0.4;
const CHANGEOVER_UNKNOWN: f64 = 0.7;

/// 插单请求参数 (全部可选)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertRequest {
    pub product_type_id: Option<String>,
    pub required_quantity: Option<i64>,
    pub deadline: Option<NaiveDateTime>,
}

/// 评分所需的单个时段上下文
#[derive(Debug, Clone)]
pub struct ScoringCandidate {
    pub slot: InsertSlot,
    /// 产线是否支持请求的产品类型
    pub compatible: bool,
    /// 窗口开始前该产线最近一次生产的产品
    pub previous_product: Option<String>,
    /// 窗口内同产线紧急排程的概率缺口 (阈值 − 概率)
    pub urgent_deficits: Vec<f64>,
}

/// 子分明细
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub deadline_fit: f64,
    pub capacity_fit: f64,
    pub changeover: f64,
    pub disruption: f64,
}

/// 评分结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSlot {
    pub slot: InsertSlot,
    pub breakdown: ScoreBreakdown,
}

// ==========================================
// SlotScorer - 时段评分引擎
// ==========================================
#[derive(Debug, Default)]
pub struct SlotScorer;

impl SlotScorer {
    pub fn new() -> Self {
        Self
    }

    /// 评分并排序 (过滤不兼容产线)
    ///
    /// 返回的 slot.recommendation_score 为本次请求的加权总分
    #[instrument(skip(self, candidates, request, weights), fields(count = candidates.len()))]
    pub fn rank(
        &self,
        candidates: Vec<ScoringCandidate>,
        request: &InsertRequest,
        weights: &ScoringWeights,
        urgent_threshold: f64,
    ) -> Vec<ScoredSlot> {
        let w = weights.normalized();

        let mut scored: Vec<ScoredSlot> = candidates
            .into_iter()
            .filter(|c| c.compatible)
            .map(|c| {
                let breakdown = self.breakdown(&c, request, urgent_threshold);
                let score = w.deadline * breakdown.deadline_fit
                    + w.capacity * breakdown.capacity_fit
                    + w.changeover * breakdown.changeover
                    + w.disruption * breakdown.disruption;
                let mut slot = c.slot;
                slot.recommendation_score = score.clamp(0.0, 1.0);
                ScoredSlot { slot, breakdown }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.slot
                .recommendation_score
                .partial_cmp(&a.slot.recommendation_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.slot.window_start.cmp(&b.slot.window_start))
                .then_with(|| a.slot.slot_id.cmp(&b.slot.slot_id))
        });
        scored
    }

    /// 计算四个子分
    pub fn breakdown(
        &self,
        c: &ScoringCandidate,
        request: &InsertRequest,
        urgent_threshold: f64,
    ) -> ScoreBreakdown {
        ScoreBreakdown {
            deadline_fit: deadline_fit(c.slot.window_end, request.deadline),
            capacity_fit: capacity_fit(c.slot.available_capacity, request.required_quantity),
            changeover: changeover_fit(
                c.previous_product.as_deref(),
                request.product_type_id.as_deref(),
            ),
            disruption: disruption_fit(&c.urgent_deficits, urgent_threshold),
        }
    }
}

fn deadline_fit(window_end: NaiveDateTime, deadline: Option<NaiveDateTime>) -> f64 {
    match deadline {
        None => 1.0,
        Some(d) if window_end <= d => 1.0,
        Some(d) => {
            let late_hours = (window_end - d).num_seconds() as f64 / 3600.0;
            (-late_hours / DEADLINE_DECAY_HOURS).exp()
        }
    }
}

fn capacity_fit(available: i64, required: Option<i64>) -> f64 {
    match required {
        None => 1.0,
        Some(req) if req <= 0 => 1.0,
        Some(req) => (available.max(0) as f64 / req as f64).min(1.0),
    }
}

fn changeover_fit(previous: Option<&str>, requested: Option<&str>) -> f64 {
    match (requested, previous) {
        (None, _) => 1.0,
        (Some(_), None) => CHANGEOVER_UNKNOWN,
        (Some(r), Some(p)) if r == p => CHANGEOVER_SAME,
        (Some(_), Some(_)) => CHANGEOVER_DIFFERENT,
    }
}

fn disruption_fit(deficits: &[f64], threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    let load: f64 = deficits
        .iter()
        .map(|d| 1.0 + d.max(0.0) / threshold)
        .sum();
    1.0 / (1.0 + load)
}
