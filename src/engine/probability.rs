// ==========================================
// 工厂生产排程系统 - 完成概率估算引擎
// ==========================================
// 红线: 纯函数, 不读库; 输出恒在 [0, 1]; 相同输入相同输出
// ==========================================
// 输入: LineSchedule + 历史产出样本 + 产线额定产能
// 输出: CompletionProbability (含 reason)
// 模型:
//   required   = 剩余数量 / 剩余小时
//   achievable = 0.6 × 历史均值 + 0.4 × 当前实绩速率 (缺一取另一, 都缺取额定产能)
//   p          = 1 / (1 + e^{-6 × (achievable / required − 1)})
// ==========================================

use chrono::NaiveDateTime;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::domain::line::ThroughputSample;
use crate::domain::plan::LineSchedule;
use crate::domain::types::ScheduleStatus;

const HISTORY_WEIGHT: f64 = 0.6;
const TREND_WEIGHT: f64 = 0.4;
const LOGISTIC_STEEPNESS: f64 = 6.0;
/// 无任何产能信息时的中性概率
const UNKNOWN_RATE_PROBABILITY: f64 = 0.5;

/// 单条排程的完成概率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionProbability {
    pub schedule_id: String,
    pub plan_id: String,
    pub production_line_id: String,
    pub probability: f64,
    pub remaining_quantity: i64,
    pub remaining_hours: f64,
    pub required_rate: Option<f64>,
    pub achievable_rate: Option<f64>,
    pub reason: String,
}

/// 批量估算的单项输入
#[derive(Debug, Clone)]
pub struct ProbabilityInput {
    pub schedule: LineSchedule,
    pub samples: Vec<ThroughputSample>,
    pub rated_rate: Option<f64>,
}

// ==========================================
// CompletionProbabilityEstimator - 完成概率估算引擎
// ==========================================
#[derive(Debug, Default)]
pub struct CompletionProbabilityEstimator;

impl CompletionProbabilityEstimator {
    pub fn new() -> Self {
        Self
    }

    /// 估算单条排程按期完成的概率
    ///
    /// # 参数
    /// - `schedule`: 产线排程
    /// - `samples`: 同产线同产品的历史产出样本
    /// - `rated_rate`: 产线额定产能 (件/小时), 无历史与实绩时使用
    /// - `now`: 评估时刻
    pub fn estimate(
        &self,
        schedule: &LineSchedule,
        samples: &[ThroughputSample],
        rated_rate: Option<f64>,
        now: NaiveDateTime,
    ) -> CompletionProbability {
        let remaining_quantity = schedule.remaining_quantity();
        let effective_start = now.max(schedule.scheduled_start);
        let remaining_hours =
            ((schedule.scheduled_end - effective_start).num_seconds() as f64 / 3600.0).max(0.0);

        let base = CompletionProbability {
            schedule_id: schedule.schedule_id.clone(),
            plan_id: schedule.plan_id.clone(),
            production_line_id: schedule.production_line_id.clone(),
            probability: 0.0,
            remaining_quantity,
            remaining_hours,
            required_rate: None,
            achievable_rate: None,
            reason: String::new(),
        };

        // 1. 已完成
        if schedule.completed_quantity >= schedule.planned_quantity {
            return CompletionProbability {
                probability: 1.0,
                reason: "已完成计划数量".to_string(),
                ..base
            };
        }

        // 2. 无剩余时间且数量未达成
        if remaining_hours <= 0.0 {
            return CompletionProbability {
                probability: 0.0,
                reason: "计划结束时间已到, 数量未达成".to_string(),
                ..base
            };
        }

        let required = remaining_quantity as f64 / remaining_hours;
        let achievable = self.achievable_rate(schedule, samples, rated_rate, now);

        match achievable {
            None => CompletionProbability {
                probability: UNKNOWN_RATE_PROBABILITY,
                required_rate: Some(required),
                reason: "无历史产出与额定产能, 取中性概率".to_string(),
                ..base
            },
            Some((rate, source)) => {
                let probability = logistic_ratio(rate, required);
                CompletionProbability {
                    probability,
                    required_rate: Some(required),
                    achievable_rate: Some(rate),
                    reason: format!(
                        "需求速率 {:.2}/h, 可达速率 {:.2}/h ({})",
                        required, rate, source
                    ),
                    ..base
                }
            }
        }
    }

    /// 批量估算 (并行, 顺序与输入一致)
    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub fn estimate_batch(
        &self,
        inputs: &[ProbabilityInput],
        now: NaiveDateTime,
    ) -> Vec<CompletionProbability> {
        inputs
            .par_iter()
            .map(|input| self.estimate(&input.schedule, &input.samples, input.rated_rate, now))
            .collect()
    }

    /// 可达速率及其来源说明
    fn achievable_rate(
        &self,
        schedule: &LineSchedule,
        samples: &[ThroughputSample],
        rated_rate: Option<f64>,
        now: NaiveDateTime,
    ) -> Option<(f64, &'static str)> {
        let rates: Vec<f64> = samples.iter().filter_map(|s| s.rate_per_hour()).collect();
        let hist_mean = if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64)
        };

        let trend = self.elapsed_rate(schedule, now);

        match (hist_mean, trend) {
            (Some(h), Some(t)) => Some((HISTORY_WEIGHT * h + TREND_WEIGHT * t, "历史均值+实绩速率")),
            (Some(h), None) => Some((h, "历史均值")),
            (None, Some(t)) => Some((t, "实绩速率")),
            (None, None) => rated_rate
                .filter(|r| r.is_finite() && *r > 0.0)
                .map(|r| (r, "额定产能")),
        }
    }

    /// 生产中排程的实绩速率 (已完成数量 / 已开工小时)
    fn elapsed_rate(&self, schedule: &LineSchedule, now: NaiveDateTime) -> Option<f64> {
        if schedule.status != ScheduleStatus::Running {
            return None;
        }
        let started = schedule.actual_start.unwrap_or(schedule.scheduled_start);
        let elapsed_hours = (now - started).num_seconds() as f64 / 3600.0;
        if elapsed_hours <= 0.0 {
            return None;
        }
        Some(schedule.completed_quantity as f64 / elapsed_hours)
    }
}

/// 速率比映射到 [0, 1]
fn logistic_ratio(achievable: f64, required: f64) -> f64 {
    if required <= 0.0 {
        return 1.0;
    }
    let ratio = achievable / required;
    if !ratio.is_finite() {
        return if ratio > 0.0 { 1.0 } else { 0.0 };
    }
    let p = 1.0 / (1.0 + (-LOGISTIC_STEEPNESS * (ratio - 1.0)).exp());
    p.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn t(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn schedule(planned: i64, completed: i64, status: ScheduleStatus) -> LineSchedule {
        LineSchedule {
            schedule_id: "S1".to_string(),
            plan_id: "P1".to_string(),
            factory_id: "F1".to_string(),
            production_line_id: "L1".to_string(),
            product_type_id: "PT-A".to_string(),
            planned_quantity: planned,
            completed_quantity: completed,
            status,
            scheduled_start: t(8, 0),
            scheduled_end: t(16, 0),
            actual_start: Some(t(8, 0)),
            actual_end: None,
            urgent_flag: false,
            updated_at: t(8, 0),
            revision: 0,
        }
    }

    fn sample(rate: f64) -> ThroughputSample {
        ThroughputSample {
            sample_id: format!("TS-{}", rate),
            line_id: "L1".to_string(),
            product_type_id: "PT-A".to_string(),
            quantity: (rate * 10.0) as i64,
            hours: 10.0,
            recorded_at: t(0, 0),
        }
    }

    #[test]
    fn test_completed_schedule_is_certain() {
        let est = CompletionProbabilityEstimator::new();
        let s = schedule(100, 100, ScheduleStatus::Running);
        assert_eq!(est.estimate(&s, &[], None, t(9, 0)).probability, 1.0);

        let over = schedule(100, 120, ScheduleStatus::Running);
        assert_eq!(est.estimate(&over, &[], None, t(20, 0)).probability, 1.0);
    }

    #[test]
    fn test_zero_remaining_time_returns_zero() {
        let est = CompletionProbabilityEstimator::new();
        let s = schedule(100, 50, ScheduleStatus::Running);
        let p = est.estimate(&s, &[sample(50.0)], Some(50.0), t(16, 0));
        assert_eq!(p.probability, 0.0);
        assert_eq!(p.remaining_hours, 0.0);
    }

    #[test]
    fn test_probability_bounded_for_extreme_rates() {
        let est = CompletionProbabilityEstimator::new();
        let s = schedule(1_000_000, 0, ScheduleStatus::Pending);
        for rate in [0.0001, 1.0, 1e9] {
            let p = est.estimate(&s, &[sample(rate)], None, t(7, 0)).probability;
            assert!((0.0..=1.0).contains(&p), "rate={} p={}", rate, p);
        }
        // 无任何产能信息
        let p = est.estimate(&s, &[], None, t(7, 0));
        assert_eq!(p.probability, UNKNOWN_RATE_PROBABILITY);
    }

    #[test]
    fn test_matching_rate_gives_one_half() {
        let est = CompletionProbabilityEstimator::new();
        // 8 小时, 800 件, 历史 100/h
        let s = schedule(800, 0, ScheduleStatus::Pending);
        let p = est.estimate(&s, &[sample(100.0)], None, t(6, 0)).probability;
        assert!((p - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_non_increasing_as_time_runs_out() {
        let est = CompletionProbabilityEstimator::new();
        let s = schedule(800, 300, ScheduleStatus::Running);
        let samples = vec![sample(90.0), sample(110.0)];

        let mut last = f64::INFINITY;
        let mut now = t(8, 30);
        while now <= t(16, 30) {
            let p = est.estimate(&s, &samples, Some(100.0), now).probability;
            assert!(p <= last + 1e-12, "now={} p={} last={}", now, p, last);
            last = p;
            now += Duration::minutes(15);
        }
        assert_eq!(last, 0.0);
    }

    #[test]
    fn test_deterministic_and_batch_matches_single() {
        let est = CompletionProbabilityEstimator::new();
        let inputs: Vec<ProbabilityInput> = (0..20)
            .map(|i| {
                let mut s = schedule(500 + i * 10, i * 20, ScheduleStatus::Running);
                s.schedule_id = format!("S{}", i);
                ProbabilityInput {
                    schedule: s,
                    samples: vec![sample(60.0 + i as f64)],
                    rated_rate: Some(80.0),
                }
            })
            .collect();

        let batch = est.estimate_batch(&inputs, t(10, 0));
        assert_eq!(batch.len(), inputs.len());
        for (input, result) in inputs.iter().zip(batch.iter()) {
            let single = est.estimate(&input.schedule, &input.samples, input.rated_rate, t(10, 0));
            assert_eq!(&single, result);
        }
    }
}
