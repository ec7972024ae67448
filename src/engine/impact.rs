// ==========================================
// 工厂生产排程系统 - 插单影响分析引擎
// ==========================================
// 红线: Engine 不拼 SQL; 每个结论必须附带 reason
// ==========================================
// 连锁反应:
// - 插单占用 = 前换型 + 数量 / 速率 + 后换型 (产品不同才计换型)
// - 下游排程按开工顺序依次受推: 推入量先被该排程自身的富余时间吸收,
//   吸收不了的部分整体顺延; 某排程不受推时连锁终止
// 资源校验: 物料 / 设备 (产线状态 + 停机) / 人员
// 等级:
// - HIGH:   显著延误数 ≥ high_count, 或最大延误 ≥ high_delay_minutes, 或资源失败 ≥ 2
// - MEDIUM: 存在显著延误, 或资源失败 = 1, 或紧急排程出现任何延误
// - LOW:    其他
// ==========================================

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::ImpactSettings;
use crate::domain::line::{LineDowntime, LineProfile};
use crate::domain::plan::{LineSchedule, ScheduleShift};
use crate::domain::slot::InsertSlot;
use crate::domain::types::{ImpactLevel, LineStatus};
use crate::engine::slot_scorer::InsertRequest;

/// 产能缺失时的兜底速率 (件/小时)
const MIN_RATE: f64 = 1e-6;
/// 单次插单占用上限 (一年)
const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 3600.0;

/// 资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Material,
    Equipment,
    Workers,
}

/// 单项资源校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCheck {
    pub resource: ResourceKind,
    pub passed: bool,
    pub required: Option<i64>,
    pub available: Option<i64>,
    pub message: String,
}

/// 受影响的下游排程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectedSchedule {
    pub schedule_id: String,
    pub plan_id: String,
    pub product_type_id: String,
    pub original_start: NaiveDateTime,
    pub original_end: NaiveDateTime,
    pub new_start: NaiveDateTime,
    pub new_end: NaiveDateTime,
    pub delay_minutes: i64,
    pub urgent: bool,
    pub significant: bool,
}

/// 影响分析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub slot_id: String,
    pub production_line_id: String,
    pub insert_quantity: i64,
    pub insert_start: NaiveDateTime,
    pub insert_end: NaiveDateTime,
    pub changeover_minutes: i64,
    pub affected_schedules: Vec<AffectedSchedule>,
    pub resource_checks: Vec<ResourceCheck>,
    pub significant_delay_count: usize,
    pub max_delay_minutes: i64,
    pub impact_level: ImpactLevel,
    pub reasons: Vec<String>,
}

impl ImpactAnalysis {
    /// 需要落库的顺延 (仅延误 > 0)
    pub fn shifts(&self) -> Vec<ScheduleShift> {
        self.affected_schedules
            .iter()
            .filter(|a| a.delay_minutes > 0)
            .map(|a| ScheduleShift {
                schedule_id: a.schedule_id.clone(),
                delay_minutes: a.delay_minutes,
            })
            .collect()
    }

    pub fn resource_failures(&self) -> usize {
        self.resource_checks.iter().filter(|c| !c.passed).count()
    }
}

/// 影响分析输入
#[derive(Debug, Clone)]
pub struct ImpactInput<'a> {
    pub slot: &'a InsertSlot,
    pub profile: &'a LineProfile,
    pub request: &'a InsertRequest,
    /// 窗口开始前该产线最近一次生产的产品
    pub previous_product: Option<&'a str>,
    /// 同产线未终结、结束时间晚于窗口开始的排程
    pub downstream: &'a [LineSchedule],
    /// 与插单区间可能重叠的停机窗口
    pub downtime: &'a [LineDowntime],
    /// 物料可用量 (None = 未登记)
    pub material_available: Option<i64>,
    /// 窗口内空闲工人数
    pub available_workers: usize,
}

// ==========================================
// ImpactAnalyzer - 插单影响分析引擎
// ==========================================
#[derive(Debug, Default)]
pub struct ImpactAnalyzer;

impl ImpactAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// 分析在指定时段插单的影响
    #[instrument(skip(self, input, settings), fields(slot_id = %input.slot.slot_id))]
    pub fn analyze(&self, input: &ImpactInput<'_>, settings: &ImpactSettings) -> ImpactAnalysis {
        let slot = input.slot;
        let product = input.request.product_type_id.as_deref();
        let quantity = input
            .request
            .required_quantity
            .filter(|q| *q > 0)
            .unwrap_or(slot.available_capacity)
            .max(0);
        let rate = positive_rate(input.profile.rate_for(product));

        // 1. 插单占用区间
        let mut downstream: Vec<&LineSchedule> = input
            .downstream
            .iter()
            .filter(|s| !s.status.is_terminal() && s.scheduled_end > slot.window_start)
            .collect();
        downstream.sort_by_key(|s| (s.scheduled_start, s.schedule_id.clone()));

        let changeover_before = match (input.previous_product, product) {
            (Some(prev), Some(p)) if prev != p => settings.changeover_minutes,
            _ => 0,
        };
        let next_product = downstream
            .iter()
            .find(|s| s.scheduled_start >= slot.window_start)
            .map(|s| s.product_type_id.as_str());
        let changeover_after = match (product, next_product) {
            (Some(p), Some(next)) if p != next => settings.changeover_minutes,
            _ => 0,
        };

        let production = hours_to_duration(quantity as f64 / rate);
        let insert_start = slot.window_start;
        let insert_end = insert_start + Duration::minutes(changeover_before) + production;
        let occupied_until = insert_end + Duration::minutes(changeover_after);

        // 2. 连锁反应
        let mut affected = Vec::new();
        let mut cursor = occupied_until;
        for s in downstream {
            let eff_start = s.scheduled_start.max(slot.window_start);
            if cursor <= eff_start {
                break;
            }
            let s_rate = positive_rate(input.profile.rate_for(Some(&s.product_type_id)));
            let need = hours_to_duration(s.remaining_quantity() as f64 / s_rate);
            let window = s.scheduled_end - eff_start;
            let slack = (window - need).max(Duration::zero());
            let push = cursor - eff_start;
            let delay_minutes = ceil_minutes((push - slack).max(Duration::zero()));
            let delay = Duration::minutes(delay_minutes);

            affected.push(AffectedSchedule {
                schedule_id: s.schedule_id.clone(),
                plan_id: s.plan_id.clone(),
                product_type_id: s.product_type_id.clone(),
                original_start: s.scheduled_start,
                original_end: s.scheduled_end,
                new_start: s.scheduled_start + delay,
                new_end: s.scheduled_end + delay,
                delay_minutes,
                urgent: s.urgent_flag,
                significant: delay_minutes > settings.delay_threshold_minutes,
            });

            if delay_minutes == 0 {
                break;
            }
            cursor = s.scheduled_end + delay;
        }

        // 3. 资源校验
        let resource_checks = self.check_resources(input, quantity, insert_start, insert_end);

        // 4. 等级
        let significant_delay_count = affected.iter().filter(|a| a.significant).count();
        let max_delay_minutes = affected.iter().map(|a| a.delay_minutes).max().unwrap_or(0);
        let failures = resource_checks.iter().filter(|c| !c.passed).count();
        let urgent_delayed = affected.iter().any(|a| a.urgent && a.delay_minutes > 0);

        let mut reasons = Vec::new();
        let impact_level = if significant_delay_count >= settings.high_count {
            reasons.push(format!(
                "{} 条排程延误超过 {} 分钟 (≥ {})",
                significant_delay_count, settings.delay_threshold_minutes, settings.high_count
            ));
            ImpactLevel::High
        } else if max_delay_minutes >= settings.high_delay_minutes {
            reasons.push(format!(
                "最大延误 {} 分钟 ≥ {} 分钟",
                max_delay_minutes, settings.high_delay_minutes
            ));
            ImpactLevel::High
        } else if failures >= 2 {
            reasons.push(format!("{} 项资源校验失败", failures));
            ImpactLevel::High
        } else if significant_delay_count > 0 {
            reasons.push(format!(
                "{} 条排程延误超过 {} 分钟",
                significant_delay_count, settings.delay_threshold_minutes
            ));
            ImpactLevel::Medium
        } else if failures == 1 {
            reasons.push("1 项资源校验失败".to_string());
            ImpactLevel::Medium
        } else if urgent_delayed {
            reasons.push("紧急排程出现延误".to_string());
            ImpactLevel::Medium
        } else {
            reasons.push("无显著延误且资源充足".to_string());
            ImpactLevel::Low
        };

        ImpactAnalysis {
            slot_id: slot.slot_id.clone(),
            production_line_id: slot.production_line_id.clone(),
            insert_quantity: quantity,
            insert_start,
            insert_end,
            changeover_minutes: changeover_before + changeover_after,
            affected_schedules: affected,
            resource_checks,
            significant_delay_count,
            max_delay_minutes,
            impact_level,
            reasons,
        }
    }

    fn check_resources(
        &self,
        input: &ImpactInput<'_>,
        quantity: i64,
        insert_start: NaiveDateTime,
        insert_end: NaiveDateTime,
    ) -> Vec<ResourceCheck> {
        let mut checks = Vec::with_capacity(3);

        // 物料
        checks.push(match (input.request.product_type_id.as_deref(), input.material_available) {
            (Some(_), Some(available)) => ResourceCheck {
                resource: ResourceKind::Material,
                passed: available >= quantity,
                required: Some(quantity),
                available: Some(available),
                message: if available >= quantity {
                    "物料充足".to_string()
                } else {
                    format!("物料不足: 需要 {}, 可用 {}", quantity, available)
                },
            },
            _ => ResourceCheck {
                resource: ResourceKind::Material,
                passed: true,
                required: Some(quantity),
                available: None,
                message: "未登记物料库存, 跳过校验".to_string(),
            },
        });

        // 设备
        let line = &input.profile.line;
        let blocking = input
            .downtime
            .iter()
            .find(|d| d.start_time < insert_end && insert_start < d.end_time);
        checks.push(if line.status != LineStatus::Active {
            ResourceCheck {
                resource: ResourceKind::Equipment,
                passed: false,
                required: None,
                available: None,
                message: format!("产线 {} 状态为 {}", line.line_id, line.status),
            }
        } else if let Some(d) = blocking {
            ResourceCheck {
                resource: ResourceKind::Equipment,
                passed: false,
                required: None,
                available: None,
                message: format!("与停机窗口 {} ~ {} 冲突", d.start_time, d.end_time),
            }
        } else {
            ResourceCheck {
                resource: ResourceKind::Equipment,
                passed: true,
                required: None,
                available: None,
                message: "设备可用".to_string(),
            }
        });

        // 人员
        let required = line.required_workers.max(0);
        let available = input.available_workers as i64;
        checks.push(ResourceCheck {
            resource: ResourceKind::Workers,
            passed: available >= required,
            required: Some(required),
            available: Some(available),
            message: if available >= required {
                "人员充足".to_string()
            } else {
                format!("人员不足: 需要 {}, 空闲 {}", required, available)
            },
        });

        checks
    }
}

fn positive_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        MIN_RATE
    }
}

fn hours_to_duration(hours: f64) -> Duration {
    if !hours.is_finite() || hours <= 0.0 {
        return Duration::zero();
    }
    let secs = (hours * 3600.0).round().min(MAX_DURATION_SECS);
    Duration::seconds(secs as i64)
}

fn ceil_minutes(d: Duration) -> i64 {
    let secs = d.num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 59) / 60
    }
}
