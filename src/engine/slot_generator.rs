// ==========================================
// 工厂生产排程系统 - 插单时段生成引擎
// ==========================================
// 红线: Engine 不拼 SQL, 输入由 API 层查好传入
// ==========================================
// 输入: 产线画像 + 已排程 + 停机窗口 + 既有时段 + [now, horizon_end)
// 输出: 候选时段 (IDLE 空闲区间 / UNDER_COMMITTED 产能未吃满区间)
// 规则:
// - 忙碌区间 = 未终结排程 ∪ 停机窗口 ∪ 未过期时段, 合并后取补集
// - 区间时长 ≥ min_duration_minutes 才生成
// - 产能 = floor(产线速率 × 区间小时)
// - MAINTENANCE 产线不生成
// ==========================================

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::SlotSettings;
use crate::domain::line::{LineDowntime, LineProfile};
use crate::domain::plan::LineSchedule;
use crate::domain::slot::InsertSlot;
use crate::domain::types::{LineStatus, SlotKind, SlotStatus};

/// 候选时段 (尚未落库)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotCandidate {
    pub production_line_id: String,
    pub slot_kind: SlotKind,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub available_capacity: i64,
}

/// 单条产线的生成输入
#[derive(Debug, Clone)]
pub struct LineWindowInput<'a> {
    pub profile: &'a LineProfile,
    pub schedules: &'a [LineSchedule],
    pub downtime: &'a [LineDowntime],
    /// 该产线上状态非 EXPIRED 的既有时段
    pub existing_slots: &'a [InsertSlot],
}

// ==========================================
// InsertSlotGenerator - 插单时段生成引擎
// ==========================================
#[derive(Debug, Default)]
pub struct InsertSlotGenerator;

impl InsertSlotGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 生成单条产线的候选时段
    #[instrument(skip(self, input, settings), fields(line_id = %input.profile.line.line_id))]
    pub fn generate_for_line(
        &self,
        input: &LineWindowInput<'_>,
        settings: &SlotSettings,
        now: NaiveDateTime,
        horizon_end: NaiveDateTime,
    ) -> Vec<SlotCandidate> {
        let line = &input.profile.line;
        if line.status != LineStatus::Active || horizon_end <= now {
            return Vec::new();
        }

        let rate = line.throughput_per_hour;
        let min_duration = Duration::minutes(settings.min_duration_minutes.max(1));
        let mut out = Vec::new();

        // 1. 空闲区间
        let mut busy: Vec<(NaiveDateTime, NaiveDateTime)> = Vec::new();
        busy.extend(
            input
                .schedules
                .iter()
                .filter(|s| !s.status.is_terminal())
                .map(|s| (s.scheduled_start, s.scheduled_end)),
        );
        busy.extend(input.downtime.iter().map(|d| (d.start_time, d.end_time)));
        busy.extend(
            input
                .existing_slots
                .iter()
                .filter(|s| s.status != SlotStatus::Expired && s.slot_kind == SlotKind::Idle)
                .map(|s| (s.window_start, s.window_end)),
        );

        for (start, end) in free_gaps(&busy, now, horizon_end) {
            if end - start >= min_duration {
                out.push(SlotCandidate {
                    production_line_id: line.line_id.clone(),
                    slot_kind: SlotKind::Idle,
                    window_start: start,
                    window_end: end,
                    available_capacity: capacity_for(rate, start, end),
                });
            }
        }

        // 2. 产能未吃满区间
        for s in input.schedules.iter().filter(|s| !s.status.is_terminal()) {
            let start = s.scheduled_start.max(now);
            let end = s.scheduled_end.min(horizon_end);
            if end - start < min_duration {
                continue;
            }
            let already_offered = input.existing_slots.iter().any(|slot| {
                slot.status != SlotStatus::Expired
                    && slot.slot_kind == SlotKind::UnderCommitted
                    && slot.window_start < end
                    && start < slot.window_end
            });
            if already_offered {
                continue;
            }
            let overlaps_downtime = input
                .downtime
                .iter()
                .any(|d| d.start_time < end && start < d.end_time);
            if overlaps_downtime {
                continue;
            }

            let window_capacity = capacity_for(rate, start, end);
            if window_capacity <= 0 {
                continue;
            }
            let committed = s.remaining_quantity();
            let utilization = committed as f64 / window_capacity as f64;
            if utilization < settings.under_commit_ratio {
                let spare = (window_capacity - committed).max(0);
                if spare > 0 {
                    out.push(SlotCandidate {
                        production_line_id: line.line_id.clone(),
                        slot_kind: SlotKind::UnderCommitted,
                        window_start: start,
                        window_end: end,
                        available_capacity: spare,
                    });
                }
            }
        }

        out.sort_by_key(|c| c.window_start);
        out
    }

    /// 找出已与新占用 (排程/停机) 重叠的 AVAILABLE 空闲时段
    pub fn stale_idle_slots(
        &self,
        available: &[InsertSlot],
        schedules: &[LineSchedule],
        downtime: &[LineDowntime],
    ) -> Vec<String> {
        available
            .iter()
            .filter(|slot| slot.status == SlotStatus::Available && slot.slot_kind == SlotKind::Idle)
            .filter(|slot| {
                schedules.iter().any(|s| {
                    !s.status.is_terminal()
                        && s.production_line_id == slot.production_line_id
                        && s.overlaps(slot.window_start, slot.window_end)
                }) || downtime.iter().any(|d| {
                    d.line_id == slot.production_line_id
                        && d.start_time < slot.window_end
                        && slot.window_start < d.end_time
                })
            })
            .map(|slot| slot.slot_id.clone())
            .collect()
    }
}

/// floor(速率 × 小时), 不小于 0
pub fn capacity_for(rate_per_hour: f64, start: NaiveDateTime, end: NaiveDateTime) -> i64 {
    let hours = (end - start).num_seconds() as f64 / 3600.0;
    let cap = (rate_per_hour * hours).floor();
    if cap.is_finite() && cap > 0.0 {
        cap as i64
    } else {
        0
    }
}

/// [from, to) 内忙碌区间的补集
fn free_gaps(
    busy: &[(NaiveDateTime, NaiveDateTime)],
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Vec<(NaiveDateTime, NaiveDateTime)> {
    let mut clipped: Vec<(NaiveDateTime, NaiveDateTime)> = busy
        .iter()
        .map(|(s, e)| ((*s).max(from), (*e).min(to)))
        .filter(|(s, e)| s < e)
        .collect();
    clipped.sort();

    let mut gaps = Vec::new();
    let mut cursor = from;
    for (s, e) in clipped {
        if s > cursor {
            gaps.push((cursor, s));
        }
        if e > cursor {
            cursor = e;
        }
    }
    if cursor < to {
        gaps.push((cursor, to));
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::line::ProductionLine;
    use crate::domain::types::ScheduleStatus;
    use chrono::NaiveDate;

    fn t(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn profile(status: LineStatus) -> LineProfile {
        LineProfile {
            line: ProductionLine {
                line_id: "L1".to_string(),
                factory_id: "F1".to_string(),
                line_name: "一号线".to_string(),
                throughput_per_hour: 100.0,
                required_workers: 2,
                status,
                updated_at: t(0),
            },
            capabilities: vec![],
        }
    }

    fn schedule(id: &str, start: u32, end: u32, planned: i64) -> LineSchedule {
        LineSchedule {
            schedule_id: id.to_string(),
            plan_id: "P1".to_string(),
            factory_id: "F1".to_string(),
            production_line_id: "L1".to_string(),
            product_type_id: "PT-A".to_string(),
            planned_quantity: planned,
            completed_quantity: 0,
            status: ScheduleStatus::Pending,
            scheduled_start: t(start),
            scheduled_end: t(end),
            actual_start: None,
            actual_end: None,
            urgent_flag: false,
            updated_at: t(0),
            revision: 0,
        }
    }

    #[test]
    fn test_idle_gaps_between_schedules() {
        let generator = InsertSlotGenerator::new();
        let schedules = vec![schedule("S1", 8, 10, 200), schedule("S2", 12, 14, 200)];
        let p = profile(LineStatus::Active);
        let input = LineWindowInput {
            profile: &p,
            schedules: &schedules,
            downtime: &[],
            existing_slots: &[],
        };

        let slots = generator.generate_for_line(&input, &SlotSettings::default(), t(6), t(16));
        let idle: Vec<_> = slots.iter().filter(|s| s.slot_kind == SlotKind::Idle).collect();
        assert_eq!(idle.len(), 3);
        assert_eq!((idle[0].window_start, idle[0].window_end), (t(6), t(8)));
        assert_eq!(idle[0].available_capacity, 200);
        assert_eq!((idle[1].window_start, idle[1].window_end), (t(10), t(12)));
        assert_eq!((idle[2].window_start, idle[2].window_end), (t(14), t(16)));
    }

    #[test]
    fn test_short_gaps_and_downtime_are_skipped() {
        let generator = InsertSlotGenerator::new();
        let schedules = vec![schedule("S1", 8, 10, 200)];
        let downtime = vec![LineDowntime {
            downtime_id: "D1".to_string(),
            line_id: "L1".to_string(),
            start_time: t(10),
            end_time: t(15),
            reason: Some("保养".to_string()),
        }];
        let p = profile(LineStatus::Active);
        let input = LineWindowInput {
            profile: &p,
            schedules: &schedules,
            downtime: &downtime,
            existing_slots: &[],
        };
        let settings = SlotSettings {
            min_duration_minutes: 90,
            ..SlotSettings::default()
        };

        // 7-8 只有 60 分钟, 15-16 只有 60 分钟
        let slots = generator.generate_for_line(&input, &settings, t(7), t(16));
        assert!(slots.iter().all(|s| s.slot_kind != SlotKind::Idle));
    }

    #[test]
    fn test_under_committed_schedule_offers_spare_capacity() {
        let generator = InsertSlotGenerator::new();
        // 4 小时窗口产能 400, 仅排 50 → 利用率 0.125 < 0.3
        let schedules = vec![schedule("S1", 8, 12, 50)];
        let p = profile(LineStatus::Active);
        let input = LineWindowInput {
            profile: &p,
            schedules: &schedules,
            downtime: &[],
            existing_slots: &[],
        };

        let slots = generator.generate_for_line(&input, &SlotSettings::default(), t(8), t(12));
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].slot_kind, SlotKind::UnderCommitted);
        assert_eq!(slots[0].available_capacity, 350);
    }

    #[test]
    fn test_existing_slots_are_not_duplicated_and_maintenance_lines_skipped() {
        let generator = InsertSlotGenerator::new();
        let p = profile(LineStatus::Active);
        let existing = vec![InsertSlot {
            slot_id: "X".to_string(),
            factory_id: "F1".to_string(),
            production_line_id: "L1".to_string(),
            slot_kind: SlotKind::Idle,
            window_start: t(6),
            window_end: t(10),
            available_capacity: 400,
            recommendation_score: 0.0,
            status: SlotStatus::Available,
            locked_by: None,
            locked_at: None,
            consumed_by_plan_id: None,
            created_at: t(0),
            updated_at: t(0),
            revision: 0,
        }];
        let input = LineWindowInput {
            profile: &p,
            schedules: &[],
            downtime: &[],
            existing_slots: &existing,
        };
        let slots = generator.generate_for_line(&input, &SlotSettings::default(), t(6), t(12));
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].window_start, t(10));

        let m = profile(LineStatus::Maintenance);
        let input = LineWindowInput {
            profile: &m,
            schedules: &[],
            downtime: &[],
            existing_slots: &[],
        };
        assert!(generator
            .generate_for_line(&input, &SlotSettings::default(), t(6), t(12))
            .is_empty());
    }

    #[test]
    fn test_stale_idle_slots_detected() {
        let generator = InsertSlotGenerator::new();
        let slot = InsertSlot {
            slot_id: "X".to_string(),
            factory_id: "F1".to_string(),
            production_line_id: "L1".to_string(),
            slot_kind: SlotKind::Idle,
            window_start: t(9),
            window_end: t(11),
            available_capacity: 200,
            recommendation_score: 0.0,
            status: SlotStatus::Available,
            locked_by: None,
            locked_at: None,
            consumed_by_plan_id: None,
            created_at: t(0),
            updated_at: t(0),
            revision: 0,
        };
        let schedules = vec![schedule("S1", 10, 12, 100)];
        assert_eq!(generator.stale_idle_slots(&[slot.clone()], &schedules, &[]), vec!["X"]);
        assert!(generator.stale_idle_slots(&[slot], &[], &[]).is_empty());
    }
}
