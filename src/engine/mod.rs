// ==========================================
// 工厂生产排程系统 - 引擎层
// ==========================================
// 职责: 完成概率估算 / 插单时段生成与评分 / 插单影响分析
// 红线: Engine 不拼 SQL, 所有结论必须输出 reason
// ==========================================

pub mod impact;
pub mod probability;
pub mod slot_generator;
pub mod slot_scorer;

// 重导出核心引擎
pub use impact::{
    AffectedSchedule, ImpactAnalysis, ImpactAnalyzer, ImpactInput, ResourceCheck, ResourceKind,
};
pub use probability::{CompletionProbability, CompletionProbabilityEstimator, ProbabilityInput};
pub use slot_generator::{capacity_for, InsertSlotGenerator, LineWindowInput, SlotCandidate};
pub use slot_scorer::{InsertRequest, ScoreBreakdown, ScoredSlot, ScoringCandidate, SlotScorer};
