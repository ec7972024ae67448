// ==========================================
// 工厂生产排程系统 - 插单时段定时清扫
// ==========================================
// 职责: 按固定间隔对每个已登记产线的工厂执行
//       过期 / 超时锁回收 / 失效 / 补充生成
// 幂等: 重复执行不会产生重复时段
// ==========================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::api::{ApiResult, GenerateSlotsResult, UrgentInsertApi};

/// 清扫配置
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// 清扫间隔
    pub interval: Duration,
    /// 补充生成的前瞻小时数
    pub horizon_hours: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            horizon_hours: crate::api::urgent_insert_api::DEFAULT_HORIZON_HOURS,
        }
    }
}

// ==========================================
// SlotSweeper - 定时清扫
// ==========================================
pub struct SlotSweeper {
    api: Arc<UrgentInsertApi>,
    config: SweeperConfig,
    done: Arc<AtomicBool>,
}

impl SlotSweeper {
    pub fn new(api: Arc<UrgentInsertApi>, config: SweeperConfig) -> Self {
        Self {
            api,
            config,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 启动清扫任务
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            loop {
                interval.tick().await;

                if self.done.load(Ordering::Relaxed) {
                    tracing::debug!("SlotSweeper: 停止");
                    break;
                }

                self.sweep_all().await;
            }
        })
    }

    /// 对所有工厂执行一次清扫 (工厂间并发)
    ///
    /// # 返回
    /// - 成功清扫的工厂数
    pub async fn sweep_all(&self) -> usize {
        let api = self.api.clone();
        let factories = match tokio::task::spawn_blocking(move || api.factory_ids()).await {
            Ok(Ok(ids)) => ids,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "SlotSweeper: 读取工厂列表失败");
                return 0;
            }
            Err(e) => {
                tracing::error!(error = %e, "SlotSweeper: 任务异常退出");
                return 0;
            }
        };

        let horizon = self.config.horizon_hours;
        let tasks = factories.into_iter().map(|factory_id| {
            let api = self.api.clone();
            tokio::task::spawn_blocking(move || {
                let result: ApiResult<GenerateSlotsResult> = api.sweep(&factory_id, horizon);
                (factory_id, result)
            })
        });

        let mut swept = 0;
        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok((_, Ok(_))) => swept += 1,
                Ok((factory_id, Err(e))) => {
                    tracing::warn!(factory_id = %factory_id, error = %e, "SlotSweeper: 清扫失败");
                }
                Err(e) => tracing::error!(error = %e, "SlotSweeper: 任务异常退出"),
            }
        }
        swept
    }

    /// 停止清扫 (在下一次触发时退出)
    pub fn shutdown(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }
}
