use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::warn;

/// 以最大并发数 `max_parallels` 执行一组 future，结果顺序与输入顺序一致
pub async fn do_parallel_with_limit<F, T>(futures: Vec<F>, max_parallels: usize) -> Vec<T>
where
    F: Future<Output = T>,
{
    let semaphore = Arc::new(Semaphore::new(max_parallels.max(1)));

    let guarded = futures.into_iter().map(|fut| {
        let semaphore = semaphore.clone();
        async move {
            // 信号量不会被关闭，acquire 失败时直接放行
            let _permit = semaphore.acquire_owned().await.ok();
            fut.await
        }
    });

    join_all(guarded).await
}

/// 容错的并发扇出执行器
///
/// 每个任务的失败（`Err` 或 panic）都被转换成 `on_failure(index, reason)` 的占位结果，
/// 不会中断整个批次。返回的结果与输入一一对应。
#[derive(Debug, Clone, Copy)]
pub struct FanOutExecutor {
    max_parallels: usize,
}

impl FanOutExecutor {
    pub fn new(max_parallels: usize) -> Self {
        Self {
            max_parallels: max_parallels.max(1),
        }
    }

    pub fn max_parallels(&self) -> usize {
        self.max_parallels
    }

    pub async fn run<F, T, E>(&self, units: Vec<F>, on_failure: E) -> Vec<T>
    where
        F: Future<Output = anyhow::Result<T>>,
        E: Fn(usize, String) -> T,
    {
        let caught = units
            .into_iter()
            .map(|unit| AssertUnwindSafe(unit).catch_unwind())
            .collect::<Vec<_>>();

        do_parallel_with_limit(caught, self.max_parallels)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                Ok(Ok(value)) => value,
                Ok(Err(err)) => {
                    warn!(index, error = %err, "⚠️ 并发任务失败，使用占位结果");
                    on_failure(index, err.to_string())
                }
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    warn!(index, reason = %reason, "⚠️ 并发任务异常退出，使用占位结果");
                    on_failure(index, reason)
                }
            })
            .collect()
    }
}

pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let futures = (0..8u64)
            .map(|i| async move {
                // 越靠前的任务越晚完成
                tokio::time::sleep(Duration::from_millis(40 - i * 5)).await;
                i
            })
            .collect::<Vec<_>>();

        let results = do_parallel_with_limit(futures, 3).await;
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let futures = (0..10)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect::<Vec<_>>();

        do_parallel_with_limit(futures, 3).await;
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_fan_out_failed_slots_get_placeholders() {
        let failing = [1usize, 4];
        let units = (0..6usize)
            .map(|i| async move {
                if failing.contains(&i) {
                    Err(anyhow::anyhow!("unit {} failed", i))
                } else {
                    Ok(format!("ok-{}", i))
                }
            })
            .collect::<Vec<_>>();

        let results = FanOutExecutor::new(2)
            .run(units, |i, _| format!("placeholder-{}", i))
            .await;

        assert_eq!(
            results,
            vec!["ok-0", "placeholder-1", "ok-2", "ok-3", "placeholder-4", "ok-5"]
        );
    }

    #[tokio::test]
    async fn test_fan_out_survives_panicking_unit() {
        let units: Vec<std::pin::Pin<Box<dyn Future<Output = anyhow::Result<u32>> + Send>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async {
                let missing: Option<u32> = None;
                Ok(missing.expect("boom"))
            }),
            Box::pin(async { Ok(3) }),
        ];

        let results = FanOutExecutor::new(4).run(units, |_, _| 0).await;
        assert_eq!(results, vec![1, 0, 3]);
    }
}
