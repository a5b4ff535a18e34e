//! 可取消的延迟任务：schedule / cancel / replace
//!
//! 防抖发布、自动重试定时器与健康检查循环都通过 ScheduledTask 调度。
//! 再次 schedule 会先取消旧任务，保证同一槽位最多只有一个挂起的定时器；Drop 时自动取消。

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 单槽位的可取消任务
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    current: Option<(CancellationToken, JoinHandle<()>)>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self { name, current: None }
    }

    /// 延迟 delay 后执行 task；替换槽位中已有的任务
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    task.await;
                } => {}
            }
        });
        self.current = Some((token, handle));
    }

    /// 取消挂起或运行中的任务；槽位为空时无操作
    pub fn cancel(&mut self) {
        if let Some((token, _handle)) = self.current.take() {
            tracing::debug!("Cancelled scheduled task '{}'", self.name);
            token.cancel();
        }
    }

    /// 是否有尚未结束的任务
    pub fn is_pending(&self) -> bool {
        self.current
            .as_ref()
            .map(|(token, handle)| !token.is_cancelled() && !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_scheduled_task_runs_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut slot = ScheduledTask::new("test");
        let c = count.clone();
        slot.schedule(Duration::from_millis(10), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.is_pending());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!slot.is_pending());
    }

    #[tokio::test]
    async fn test_replace_cancels_previous() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut slot = ScheduledTask::new("debounce");
        for _ in 0..5 {
            let c = count.clone();
            slot.schedule(Duration::from_millis(30), async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_and_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut slot = ScheduledTask::new("retry");
        let c = count.clone();
        slot.schedule(Duration::from_millis(20), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        slot.cancel();
        assert!(!slot.is_pending());

        let c = count.clone();
        let mut dropped = ScheduledTask::new("dropped");
        dropped.schedule(Duration::from_millis(20), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(dropped);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
