//! 固定结果的 Agent 探测（用于测试与未配置健康端点时的演示）

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{AgentHealth, AgentProbe};

pub struct StaticAgentProbe {
    /// 依次弹出；只剩一个时重复返回
    results: Mutex<VecDeque<Result<AgentHealth, String>>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl StaticAgentProbe {
    pub fn new(result: Result<AgentHealth, String>) -> Self {
        Self {
            results: Mutex::new(VecDeque::from([result])),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn healthy() -> Self {
        Self::new(Ok(AgentHealth::healthy()))
    }

    /// 先依次返回 first，之后保持 then
    pub fn sequence(first: Vec<Result<AgentHealth, String>>, then: Result<AgentHealth, String>) -> Self {
        let mut results: VecDeque<_> = first.into();
        results.push_back(then);
        Self {
            results: Mutex::new(results),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// 每次探测前等待 delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentProbe for StaticAgentProbe {
    async fn health(&self) -> Result<AgentHealth, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut results = self
            .results
            .lock()
            .map_err(|_| "agent probe state poisoned".to_string())?;
        if results.len() > 1 {
            results
                .pop_front()
                .unwrap_or_else(|| Err("agent probe has no result".to_string()))
        } else {
            results
                .front()
                .cloned()
                .unwrap_or_else(|| Err("agent probe has no result".to_string()))
        }
    }
}
