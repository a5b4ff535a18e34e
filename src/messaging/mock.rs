//! Mock 消息客户端（用于测试与演示，无需网络）
//!
//! 初始化结果按脚本依次弹出，脚本为空时成功；本地诊断与修复结果可随时调整。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::messaging::{ClientIdentity, LocalStateDiagnostics, MessagingClient, SequenceIdStatus};
use crate::wallet::MessageSigner;

/// 单次 initialize_client 的脚本结果
#[derive(Clone, Debug)]
pub enum InitOutcome {
    /// 请求签名后创建客户端
    Succeed,
    /// 直接返回该原始错误文本
    Fail(String),
    /// 永不返回（用于超时与取消测试）
    Hang,
}

#[derive(Debug)]
pub struct MockMessagingClient {
    script: Mutex<VecDeque<InitOutcome>>,
    init_delay: Duration,
    diagnostics: Mutex<LocalStateDiagnostics>,
    repair_fixes: AtomicBool,
    conversations: Mutex<Vec<String>>,
    init_calls: AtomicUsize,
    health_calls: AtomicUsize,
    repair_calls: AtomicUsize,
    reset_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for MockMessagingClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessagingClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            init_delay: Duration::ZERO,
            diagnostics: Mutex::new(LocalStateDiagnostics::healthy(None)),
            repair_fixes: AtomicBool::new(true),
            conversations: Mutex::new(Vec::new()),
            init_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
            repair_calls: AtomicUsize::new(0),
            reset_calls: AtomicUsize::new(0),
        }
    }

    /// 每次创建客户端前的模拟延迟
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn push_init_outcome(&self, outcome: InitOutcome) {
        lock(&self.script).push_back(outcome);
    }

    pub fn set_diagnostics(&self, diagnostics: LocalStateDiagnostics) {
        *lock(&self.diagnostics) = diagnostics;
    }

    pub fn set_sequence_status(&self, status: SequenceIdStatus) {
        lock(&self.diagnostics).sequence_id = status;
    }

    /// repair_local_state 是否能修好序列号
    pub fn set_repair_fixes(&self, fixes: bool) {
        self.repair_fixes.store(fixes, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn repair_calls(&self) -> usize {
        self.repair_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for MockMessagingClient {
    async fn initialize_client(&self, signer: Arc<dyn MessageSigner>) -> Result<ClientIdentity, String> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        let outcome = lock(&self.script).pop_front().unwrap_or(InitOutcome::Succeed);
        match outcome {
            InitOutcome::Succeed => {
                signer
                    .sign_message(b"Create messaging identity")
                    .await?;
                Ok(ClientIdentity {
                    inbox_id: format!("inbox-{}", signer.address().to_lowercase()),
                    address: signer.address().to_string(),
                })
            }
            InitOutcome::Fail(raw) => Err(raw),
            InitOutcome::Hang => std::future::pending().await,
        }
    }

    async fn send_message(&self, conversation_id: &str, _body: &str) -> Result<(), String> {
        let mut conversations = lock(&self.conversations);
        if !conversations.iter().any(|c| c == conversation_id) {
            conversations.push(conversation_id.to_string());
        }
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<String>, String> {
        Ok(lock(&self.conversations).clone())
    }

    async fn sync_state(&self) -> Result<i64, String> {
        let now = chrono::Utc::now().timestamp_millis();
        lock(&self.diagnostics).last_sync_timestamp = Some(now);
        Ok(now)
    }

    async fn check_local_state_health(&self) -> Result<LocalStateDiagnostics, String> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.diagnostics).clone())
    }

    async fn repair_local_state(&self) -> Result<(), String> {
        self.repair_calls.fetch_add(1, Ordering::SeqCst);
        if self.repair_fixes.load(Ordering::SeqCst) {
            let mut diag = lock(&self.diagnostics);
            diag.sequence_id = SequenceIdStatus::Valid;
            diag.issues.clear();
        }
        Ok(())
    }

    async fn reset_local_state(&self) -> Result<(), String> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.diagnostics) = LocalStateDiagnostics::healthy(None);
        lock(&self.conversations).clear();
        Ok(())
    }
}
