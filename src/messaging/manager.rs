//! 消息客户端生命周期管理：initialize / health-check / repair / reset
//!
//! initialize 对并发调用幂等：已有进行中的初始化时，后来者挂接到同一个 Shared future，
//! 不会重复发起签名请求。进行中标记由 future 内部的 guard 释放，失败或被丢弃时同样释放。
//! 所有调用都可通过丢弃 future 取消，并带有超时（超时归类为 TransientNetwork）。

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::watch;

use crate::core::{ClassifiedError, ErrorKind};
use crate::messaging::{ClientIdentity, HealthReport, MessagingClient, SequenceIdStatus};
use crate::wallet::MessageSigner;

/// 初始化子步骤，编排器据此推进 messaging_* 阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingStep {
    Idle,
    DatabaseCheck,
    ClientCreation,
    SyncValidation,
    Ready,
}

type InitFuture = Shared<BoxFuture<'static, Result<ClientIdentity, ClassifiedError>>>;

struct InFlight {
    id: u64,
    future: InitFuture,
}

type InFlightSlot = Arc<Mutex<Option<InFlight>>>;

/// 初始化 future 结束（完成、失败或被丢弃）时释放进行中标记
struct InFlightRelease {
    slot: InFlightSlot,
    id: u64,
}

impl Drop for InFlightRelease {
    fn drop(&mut self) {
        let mut slot = lock(&self.slot);
        if slot.as_ref().map(|f| f.id) == Some(self.id) {
            *slot = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 带超时的能力调用，错误在此归类
async fn call<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, ClassifiedError>
where
    F: Future<Output = Result<T, String>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(raw)) => Err(ClassifiedError::classify(raw)),
        Err(_) => Err(ClassifiedError::new(
            ErrorKind::TransientNetwork,
            format!("{what} timed out after {timeout:?}"),
        )),
    }
}

/// 消息客户端生命周期管理器
pub struct MessagingClientManager {
    client: Arc<dyn MessagingClient>,
    call_timeout: Duration,
    identity: Arc<Mutex<Option<ClientIdentity>>>,
    in_flight: InFlightSlot,
    next_id: AtomicU64,
    step_tx: Arc<watch::Sender<MessagingStep>>,
}

impl MessagingClientManager {
    pub fn new(client: Arc<dyn MessagingClient>, call_timeout: Duration) -> Self {
        let (step_tx, _) = watch::channel(MessagingStep::Idle);
        Self {
            client,
            call_timeout,
            identity: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
            step_tx: Arc::new(step_tx),
        }
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.identity).is_some()
    }

    pub fn identity(&self) -> Option<ClientIdentity> {
        lock(&self.identity).clone()
    }

    pub fn is_initializing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// 最近到达的步骤；失败时停留在失败的步骤上
    pub fn step(&self) -> MessagingStep {
        *self.step_tx.borrow()
    }

    /// 订阅初始化子步骤
    pub fn subscribe_steps(&self) -> watch::Receiver<MessagingStep> {
        self.step_tx.subscribe()
    }

    /// 从未初始化到已初始化；已初始化时直接返回身份，进行中时挂接到同一次初始化
    pub async fn initialize(&self, signer: Arc<dyn MessageSigner>) -> Result<ClientIdentity, ClassifiedError> {
        if let Some(identity) = self.identity() {
            return Ok(identity);
        }

        let future = {
            let mut slot = lock(&self.in_flight);
            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!("Messaging initialization already in progress, attaching");
                    in_flight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let release = InFlightRelease {
                        slot: self.in_flight.clone(),
                        id,
                    };
                    let future = Self::bring_up(
                        self.client.clone(),
                        self.call_timeout,
                        self.identity.clone(),
                        self.step_tx.clone(),
                        signer,
                        release,
                    )
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        future.await
    }

    async fn bring_up(
        client: Arc<dyn MessagingClient>,
        timeout: Duration,
        identity_slot: Arc<Mutex<Option<ClientIdentity>>>,
        step_tx: Arc<watch::Sender<MessagingStep>>,
        signer: Arc<dyn MessageSigner>,
        release: InFlightRelease,
    ) -> Result<ClientIdentity, ClassifiedError> {
        let result: Result<ClientIdentity, ClassifiedError> = async {
            step_tx.send_replace(MessagingStep::DatabaseCheck);
            let diag = call(timeout, "local state check", client.check_local_state_health()).await?;
            if diag.sequence_id == SequenceIdStatus::Corrupted {
                return Err(ClassifiedError::new(
                    ErrorKind::LocalCorruption,
                    "Local sequence ID is corrupted",
                ));
            }
            if !diag.database_ok {
                return Err(ClassifiedError::new(
                    ErrorKind::LocalCorruption,
                    "Local message database is corrupted or inaccessible",
                ));
            }

            step_tx.send_replace(MessagingStep::ClientCreation);
            let identity = call(timeout, "client creation", client.initialize_client(signer.clone())).await?;
            if !identity.address.eq_ignore_ascii_case(signer.address()) {
                return Err(ClassifiedError::new(
                    ErrorKind::LocalCorruption,
                    format!(
                        "Identity mismatch: local client is bound to {}, wallet is {}",
                        identity.address,
                        signer.address()
                    ),
                ));
            }

            step_tx.send_replace(MessagingStep::SyncValidation);
            call(timeout, "state sync", client.sync_state()).await?;
            Ok(identity)
        }
        .await;

        match result {
            Ok(identity) => {
                // 检查与写回在同一把锁内完成，reset / detach 之后不会写回旧身份
                {
                    let slot = lock(&release.slot);
                    if slot.as_ref().map(|f| f.id) != Some(release.id) {
                        tracing::debug!("Discarding superseded messaging initialization");
                        return Err(ClassifiedError::new(
                            ErrorKind::TransientNetwork,
                            "Messaging initialization was cancelled",
                        ));
                    }
                    *lock(&identity_slot) = Some(identity.clone());
                }
                step_tx.send_replace(MessagingStep::Ready);
                tracing::info!("Messaging client initialized (inbox {})", identity.inbox_id);
                Ok(identity)
            }
            Err(e) => {
                // 步骤停留在失败处，调用方据此冻结进度
                tracing::warn!("Messaging initialization failed [{}]: {}", e.kind, e.message);
                Err(e)
            }
        }
    }

    /// 只读健康检查；未初始化时返回 not_applicable 报告
    pub async fn perform_health_check(&self) -> HealthReport {
        if !self.is_initialized() {
            return HealthReport::not_applicable();
        }
        self.check_local_state().await
    }

    async fn check_local_state(&self) -> HealthReport {
        match call(
            self.call_timeout,
            "health check",
            self.client.check_local_state_health(),
        )
        .await
        {
            Ok(diag) => HealthReport::from_diagnostics(diag),
            Err(e) => HealthReport::check_failed(format!("Health check failed: {}", e.message)),
        }
    }

    /// 非破坏性修复序列号；修复后仍损坏则返回 LocalCorruption，调用方应退回 reset
    pub async fn repair_sequence_id(&self) -> Result<HealthReport, ClassifiedError> {
        tracing::info!("Repairing messaging sequence ID");
        call(self.call_timeout, "sequence repair", self.client.repair_local_state()).await?;
        let report = self.check_local_state().await;
        if report.sequence_id_status == SequenceIdStatus::Corrupted {
            return Err(ClassifiedError::new(
                ErrorKind::LocalCorruption,
                "Sequence ID is still corrupted after repair",
            ));
        }
        Ok(report)
    }

    /// 破坏性重置：丢弃本地状态，下次 initialize 冷启动；未初始化时同样安全
    pub async fn reset(&self) -> Result<(), ClassifiedError> {
        tracing::warn!("Resetting messaging local state");
        self.detach();
        call(self.call_timeout, "local state reset", self.client.reset_local_state()).await
    }

    /// 非破坏性脱离：放弃进行中的初始化并标记为未初始化（钱包断开时使用）
    pub fn detach(&self) {
        // 持 in_flight 锁清空身份；出锁后再析构，最后一个 Shared 析构时 InFlightRelease 会再次加锁
        let abandoned = {
            let mut slot = lock(&self.in_flight);
            *lock(&self.identity) = None;
            slot.take()
        };
        drop(abandoned);
        self.step_tx.send_replace(MessagingStep::Idle);
    }

    pub async fn send_message(&self, conversation_id: &str, body: &str) -> Result<(), ClassifiedError> {
        self.require_initialized()?;
        call(
            self.call_timeout,
            "send message",
            self.client.send_message(conversation_id, body),
        )
        .await
    }

    pub async fn list_conversations(&self) -> Result<Vec<String>, ClassifiedError> {
        self.require_initialized()?;
        call(
            self.call_timeout,
            "list conversations",
            self.client.list_conversations(),
        )
        .await
    }

    fn require_initialized(&self) -> Result<(), ClassifiedError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ClassifiedError::new(
                ErrorKind::NotConfigured,
                "Messaging client is not initialized",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RecoveryAction;
    use crate::messaging::{InitOutcome, LocalStateDiagnostics, MockMessagingClient};
    use crate::wallet::MockSigner;

    fn signer() -> Arc<dyn MessageSigner> {
        Arc::new(MockSigner::new("0xAAA"))
    }

    fn manager(client: Arc<MockMessagingClient>) -> Arc<MessagingClientManager> {
        Arc::new(MessagingClientManager::new(client, Duration::from_millis(500)))
    }

    #[tokio::test]
    async fn test_initialize_success() {
        let client = Arc::new(MockMessagingClient::new());
        let manager = manager(client.clone());
        let identity = manager.initialize(signer()).await.unwrap();
        assert_eq!(identity.address, "0xAAA");
        assert!(manager.is_initialized());
        assert_eq!(manager.step(), MessagingStep::Ready);

        // 再次调用不会重新创建客户端
        manager.initialize(signer()).await.unwrap();
        assert_eq!(client.init_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_attaches() {
        let client = Arc::new(MockMessagingClient::new().with_init_delay(Duration::from_millis(50)));
        let manager = manager(client.clone());
        let (a, b, c) = tokio::join!(
            manager.initialize(signer()),
            manager.initialize(signer()),
            manager.initialize(signer()),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(client.init_calls(), 1);
        assert!(!manager.is_initializing());
    }

    #[tokio::test]
    async fn test_concurrent_failure_shared_and_guard_released() {
        let client = Arc::new(MockMessagingClient::new().with_init_delay(Duration::from_millis(30)));
        client.push_init_outcome(InitOutcome::Fail("network timeout".into()));
        let manager = manager(client.clone());
        let (a, b) = tokio::join!(manager.initialize(signer()), manager.initialize(signer()));
        assert_eq!(a.unwrap_err().kind, ErrorKind::TransientNetwork);
        assert_eq!(b.unwrap_err().kind, ErrorKind::TransientNetwork);
        assert_eq!(client.init_calls(), 1);

        // 失败后标记已释放，下一次可以重新初始化
        assert!(!manager.is_initializing());
        manager.initialize(signer()).await.unwrap();
        assert_eq!(client.init_calls(), 2);
    }

    #[tokio::test]
    async fn test_initialize_rejected_signature() {
        let client = Arc::new(MockMessagingClient::new());
        client.push_init_outcome(InitOutcome::Fail("user rejected the request".into()));
        let manager = manager(client);
        let err = manager.initialize(signer()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UserDeclined);
        assert!(!manager.is_initialized());
        assert_eq!(manager.step(), MessagingStep::ClientCreation);
    }

    #[tokio::test]
    async fn test_initialize_corrupted_sequence_id() {
        let client = Arc::new(MockMessagingClient::new());
        client.set_sequence_status(SequenceIdStatus::Corrupted);
        let manager = manager(client.clone());
        let err = manager.initialize(signer()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalCorruption);
        // 损坏时不应请求签名
        assert_eq!(client.init_calls(), 0);
    }

    #[tokio::test]
    async fn test_initialize_timeout_is_transient() {
        let client = Arc::new(MockMessagingClient::new());
        client.push_init_outcome(InitOutcome::Hang);
        let manager = Arc::new(MessagingClientManager::new(client, Duration::from_millis(20)));
        let err = manager.initialize(signer()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientNetwork);
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_dropped_initialize_releases_guard() {
        let client = Arc::new(MockMessagingClient::new());
        client.push_init_outcome(InitOutcome::Hang);
        let manager = manager(client.clone());
        let pending = tokio::time::timeout(Duration::from_millis(20), manager.initialize(signer())).await;
        assert!(pending.is_err());
        manager.detach();
        assert!(!manager.is_initializing());
        assert_eq!(manager.step(), MessagingStep::Idle);
        manager.initialize(signer()).await.unwrap();
        assert_eq!(client.init_calls(), 2);
    }

    #[tokio::test]
    async fn test_detach_discards_initialization_in_progress() {
        let client = Arc::new(MockMessagingClient::new().with_init_delay(Duration::from_millis(50)));
        let manager = manager(client);
        let init = tokio::spawn({
            let manager = manager.clone();
            async move { manager.initialize(signer()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.is_initializing());

        manager.detach();
        assert!(init.await.unwrap().is_err());
        assert!(!manager.is_initialized());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_detach_racing_initialize_never_restores_identity() {
        for _ in 0..200 {
            let client = Arc::new(MockMessagingClient::new());
            let manager = manager(client);
            let init = tokio::spawn({
                let manager = manager.clone();
                async move { manager.initialize(signer()).await }
            });
            while !manager.is_initializing() && !init.is_finished() {
                tokio::task::yield_now().await;
            }
            manager.detach();
            let _ = init.await.unwrap();
            assert!(!manager.is_initialized());
        }
    }

    #[tokio::test]
    async fn test_health_check_not_initialized() {
        let client = Arc::new(MockMessagingClient::new());
        let manager = manager(client.clone());
        let report = manager.perform_health_check().await;
        assert!(!report.applicable);
        assert_eq!(client.health_calls(), 0);
    }

    #[tokio::test]
    async fn test_health_check_read_only() {
        let client = Arc::new(MockMessagingClient::new());
        let manager = manager(client.clone());
        manager.initialize(signer()).await.unwrap();
        client.set_sequence_status(SequenceIdStatus::Corrupted);
        let report = manager.perform_health_check().await;
        assert_eq!(report.recommended_action, RecoveryAction::Reset);
        assert!(manager.is_initialized());
        assert_eq!(client.reset_calls(), 0);
    }

    #[tokio::test]
    async fn test_repair_success_and_failure() {
        let client = Arc::new(MockMessagingClient::new());
        client.set_sequence_status(SequenceIdStatus::Missing);
        let manager = manager(client.clone());
        let report = manager.repair_sequence_id().await.unwrap();
        assert!(report.is_healthy);

        client.set_sequence_status(SequenceIdStatus::Corrupted);
        client.set_repair_fixes(false);
        let err = manager.repair_sequence_id().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::LocalCorruption);
    }

    #[tokio::test]
    async fn test_reset_never_initialized() {
        let client = Arc::new(MockMessagingClient::new());
        client.set_diagnostics(LocalStateDiagnostics {
            sequence_id: SequenceIdStatus::Corrupted,
            database_ok: true,
            last_sync_timestamp: None,
            issues: vec![],
        });
        let manager = manager(client.clone());
        manager.reset().await.unwrap();
        assert_eq!(client.reset_calls(), 1);
        manager.initialize(signer()).await.unwrap();
        assert!(manager.is_initialized());
    }

    #[tokio::test]
    async fn test_send_requires_initialization() {
        let client = Arc::new(MockMessagingClient::new());
        let manager = manager(client.clone());
        let err = manager.send_message("conv-1", "gm").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotConfigured);

        manager.initialize(signer()).await.unwrap();
        manager.send_message("conv-1", "gm").await.unwrap();
        assert_eq!(manager.list_conversations().await.unwrap(), vec!["conv-1".to_string()]);
    }
}
