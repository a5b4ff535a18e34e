//! 连接生命周期编排器：主控状态机
//!
//! 负责：按顺序拉起钱包 / 消息客户端 / Agent，聚合就绪度为单一进度与健康度，
//! 对失败分类后决定是否在预算内自动重试，并把状态快照发布给 UI。
//!
//! 结构与 Agent 主控循环一致：UI -> 编排器走 mpsc 命令通道，编排器 -> UI 走 watch 状态通道，
//! 后台任务结果经内部事件通道回到同一个循环，所有状态只在该循环内修改。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentHealth, AgentProbe, AgentStatus};
use crate::config::AppConfig;
use crate::core::aggregator::{aggregate, Aggregate};
use crate::core::{
    ClassifiedError, ConnectionPhase, ConnectionStatus, Dependency, DependencyReadiness,
    ErrorKind, InitializationState, OrchestratorError, OverallHealth, RecoveryAction,
    RetryBudget, RetryPolicy, ScheduledTask, SessionSupervisor, UserInteractionState,
};
use crate::messaging::{
    ClientIdentity, HealthMonitor, HealthReport, MessagingClientManager, MessagingStep,
};
use crate::wallet::{Wallet, WalletState};

/// 编排器运行参数
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub retry: RetryPolicy,
    /// 进入 ready 后的健康检查间隔
    pub health_check_interval: Duration,
    /// 状态发布防抖；首次进入 ready 不防抖
    pub status_debounce: Duration,
    pub wallet_connect_timeout: Duration,
    pub agent_probe_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            health_check_interval: Duration::from_secs(60),
            status_debounce: Duration::from_millis(120),
            wallet_connect_timeout: Duration::from_secs(30),
            agent_probe_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for OrchestratorConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_auto_retry_attempts: cfg.retry.max_auto_retry_attempts,
                cooldown: Duration::from_secs(cfg.retry.cooldown_secs),
            },
            health_check_interval: Duration::from_secs(cfg.health.interval_secs.max(1)),
            status_debounce: Duration::from_millis(cfg.orchestrator.status_debounce_ms),
            wallet_connect_timeout: Duration::from_secs(cfg.timeouts.wallet_connect_secs),
            agent_probe_timeout: Duration::from_secs(cfg.timeouts.agent_probe_secs),
        }
    }
}

/// 从 UI 发往编排器的命令
#[derive(Debug)]
pub enum Command {
    /// 手动重试，不受冷却与次数限制
    RetryInitialization,
    /// 破坏性重置消息客户端本地状态
    ResetMessagingState(oneshot::Sender<Result<(), OrchestratorError>>),
    /// 非破坏性修复序列号
    RepairMessagingState(oneshot::Sender<Result<HealthReport, OrchestratorError>>),
    PerformHealthCheck(oneshot::Sender<HealthReport>),
    ClearError,
}

/// 后台任务回传的事件，均带尝试编号，过期结果丢弃
#[derive(Debug)]
enum Event {
    MessagingStep {
        attempt: u64,
        step: MessagingStep,
    },
    MessagingFinished {
        attempt: u64,
        step: MessagingStep,
        result: Result<ClientIdentity, ClassifiedError>,
    },
    AgentProbed {
        attempt: u64,
        result: Result<AgentHealth, String>,
    },
    WalletConnectFailed {
        attempt: u64,
        raw: String,
    },
    RetryDue {
        attempt: u64,
    },
    HealthChecked {
        attempt: u64,
        report: HealthReport,
    },
    Publish,
}

/// 已计数、尚未执行的自动重试
#[derive(Debug)]
struct PendingRetry {
    /// 计数前的时间戳，撤销时恢复
    previous_stamp: Option<Instant>,
}

/// UI 持有的句柄：只读状态 + 动作
#[derive(Clone)]
pub struct OrchestratorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown: CancellationToken,
}

impl OrchestratorHandle {
    /// 当前状态快照，无副作用
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn retry_initialization(&self) -> Result<(), OrchestratorError> {
        self.send(Command::RetryInitialization)
    }

    pub async fn reset_messaging_state(&self) -> Result<(), OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ResetMessagingState(tx))?;
        rx.await.map_err(|_| OrchestratorError::Closed)?
    }

    pub async fn repair_messaging_state(&self) -> Result<HealthReport, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RepairMessagingState(tx))?;
        rx.await.map_err(|_| OrchestratorError::Closed)?
    }

    pub async fn perform_health_check(&self) -> Result<HealthReport, OrchestratorError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::PerformHealthCheck(tx))?;
        rx.await.map_err(|_| OrchestratorError::Closed)
    }

    pub fn clear_error(&self) -> Result<(), OrchestratorError> {
        self.send(Command::ClearError)
    }

    /// 停止编排器：取消会话、健康监控与所有定时器
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn send(&self, cmd: Command) -> Result<(), OrchestratorError> {
        self.cmd_tx.send(cmd).map_err(|_| OrchestratorError::Closed)
    }
}

/// 编排器状态机，只在自身的后台循环内被修改
pub struct ConnectionOrchestrator {
    config: OrchestratorConfig,
    wallet: Arc<dyn Wallet>,
    manager: Arc<MessagingClientManager>,
    agent_probe: Arc<dyn AgentProbe>,

    wallet_state: WalletState,
    messaging_step: MessagingStep,
    messaging_in_flight: bool,
    messaging_ready: bool,
    messaging_failure: Option<ClassifiedError>,
    agent_health: Option<AgentHealth>,
    agent_probing: bool,
    agent_failure: Option<ClassifiedError>,
    health_report: Option<HealthReport>,

    init: InitializationState,
    interaction: UserInteractionState,
    error: Option<String>,
    recommended_action: RecoveryAction,
    failed_dependency: Option<Dependency>,
    system_health: OverallHealth,
    ready_published: bool,

    supervisor: SessionSupervisor,
    retry_task: ScheduledTask,
    pending_retry: Option<PendingRetry>,
    publish_task: ScheduledTask,
    monitor: HealthMonitor,

    event_tx: mpsc::UnboundedSender<Event>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionOrchestrator {
    /// 创建编排器并在后台运行，返回 UI 句柄与任务句柄
    pub fn spawn(
        config: OrchestratorConfig,
        wallet: Arc<dyn Wallet>,
        manager: Arc<MessagingClientManager>,
        agent_probe: Arc<dyn AgentProbe>,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let interaction = UserInteractionState::new(&config.retry);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::initial(interaction.clone()));
        let shutdown = CancellationToken::new();
        let wallet_rx = wallet.subscribe();

        let orchestrator = Self {
            monitor: HealthMonitor::new(config.health_check_interval),
            config,
            wallet,
            manager,
            agent_probe,
            wallet_state: WalletState::default(),
            messaging_step: MessagingStep::Idle,
            messaging_in_flight: false,
            messaging_ready: false,
            messaging_failure: None,
            agent_health: None,
            agent_probing: false,
            agent_failure: None,
            health_report: None,
            init: InitializationState::default(),
            interaction,
            error: None,
            recommended_action: RecoveryAction::None,
            failed_dependency: None,
            system_health: OverallHealth::default(),
            ready_published: false,
            supervisor: SessionSupervisor::new(shutdown.clone()),
            retry_task: ScheduledTask::new("auto-retry"),
            pending_retry: None,
            publish_task: ScheduledTask::new("status-publish"),
            event_tx,
            status_tx,
        };

        let handle = OrchestratorHandle {
            cmd_tx,
            status_rx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(orchestrator.run(cmd_rx, event_rx, wallet_rx, shutdown));
        (handle, task)
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut event_rx: mpsc::UnboundedReceiver<Event>,
        mut wallet_rx: watch::Receiver<WalletState>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Connection orchestrator started");
        let initial = wallet_rx.borrow_and_update().clone();
        self.handle_wallet_update(initial);

        let mut wallet_open = true;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break, // 所有句柄已释放
                },
                changed = wallet_rx.changed(), if wallet_open => match changed {
                    Ok(()) => {
                        let state = wallet_rx.borrow_and_update().clone();
                        self.handle_wallet_update(state);
                    }
                    Err(_) => {
                        tracing::warn!("Wallet state channel closed");
                        wallet_open = false;
                    }
                },
                Some(event) = event_rx.recv() => self.handle_event(event),
            }
        }

        self.supervisor.end();
        self.monitor.stop();
        self.retry_task.cancel();
        self.publish_task.cancel();
        tracing::info!("Connection orchestrator stopped");
    }

    // ---------- 钱包 ----------

    fn handle_wallet_update(&mut self, state: WalletState) {
        let previous_error = self.wallet_state.error.clone();
        self.wallet_state = state;

        let connected_address = self
            .wallet_state
            .address
            .clone()
            .filter(|_| self.wallet_state.is_connected);
        if let Some(current) = self.supervisor.address() {
            let same = connected_address
                .as_deref()
                .map(|a| a.eq_ignore_ascii_case(current))
                .unwrap_or(false);
            if !same {
                let reason = if connected_address.is_some() {
                    "wallet account changed"
                } else {
                    "wallet disconnected"
                };
                self.teardown(reason);
            }
        }

        if let Some(error) = self.wallet_state.error.clone() {
            if previous_error.as_deref() != Some(error.as_str()) {
                self.fail(Dependency::Wallet, ClassifiedError::classify(error));
            }
        } else if self.wallet_state.is_ready() {
            if !self.supervisor.is_active() {
                self.start_session();
            } else if self.init.phase() == ConnectionPhase::WalletConnecting
                || (self.init.phase() == ConnectionPhase::Failed
                    && self.failed_dependency == Some(Dependency::Wallet))
            {
                self.begin_attempt();
            }
        }
        self.refresh();
    }

    fn start_session(&mut self) {
        let Some(address) = self.wallet_state.address.clone() else {
            return;
        };
        let id = self.supervisor.start(&address);
        tracing::info!(
            "Session {} started for {} (chain {:?})",
            id,
            address,
            self.wallet_state.chain_id
        );
        self.clear_session_state();
        self.begin_attempt();
    }

    /// 钱包断开或切换账户：丢弃进行中的工作，所有状态回到初始值
    fn teardown(&mut self, reason: &str) {
        tracing::info!(
            "Session {} ended: {}",
            self.supervisor.session_id().unwrap_or("-"),
            reason
        );
        self.supervisor.end();
        self.manager.detach();
        self.clear_session_state();
    }

    fn clear_session_state(&mut self) {
        self.monitor.stop();
        self.cancel_auto_retry();
        self.messaging_step = MessagingStep::Idle;
        self.messaging_in_flight = false;
        self.messaging_ready = self.manager.is_initialized();
        self.messaging_failure = None;
        self.agent_health = None;
        self.agent_probing = false;
        self.agent_failure = None;
        self.health_report = None;
        self.init.reset();
        self.interaction = UserInteractionState::new(&self.config.retry);
        self.error = None;
        self.recommended_action = RecoveryAction::None;
        self.failed_dependency = None;
        self.ready_published = false;
    }

    // ---------- 尝试 ----------

    /// 开始新一次尝试：钱包未就绪则回到 wallet_connecting，否则从 messaging_starting 开始
    fn begin_attempt(&mut self) {
        self.cancel_auto_retry();
        self.monitor.stop();
        let (attempt, token) = self.supervisor.next_attempt();
        self.ready_published = false;
        self.failed_dependency = None;
        self.messaging_failure = None;
        self.agent_failure = None;
        self.messaging_in_flight = false;
        self.agent_probing = false;
        if self
            .agent_health
            .as_ref()
            .map(|h| h.status == AgentStatus::Error)
            .unwrap_or(false)
        {
            self.agent_health = None;
        }

        if !self.wallet_state.is_ready() {
            tracing::info!("Attempt {}: waiting for wallet", attempt);
            self.init.begin_attempt(ConnectionPhase::WalletConnecting);
            if !self.wallet_state.is_connecting {
                self.spawn_wallet_connect(attempt, token);
            }
            return;
        }

        tracing::info!("Attempt {}: starting dependencies", attempt);
        self.init.begin_attempt(ConnectionPhase::MessagingStarting);
        self.messaging_ready = self.manager.is_initialized();
        if !self.messaging_ready {
            self.messaging_step = MessagingStep::Idle;
            self.spawn_messaging_init(attempt, token.clone());
        }
        if self.agent_health.is_none() {
            self.spawn_agent_probe(attempt, token);
        }
    }

    fn spawn_wallet_connect(&self, attempt: u64, token: CancellationToken) {
        let wallet = self.wallet.clone();
        let events = self.event_tx.clone();
        let timeout = self.config.wallet_connect_timeout;
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                r = tokio::time::timeout(timeout, wallet.connect()) => r,
            };
            let raw = match result {
                Ok(Ok(())) => return,
                Ok(Err(raw)) => raw,
                Err(_) => format!("Wallet connection timed out after {timeout:?}"),
            };
            let _ = events.send(Event::WalletConnectFailed { attempt, raw });
        });
    }

    fn spawn_messaging_init(&mut self, attempt: u64, token: CancellationToken) {
        let Some(signer) = self.wallet_state.signer.clone() else {
            return;
        };
        self.messaging_in_flight = true;
        let manager = self.manager.clone();
        let events = self.event_tx.clone();
        tokio::spawn(async move {
            let mut steps = manager.subscribe_steps();
            let init = manager.initialize(signer);
            tokio::pin!(init);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        tracing::debug!("Attempt {}: messaging initialization abandoned", attempt);
                        return;
                    }
                    Ok(()) = steps.changed() => {
                        let step = *steps.borrow_and_update();
                        let _ = events.send(Event::MessagingStep { attempt, step });
                    }
                    result = &mut init => {
                        let step = *steps.borrow();
                        let _ = events.send(Event::MessagingFinished { attempt, step, result });
                        return;
                    }
                }
            }
        });
    }

    fn spawn_agent_probe(&mut self, attempt: u64, token: CancellationToken) {
        self.agent_probing = true;
        let probe = self.agent_probe.clone();
        let events = self.event_tx.clone();
        let timeout = self.config.agent_probe_timeout;
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                r = tokio::time::timeout(timeout, probe.health()) => match r {
                    Ok(r) => r,
                    Err(_) => Err(format!("Agent health probe timed out after {timeout:?}")),
                },
            };
            let _ = events.send(Event::AgentProbed { attempt, result });
        });
    }

    // ---------- 事件 ----------

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Publish => self.publish(),
            Event::MessagingStep { attempt, step } => {
                if self.supervisor.is_current(attempt) {
                    self.messaging_step = step;
                    self.refresh();
                }
            }
            Event::MessagingFinished {
                attempt,
                step,
                result,
            } => {
                if !self.supervisor.is_current(attempt) {
                    tracing::debug!("Discarding stale messaging result from attempt {}", attempt);
                    return;
                }
                self.messaging_in_flight = false;
                self.messaging_step = step;
                match result {
                    Ok(_) => {
                        self.messaging_ready = true;
                        self.refresh();
                    }
                    Err(e) => {
                        // 先按失败步骤推进进度，再冻结
                        self.refresh();
                        self.messaging_failure = Some(e.clone());
                        self.fail(Dependency::Messaging, e);
                        self.refresh();
                    }
                }
            }
            Event::AgentProbed { attempt, result } => {
                if !self.supervisor.is_current(attempt) {
                    return;
                }
                self.agent_probing = false;
                self.handle_agent_result(result);
                self.refresh();
            }
            Event::WalletConnectFailed { attempt, raw } => {
                if self.supervisor.is_current(attempt) {
                    self.fail(Dependency::Wallet, ClassifiedError::classify(raw));
                    self.refresh();
                }
            }
            Event::RetryDue { attempt } => {
                // 已被撤销的重试不再执行
                if self.supervisor.is_current(attempt)
                    && self.init.phase() == ConnectionPhase::Failed
                    && self.pending_retry.take().is_some()
                {
                    tracing::info!(
                        "Automatic retry {}/{}",
                        self.interaction.auto_retry_attempts,
                        self.interaction.max_auto_retry_attempts
                    );
                    self.begin_attempt();
                    self.refresh();
                }
            }
            Event::HealthChecked { attempt, report } => {
                if self.supervisor.is_current(attempt) && self.init.phase() == ConnectionPhase::Ready {
                    self.apply_health_report(report);
                    self.refresh();
                }
            }
        }
    }

    fn handle_agent_result(&mut self, result: Result<AgentHealth, String>) {
        let failure = match result {
            Ok(health) if health.status != AgentStatus::Error => {
                if health.status == AgentStatus::ConfigurationNeeded {
                    tracing::warn!("Agent needs configuration; continuing degraded");
                }
                self.agent_health = Some(health);
                return;
            }
            Ok(health) => ClassifiedError::classify(
                health
                    .message
                    .unwrap_or_else(|| "Agent reported an error".to_string()),
            ),
            Err(raw) => ClassifiedError::classify(raw),
        };

        if failure.kind == ErrorKind::NotConfigured {
            // 未配置只降级 Agent，不阻塞其他依赖
            tracing::warn!("Agent not configured: {}", failure.message);
            self.agent_health = Some(AgentHealth {
                status: AgentStatus::ConfigurationNeeded,
                message: Some(failure.message),
            });
            return;
        }
        self.agent_failure = Some(failure.clone());
        self.fail(Dependency::Agent, failure);
    }

    fn apply_health_report(&mut self, report: HealthReport) {
        if !report.applicable {
            return;
        }
        self.recommended_action = report.recommended_action;
        self.health_report = Some(report);
    }

    // ---------- 失败与重试 ----------

    fn fail(&mut self, dependency: Dependency, err: ClassifiedError) {
        if self.init.phase() == ConnectionPhase::Ready {
            // 离开 ready 视为新一次尝试的基线，保证进度 100 只对应 ready
            self.init.begin_attempt(ConnectionPhase::MessagingStarting);
            let agg = self.aggregate();
            let phase = self.target_phase();
            self.init
                .advance(phase, agg.progress, agg.current_operation, agg.issues);
        }
        self.monitor.stop();
        self.failed_dependency = Some(dependency);
        let issue = format!("{}: {}", dependency_label(dependency), err.message);
        let now = Instant::now();
        let awaiting_signature =
            self.interaction.has_rejected_signature && !self.interaction.manual_retry_requested;

        match err.kind {
            ErrorKind::UserDeclined if dependency == Dependency::Messaging => {
                tracing::info!("Signature request declined; waiting for user");
                if let Some(pending) = self.pending_retry.take() {
                    // 被拒绝取消的重试不占用预算
                    self.retry_task.cancel();
                    self.interaction.revoke_auto_retry(pending.previous_stamp);
                }
                self.interaction.record_rejection(now);
                self.error = None;
                self.init
                    .fail("Waiting for signature approval. Retry when ready.", None);
            }
            ErrorKind::LocalCorruption => {
                tracing::warn!("Local state corrupted ({}): {}", dependency.as_str(), err.message);
                self.error = Some(err.message);
                self.recommended_action = RecoveryAction::Reset;
                self.init.fail(
                    "Local messaging state is corrupted. Repair or reset required.",
                    Some(issue),
                );
            }
            _ if awaiting_signature => {
                // 等待用户处理签名：只记录问题，保留提示
                tracing::warn!(
                    "{} failed while waiting for signature approval: {}",
                    dependency.as_str(),
                    err.message
                );
                let operation = self.init.current_operation().to_string();
                self.init.fail(operation, Some(issue));
            }
            kind if kind.is_auto_retryable() => {
                if kind == ErrorKind::Unknown {
                    tracing::warn!(kind = "unknown", "Unclassified {} failure: {}", dependency.as_str(), err.message);
                } else {
                    tracing::warn!("Transient {} failure: {}", dependency.as_str(), err.message);
                }
                self.error = Some(err.message);
                if self.pending_retry.is_some() {
                    let operation = self.init.current_operation().to_string();
                    self.init.fail(operation, Some(issue));
                } else if RetryBudget::may_auto_retry(&self.interaction, &self.config.retry, now) {
                    self.schedule_auto_retry(now);
                    self.init.fail(
                        format!("Retrying automatically in {:?}", self.config.retry.cooldown),
                        Some(issue),
                    );
                } else {
                    tracing::warn!("Automatic retry budget exhausted; manual retry required");
                    self.init
                        .fail("Automatic retries exhausted. Retry manually.", Some(issue));
                }
            }
            _ => {
                tracing::warn!("{} failed [{}]: {}", dependency.as_str(), err.kind, err.message);
                self.error = Some(err.message);
                self.init.fail(
                    format!("{} unavailable. Retry manually.", dependency_label(dependency)),
                    Some(issue),
                );
            }
        }
    }

    /// 先计数、打时间戳，冷却期后再发起
    fn schedule_auto_retry(&mut self, now: Instant) {
        self.pending_retry = Some(PendingRetry {
            previous_stamp: self.interaction.last_auto_retry_time,
        });
        self.interaction.record_auto_retry(now);
        let attempt = self.supervisor.current_attempt();
        let events = self.event_tx.clone();
        tracing::info!(
            "Scheduling automatic retry {}/{} in {:?}",
            self.interaction.auto_retry_attempts,
            self.interaction.max_auto_retry_attempts,
            self.config.retry.cooldown
        );
        self.retry_task.schedule(self.config.retry.cooldown, async move {
            let _ = events.send(Event::RetryDue { attempt });
        });
    }

    fn cancel_auto_retry(&mut self) {
        self.retry_task.cancel();
        self.pending_retry = None;
    }

    // ---------- 命令 ----------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::RetryInitialization => {
                tracing::info!("Manual retry requested");
                self.interaction.request_manual_retry();
                self.error = None;
                self.recommended_action = RecoveryAction::None;
                self.begin_attempt();
                self.refresh();
            }
            Command::ResetMessagingState(reply) => {
                let result = self.reset_messaging().await;
                let _ = reply.send(result);
            }
            Command::RepairMessagingState(reply) => {
                let result = self.repair_messaging().await;
                let _ = reply.send(result);
            }
            Command::PerformHealthCheck(reply) => {
                let report = self.manager.perform_health_check().await;
                self.apply_health_report(report.clone());
                self.refresh();
                let _ = reply.send(report);
            }
            Command::ClearError => {
                self.error = None;
                self.schedule_publish();
            }
        }
    }

    async fn reset_messaging(&mut self) -> Result<(), OrchestratorError> {
        // 先放弃进行中的初始化，避免其结果在重置后写回
        self.supervisor.cancel_attempt();
        self.monitor.stop();
        self.cancel_auto_retry();
        let result = self.manager.reset().await;

        self.messaging_ready = false;
        self.messaging_in_flight = false;
        self.messaging_step = MessagingStep::Idle;
        self.messaging_failure = None;
        self.health_report = None;
        self.recommended_action = RecoveryAction::None;
        self.interaction.request_manual_retry();

        match result {
            Ok(()) => {
                self.error = None;
                if self.supervisor.is_active() {
                    self.begin_attempt();
                } else {
                    self.init.reset();
                }
                self.refresh();
                Ok(())
            }
            Err(e) => {
                self.fail(Dependency::Messaging, e.clone());
                self.refresh();
                Err(OrchestratorError::Messaging(e))
            }
        }
    }

    async fn repair_messaging(&mut self) -> Result<HealthReport, OrchestratorError> {
        match self.manager.repair_sequence_id().await {
            Ok(report) => {
                tracing::info!("Messaging repair succeeded");
                self.recommended_action = report.recommended_action;
                self.health_report = Some(report.clone());
                let corrupted = self
                    .messaging_failure
                    .as_ref()
                    .map(|e| e.kind == ErrorKind::LocalCorruption)
                    .unwrap_or(false);
                if self.init.phase() == ConnectionPhase::Failed && corrupted {
                    self.error = None;
                    self.begin_attempt();
                }
                self.refresh();
                Ok(report)
            }
            Err(e) => {
                // 只给出建议，破坏性重置必须由用户显式触发
                tracing::warn!("Messaging repair failed: {}", e.message);
                self.recommended_action = RecoveryAction::Reset;
                self.error = Some(format!("Repair failed: {}", e.message));
                self.refresh();
                Err(OrchestratorError::RepairFailed(e))
            }
        }
    }

    // ---------- 聚合与发布 ----------

    fn wallet_readiness(&self) -> DependencyReadiness {
        self.wallet_state.readiness()
    }

    fn messaging_readiness(&self) -> DependencyReadiness {
        if self.messaging_ready {
            return DependencyReadiness::ready();
        }
        if let Some(e) = &self.messaging_failure {
            return DependencyReadiness::failed(e.message.clone());
        }
        match self.messaging_step {
            MessagingStep::Idle if self.messaging_in_flight => DependencyReadiness::initializing(15),
            MessagingStep::Idle => DependencyReadiness::pending(),
            MessagingStep::DatabaseCheck => DependencyReadiness::initializing(30),
            MessagingStep::ClientCreation => DependencyReadiness::initializing(50),
            MessagingStep::SyncValidation | MessagingStep::Ready => {
                DependencyReadiness::initializing(75)
            }
        }
    }

    fn agent_readiness(&self) -> DependencyReadiness {
        if let Some(health) = &self.agent_health {
            health.readiness()
        } else if let Some(e) = &self.agent_failure {
            DependencyReadiness::failed(e.message.clone())
        } else if self.agent_probing {
            DependencyReadiness::initializing(50)
        } else {
            DependencyReadiness::pending()
        }
    }

    fn aggregate(&self) -> Aggregate {
        aggregate(
            &self.wallet_readiness(),
            &self.messaging_readiness(),
            &self.agent_readiness(),
            self.health_report.as_ref(),
        )
    }

    /// 当前依赖状态对应的阶段；InitializationState 只允许向前推进
    fn target_phase(&self) -> ConnectionPhase {
        if !self.wallet_state.is_ready() {
            if self.wallet_state.is_connecting || self.supervisor.is_active() {
                ConnectionPhase::WalletConnecting
            } else {
                ConnectionPhase::Idle
            }
        } else if self.messaging_ready {
            ConnectionPhase::MessagingSyncValidation
        } else {
            match self.messaging_step {
                MessagingStep::Idle => ConnectionPhase::MessagingStarting,
                MessagingStep::DatabaseCheck => ConnectionPhase::MessagingDatabaseCheck,
                MessagingStep::ClientCreation => ConnectionPhase::MessagingClientCreation,
                MessagingStep::SyncValidation | MessagingStep::Ready => {
                    ConnectionPhase::MessagingSyncValidation
                }
            }
        }
    }

    /// 重新聚合；非终态时推进阶段，全部就绪时进入 ready
    fn refresh(&mut self) {
        let agg = self.aggregate();
        self.system_health = agg.health;

        match self.init.phase() {
            ConnectionPhase::Ready => self.init.set_issues(agg.issues),
            ConnectionPhase::Failed => {}
            _ => {
                if agg.all_ready && self.supervisor.is_active() {
                    self.enter_ready();
                    return;
                }
                let phase = self.target_phase();
                let operation = phase_label(phase).unwrap_or(agg.current_operation);
                self.init.advance(phase, agg.progress, operation, agg.issues);
            }
        }
        self.schedule_publish();
    }

    fn enter_ready(&mut self) {
        self.init.complete();
        self.interaction.mark_ready();
        self.error = None;
        self.failed_dependency = None;
        if self.recommended_action == RecoveryAction::Reset && self.health_report.is_none() {
            self.recommended_action = RecoveryAction::None;
        }
        tracing::info!(
            "All dependencies ready (session {})",
            self.supervisor.session_id().unwrap_or("-")
        );

        let attempt = self.supervisor.current_attempt();
        let events = self.event_tx.clone();
        self.monitor.start(self.manager.clone(), move |report| {
            let _ = events.send(Event::HealthChecked { attempt, report });
        });

        if self.ready_published {
            self.schedule_publish();
        } else {
            // 首次 ready 立即发布，不防抖
            self.ready_published = true;
            self.publish_task.cancel();
            self.publish();
        }
    }

    fn schedule_publish(&mut self) {
        if self.config.status_debounce.is_zero() {
            self.publish();
            return;
        }
        let events = self.event_tx.clone();
        self.publish_task.schedule(self.config.status_debounce, async move {
            let _ = events.send(Event::Publish);
        });
    }

    fn publish(&mut self) {
        let status = ConnectionStatus {
            is_ready: self.init.phase() == ConnectionPhase::Ready,
            progress: self.init.progress(),
            current_step: self.init.current_operation().to_string(),
            error: self.error.clone(),
            system_health: self.system_health,
            phase: self.init.phase(),
            issues: self.init.issues().to_vec(),
            recommended_action: self.recommended_action,
            health_report: self.health_report.clone(),
            user_interaction: self.interaction.clone(),
            session_id: self.supervisor.session_id().map(str::to_string),
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        tracing::debug!(
            "Publishing status: phase={} progress={} step={}",
            status.phase.as_str(),
            status.progress,
            status.current_step
        );
        self.status_tx.send_replace(status);
    }
}

fn dependency_label(dependency: Dependency) -> &'static str {
    match dependency {
        Dependency::Wallet => "Wallet",
        Dependency::Messaging => "Messaging",
        Dependency::Agent => "Agent",
    }
}

fn phase_label(phase: ConnectionPhase) -> Option<&'static str> {
    match phase {
        ConnectionPhase::WalletConnecting => Some("Connecting wallet"),
        ConnectionPhase::MessagingStarting => Some("Starting secure messaging"),
        ConnectionPhase::MessagingDatabaseCheck => Some("Checking local message database"),
        ConnectionPhase::MessagingClientCreation => {
            Some("Creating messaging client (approve the signature request)")
        }
        ConnectionPhase::MessagingSyncValidation => Some("Validating message sync"),
        _ => None,
    }
}
