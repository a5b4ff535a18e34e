//! EchoFi - 连接编排演示
//!
//! 入口：加载配置、初始化日志，用 Mock 钱包与消息客户端拉起编排器，
//! 打印状态变化直到 Ctrl+C。可选参数：配置文件路径。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use echofi::agent::{AgentProbe, HttpAgentProbe, StaticAgentProbe};
use echofi::config::load_config;
use echofi::core::shutdown::{run_with_graceful_shutdown, stop_orchestrator};
use echofi::core::{ConnectionOrchestrator, OrchestratorConfig, ShutdownManager};
use echofi::messaging::{MessagingClientManager, MockMessagingClient};
use echofi::wallet::MockWallet;

const DEMO_ADDRESS: &str = "0x5aD1c2E5f4b9A0e3C7d8B6a1F2e4D3c5B7a9E0f1";
const DEMO_CHAIN_ID: u64 = 84532;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = load_config(std::env::args().nth(1).map(PathBuf::from))
        .context("Failed to load configuration")?;
    echofi::observability::init();

    let wallet = Arc::new(MockWallet::new().with_account(DEMO_ADDRESS, DEMO_CHAIN_ID));
    let client = Arc::new(MockMessagingClient::new().with_init_delay(Duration::from_millis(500)));
    let manager = Arc::new(MessagingClientManager::new(
        client,
        Duration::from_secs(cfg.timeouts.messaging_call_secs),
    ));
    let agent: Arc<dyn AgentProbe> = match &cfg.agent.base_url {
        Some(base_url) => {
            tracing::info!("Probing agent at {}", base_url);
            Arc::new(
                HttpAgentProbe::new(base_url, Duration::from_secs(cfg.timeouts.agent_probe_secs))
                    .context("Failed to build agent HTTP client")?,
            )
        }
        None => Arc::new(StaticAgentProbe::healthy()),
    };

    let (handle, task) = ConnectionOrchestrator::spawn(
        OrchestratorConfig::from(&cfg),
        wallet,
        manager.clone(),
        agent,
    );

    // 空闲时重试即发起钱包连接
    handle
        .retry_initialization()
        .context("Orchestrator is not running")?;

    let mut status_rx = handle.subscribe();
    let app = async move {
        let mut greeted = false;
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            tracing::info!(
                "[{}] {}% {} (health: {:?})",
                status.phase.as_str(),
                status.progress,
                status.current_step,
                status.system_health.overall
            );
            if let Some(error) = &status.error {
                tracing::warn!("Error: {}", error);
            }
            if status.is_ready && !greeted {
                greeted = true;
                let services = status.system_health.services();
                tracing::info!("Services healthy: {:?}, degraded: {:?}", services.healthy, services.degraded);
                if let Err(e) = manager.send_message("echofi-agent", "gm").await {
                    tracing::warn!("Demo message failed: {}", e);
                }
            }
        }
    };

    let shutdown = Arc::new(ShutdownManager::new());
    let stop_handle = handle.clone();
    run_with_graceful_shutdown(shutdown, app, move || async move {
        stop_orchestrator(&stop_handle, task, Duration::from_secs(5)).await;
    })
    .await;

    Ok(())
}
