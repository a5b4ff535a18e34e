//! 自动执行 Agent 的就绪度探测
//!
//! Agent 的推理与执行逻辑不在本 crate 内；这里只消费其健康端点。

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::DependencyReadiness;

pub use http::HttpAgentProbe;
pub use mock::StaticAgentProbe;

/// 健康端点返回的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Healthy,
    ConfigurationNeeded,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub status: AgentStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl AgentHealth {
    pub fn healthy() -> Self {
        Self {
            status: AgentStatus::Healthy,
            message: None,
        }
    }

    /// 未配置只降级，不阻塞其他依赖
    pub fn readiness(&self) -> DependencyReadiness {
        let message = self.message.clone();
        match self.status {
            AgentStatus::Healthy => DependencyReadiness::ready(),
            AgentStatus::ConfigurationNeeded => DependencyReadiness::ready_degraded(
                message.unwrap_or_else(|| "Agent configuration needed".to_string()),
            ),
            AgentStatus::Error => DependencyReadiness::failed(
                message.unwrap_or_else(|| "Agent reported an error".to_string()),
            ),
        }
    }
}

/// Agent 健康探测能力
#[async_trait]
pub trait AgentProbe: Send + Sync {
    async fn health(&self) -> Result<AgentHealth, String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ComponentHealth;

    #[test]
    fn test_parse_agent_health() {
        let body = r#"{"status":"configuration_needed","message":"Missing API key","services":{},"timestamp":"x"}"#;
        let health: AgentHealth = serde_json::from_str(body).unwrap();
        assert_eq!(health.status, AgentStatus::ConfigurationNeeded);
        assert_eq!(health.message.as_deref(), Some("Missing API key"));
    }

    #[test]
    fn test_agent_readiness_mapping() {
        assert!(AgentHealth::healthy().readiness().is_ready());

        let degraded = AgentHealth {
            status: AgentStatus::ConfigurationNeeded,
            message: None,
        }
        .readiness();
        assert!(degraded.is_ready());
        assert_eq!(degraded.health(), ComponentHealth::Degraded);

        let failed = AgentHealth {
            status: AgentStatus::Error,
            message: Some("boom".into()),
        }
        .readiness();
        assert!(!failed.is_ready());
        assert_eq!(failed.detail(), Some("boom"));
    }
}
