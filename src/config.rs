//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ECHOFI__*` 覆盖（双下划线表示嵌套，如 `ECHOFI__RETRY__COOLDOWN_SECS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub agent: AgentSection,
}

/// [orchestrator] 段
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// 状态发布防抖（毫秒）
    #[serde(default = "default_status_debounce_ms")]
    pub status_debounce_ms: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            status_debounce_ms: default_status_debounce_ms(),
        }
    }
}

fn default_status_debounce_ms() -> u64 {
    120
}

/// [retry] 段：自动重试次数上限与冷却
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_auto_retry_attempts")]
    pub max_auto_retry_attempts: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_auto_retry_attempts: default_max_auto_retry_attempts(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_max_auto_retry_attempts() -> u32 {
    2
}

fn default_cooldown_secs() -> u64 {
    30
}

/// [health] 段
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
        }
    }
}

fn default_health_interval_secs() -> u64 {
    60
}

/// [timeouts] 段：各依赖的调用超时（秒）
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_wallet_connect_secs")]
    pub wallet_connect_secs: u64,
    #[serde(default = "default_messaging_call_secs")]
    pub messaging_call_secs: u64,
    #[serde(default = "default_agent_probe_secs")]
    pub agent_probe_secs: u64,
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            wallet_connect_secs: default_wallet_connect_secs(),
            messaging_call_secs: default_messaging_call_secs(),
            agent_probe_secs: default_agent_probe_secs(),
        }
    }
}

fn default_wallet_connect_secs() -> u64 {
    30
}

fn default_messaging_call_secs() -> u64 {
    20
}

fn default_agent_probe_secs() -> u64 {
    10
}

/// [agent] 段：未设置 base_url 时不探测 HTTP 端点
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentSection {
    pub base_url: Option<String>,
}

/// 从 config 目录加载配置，环境变量 ECHOFI__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ECHOFI__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ECHOFI")
            .separator("__")
            .try_parsing(true),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    if cfg.health.interval_secs == 0 {
        return Err(config::ConfigError::Message(
            "health.interval_secs must be greater than zero".to_string(),
        ));
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.status_debounce_ms, 120);
        assert_eq!(cfg.retry.max_auto_retry_attempts, 2);
        assert_eq!(cfg.retry.cooldown_secs, 30);
        assert_eq!(cfg.health.interval_secs, 60);
        assert_eq!(cfg.timeouts.messaging_call_secs, 20);
        assert!(cfg.agent.base_url.is_none());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echofi.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[retry]\ncooldown_secs = 5\n\n[agent]\nbase_url = \"http://127.0.0.1:3000\""
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.retry.cooldown_secs, 5);
        assert_eq!(cfg.retry.max_auto_retry_attempts, 2);
        assert_eq!(cfg.agent.base_url.as_deref(), Some("http://127.0.0.1:3000"));
    }

    #[test]
    fn test_zero_health_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echofi.toml");
        std::fs::write(&path, "[health]\ninterval_secs = 0\n").unwrap();

        let err = load_config(Some(path)).unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = load_config(Some(PathBuf::from("/nonexistent/echofi.toml"))).unwrap();
        assert_eq!(cfg.timeouts.agent_probe_secs, 10);
    }
}
