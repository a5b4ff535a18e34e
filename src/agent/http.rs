//! 通过 HTTP 健康端点探测 Agent：GET {base_url}/api/agent

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::agent::{AgentHealth, AgentProbe};

pub struct HttpAgentProbe {
    client: Client,
    url: String,
}

impl HttpAgentProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/agent", base_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AgentProbe for HttpAgentProbe {
    async fn health(&self) -> Result<AgentHealth, String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("Agent health request timed out: {}", e)
                } else {
                    format!("Network error contacting agent: {}", e)
                }
            })?;
        if !resp.status().is_success() {
            return Err(format!("Agent health endpoint returned HTTP {}", resp.status()));
        }
        resp.json::<AgentHealth>()
            .await
            .map_err(|e| format!("Invalid agent health response: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let probe = HttpAgentProbe::new("http://localhost:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(probe.url(), "http://localhost:3000/api/agent");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        // 端口 9 (discard) 通常无人监听
        let probe = HttpAgentProbe::new("http://127.0.0.1:9", Duration::from_millis(300)).unwrap();
        let err = probe.health().await.unwrap_err();
        let kind = crate::core::ErrorClassifier::classify(&err);
        assert!(kind.is_auto_retryable(), "unexpected classification for {err}");
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        // 接受连接但从不响应
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let probe = HttpAgentProbe::new(&base_url, Duration::from_millis(100)).unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), probe.health())
            .await
            .expect("client timeout was not applied")
            .unwrap_err();
        assert!(err.contains("timed out"), "unexpected error: {err}");
        drop(listener);
    }
}
