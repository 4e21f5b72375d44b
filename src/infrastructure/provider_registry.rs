//! 链提供方注册表
//!
//! 进程启动时由配置构建一次的 chain → 端点映射，按句柄传给
//! 所有需要链上访问的组件，不使用进程级全局状态。
//! 所有出站调用都带显式超时。

use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::ChainEndpointConfig;

const RPC_TIMEOUT_SECS: u64 = 10;

/// 单条链的端点
#[derive(Debug, Clone)]
pub struct ChainEndpoints {
    /// JSON-RPC 端点 (EVM / Solana)
    pub rpc_url: String,
    /// 浏览器式 REST 端点 (Bitcoin, Blockstream 风格)
    pub explorer_url: Option<String>,
}

/// 链提供方注册表
pub struct ChainProviderRegistry {
    endpoints: HashMap<String, ChainEndpoints>,
    http_client: reqwest::Client,
}

impl ChainProviderRegistry {
    /// 由配置构建注册表
    pub fn new(chain_configs: &HashMap<String, ChainEndpointConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let endpoints = chain_configs
            .iter()
            .map(|(chain, cfg)| {
                (
                    chain.to_lowercase(),
                    ChainEndpoints {
                        rpc_url: cfg.rpc_url.clone(),
                        explorer_url: cfg.explorer_url.clone(),
                    },
                )
            })
            .collect();

        Self {
            endpoints,
            http_client: client,
        }
    }

    /// 获取链端点
    pub fn endpoints(&self, chain: &str) -> Result<&ChainEndpoints> {
        self.endpoints
            .get(&chain.to_lowercase())
            .with_context(|| format!("No RPC endpoint configured for chain: {}", chain))
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// JSON-RPC 调用
    ///
    /// 上游错误（HTTP 非 2xx、JSON-RPC error 字段）作为可重试的
    /// 瞬态错误向上传播，永远不会被当作"余额为零"之类的确定结果。
    pub async fn rpc_call(&self, chain: &str, method: &str, params: Value) -> Result<Value> {
        let endpoint = self.endpoints(chain)?;

        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        let response = self
            .http_client
            .post(&endpoint.rpc_url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .send()
            .await
            .with_context(|| format!("Failed to send RPC request: {}", method))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("RPC request {} failed with status {}", method, status);
        }

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        if let Some(error) = json.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown RPC error");
            let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
            anyhow::bail!("RPC error {}: {}", code, message);
        }

        json.get("result")
            .cloned()
            .with_context(|| format!("Missing result field in {} response", method))
    }

    /// 浏览器式 REST GET（返回原始 JSON）
    pub async fn explorer_get(&self, chain: &str, path: &str) -> Result<Value> {
        let endpoint = self.endpoints(chain)?;
        let base = endpoint
            .explorer_url
            .as_deref()
            .with_context(|| format!("No explorer endpoint configured for chain: {}", chain))?;

        let url = format!("{}{}", base.trim_end_matches('/'), path);

        let response = self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .send()
            .await
            .with_context(|| format!("Failed to call explorer endpoint: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Explorer request failed with status {}: {}", status, url);
        }

        response
            .json()
            .await
            .context("Failed to parse explorer response")
    }

    /// 浏览器式 REST GET（返回纯文本，如 Blockstream 的广播接口）
    pub async fn explorer_post_text(&self, chain: &str, path: &str, body: String) -> Result<String> {
        let endpoint = self.endpoints(chain)?;
        let base = endpoint
            .explorer_url
            .as_deref()
            .with_context(|| format!("No explorer endpoint configured for chain: {}", chain))?;

        let url = format!("{}{}", base.trim_end_matches('/'), path);

        let response = self
            .http_client
            .post(&url)
            .body(body)
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .send()
            .await
            .with_context(|| format!("Failed to call explorer endpoint: {}", url))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read explorer response body")?;

        if !status.is_success() {
            anyhow::bail!("Explorer broadcast failed with status {}: {}", status, text);
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut configs = HashMap::new();
        configs.insert(
            "eth".to_string(),
            ChainEndpointConfig {
                rpc_url: "https://example.invalid/rpc".to_string(),
                explorer_url: None,
                custody_address: "0x0000000000000000000000000000000000000001".to_string(),
            },
        );

        let registry = ChainProviderRegistry::new(&configs);
        assert!(registry.endpoints("ETH").is_ok());
        assert!(registry.endpoints("btc").is_err());
    }
}
