//! 配置管理模块
//! 支持从环境变量和 TOML 配置文件加载配置

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub deposit: DepositConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    /// 每条链的端点与托管地址，键为链标识 (eth/bsc/polygon/sol/btc)
    #[serde(default)]
    pub chains: HashMap<String, ChainEndpointConfig>,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

/// 单条链的端点与托管配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEndpointConfig {
    /// JSON-RPC 端点 (EVM / Solana)
    pub rpc_url: String,
    /// 浏览器式 REST 端点 (Bitcoin)
    #[serde(default)]
    pub explorer_url: Option<String>,
    /// 平台托管（归集目标）地址
    pub custody_address: String,
}

/// 充值入账策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositConfig {
    /// 入账折价系数（<1，吸收价格滑点），默认 0.95
    pub credit_buffer: Decimal,
    /// 申报金额与发现金额的告警阈值，默认 1%
    pub mismatch_tolerance: Decimal,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            credit_buffer: Decimal::new(95, 2),     // 0.95
            mismatch_tolerance: Decimal::new(1, 2), // 0.01
        }
    }
}

/// 归集策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub auto_sweep_enabled: bool,
    /// 低于该金额（整币单位）不触发归集
    pub minimum_sweep_amount: Decimal,
    /// 入账完成到发起归集的延迟（秒）
    pub sweep_delay_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            auto_sweep_enabled: true,
            minimum_sweep_amount: Decimal::new(1, 3), // 0.001
            sweep_delay_secs: 0,
        }
    }
}

/// 钱包开通任务的重试策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub max_attempts: u32,
    /// 各次尝试之间的退避间隔（秒），不足时复用最后一项
    pub backoff_secs: Vec<u64>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: vec![30, 120, 300],
        }
    }
}

impl Config {
    /// 从环境变量（可选叠加 TOML 文件）加载配置
    ///
    /// 文件提供基础值，DATABASE_URL / BIND_ADDR / RUST_LOG 等环境变量覆盖
    pub fn from_env_and_file(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) if Path::new(p).exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file: {}", p))?;
                toml::from_str::<Config>(&raw)
                    .with_context(|| format!("Failed to parse config file: {}", p))?
            }
            _ => Self::default_config(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }

        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/vaultcore".to_string(),
                max_connections: 20,
                min_connections: 2,
                acquire_timeout_secs: 10,
            },
            server: ServerConfig {
                bind_addr: "0.0.0.0:8080".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
            deposit: DepositConfig::default(),
            sweep: SweepConfig::default(),
            provisioning: ProvisioningConfig::default(),
            chains: HashMap::new(),
        }
    }

    /// 启动时验证配置完整性
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("database.url must not be empty");
        }
        if self.deposit.credit_buffer <= Decimal::ZERO || self.deposit.credit_buffer > Decimal::ONE
        {
            anyhow::bail!("deposit.credit_buffer must be in (0, 1]");
        }
        if self.provisioning.max_attempts == 0 {
            anyhow::bail!("provisioning.max_attempts must be >= 1");
        }
        for (chain, endpoint) in &self.chains {
            if endpoint.rpc_url.is_empty() && endpoint.explorer_url.is_none() {
                anyhow::bail!("chain {} has neither rpc_url nor explorer_url", chain);
            }
            if endpoint.custody_address.is_empty() {
                anyhow::bail!("chain {} missing custody_address", chain);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.deposit.credit_buffer, Decimal::new(95, 2));
        assert_eq!(config.provisioning.backoff_secs, vec![30, 120, 300]);
    }

    #[test]
    fn test_invalid_buffer_rejected() {
        let mut config = Config::default_config();
        config.deposit.credit_buffer = Decimal::new(15, 1); // 1.5
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_parse() {
        let raw = r#"
            [database]
            url = "postgres://localhost/test"
            max_connections = 5
            min_connections = 1
            acquire_timeout_secs = 5

            [server]
            bind_addr = "127.0.0.1:9000"

            [logging]
            level = "debug"
            format = "json"

            [chains.eth]
            rpc_url = "https://example.invalid/rpc"
            custody_address = "0x0000000000000000000000000000000000000001"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert!(config.chains.contains_key("eth"));
        // 未配置段落落默认值
        assert_eq!(config.provisioning.max_attempts, 3);
    }
}
