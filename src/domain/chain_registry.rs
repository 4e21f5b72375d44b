//! 多链配置模块
//!
//! 定义所有支持的链及其家族、精度、最小充值门槛与派生路径模板。
//! 表在进程启动时构建一次，之后只读。

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 链家族（交易/地址模型分类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    /// 账户模型 EVM 链 (Ethereum, BSC, Polygon)
    Evm,
    /// Solana (无状态但有序，ed25519)
    Solana,
    /// UTXO 模型 (Bitcoin)
    Bitcoin,
}

/// 提现费用模型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeePolicy {
    /// 平台固定费（以链原生币计）
    pub platform_fee: Decimal,
    /// EVM: 默认 gas price (wei)；Bitcoin: sats/vB；Solana: lamports 固定费
    pub default_fee_rate: u64,
}

/// 链描述符
///
/// 不可变，进程启动时由 [`ChainRegistry`] 加载。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDescriptor {
    /// 链标识 (eth, bsc, polygon, sol, btc)
    pub chain_key: String,
    /// 链家族
    pub family: ChainFamily,
    /// 链名称
    pub name: String,
    /// 原生币符号
    pub symbol: String,
    /// 原生币精度
    pub decimals: u32,
    /// 最小充值门槛（低于此值的余额增量不触发入账）
    pub minimum_deposit: Decimal,
    /// 派生路径模板，`{index}` 为地址索引占位符
    pub derivation_path_template: String,
    /// 充值轮询间隔（秒），出块快的链间隔短
    pub poll_interval_secs: u64,
    /// 提现费用模型
    pub fee_policy: FeePolicy,
    /// EIP-155 chain id（仅 EVM 链）
    pub evm_chain_id: Option<u64>,
}

impl ChainDescriptor {
    /// 按索引渲染派生路径
    pub fn derivation_path(&self, index: u32) -> String {
        self.derivation_path_template
            .replace("{index}", &index.to_string())
    }
}

/// 链配置注册表
pub struct ChainRegistry {
    descriptors: HashMap<String, ChainDescriptor>,
}

impl ChainRegistry {
    /// 创建预配置的注册表
    pub fn new() -> Self {
        let mut registry = Self {
            descriptors: HashMap::new(),
        };
        registry.register_default_chains();
        registry
    }

    fn register_default_chains(&mut self) {
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // EVM 系列（共享派生与余额查询实现）
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        self.register(ChainDescriptor {
            chain_key: "eth".to_string(),
            family: ChainFamily::Evm,
            name: "Ethereum".to_string(),
            symbol: "ETH".to_string(),
            decimals: 18,
            minimum_deposit: Decimal::new(1, 2), // 0.01 ETH
            derivation_path_template: "m/44'/60'/0'/0/{index}".to_string(),
            poll_interval_secs: 60,
            fee_policy: FeePolicy {
                platform_fee: Decimal::new(5, 4), // 0.0005 ETH
                default_fee_rate: 20_000_000_000, // 20 Gwei
            },
            evm_chain_id: Some(1),
        });

        self.register(ChainDescriptor {
            chain_key: "bsc".to_string(),
            family: ChainFamily::Evm,
            name: "BNB Smart Chain".to_string(),
            symbol: "BNB".to_string(),
            decimals: 18,
            minimum_deposit: Decimal::new(1, 2), // 0.01 BNB
            // BSC 与 ETH 共用派生路径
            derivation_path_template: "m/44'/60'/0'/0/{index}".to_string(),
            poll_interval_secs: 30,
            fee_policy: FeePolicy {
                platform_fee: Decimal::new(1, 3), // 0.001 BNB
                default_fee_rate: 3_000_000_000,  // 3 Gwei
            },
            evm_chain_id: Some(56),
        });

        self.register(ChainDescriptor {
            chain_key: "polygon".to_string(),
            family: ChainFamily::Evm,
            name: "Polygon".to_string(),
            symbol: "MATIC".to_string(),
            decimals: 18,
            minimum_deposit: Decimal::new(1, 1), // 0.1 MATIC
            derivation_path_template: "m/44'/60'/0'/0/{index}".to_string(),
            poll_interval_secs: 30,
            fee_policy: FeePolicy {
                platform_fee: Decimal::new(1, 2),  // 0.01 MATIC
                default_fee_rate: 50_000_000_000, // 50 Gwei
            },
            evm_chain_id: Some(137),
        });

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // Solana (ed25519, SLIP-0010 硬化派生)
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        self.register(ChainDescriptor {
            chain_key: "sol".to_string(),
            family: ChainFamily::Solana,
            name: "Solana".to_string(),
            symbol: "SOL".to_string(),
            decimals: 9,
            minimum_deposit: Decimal::new(1, 2), // 0.01 SOL
            derivation_path_template: "m/44'/501'/{index}'/0'".to_string(),
            poll_interval_secs: 30,
            fee_policy: FeePolicy {
                platform_fee: Decimal::new(1, 3), // 0.001 SOL
                default_fee_rate: 5_000,          // lamports，固定基础费
            },
            evm_chain_id: None,
        });

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // Bitcoin (UTXO, BIP84 native segwit)
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

        self.register(ChainDescriptor {
            chain_key: "btc".to_string(),
            family: ChainFamily::Bitcoin,
            name: "Bitcoin".to_string(),
            symbol: "BTC".to_string(),
            decimals: 8,
            minimum_deposit: Decimal::new(1, 4), // 0.0001 BTC
            derivation_path_template: "m/84'/0'/0'/0/{index}".to_string(),
            poll_interval_secs: 300,
            fee_policy: FeePolicy {
                platform_fee: Decimal::new(5, 5), // 0.00005 BTC
                default_fee_rate: 20,             // sats/vB
            },
            evm_chain_id: None,
        });
    }

    /// 注册链描述符
    pub fn register(&mut self, descriptor: ChainDescriptor) {
        self.descriptors
            .insert(descriptor.chain_key.to_lowercase(), descriptor);
    }

    /// 通过链标识获取描述符
    pub fn get(&self, chain_key: &str) -> Option<&ChainDescriptor> {
        self.descriptors.get(&chain_key.to_lowercase())
    }

    /// 按家族获取所有链
    pub fn get_by_family(&self, family: ChainFamily) -> Vec<&ChainDescriptor> {
        self.descriptors
            .values()
            .filter(|d| d.family == family)
            .collect()
    }

    /// 列出所有支持的链
    pub fn list_all(&self) -> Vec<&ChainDescriptor> {
        self.descriptors.values().collect()
    }

    /// 验证注册表完整性（启动时调用）
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (key, d) in &self.descriptors {
            if d.name.is_empty() || d.symbol.is_empty() {
                errors.push(format!("Chain {} has empty name or symbol", key));
            }
            if !d.derivation_path_template.contains("{index}") {
                errors.push(format!(
                    "Chain {} derivation_path_template missing {{index}} placeholder",
                    key
                ));
            }
            if d.minimum_deposit <= Decimal::ZERO {
                errors.push(format!("Chain {} has non-positive minimum_deposit", key));
            }
            if d.poll_interval_secs == 0 {
                errors.push(format!("Chain {} has zero poll interval", key));
            }
            if d.family == ChainFamily::Evm && d.evm_chain_id.is_none() {
                errors.push(format!("EVM chain {} missing evm_chain_id", key));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_registry_lookup() {
        let registry = ChainRegistry::new();

        let eth = registry.get("eth").unwrap();
        assert_eq!(eth.family, ChainFamily::Evm);
        assert_eq!(eth.evm_chain_id, Some(1));

        let sol = registry.get("SOL").unwrap();
        assert_eq!(sol.family, ChainFamily::Solana);
        assert_eq!(sol.decimals, 9);

        let btc = registry.get("btc").unwrap();
        assert_eq!(btc.derivation_path(7), "m/84'/0'/0'/0/7");
    }

    #[test]
    fn test_registry_validates() {
        let registry = ChainRegistry::new();
        assert!(registry.validate().is_ok());
    }

    #[test]
    fn test_unsupported_chain() {
        let registry = ChainRegistry::new();
        assert!(registry.get("doge").is_none());
    }

    #[test]
    fn test_family_grouping() {
        let registry = ChainRegistry::new();
        assert_eq!(registry.get_by_family(ChainFamily::Evm).len(), 3);
        assert_eq!(registry.get_by_family(ChainFamily::Bitcoin).len(), 1);
    }
}
