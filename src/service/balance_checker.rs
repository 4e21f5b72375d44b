// 链上余额查询
//
// 充值监控与交易执行器共用的只读链访问层。所有结果统一换算为
// 整币单位的 Decimal；上游错误向上传播，绝不折算成零余额。

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde_json::json;

use crate::{
    domain::{ChainFamily, ChainRegistry},
    infrastructure::provider_registry::ChainProviderRegistry,
};

/// Decimal 可承载的最大小数位数
pub const MAX_TOKEN_DECIMALS: u32 = 28;

/// 最小单位 → 整币单位
///
/// 超出 Decimal 96 位尾数或精度上限的输入返回错误，绝不 panic：
/// 代币合约返回的余额是不可信输入。
pub fn units_to_decimal(raw: u128, decimals: u32) -> Result<Decimal> {
    if decimals > MAX_TOKEN_DECIMALS {
        anyhow::bail!("Decimals {} exceeds supported maximum {}", decimals, MAX_TOKEN_DECIMALS);
    }
    let value: i128 = raw
        .try_into()
        .context("Balance exceeds representable range")?;
    let decimal = Decimal::try_from_i128_with_scale(value, decimals)
        .context("Balance exceeds representable range")?;
    Ok(decimal.normalize())
}

/// 整币单位 → 最小单位（向下取整）
pub fn decimal_to_units(amount: Decimal, decimals: u32) -> Result<u128> {
    let scaled = amount
        .checked_mul(Decimal::from(10u64.pow(decimals)))
        .context("Amount overflow during unit conversion")?;
    let truncated = scaled.trunc();
    if truncated < Decimal::ZERO {
        anyhow::bail!("Amount must be non-negative");
    }
    truncated
        .to_string()
        .parse::<u128>()
        .context("Failed to convert amount to base units")
}

fn parse_hex_quantity(value: &serde_json::Value) -> Result<u128> {
    let raw = value
        .as_str()
        .context("Expected hex quantity string")?
        .trim_start_matches("0x");
    if raw.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(raw, 16).context("Invalid hex quantity")
}

pub struct BalanceChecker {
    providers: Arc<ChainProviderRegistry>,
    registry: Arc<ChainRegistry>,
}

impl BalanceChecker {
    pub fn new(providers: Arc<ChainProviderRegistry>, registry: Arc<ChainRegistry>) -> Self {
        Self { providers, registry }
    }

    /// 查询地址的已确认原生币余额（整币单位）
    pub async fn confirmed_balance(&self, chain: &str, address: &str) -> Result<Decimal> {
        let descriptor = self
            .registry
            .get(chain)
            .with_context(|| format!("Unsupported chain: {}", chain))?;

        match descriptor.family {
            ChainFamily::Evm => self.evm_balance(chain, address, descriptor.decimals).await,
            ChainFamily::Solana => self.solana_balance(chain, address).await,
            ChainFamily::Bitcoin => self.bitcoin_balance(chain, address).await,
        }
    }

    /// 查询地址的代币余额（EVM ERC-20 / Solana SPL）
    pub async fn token_balance(
        &self,
        chain: &str,
        address: &str,
        token: &str,
        token_decimals: u32,
    ) -> Result<Decimal> {
        let descriptor = self
            .registry
            .get(chain)
            .with_context(|| format!("Unsupported chain: {}", chain))?;

        match descriptor.family {
            ChainFamily::Evm => {
                self.erc20_balance(chain, address, token, token_decimals)
                    .await
            }
            ChainFamily::Solana => self.spl_balance(chain, address, token).await,
            ChainFamily::Bitcoin => {
                anyhow::bail!("Token balances are not supported on Bitcoin")
            }
        }
    }

    async fn evm_balance(&self, chain: &str, address: &str, decimals: u32) -> Result<Decimal> {
        let result = self
            .providers
            .rpc_call(chain, "eth_getBalance", json!([address, "latest"]))
            .await?;

        let wei = parse_hex_quantity(&result)?;
        units_to_decimal(wei, decimals)
    }

    async fn erc20_balance(
        &self,
        chain: &str,
        address: &str,
        token: &str,
        token_decimals: u32,
    ) -> Result<Decimal> {
        // balanceOf(address) selector + 左填充到 32 字节的地址
        let call_data = format!(
            "0x70a08231000000000000000000000000{}",
            address.trim_start_matches("0x").to_lowercase()
        );

        let result = self
            .providers
            .rpc_call(
                chain,
                "eth_call",
                json!([{"to": token, "data": call_data}, "latest"]),
            )
            .await?;

        let raw = parse_hex_quantity(&result)?;
        units_to_decimal(raw, token_decimals)
    }

    async fn solana_balance(&self, chain: &str, address: &str) -> Result<Decimal> {
        let result = self
            .providers
            .rpc_call(
                chain,
                "getBalance",
                json!([address, {"commitment": "finalized"}]),
            )
            .await?;

        let lamports = result
            .get("value")
            .and_then(|v| v.as_u64())
            .context("Missing value in getBalance response")?;

        units_to_decimal(lamports as u128, 9)
    }

    async fn spl_balance(&self, chain: &str, address: &str, mint: &str) -> Result<Decimal> {
        let result = self
            .providers
            .rpc_call(
                chain,
                "getTokenAccountsByOwner",
                json!([
                    address,
                    {"mint": mint},
                    {"encoding": "jsonParsed", "commitment": "finalized"}
                ]),
            )
            .await?;

        let accounts = result
            .get("value")
            .and_then(|v| v.as_array())
            .context("Missing value in getTokenAccountsByOwner response")?;

        // 同一 mint 可能拆在多个 token account，取合计
        let mut total = Decimal::ZERO;
        for account in accounts {
            let amount = account
                .pointer("/account/data/parsed/info/tokenAmount/uiAmountString")
                .and_then(|v| v.as_str())
                .context("Missing tokenAmount in SPL account")?;
            let parsed: Decimal = amount.parse().context("Invalid SPL token amount")?;
            total += parsed;
        }

        Ok(total)
    }

    async fn bitcoin_balance(&self, chain: &str, address: &str) -> Result<Decimal> {
        let info = self
            .providers
            .explorer_get(chain, &format!("/address/{}", address))
            .await?;

        let funded = info
            .pointer("/chain_stats/funded_txo_sum")
            .and_then(|v| v.as_u64())
            .context("Missing chain_stats.funded_txo_sum")?;
        let spent = info
            .pointer("/chain_stats/spent_txo_sum")
            .and_then(|v| v.as_u64())
            .context("Missing chain_stats.spent_txo_sum")?;

        let sats = funded
            .checked_sub(spent)
            .context("Explorer reported spent > funded")?;

        units_to_decimal(sats as u128, 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_to_decimal() {
        // 1 ETH
        let one_eth = units_to_decimal(1_000_000_000_000_000_000u128, 18).unwrap();
        assert_eq!(one_eth, Decimal::ONE);

        // 0.5 SOL
        let half_sol = units_to_decimal(500_000_000u128, 9).unwrap();
        assert_eq!(half_sol, Decimal::new(5, 1));

        // 1234 sats
        let sats = units_to_decimal(1234u128, 8).unwrap();
        assert_eq!(sats, Decimal::new(1234, 8));
    }

    #[test]
    fn test_units_to_decimal_rejects_out_of_range() {
        // 超出 Decimal 96 位尾数的恶意 balanceOf 返回值
        assert!(units_to_decimal(100_000_000_000_000_000_000_000_000_000_000u128, 18).is_err());
        // 精度超过 Decimal 上限
        assert!(units_to_decimal(1000u128, 50).is_err());
        // 上限本身可用
        assert!(units_to_decimal(1000u128, MAX_TOKEN_DECIMALS).is_ok());
    }

    #[test]
    fn test_decimal_to_units_truncates() {
        let wei = decimal_to_units(Decimal::new(15, 1), 18).unwrap(); // 1.5 ETH
        assert_eq!(wei, 1_500_000_000_000_000_000u128);

        // 超出精度的尾数向下截断
        let sats = decimal_to_units(Decimal::new(123456789, 9), 8).unwrap(); // 0.123456789 BTC
        assert_eq!(sats, 12_345_678u128);

        assert!(decimal_to_units(Decimal::new(-1, 0), 8).is_err());
    }

    #[test]
    fn test_parse_hex_quantity() {
        assert_eq!(parse_hex_quantity(&json!("0x0")).unwrap(), 0);
        assert_eq!(parse_hex_quantity(&json!("0xde0b6b3a7640000")).unwrap(), 1_000_000_000_000_000_000);
        assert!(parse_hex_quantity(&json!(42)).is_err());
    }
}
