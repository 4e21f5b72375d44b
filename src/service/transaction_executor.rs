// 多链交易执行器
//
// 归集与提现共用的签名/广播/确认通道。三个链家族三条路径：
//   EVM    — ethers 本地签名 + eth_sendRawTransaction + 回执轮询
//   Solana — 手工组装 SystemProgram transfer 消息，ed25519 签名
//   Bitcoin— UTXO 挑选 + P2WPKH 见证签名 + explorer 广播
//
// 广播超时不等于失败：调用方必须先通过 transaction_status 复查
// 原交易，确认其未上链后才允许用新 nonce 重试。

use std::{str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use rust_decimal::Decimal;
use serde_json::json;
use zeroize::Zeroizing;

use crate::{
    domain::{ChainDescriptor, ChainFamily, ChainRegistry},
    infrastructure::provider_registry::ChainProviderRegistry,
    metrics,
    service::balance_checker::{decimal_to_units, units_to_decimal},
};

/// P2WPKH 粉尘门槛 (sats)
pub const DUST_LIMIT_SATS: u64 = 546;

/// Solana 基础签名费 (lamports)
const SOLANA_BASE_FEE_LAMPORTS: u64 = 5_000;

/// EVM 原生转账 gas 上限
const EVM_TRANSFER_GAS: u64 = 21_000;

/// 回执轮询：次数 × 间隔
const RECEIPT_POLL_ATTEMPTS: u32 = 20;
const RECEIPT_POLL_INTERVAL_SECS: u64 = 3;

/// 执行器错误分类
///
/// Transient 可在复查原交易状态后重试，其余两类直接失败。
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// 配置缺失或非法（链不支持、端点未配置）
    #[error("configuration error: {0}")]
    Config(String),
    /// 前置条件不满足（余额不足、地址非法、金额低于粉尘）
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// 瞬态失败（RPC 错误、广播超时）
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::Transient(_))
    }
}

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        ExecutorError::Transient(format!("{:#}", err))
    }
}

/// 转账请求
pub struct TransferRequest {
    pub chain: String,
    pub from_address: String,
    /// 派生私钥 (hex)，仅在本次执行内持有
    pub signing_key: Zeroizing<String>,
    pub to_address: String,
    /// 整币单位金额
    pub amount: Decimal,
}

/// 转账结果
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub tx_hash: String,
    /// 实际（或确认前估算）网络费，整币单位
    pub network_fee: Decimal,
    /// 是否已在确认窗口内观察到上链
    pub confirmed: bool,
}

/// 链上交易状态复查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnchainStatus {
    /// 尚未观察到
    Unknown,
    /// 已上链且成功
    Confirmed,
    /// 已上链但执行失败
    Failed,
}

pub struct TransactionExecutor {
    providers: Arc<ChainProviderRegistry>,
    registry: Arc<ChainRegistry>,
}

impl TransactionExecutor {
    pub fn new(providers: Arc<ChainProviderRegistry>, registry: Arc<ChainRegistry>) -> Self {
        Self { providers, registry }
    }

    fn descriptor(&self, chain: &str) -> Result<ChainDescriptor, ExecutorError> {
        self.registry
            .get(chain)
            .cloned()
            .ok_or_else(|| ExecutorError::Config(format!("Unsupported chain: {}", chain)))
    }

    /// 执行一笔原生币转账
    pub async fn execute_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, ExecutorError> {
        if request.amount <= Decimal::ZERO {
            return Err(ExecutorError::Precondition(
                "Transfer amount must be positive".to_string(),
            ));
        }

        let descriptor = self.descriptor(&request.chain)?;

        let result = match descriptor.family {
            ChainFamily::Evm => self.execute_evm(request, &descriptor).await,
            ChainFamily::Solana => self.execute_solana(request, &descriptor).await,
            ChainFamily::Bitcoin => self.execute_bitcoin(request, &descriptor).await,
        };

        match &result {
            Ok(outcome) => {
                metrics::count_broadcast_ok(&request.chain);
                tracing::info!(
                    chain = %request.chain,
                    tx_hash = %outcome.tx_hash,
                    confirmed = outcome.confirmed,
                    "Transfer broadcast"
                );
            }
            Err(e) => {
                metrics::count_broadcast_failed(&request.chain);
                tracing::error!(chain = %request.chain, error = %e, "Transfer failed");
            }
        }

        result
    }

    /// 估算一笔原生币转账的网络费（整币单位）
    pub async fn estimate_fee(&self, chain: &str) -> Result<Decimal, ExecutorError> {
        let descriptor = self.descriptor(chain)?;

        match descriptor.family {
            ChainFamily::Evm => {
                let gas_price = self
                    .evm_gas_price(chain, &descriptor)
                    .await
                    .unwrap_or(descriptor.fee_policy.default_fee_rate as u128);
                let fee_wei = gas_price * EVM_TRANSFER_GAS as u128;
                Ok(units_to_decimal(fee_wei, descriptor.decimals)?)
            }
            ChainFamily::Solana => {
                Ok(units_to_decimal(SOLANA_BASE_FEE_LAMPORTS as u128, 9)?)
            }
            ChainFamily::Bitcoin => {
                // 典型 2-in/2-out 交易尺寸估算
                let fee_sats = descriptor.fee_policy.default_fee_rate * estimate_tx_vsize(2, 2);
                Ok(units_to_decimal(fee_sats as u128, 8)?)
            }
        }
    }

    /// 复查已广播交易的链上状态（超时重试前的必经步骤）
    pub async fn transaction_status(
        &self,
        chain: &str,
        tx_hash: &str,
    ) -> Result<OnchainStatus, ExecutorError> {
        let descriptor = self.descriptor(chain)?;

        match descriptor.family {
            ChainFamily::Evm => {
                let receipt = self
                    .providers
                    .rpc_call(chain, "eth_getTransactionReceipt", json!([tx_hash]))
                    .await?;
                if receipt.is_null() {
                    return Ok(OnchainStatus::Unknown);
                }
                let ok = receipt.get("status").and_then(|s| s.as_str()) == Some("0x1");
                Ok(if ok {
                    OnchainStatus::Confirmed
                } else {
                    OnchainStatus::Failed
                })
            }
            ChainFamily::Solana => {
                let statuses = self
                    .providers
                    .rpc_call(
                        chain,
                        "getSignatureStatuses",
                        json!([[tx_hash], {"searchTransactionHistory": true}]),
                    )
                    .await?;
                let entry = statuses.pointer("/value/0").cloned().unwrap_or(json!(null));
                if entry.is_null() {
                    return Ok(OnchainStatus::Unknown);
                }
                if !entry.get("err").map(|e| e.is_null()).unwrap_or(true) {
                    return Ok(OnchainStatus::Failed);
                }
                let status = entry
                    .get("confirmationStatus")
                    .and_then(|s| s.as_str())
                    .unwrap_or("");
                Ok(if status == "confirmed" || status == "finalized" {
                    OnchainStatus::Confirmed
                } else {
                    OnchainStatus::Unknown
                })
            }
            ChainFamily::Bitcoin => {
                let status = self
                    .providers
                    .explorer_get(chain, &format!("/tx/{}/status", tx_hash))
                    .await;
                match status {
                    Ok(v) => {
                        let confirmed =
                            v.get("confirmed").and_then(|c| c.as_bool()).unwrap_or(false);
                        Ok(if confirmed {
                            OnchainStatus::Confirmed
                        } else {
                            OnchainStatus::Unknown
                        })
                    }
                    // explorer 对未知交易返回 404
                    Err(_) => Ok(OnchainStatus::Unknown),
                }
            }
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // EVM 路径
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn evm_gas_price(
        &self,
        chain: &str,
        _descriptor: &ChainDescriptor,
    ) -> Result<u128, ExecutorError> {
        let result = self.providers.rpc_call(chain, "eth_gasPrice", json!([])).await?;
        let raw = result
            .as_str()
            .context("Expected hex gas price")?
            .trim_start_matches("0x");
        u128::from_str_radix(raw, 16)
            .map_err(|e| ExecutorError::Transient(format!("Invalid gas price: {}", e)))
    }

    async fn execute_evm(
        &self,
        request: &TransferRequest,
        descriptor: &ChainDescriptor,
    ) -> Result<TransferOutcome, ExecutorError> {
        use ethers::signers::{LocalWallet, Signer};
        use ethers::types::{
            transaction::eip2718::TypedTransaction, Address, TransactionRequest, U256,
        };

        let chain_id = descriptor
            .evm_chain_id
            .ok_or_else(|| ExecutorError::Config(format!("Missing chain id for {}", descriptor.chain_key)))?;

        let wallet = request
            .signing_key
            .as_str()
            .parse::<LocalWallet>()
            .map_err(|_| ExecutorError::Precondition("Invalid EVM signing key".to_string()))?
            .with_chain_id(chain_id);

        let to = request
            .to_address
            .parse::<Address>()
            .map_err(|_| ExecutorError::Precondition(format!("Invalid EVM address: {}", request.to_address)))?;

        let value_wei = decimal_to_units(request.amount, descriptor.decimals)?;

        let nonce_raw = self
            .providers
            .rpc_call(
                &request.chain,
                "eth_getTransactionCount",
                json!([request.from_address, "pending"]),
            )
            .await?;
        let nonce = u64::from_str_radix(
            nonce_raw.as_str().unwrap_or("0x0").trim_start_matches("0x"),
            16,
        )
        .map_err(|e| ExecutorError::Transient(format!("Invalid nonce: {}", e)))?;

        let gas_price = self
            .evm_gas_price(&request.chain, descriptor)
            .await
            .unwrap_or(descriptor.fee_policy.default_fee_rate as u128);

        let tx: TypedTransaction = TransactionRequest::new()
            .to(to)
            .value(U256::from(value_wei))
            .nonce(nonce)
            .gas(EVM_TRANSFER_GAS)
            .gas_price(U256::from(gas_price))
            .chain_id(chain_id)
            .into();

        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| ExecutorError::Precondition(format!("EVM signing failed: {}", e)))?;
        let raw_tx = format!("0x{}", hex::encode(tx.rlp_signed(&signature)));

        let tx_hash = self
            .providers
            .rpc_call(&request.chain, "eth_sendRawTransaction", json!([raw_tx]))
            .await?
            .as_str()
            .context("Expected transaction hash string")?
            .to_string();

        // 估算费先行，回执到达后以实际费覆盖
        let mut network_fee = units_to_decimal(
            gas_price * EVM_TRANSFER_GAS as u128,
            descriptor.decimals,
        )?;
        let mut confirmed = false;

        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(RECEIPT_POLL_INTERVAL_SECS)).await;

            let receipt = self
                .providers
                .rpc_call(&request.chain, "eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if receipt.is_null() {
                continue;
            }

            let status_ok = receipt.get("status").and_then(|s| s.as_str()) == Some("0x1");
            if !status_ok {
                return Err(ExecutorError::Precondition(format!(
                    "Transaction reverted on-chain: {}",
                    tx_hash
                )));
            }

            let gas_used = receipt
                .get("gasUsed")
                .and_then(|v| v.as_str())
                .and_then(|s| u128::from_str_radix(s.trim_start_matches("0x"), 16).ok())
                .unwrap_or(EVM_TRANSFER_GAS as u128);
            let effective_price = receipt
                .get("effectiveGasPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| u128::from_str_radix(s.trim_start_matches("0x"), 16).ok())
                .unwrap_or(gas_price);

            network_fee = units_to_decimal(gas_used * effective_price, descriptor.decimals)?;
            confirmed = true;
            break;
        }

        Ok(TransferOutcome {
            tx_hash,
            network_fee,
            confirmed,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Solana 路径
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn execute_solana(
        &self,
        request: &TransferRequest,
        _descriptor: &ChainDescriptor,
    ) -> Result<TransferOutcome, ExecutorError> {
        use base64::Engine;
        use ed25519_dalek::{Signer, SigningKey};

        let key_bytes = hex::decode(request.signing_key.as_str())
            .map_err(|_| ExecutorError::Precondition("Invalid Solana signing key".to_string()))?;
        let key_array: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| ExecutorError::Precondition("Solana signing key must be 32 bytes".to_string()))?;
        let signing_key = SigningKey::from_bytes(&key_array);
        let from_pubkey = signing_key.verifying_key().to_bytes();

        let to_pubkey: [u8; 32] = bs58::decode(&request.to_address)
            .into_vec()
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| {
                ExecutorError::Precondition(format!("Invalid Solana address: {}", request.to_address))
            })?;

        let lamports: u64 = decimal_to_units(request.amount, 9)?
            .try_into()
            .map_err(|_| ExecutorError::Precondition("Amount exceeds u64 lamports".to_string()))?;

        let blockhash_result = self
            .providers
            .rpc_call(
                &request.chain,
                "getLatestBlockhash",
                json!([{"commitment": "finalized"}]),
            )
            .await?;
        let blockhash_str = blockhash_result
            .pointer("/value/blockhash")
            .and_then(|v| v.as_str())
            .context("Missing blockhash in getLatestBlockhash response")?;
        let blockhash: [u8; 32] = bs58::decode(blockhash_str)
            .into_vec()
            .ok()
            .and_then(|v| v.try_into().ok())
            .ok_or_else(|| ExecutorError::Transient("Invalid blockhash encoding".to_string()))?;

        let message = build_solana_transfer_message(&from_pubkey, &to_pubkey, &blockhash, lamports);
        let signature = signing_key.sign(&message);

        // 交易 = 签名数组 (compact-u16 长度前缀) + 消息
        let mut tx_bytes = Vec::with_capacity(1 + 64 + message.len());
        encode_compact_u16(&mut tx_bytes, 1);
        tx_bytes.extend_from_slice(&signature.to_bytes());
        tx_bytes.extend_from_slice(&message);

        let tx_base64 = base64::engine::general_purpose::STANDARD.encode(&tx_bytes);

        let tx_signature = self
            .providers
            .rpc_call(
                &request.chain,
                "sendTransaction",
                json!([tx_base64, {"encoding": "base64", "preflightCommitment": "finalized"}]),
            )
            .await?
            .as_str()
            .context("Expected transaction signature string")?
            .to_string();

        let mut confirmed = false;
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(RECEIPT_POLL_INTERVAL_SECS)).await;

            match self.transaction_status(&request.chain, &tx_signature).await? {
                OnchainStatus::Confirmed => {
                    confirmed = true;
                    break;
                }
                OnchainStatus::Failed => {
                    return Err(ExecutorError::Precondition(format!(
                        "Solana transaction failed on-chain: {}",
                        tx_signature
                    )));
                }
                OnchainStatus::Unknown => continue,
            }
        }

        Ok(TransferOutcome {
            tx_hash: tx_signature,
            network_fee: units_to_decimal(SOLANA_BASE_FEE_LAMPORTS as u128, 9)?,
            confirmed,
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Bitcoin 路径
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn execute_bitcoin(
        &self,
        request: &TransferRequest,
        descriptor: &ChainDescriptor,
    ) -> Result<TransferOutcome, ExecutorError> {
        use bitcoin::{
            absolute, consensus,
            hashes::Hash,
            secp256k1::{Message, Secp256k1, SecretKey},
            sighash::SighashCache,
            transaction, Address, Amount, EcdsaSighashType, Network, OutPoint, ScriptBuf,
            Sequence, Transaction, TxIn, TxOut, Txid, Witness,
        };

        let target_sats: u64 = decimal_to_units(request.amount, 8)?
            .try_into()
            .map_err(|_| ExecutorError::Precondition("Amount exceeds u64 sats".to_string()))?;
        if target_sats < DUST_LIMIT_SATS {
            return Err(ExecutorError::Precondition(format!(
                "Amount {} sats below dust limit",
                target_sats
            )));
        }

        let from_address = Address::from_str(&request.from_address)
            .map_err(|_| ExecutorError::Precondition("Invalid source address".to_string()))?
            .require_network(Network::Bitcoin)
            .map_err(|_| ExecutorError::Precondition("Source address network mismatch".to_string()))?;
        let to_address = Address::from_str(&request.to_address)
            .map_err(|_| {
                ExecutorError::Precondition(format!("Invalid Bitcoin address: {}", request.to_address))
            })?
            .require_network(Network::Bitcoin)
            .map_err(|_| ExecutorError::Precondition("Destination network mismatch".to_string()))?;

        // 已确认 UTXO 集合
        let utxo_json = self
            .providers
            .explorer_get(&request.chain, &format!("/address/{}/utxo", request.from_address))
            .await?;
        let utxos: Vec<Utxo> = utxo_json
            .as_array()
            .context("Expected UTXO array")?
            .iter()
            .filter(|u| {
                u.pointer("/status/confirmed")
                    .and_then(|c| c.as_bool())
                    .unwrap_or(false)
            })
            .filter_map(|u| {
                Some(Utxo {
                    txid: u.get("txid")?.as_str()?.to_string(),
                    vout: u.get("vout")?.as_u64()? as u32,
                    value: u.get("value")?.as_u64()?,
                })
            })
            .collect();

        let fee_rate = descriptor.fee_policy.default_fee_rate;
        let selection = select_utxos(&utxos, target_sats, fee_rate)?;

        // 组装未签名交易
        let inputs: Vec<TxIn> = selection
            .inputs
            .iter()
            .map(|utxo| {
                let txid = Txid::from_str(&utxo.txid)
                    .map_err(|_| ExecutorError::Transient(format!("Invalid txid: {}", utxo.txid)))?;
                Ok(TxIn {
                    previous_output: OutPoint { txid, vout: utxo.vout },
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
            })
            .collect::<Result<_, ExecutorError>>()?;

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(target_sats),
            script_pubkey: to_address.script_pubkey(),
        }];
        if selection.change_sats >= DUST_LIMIT_SATS {
            outputs.push(TxOut {
                value: Amount::from_sat(selection.change_sats),
                script_pubkey: from_address.script_pubkey(),
            });
        }

        let mut tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: inputs,
            output: outputs,
        };

        // 逐输入 P2WPKH 见证签名
        let secp = Secp256k1::new();
        let secret_bytes = hex::decode(request.signing_key.as_str())
            .map_err(|_| ExecutorError::Precondition("Invalid Bitcoin signing key".to_string()))?;
        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|_| ExecutorError::Precondition("Invalid secp256k1 secret key".to_string()))?;
        let public_key = secret_key.public_key(&secp);
        let script_pubkey = from_address.script_pubkey();

        let mut cache = SighashCache::new(&mut tx);
        for (i, utxo) in selection.inputs.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    i,
                    &script_pubkey,
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| ExecutorError::Transient(format!("Sighash failed: {}", e)))?;

            let message = Message::from_digest(sighash.to_byte_array());
            let sig = secp.sign_ecdsa(&message, &secret_key);
            let signature = bitcoin::ecdsa::Signature {
                sig,
                hash_ty: EcdsaSighashType::All,
            };

            *cache
                .witness_mut(i)
                .ok_or_else(|| ExecutorError::Transient("Missing witness slot".to_string()))? =
                Witness::p2wpkh(&signature, &public_key);
        }

        let raw_hex = consensus::encode::serialize_hex(&tx);

        let tx_hash = self
            .providers
            .explorer_post_text(&request.chain, "/tx", raw_hex)
            .await?
            .trim()
            .to_string();

        Ok(TransferOutcome {
            tx_hash,
            network_fee: units_to_decimal(selection.fee_sats as u128, 8)?,
            // UTXO 链不等确认，状态由 transaction_status 后续复查
            confirmed: false,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Solana 消息组装
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Solana 短向量长度编码 (compact-u16)
fn encode_compact_u16(out: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// 组装 SystemProgram::Transfer 的 legacy 消息
///
/// 账户表固定三项：付款方（可写签名者）、收款方（可写）、
/// System Program。指令数据为指令号 2 (u32 LE) + lamports (u64 LE)。
fn build_solana_transfer_message(
    from: &[u8; 32],
    to: &[u8; 32],
    blockhash: &[u8; 32],
    lamports: u64,
) -> Vec<u8> {
    const SYSTEM_PROGRAM: [u8; 32] = [0u8; 32];

    let mut message = Vec::with_capacity(3 + 1 + 96 + 32 + 16);

    // 消息头: 1 个签名者, 0 个只读签名账户, 1 个只读非签名账户
    message.push(1);
    message.push(0);
    message.push(1);

    // 账户表
    encode_compact_u16(&mut message, 3);
    message.extend_from_slice(from);
    message.extend_from_slice(to);
    message.extend_from_slice(&SYSTEM_PROGRAM);

    message.extend_from_slice(blockhash);

    // 指令表
    encode_compact_u16(&mut message, 1);
    message.push(2); // program_id 索引 (System Program)
    encode_compact_u16(&mut message, 2);
    message.push(0); // from
    message.push(1); // to

    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&2u32.to_le_bytes()); // Transfer 指令号
    data.extend_from_slice(&lamports.to_le_bytes());
    encode_compact_u16(&mut message, data.len() as u16);
    message.extend_from_slice(&data);

    message
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bitcoin UTXO 挑选
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 未花费输出
#[derive(Debug, Clone)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
}

/// UTXO 挑选结果
#[derive(Debug, Clone)]
pub struct UtxoSelection {
    pub inputs: Vec<Utxo>,
    pub fee_sats: u64,
    /// 低于粉尘的找零归入手续费
    pub change_sats: u64,
}

/// P2WPKH 交易虚拟尺寸估算 (vBytes)
pub fn estimate_tx_vsize(num_inputs: u64, num_outputs: u64) -> u64 {
    // 固定开销 ~11 vB + 每输入 ~68 vB + 每输出 ~31 vB
    11 + num_inputs * 68 + num_outputs * 31
}

/// 最大值优先的 UTXO 挑选，费用随输入数量重算
pub fn select_utxos(
    utxos: &[Utxo],
    target_sats: u64,
    fee_rate: u64,
) -> Result<UtxoSelection, ExecutorError> {
    let mut candidates: Vec<Utxo> = utxos.to_vec();
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut inputs: Vec<Utxo> = Vec::new();
    let mut total: u64 = 0;

    for utxo in candidates {
        total += utxo.value;
        inputs.push(utxo);

        // 先按双输出（含找零）算费
        let fee_two_outputs = fee_rate * estimate_tx_vsize(inputs.len() as u64, 2);
        if total >= target_sats + fee_two_outputs {
            let change = total - target_sats - fee_two_outputs;
            if change >= DUST_LIMIT_SATS {
                return Ok(UtxoSelection {
                    inputs,
                    fee_sats: fee_two_outputs,
                    change_sats: change,
                });
            }

            // 找零低于粉尘则省掉找零输出，余量并入手续费
            let fee_one_output = fee_rate * estimate_tx_vsize(inputs.len() as u64, 1);
            if total >= target_sats + fee_one_output {
                return Ok(UtxoSelection {
                    fee_sats: total - target_sats,
                    inputs,
                    change_sats: 0,
                });
            }
        }
    }

    Err(ExecutorError::Precondition(format!(
        "Insufficient confirmed UTXO value: have {}, need {} plus fees",
        total, target_sats
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_u16_encoding() {
        let mut buf = Vec::new();
        encode_compact_u16(&mut buf, 1);
        assert_eq!(buf, vec![1]);

        buf.clear();
        encode_compact_u16(&mut buf, 0x7f);
        assert_eq!(buf, vec![0x7f]);

        buf.clear();
        encode_compact_u16(&mut buf, 0x80);
        assert_eq!(buf, vec![0x80, 0x01]);

        buf.clear();
        encode_compact_u16(&mut buf, 0x3fff);
        assert_eq!(buf, vec![0xff, 0x7f]);
    }

    #[test]
    fn test_solana_message_layout() {
        let from = [1u8; 32];
        let to = [2u8; 32];
        let blockhash = [3u8; 32];
        let message = build_solana_transfer_message(&from, &to, &blockhash, 42);

        // 头 3 字节
        assert_eq!(&message[..3], &[1, 0, 1]);
        // 账户数量 3，紧随其后的是付款方公钥
        assert_eq!(message[3], 3);
        assert_eq!(&message[4..36], &from);
        assert_eq!(&message[36..68], &to);
        assert_eq!(&message[68..100], &[0u8; 32]);
        assert_eq!(&message[100..132], &blockhash);
        // 指令数据尾部是 lamports LE
        let tail = &message[message.len() - 8..];
        assert_eq!(tail, &42u64.to_le_bytes());
    }

    #[test]
    fn test_executor_error_retryable() {
        assert!(ExecutorError::Transient("rpc".to_string()).is_retryable());
        assert!(!ExecutorError::Precondition("dust".to_string()).is_retryable());
        assert!(!ExecutorError::Config("chain".to_string()).is_retryable());
    }
}
