//! 钱包派生策略
//!
//! 为不同链家族提供统一的确定性派生接口：同一助记词 + 链 + 索引
//! 永远得到同一地址（可审计、可恢复）。纯函数，不做任何持久化。

use anyhow::{Context, Result};
use bip39::{Language, Mnemonic};
use coins_bip32::path::DerivationPath;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::domain::chain_registry::{ChainDescriptor, ChainFamily};

type HmacSha512 = Hmac<Sha512>;

/// 派生结果
#[derive(Clone)]
pub struct DerivedAddress {
    /// 地址（链原生格式）
    pub address: String,
    /// 公钥 (hex 编码)
    pub public_key: String,
    /// 签名私钥 (hex 编码，仅在单次签名操作内解包)
    pub signing_key: Zeroizing<String>,
    /// 实际使用的派生路径
    pub path: String,
}

// 私钥不进日志
impl std::fmt::Debug for DerivedAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedAddress")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("signing_key", &"<redacted>")
            .field("path", &self.path)
            .finish()
    }
}

/// 钱包派生策略 trait
pub trait DerivationStrategy: Send + Sync {
    /// 从助记词派生指定索引的地址
    fn derive(
        &self,
        mnemonic: &str,
        descriptor: &ChainDescriptor,
        index: u32,
    ) -> Result<DerivedAddress>;

    /// 验证地址格式
    fn validate_address(&self, address: &str) -> bool;
}

/// 按链家族创建策略
pub fn strategy_for(family: ChainFamily) -> Box<dyn DerivationStrategy> {
    match family {
        ChainFamily::Evm => Box::new(EvmStrategy),
        ChainFamily::Solana => Box::new(SolanaStrategy),
        ChainFamily::Bitcoin => Box::new(BitcoinStrategy),
    }
}

/// 便捷入口：按描述符家族分发派生
pub fn derive_address(
    mnemonic: &str,
    descriptor: &ChainDescriptor,
    index: u32,
) -> Result<DerivedAddress> {
    strategy_for(descriptor.family).derive(mnemonic, descriptor, index)
}

fn parse_mnemonic(mnemonic: &str) -> Result<Mnemonic> {
    Mnemonic::parse_in(Language::English, mnemonic).context("Invalid mnemonic")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EVM 策略 (secp256k1 + Keccak256)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EvmStrategy;

impl DerivationStrategy for EvmStrategy {
    fn derive(
        &self,
        mnemonic: &str,
        descriptor: &ChainDescriptor,
        index: u32,
    ) -> Result<DerivedAddress> {
        use coins_bip32::prelude::*;
        use k256::ecdsa::SigningKey;
        use sha3::{Digest, Keccak256};

        let mnemonic = parse_mnemonic(mnemonic)?;
        let seed = mnemonic.to_seed("");

        let path = descriptor.derivation_path(index);
        let derivation_path = path
            .parse::<DerivationPath>()
            .context("Invalid derivation path")?;

        let master_key =
            XPriv::root_from_seed(&seed, None).context("Failed to derive master key")?;
        let derived_key = master_key
            .derive_path(&derivation_path)
            .context("Failed to derive key")?;

        // XPriv 实现 AsRef<SigningKey>
        let signing_key: &SigningKey = derived_key.as_ref();
        let private_key_bytes = signing_key.to_bytes();

        let verifying_key = signing_key.verifying_key();
        let public_key_point = verifying_key.to_encoded_point(false); // 未压缩格式
        let public_key_slice = &public_key_point.as_bytes()[1..]; // 去掉 0x04 前缀

        // Keccak256 哈希取后 20 字节
        let hash = Keccak256::digest(public_key_slice);
        let address = format!("0x{}", hex::encode(&hash[12..]));

        Ok(DerivedAddress {
            address,
            public_key: hex::encode(public_key_slice),
            signing_key: Zeroizing::new(hex::encode(private_key_bytes)),
            path,
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        address.starts_with("0x")
            && address.len() == 42
            && address[2..].chars().all(|c| c.is_ascii_hexdigit())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Solana 策略 (ed25519, SLIP-0010 硬化派生)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SolanaStrategy;

impl DerivationStrategy for SolanaStrategy {
    fn derive(
        &self,
        mnemonic: &str,
        descriptor: &ChainDescriptor,
        index: u32,
    ) -> Result<DerivedAddress> {
        use ed25519_dalek::SigningKey;

        let mnemonic = parse_mnemonic(mnemonic)?;
        let seed = mnemonic.to_seed("");

        let path = descriptor.derivation_path(index);
        let indices = parse_hardened_path(&path)?;

        let key_bytes = slip10_ed25519_derive(&seed, &indices);
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let public_key_bytes = signing_key.verifying_key().to_bytes();

        // Solana 地址就是公钥的 Base58 编码
        let address = bs58::encode(public_key_bytes).into_string();

        Ok(DerivedAddress {
            address,
            public_key: hex::encode(public_key_bytes),
            signing_key: Zeroizing::new(hex::encode(key_bytes)),
            path,
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        // Base58 编码的 32 字节公钥，32-44 字符
        address.len() >= 32
            && address.len() <= 44
            && bs58::decode(address)
                .into_vec()
                .map(|b| b.len() == 32)
                .unwrap_or(false)
    }
}

/// 解析全硬化派生路径（ed25519 只支持硬化派生）
fn parse_hardened_path(path: &str) -> Result<Vec<u32>> {
    let mut indices = Vec::new();
    for component in path.trim_start_matches("m/").split('/') {
        if component.is_empty() {
            continue;
        }
        let raw = component
            .strip_suffix('\'')
            .with_context(|| format!("Non-hardened component in ed25519 path: {}", component))?;
        indices.push(raw.parse::<u32>().context("Invalid path component")?);
    }
    Ok(indices)
}

/// SLIP-0010 ed25519 派生
///
/// master: I = HMAC-SHA512("ed25519 seed", seed)
/// child:  I = HMAC-SHA512(chain_code, 0x00 || key || index_be)，index 强制硬化
fn slip10_ed25519_derive(seed: &[u8], indices: &[u32]) -> [u8; 32] {
    let mut mac = HmacSha512::new_from_slice(b"ed25519 seed").expect("HMAC accepts any key size");
    mac.update(seed);
    let i = mac.finalize().into_bytes();

    let mut key = [0u8; 32];
    let mut chain_code = [0u8; 32];
    key.copy_from_slice(&i[..32]);
    chain_code.copy_from_slice(&i[32..]);

    for &index in indices {
        let hardened = index | 0x8000_0000;
        let mut mac = HmacSha512::new_from_slice(&chain_code).expect("HMAC accepts any key size");
        mac.update(&[0u8]);
        mac.update(&key);
        mac.update(&hardened.to_be_bytes());
        let i = mac.finalize().into_bytes();
        key.copy_from_slice(&i[..32]);
        chain_code.copy_from_slice(&i[32..]);
    }

    key
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bitcoin 策略 (secp256k1 + P2WPKH native segwit)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BitcoinStrategy;

impl DerivationStrategy for BitcoinStrategy {
    fn derive(
        &self,
        mnemonic: &str,
        descriptor: &ChainDescriptor,
        index: u32,
    ) -> Result<DerivedAddress> {
        use bitcoin::{
            secp256k1::PublicKey as Secp256k1PublicKey, Address, Network,
            PublicKey as BitcoinPublicKey,
        };
        use coins_bip32::prelude::*;
        use k256::ecdsa::SigningKey;

        let mnemonic = parse_mnemonic(mnemonic)?;
        let seed = mnemonic.to_seed("");

        let path = descriptor.derivation_path(index);
        let derivation_path = path
            .parse::<DerivationPath>()
            .context("Invalid derivation path")?;

        let master_key =
            XPriv::root_from_seed(&seed, None).context("Failed to derive master key")?;
        let derived_key = master_key
            .derive_path(&derivation_path)
            .context("Failed to derive key")?;

        let signing_key: &SigningKey = derived_key.as_ref();
        let private_key_bytes = signing_key.to_bytes();
        let public_key_point = signing_key.verifying_key().to_encoded_point(true); // 压缩格式

        let secp_pubkey = Secp256k1PublicKey::from_slice(public_key_point.as_bytes())
            .context("Invalid secp256k1 public key")?;
        let bitcoin_pubkey = BitcoinPublicKey::new(secp_pubkey);

        // P2WPKH 地址（bc1q... 格式）
        let address = Address::p2wpkh(&bitcoin_pubkey, Network::Bitcoin)
            .context("Failed to create P2WPKH address")?
            .to_string();

        Ok(DerivedAddress {
            address,
            public_key: hex::encode(public_key_point.as_bytes()),
            signing_key: Zeroizing::new(hex::encode(private_key_bytes)),
            path,
        })
    }

    fn validate_address(&self, address: &str) -> bool {
        address.starts_with("bc1") || address.starts_with("tb1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain_registry::ChainRegistry;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_evm_derivation_deterministic() {
        let registry = ChainRegistry::new();
        let eth = registry.get("eth").unwrap();

        let a = derive_address(TEST_MNEMONIC, eth, 0).unwrap();
        let b = derive_address(TEST_MNEMONIC, eth, 0).unwrap();

        assert_eq!(a.address, b.address);
        assert_eq!(a.public_key, b.public_key);
        assert!(a.address.starts_with("0x"));
        assert_eq!(a.address.len(), 42);
        assert_eq!(a.path, "m/44'/60'/0'/0/0");
    }

    #[test]
    fn test_evm_known_vector() {
        // BIP39 标准测试向量对应的 m/44'/60'/0'/0/0 地址
        let registry = ChainRegistry::new();
        let eth = registry.get("eth").unwrap();

        let derived = derive_address(TEST_MNEMONIC, eth, 0).unwrap();
        assert_eq!(
            derived.address.to_lowercase(),
            "0x9858effd232b4033e47d90003d41ec34ecaeda94"
        );
    }

    #[test]
    fn test_evm_index_changes_address() {
        let registry = ChainRegistry::new();
        let eth = registry.get("eth").unwrap();

        let a0 = derive_address(TEST_MNEMONIC, eth, 0).unwrap();
        let a1 = derive_address(TEST_MNEMONIC, eth, 1).unwrap();
        assert_ne!(a0.address, a1.address);
    }

    #[test]
    fn test_solana_derivation() {
        let registry = ChainRegistry::new();
        let sol = registry.get("sol").unwrap();

        let a = derive_address(TEST_MNEMONIC, sol, 0).unwrap();
        let b = derive_address(TEST_MNEMONIC, sol, 0).unwrap();

        assert_eq!(a.address, b.address);
        assert!(SolanaStrategy.validate_address(&a.address));
        assert_eq!(a.path, "m/44'/501'/0'/0'");
    }

    #[test]
    fn test_bitcoin_derivation() {
        let registry = ChainRegistry::new();
        let btc = registry.get("btc").unwrap();

        let derived = derive_address(TEST_MNEMONIC, btc, 0).unwrap();
        assert!(derived.address.starts_with("bc1q"));
        assert_eq!(derived.path, "m/84'/0'/0'/0/0");
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        let registry = ChainRegistry::new();
        let eth = registry.get("eth").unwrap();

        let result = derive_address("not a valid mnemonic phrase", eth, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_hardened_path() {
        let indices = parse_hardened_path("m/44'/501'/3'/0'").unwrap();
        assert_eq!(indices, vec![44, 501, 3, 0]);

        // 非硬化组件对 ed25519 无效
        assert!(parse_hardened_path("m/44'/501'/0'/0").is_err());
    }

    #[test]
    fn test_debug_redacts_signing_key() {
        let registry = ChainRegistry::new();
        let eth = registry.get("eth").unwrap();
        let derived = derive_address(TEST_MNEMONIC, eth, 0).unwrap();
        let debug = format!("{:?}", derived);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(derived.signing_key.as_str()));
    }
}
