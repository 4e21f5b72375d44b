//! AES-256-GCM 加密/解密模块
//! 用于助记词种子的加密存储

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

/// 加密数据
///
/// 返回 nonce (12字节) + ciphertext 的拼接
pub fn encrypt_data(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// 解密数据（输入为 nonce + ciphertext）
pub fn decrypt_data(encrypted: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if key.len() != 32 {
        return Err(anyhow!("Key must be 32 bytes for AES-256"));
    }
    if encrypted.len() < 12 {
        return Err(anyhow!("Encrypted data too short"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Invalid key: {}", e))?;
    let nonce = Nonce::from_slice(&encrypted[..12]);

    let plaintext = cipher
        .decrypt(nonce, &encrypted[12..])
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(plaintext)
}

/// 加密助记词，返回 hex 字符串（入库格式）
pub fn encrypt_mnemonic(mnemonic: &str, key: &[u8]) -> Result<String> {
    Ok(hex::encode(encrypt_data(mnemonic.as_bytes(), key)?))
}

/// 解密 hex 格式的加密助记词
pub fn decrypt_mnemonic(encrypted_hex: &str, key: &[u8]) -> Result<String> {
    let encrypted = hex::decode(encrypted_hex).map_err(|e| anyhow!("Invalid hex: {}", e))?;
    let plaintext = decrypt_data(&encrypted, key)?;
    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 in mnemonic: {}", e))
}

/// 从环境变量获取加密密钥
///
/// 支持 64 位 hex、32 字节原文，或 >=16 字节字符串经 SHA-256 拉伸
pub fn get_encryption_key() -> Result<Vec<u8>> {
    let key_str = std::env::var("WALLET_ENC_KEY")
        .map_err(|_| anyhow!("WALLET_ENC_KEY environment variable not set"))?;

    if key_str.is_empty() {
        return Err(anyhow!("WALLET_ENC_KEY empty"));
    }

    if key_str.len() == 64 {
        hex::decode(&key_str).map_err(|e| anyhow!("Invalid hex key: {}", e))
    } else if key_str.len() == 32 {
        Ok(key_str.as_bytes().to_vec())
    } else if key_str.len() >= 16 {
        let mut hasher = Sha256::new();
        hasher.update(key_str.as_bytes());
        Ok(hasher.finalize().to_vec())
    } else {
        Err(anyhow!("WALLET_ENC_KEY too short (min 16)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = b"01234567890123456789012345678901"; // 32 bytes
        let data = b"abandon ability able about";

        let encrypted = encrypt_data(data, key).unwrap();
        assert_ne!(encrypted.as_slice(), data.as_slice());

        let decrypted = decrypt_data(&encrypted, key).unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_mnemonic_roundtrip_hex() {
        let key = b"01234567890123456789012345678901";
        let mnemonic = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

        let encrypted = encrypt_mnemonic(mnemonic, key).unwrap();
        assert!(hex::decode(&encrypted).is_ok());

        let decrypted = decrypt_mnemonic(&encrypted, key).unwrap();
        assert_eq!(decrypted, mnemonic);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = b"01234567890123456789012345678901";
        let other = b"10987654321098765432109876543210";

        let encrypted = encrypt_data(b"secret", key).unwrap();
        assert!(decrypt_data(&encrypted, other).is_err());
    }
}
