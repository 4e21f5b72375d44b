//! 跨链派生一致性验证
//!
//! 使用 BIP39/BIP84 标准测试助记词，确保各链派生结果与
//! 公开参考实现一致（同一种子在任何实现下可恢复）。

use vaultcore::domain::{derive_address, strategy_for, ChainFamily, ChainRegistry};

const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

#[test]
fn evm_addresses_match_reference_vectors() {
    let registry = ChainRegistry::new();
    let eth = registry.get("eth").unwrap();

    // m/44'/60'/0'/0/0 与 m/44'/60'/0'/0/1 的公开参考地址
    let first = derive_address(TEST_MNEMONIC, eth, 0).unwrap();
    assert_eq!(
        first.address.to_lowercase(),
        "0x9858effd232b4033e47d90003d41ec34ecaeda94"
    );

    let second = derive_address(TEST_MNEMONIC, eth, 1).unwrap();
    assert_eq!(
        second.address.to_lowercase(),
        "0x6fac4d18c912343bf86fa7049364dd4e424ab9c0"
    );
}

#[test]
fn bitcoin_addresses_match_bip84_vectors() {
    let registry = ChainRegistry::new();
    let btc = registry.get("btc").unwrap();

    // BIP84 参考向量：同一助记词的前两个接收地址
    let first = derive_address(TEST_MNEMONIC, btc, 0).unwrap();
    assert_eq!(first.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");

    let second = derive_address(TEST_MNEMONIC, btc, 1).unwrap();
    assert_eq!(second.address, "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g");
}

#[test]
fn evm_chains_share_derivation() {
    let registry = ChainRegistry::new();
    let eth = registry.get("eth").unwrap();
    let bsc = registry.get("bsc").unwrap();
    let polygon = registry.get("polygon").unwrap();

    // 三条 EVM 链共用路径模板，地址必须一致
    let a = derive_address(TEST_MNEMONIC, eth, 5).unwrap();
    let b = derive_address(TEST_MNEMONIC, bsc, 5).unwrap();
    let c = derive_address(TEST_MNEMONIC, polygon, 5).unwrap();
    assert_eq!(a.address, b.address);
    assert_eq!(b.address, c.address);
}

#[test]
fn solana_derivation_is_deterministic_and_hardened() {
    let registry = ChainRegistry::new();
    let sol = registry.get("sol").unwrap();

    let a = derive_address(TEST_MNEMONIC, sol, 0).unwrap();
    let b = derive_address(TEST_MNEMONIC, sol, 0).unwrap();
    assert_eq!(a.address, b.address);
    assert_eq!(a.path, "m/44'/501'/0'/0'");

    // 不同账户索引得到不同地址
    let other = derive_address(TEST_MNEMONIC, sol, 1).unwrap();
    assert_ne!(a.address, other.address);

    // 地址必须通过本链格式校验
    assert!(strategy_for(ChainFamily::Solana).validate_address(&a.address));
}

#[test]
fn address_validation_rejects_cross_chain() {
    let registry = ChainRegistry::new();
    let eth = registry.get("eth").unwrap();
    let btc = registry.get("btc").unwrap();

    let evm_address = derive_address(TEST_MNEMONIC, eth, 0).unwrap().address;
    let btc_address = derive_address(TEST_MNEMONIC, btc, 0).unwrap().address;

    assert!(strategy_for(ChainFamily::Evm).validate_address(&evm_address));
    assert!(!strategy_for(ChainFamily::Evm).validate_address(&btc_address));
    assert!(strategy_for(ChainFamily::Bitcoin).validate_address(&btc_address));
    assert!(!strategy_for(ChainFamily::Bitcoin).validate_address(&evm_address));
}

#[test]
fn derivation_paths_render_index() {
    let registry = ChainRegistry::new();

    assert_eq!(
        registry.get("eth").unwrap().derivation_path(42),
        "m/44'/60'/0'/0/42"
    );
    assert_eq!(
        registry.get("sol").unwrap().derivation_path(3),
        "m/44'/501'/3'/0'"
    );
    assert_eq!(
        registry.get("btc").unwrap().derivation_path(0),
        "m/84'/0'/0'/0/0"
    );
}

#[test]
fn invalid_mnemonic_is_rejected_on_all_chains() {
    let registry = ChainRegistry::new();
    for chain in ["eth", "sol", "btc"] {
        let descriptor = registry.get(chain).unwrap();
        assert!(
            derive_address("definitely not a bip39 phrase", descriptor, 0).is_err(),
            "chain {} accepted invalid mnemonic",
            chain
        );
    }
}
