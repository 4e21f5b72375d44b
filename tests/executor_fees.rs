//! UTXO 挑选与费用计算验证
//!
//! 资金不足必须在广播前以前置条件错误拒绝；找零低于粉尘
//! 必须并入手续费而不是产生粉尘输出。

use vaultcore::service::transaction_executor::{
    estimate_tx_vsize, select_utxos, ExecutorError, Utxo, DUST_LIMIT_SATS,
};

fn utxo(value: u64) -> Utxo {
    Utxo {
        txid: format!("{:064x}", value),
        vout: 0,
        value,
    }
}

const FEE_RATE: u64 = 20; // sats/vB

#[test]
fn single_utxo_with_change() {
    let utxos = vec![utxo(100_000)];
    let selection = select_utxos(&utxos, 50_000, FEE_RATE).unwrap();

    assert_eq!(selection.inputs.len(), 1);
    // 1-in/2-out: fee = 20 * (11 + 68 + 62) = 2820
    assert_eq!(selection.fee_sats, FEE_RATE * estimate_tx_vsize(1, 2));
    assert_eq!(
        selection.change_sats,
        100_000 - 50_000 - selection.fee_sats
    );
    assert!(selection.change_sats >= DUST_LIMIT_SATS);
}

#[test]
fn largest_utxos_selected_first() {
    let utxos = vec![utxo(10_000), utxo(80_000), utxo(30_000)];
    let selection = select_utxos(&utxos, 90_000, FEE_RATE).unwrap();

    // 80k + 30k 覆盖目标，10k 不应被动用
    assert_eq!(selection.inputs.len(), 2);
    assert_eq!(selection.inputs[0].value, 80_000);
    assert_eq!(selection.inputs[1].value, 30_000);

    let total: u64 = selection.inputs.iter().map(|u| u.value).sum();
    assert_eq!(
        total,
        90_000 + selection.fee_sats + selection.change_sats
    );
}

#[test]
fn sub_dust_change_folds_into_fee() {
    // 目标 + 双输出费用刚好把找零压到粉尘以下
    let fee_two_outputs = FEE_RATE * estimate_tx_vsize(1, 2);
    let value = 50_000 + fee_two_outputs + DUST_LIMIT_SATS - 1;
    let utxos = vec![utxo(value)];

    let selection = select_utxos(&utxos, 50_000, FEE_RATE).unwrap();
    assert_eq!(selection.change_sats, 0);
    // 全部剩余并入手续费，输入输出守恒
    assert_eq!(selection.fee_sats, value - 50_000);
}

#[test]
fn insufficient_funds_is_precondition_error() {
    let utxos = vec![utxo(1_000), utxo(2_000)];
    let err = select_utxos(&utxos, 1_000_000, FEE_RATE).unwrap_err();

    assert!(!err.is_retryable());
    match err {
        ExecutorError::Precondition(msg) => {
            assert!(msg.contains("Insufficient"), "unexpected message: {}", msg);
        }
        other => panic!("expected precondition error, got: {}", other),
    }
}

#[test]
fn empty_utxo_set_rejected() {
    let err = select_utxos(&[], 10_000, FEE_RATE).unwrap_err();
    assert!(matches!(err, ExecutorError::Precondition(_)));
}

#[test]
fn vsize_grows_with_inputs_and_outputs() {
    assert!(estimate_tx_vsize(2, 2) > estimate_tx_vsize(1, 2));
    assert!(estimate_tx_vsize(1, 2) > estimate_tx_vsize(1, 1));
    // 典型 1-in/2-out P2WPKH 交易约 140 vB
    let vsize = estimate_tx_vsize(1, 2);
    assert!((130..160).contains(&vsize));
}
