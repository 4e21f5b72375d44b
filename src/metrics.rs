//! 进程内运行指标
//!
//! OnceLock + Mutex 维护的轻量计数器，经 /metrics 以 Prometheus
//! 文本格式导出。计数失败永远不影响业务路径。

use std::{
    collections::HashMap,
    sync::{Mutex, OnceLock},
};

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

struct MetricsState {
    // 轮询与充值
    poll_cycles_total: HashMap<String, u64>,
    poll_errors_total: HashMap<String, u64>,
    deposits_detected_total: HashMap<String, u64>,
    deposits_settled_total: HashMap<String, u64>,
    deposits_mismatch_total: u64,
    // 链上交易
    broadcasts_ok_total: HashMap<String, u64>,
    broadcasts_failed_total: HashMap<String, u64>,
    sweeps_failed_total: u64,
    // 钱包开通
    provisioning_success_total: u64,
    provisioning_exhausted_total: u64,
}

fn state() -> &'static Mutex<MetricsState> {
    METRICS.get_or_init(|| {
        Mutex::new(MetricsState {
            poll_cycles_total: HashMap::new(),
            poll_errors_total: HashMap::new(),
            deposits_detected_total: HashMap::new(),
            deposits_settled_total: HashMap::new(),
            deposits_mismatch_total: 0,
            broadcasts_ok_total: HashMap::new(),
            broadcasts_failed_total: HashMap::new(),
            sweeps_failed_total: 0,
            provisioning_success_total: 0,
            provisioning_exhausted_total: 0,
        })
    })
}

fn lock() -> std::sync::MutexGuard<'static, MetricsState> {
    match state().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    }
}

pub fn count_poll_cycle(chain: &str) {
    *lock().poll_cycles_total.entry(chain.to_string()).or_insert(0) += 1;
}

pub fn count_poll_error(chain: &str) {
    *lock().poll_errors_total.entry(chain.to_string()).or_insert(0) += 1;
}

pub fn count_deposit_detected(chain: &str) {
    *lock()
        .deposits_detected_total
        .entry(chain.to_string())
        .or_insert(0) += 1;
}

pub fn count_deposit_settled(chain: &str) {
    *lock()
        .deposits_settled_total
        .entry(chain.to_string())
        .or_insert(0) += 1;
}

pub fn count_deposit_mismatch() {
    lock().deposits_mismatch_total += 1;
}

pub fn count_broadcast_ok(chain: &str) {
    *lock()
        .broadcasts_ok_total
        .entry(chain.to_string())
        .or_insert(0) += 1;
}

pub fn count_broadcast_failed(chain: &str) {
    *lock()
        .broadcasts_failed_total
        .entry(chain.to_string())
        .or_insert(0) += 1;
}

pub fn count_sweep_failed() {
    lock().sweeps_failed_total += 1;
}

pub fn count_provisioning_success() {
    lock().provisioning_success_total += 1;
}

pub fn count_provisioning_exhausted() {
    lock().provisioning_exhausted_total += 1;
}

fn push_labeled(out: &mut String, name: &str, help: &str, map: &HashMap<String, u64>) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
    for (chain, v) in map.iter() {
        out.push_str(&format!("{}{{chain=\"{}\"}} {}\n", name, chain, v));
    }
}

fn push_scalar(out: &mut String, name: &str, help: &str, v: u64) {
    out.push_str(&format!("# HELP {} {}\n", name, help));
    out.push_str(&format!("# TYPE {} counter\n", name));
    out.push_str(&format!("{} {}\n", name, v));
}

pub fn render_prometheus() -> String {
    let s = lock();
    let mut out = String::new();

    push_labeled(
        &mut out,
        "vaultcore_poll_cycles_total",
        "Deposit monitor poll cycles per chain",
        &s.poll_cycles_total,
    );
    push_labeled(
        &mut out,
        "vaultcore_poll_errors_total",
        "Deposit monitor poll failures per chain",
        &s.poll_errors_total,
    );
    push_labeled(
        &mut out,
        "vaultcore_deposits_detected_total",
        "Balance increases detected per chain",
        &s.deposits_detected_total,
    );
    push_labeled(
        &mut out,
        "vaultcore_deposits_settled_total",
        "Deposits credited per chain",
        &s.deposits_settled_total,
    );
    push_scalar(
        &mut out,
        "vaultcore_deposits_mismatch_total",
        "Deposits where discovered amount diverged from declared",
        s.deposits_mismatch_total,
    );
    push_labeled(
        &mut out,
        "vaultcore_broadcasts_ok_total",
        "Successful transaction broadcasts per chain",
        &s.broadcasts_ok_total,
    );
    push_labeled(
        &mut out,
        "vaultcore_broadcasts_failed_total",
        "Failed transaction broadcasts per chain",
        &s.broadcasts_failed_total,
    );
    push_scalar(
        &mut out,
        "vaultcore_sweeps_failed_total",
        "Best-effort sweeps that failed",
        s.sweeps_failed_total,
    );
    push_scalar(
        &mut out,
        "vaultcore_provisioning_success_total",
        "Wallet provisioning jobs completed",
        s.provisioning_success_total,
    );
    push_scalar(
        &mut out,
        "vaultcore_provisioning_exhausted_total",
        "Wallet provisioning jobs that exhausted retries",
        s.provisioning_exhausted_total,
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        count_poll_cycle("eth");
        count_broadcast_ok("eth");
        count_sweep_failed();

        let rendered = render_prometheus();
        assert!(rendered.contains("vaultcore_poll_cycles_total{chain=\"eth\"}"));
        assert!(rendered.contains("vaultcore_sweeps_failed_total"));
    }
}
