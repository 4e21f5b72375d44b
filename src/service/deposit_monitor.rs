// 充值监控
//
// 每条链一个轮询任务，按链配置的间隔巡检全部活跃充值地址，
// 对比数据库缓存余额与链上已确认余额。两道并发防线：
//   进程内 in-flight 集合挡住同地址的重叠巡检；
//   数据库余额 CAS 挡住多实例竞争（见 DepositRepository）。

use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::{
    domain::ChainRegistry,
    metrics,
    repository::WalletRepository,
    service::{
        balance_checker::BalanceChecker,
        deposit_settlement::{DepositSettlement, DetectedIncrease},
    },
};

pub struct DepositMonitor {
    wallets: WalletRepository,
    checker: Arc<BalanceChecker>,
    settlement: Arc<DepositSettlement>,
    registry: Arc<ChainRegistry>,
    in_flight: Mutex<HashSet<Uuid>>,
}

impl DepositMonitor {
    pub fn new(
        wallets: WalletRepository,
        checker: Arc<BalanceChecker>,
        settlement: Arc<DepositSettlement>,
        registry: Arc<ChainRegistry>,
    ) -> Self {
        Self {
            wallets,
            checker,
            settlement,
            registry,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// 为每条已配置的链启动一个轮询任务
    ///
    /// stop 信号翻转为 true 时所有任务在当前周期结束后退出。
    pub fn spawn_all(
        self: Arc<Self>,
        chains: &[String],
        stop: watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        for chain in chains {
            let descriptor = match self.registry.get(chain) {
                Some(d) => d.clone(),
                None => {
                    tracing::warn!(chain = %chain, "Configured chain not in registry, skipping monitor");
                    continue;
                }
            };

            let monitor = Arc::clone(&self);
            let mut stop = stop.clone();
            let chain = chain.clone();

            handles.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(descriptor.poll_interval_secs));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                tracing::info!(
                    chain = %chain,
                    interval_secs = descriptor.poll_interval_secs,
                    "Deposit monitor started"
                );

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = monitor.run_cycle(&chain).await {
                                metrics::count_poll_error(&chain);
                                tracing::error!(chain = %chain, error = %e, "Poll cycle failed");
                            }
                        }
                        _ = stop.changed() => {
                            if *stop.borrow() {
                                tracing::info!(chain = %chain, "Deposit monitor stopping");
                                break;
                            }
                        }
                    }
                }
            }));
        }

        handles
    }

    /// 执行一轮巡检（单独公开，供测试与手动触发）
    pub async fn run_cycle(&self, chain: &str) -> Result<()> {
        metrics::count_poll_cycle(chain);

        let addresses = self.wallets.list_watch_addresses(chain).await?;
        tracing::debug!(chain = %chain, count = addresses.len(), "Polling deposit addresses");

        for address in addresses {
            // 同地址的上一轮还在清算中则跳过
            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(address.id) {
                    tracing::debug!(address = %address.address, "Address settlement in flight, skipping");
                    continue;
                }
            }

            let address_id = address.id;
            if let Err(e) = self.check_address(chain, address).await {
                tracing::warn!(chain = %chain, error = %e, "Address check failed");
            }

            self.in_flight.lock().await.remove(&address_id);
        }

        Ok(())
    }

    async fn check_address(&self, chain: &str, address: crate::domain::WalletAddress) -> Result<()> {
        let onchain = self
            .checker
            .confirmed_balance(chain, &address.address)
            .await?;

        if onchain > address.balance {
            // 轮询间隔内的多笔转账合并为一个增量清算
            self.settlement
                .settle(DetectedIncrease {
                    new_balance: onchain,
                    intended_amount: None,
                    address,
                })
                .await?;
        } else if onchain < address.balance {
            // 出金（归集/提现）后的余额回落，直接回写
            tracing::info!(
                chain = %chain,
                address = %address.address,
                old = %address.balance,
                new = %onchain,
                "Balance decreased, syncing"
            );
            self.wallets.set_address_balance(address.id, onchain).await?;
        } else {
            self.wallets.touch_address_synced(address.id).await?;
        }

        Ok(())
    }
}
