//! VaultCore - 托管多链钱包与清算引擎
//!
//! HD 派生、充值监控、清算入账、多链交易执行、钱包开通。

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod metrics;
pub mod repository;
pub mod service;

// 重新导出常用类型
pub use app_state::AppState;
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        app_state::AppState,
        domain::{ChainDescriptor, ChainFamily, ChainRegistry},
        error::{AppError, AppErrorCode},
    };
}
