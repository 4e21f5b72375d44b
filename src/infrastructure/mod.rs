//! 基础设施层：数据库、加密、链提供方

pub mod db;
pub mod encryption;
pub mod provider_registry;
