//! Velum 工具集
//!
//! 提供日志初始化与 TOML 配置加载，供各个 crate 共享。

pub mod config;
pub mod init_log;
