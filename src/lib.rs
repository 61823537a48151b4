//! ModelForge - versioned model artifact store
//!
//! 以 `name:version` 标签管理模型目录，提交过程原子可见；
//! 通过模块注册表把模型分发到可插拔的 runnable，
//! 并在批处理容器的帮助下把多次调用合并成一次批量调用。

#![warn(clippy::all)]

pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod inference;
pub mod models;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use crate::api::error::{ForgeError, Result};
pub use crate::config::Config;

/// ModelForge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 编译本 crate 的 rustc 版本
pub const RUNTIME_VERSION: &str = env!("MODELFORGE_RUSTC_VERSION");
