use crate::config::defaults::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 主配置结构
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub runnable: RunnableConfig,
}

/// 模型仓库配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 仓库根目录
    pub base_path: PathBuf,
}

/// Runnable 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnableConfig {
    /// 加载器报告 GPU 时优先使用 GPU
    pub prefer_accelerator: bool,
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            runnable: RunnableConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

impl Default for RunnableConfig {
    fn default() -> Self {
        Self {
            prefer_accelerator: DEFAULT_PREFER_ACCELERATOR,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: DEFAULT_LOG_FORMAT.to_string(),
            output: vec![DEFAULT_LOG_OUTPUT.to_string()],
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &str) -> crate::Result<Self> {
        crate::config::loader::load_from_file(path)
    }

    /// 从环境变量加载配置
    pub fn from_env() -> crate::Result<Self> {
        crate::config::loader::load_from_env()
    }
}
