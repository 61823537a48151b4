// 默认配置常量

pub const DEFAULT_STORE_PATH: &str = "./modelforge/models";
pub const STAGING_DIR_NAME: &str = ".staging";
pub const LATEST_FILE_NAME: &str = "latest";
/// 超过该时长未修改的暂存目录视为崩溃残留
pub const STALE_STAGING_AGE: std::time::Duration = std::time::Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_PREFER_ACCELERATOR: bool = true;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "compact";
pub const DEFAULT_LOG_OUTPUT: &str = "stderr";

pub const ENV_PREFIX: &str = "MODELFORGE";
