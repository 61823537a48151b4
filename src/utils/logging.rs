//! 日志系统
//!
//! 基于 tracing 的日志初始化：
//! - `RUST_LOG` 优先，其次使用配置中的级别
//! - 格式：json / pretty / compact
//! - 输出：stdout、stderr 或文件路径，可以同时配置多个

use crate::Result;
use crate::api::error::ConfigError;
use crate::config::settings::LoggingConfig;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// 初始化日志系统
///
/// ```no_run
/// use modelforge::config::settings::LoggingConfig;
/// use modelforge::utils::logging::init_logging;
///
/// let config = LoggingConfig {
///     level: "debug".to_string(),
///     format: "json".to_string(),
///     output: vec!["stderr".to_string(), "logs/modelforge.log".to_string()],
/// };
///
/// init_logging(&config).unwrap();
/// ```
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(&config.level);

    let outputs: Vec<&str> = if config.output.is_empty() {
        vec!["stderr"]
    } else {
        config.output.iter().map(String::as_str).collect()
    };

    let layers = outputs
        .iter()
        .map(|output| output_layer(&config.format, output))
        .collect::<Result<Vec<_>>>()?;

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(
        "Logging initialized: level={}, format={}, output={}",
        config.level,
        config.format,
        outputs.join(",")
    );

    Ok(())
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(level).unwrap_or_else(|_| {
            // 日志系统尚未初始化，只能直接写 stderr
            eprintln!("Warning: Invalid log level '{}', using 'info' as default", level);
            EnvFilter::new("info")
        })
    })
}

fn output_layer(format: &str, output: &str) -> Result<BoxedLayer> {
    match output {
        "stdout" => Ok(format_layer(format, std::io::stdout)),
        "stderr" => Ok(format_layer(format, std::io::stderr)),
        file_path => {
            let path = Path::new(file_path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::Invalid(format!("Failed to create log directory: {}", e)))?;
            }

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| ConfigError::Invalid(format!("Failed to open log file {}: {}", file_path, e)))?;

            // 文件中不写 ANSI 颜色
            Ok(format_layer_with_ansi(format, Mutex::new(file), false))
        }
    }
}

fn format_layer<W>(format: &str, writer: W) -> BoxedLayer
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    format_layer_with_ansi(format, writer, true)
}

fn format_layer_with_ansi<W>(format: &str, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'writer> fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    match format.to_lowercase().as_str() {
        "json" => fmt::layer()
            .with_writer(writer)
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .boxed(),
        "pretty" | "human" => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .boxed(),
        _ => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .compact()
            .with_target(true)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_level_falls_back() {
        // 只验证不会 panic；RUST_LOG 存在时优先使用它
        let _ = build_filter("definitely=not=a=level");
    }

    #[test]
    fn test_file_output_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs/modelforge.log");

        assert!(output_layer("json", path.to_str().unwrap()).is_ok());
        assert!(path.exists());
    }

    #[test]
    fn test_init_logging_once() {
        // 同一进程中只能成功初始化一次，第二次返回配置错误
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        let second = init_logging(&config);
        assert!(second.is_err());
    }
}
