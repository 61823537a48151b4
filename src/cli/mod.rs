pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ModelForge CLI
#[derive(Parser)]
#[command(name = "modelforge")]
#[command(about = "Versioned model artifact store")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 覆盖配置中的仓库根目录
    #[arg(short, long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI 命令
#[derive(Subcommand)]
pub enum Command {
    /// 列出模型（按创建时间从新到旧）
    List {
        /// 只列出该名称的版本
        name: Option<String>,
    },
    /// 打印模型描述文件
    Get {
        /// `name` 或 `name:version`
        tag: String,
    },
    /// 删除模型
    Delete {
        /// `name` 或 `name:version`
        tag: String,
    },
}
