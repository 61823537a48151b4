//! 构建脚本
//!
//! 记录编译器版本，作为模型上下文中 `runtime_version` 的默认值。

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=RUSTC");

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let version = Command::new(&rustc)
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            println!("cargo:warning=Could not determine rustc version, recording 'unknown'");
            "unknown".to_string()
        });

    println!("cargo:rustc-env=MODELFORGE_RUSTC_VERSION={}", version);
}
