//! 文件系统辅助函数
//!
//! 目录镜像、原子写入、目录大小统计。

use crate::Result;
use crate::api::error::StoreError;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 把 `src` 目录逐字节镜像到 `dst`（dst 不存在时创建）
pub async fn mirror(src: &Path, dst: &Path) -> Result<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();

    tokio::task::spawn_blocking(move || mirror_blocking(&src, &dst))
        .await
        .map_err(|e| StoreError::io("mirror task", std::io::Error::other(e)))?
}

fn mirror_blocking(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| StoreError::io(dst, e))?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            StoreError::io(path, e.into())
        })?;

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| StoreError::io(entry.path(), std::io::Error::other(e)))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| StoreError::io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| StoreError::io(entry.path(), e))?;
        }
    }

    Ok(())
}

/// 先写临时文件再 rename，读者不会看到写了一半的内容
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::now_v7().simple()));

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e).into());
    }

    Ok(())
}

/// 计算目录大小
pub async fn dir_size(path: &Path) -> Result<u64> {
    let mut total_size = 0u64;
    let mut stack: Vec<PathBuf> = vec![path.to_path_buf()];

    while let Some(current_path) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&current_path)
            .await
            .map_err(|e| StoreError::io(&current_path, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&current_path, e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StoreError::io(entry.path(), e))?;

            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                total_size += metadata.len();
            }
        }
    }

    Ok(total_size)
}
