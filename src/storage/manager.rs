//! 存储管理器
//!
//! 以标签为键的文件系统仓库。目录结构：
//!
//! ```text
//! base_path/
//!   .staging/<name>-<version>-<nonce>/   暂存区，提交前对读者不可见
//!   <name>/<version>/                    已提交条目（只读）
//!   <name>/latest                        最近一次提交的版本号
//! ```
//!
//! 提交时先校验暂存区中的描述文件，再用同一文件系统内的 rename 把整个目录移入可见位置，
//! 因此条目要么完全不存在，要么带着有效描述文件完整存在。
//! 同一标签的并发提交以最后一次 rename 为准。
//!
//! 重复提交已存在的标签时，旧目录先被移出，新目录再移入，两次 rename 之间
//! 并发的 `get` 会得到 `NotFound`，而不是新旧版本之一。需要无缝替换的调用方
//! 应当提交新版本，而不是覆盖旧版本。
//!
//! 进程崩溃会在 `.staging` 下留下暂存目录，`ensure_base_path` 会清理
//! 超过 `STALE_STAGING_AGE` 的条目。

use crate::Result;
use crate::api::error::StoreError;
use crate::config::Config;
use crate::config::defaults::{LATEST_FILE_NAME, STAGING_DIR_NAME, STALE_STAGING_AGE};
use crate::models::tag::{IntoTag, Tag};
use crate::storage::fs::write_atomic;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 仓库条目 trait
///
/// 条目由一个目录和其中的描述文件组成，能从目录中重新构造。
#[async_trait]
pub trait StoreItem: Sized + Send + Sync {
    /// 描述文件名，提交前必须存在
    const DESCRIPTOR: &'static str;

    fn tag(&self) -> &Tag;

    fn creation_time(&self) -> DateTime<Utc>;

    /// 从条目目录读取
    async fn from_fs(root: PathBuf) -> Result<Self>;
}

/// 暂存区句柄
///
/// 在提交或丢弃之前由创建者独占。提交失败时目录保持原样，便于检查或重试。
#[derive(Debug)]
pub struct StagingArea {
    tag: Tag,
    path: PathBuf,
}

impl StagingArea {
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// 可写的暂存目录
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// 文件系统仓库
pub struct Store<T> {
    base_path: PathBuf,
    _item: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("base_path", &self.base_path).finish()
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self::new(&self.base_path)
    }
}

impl<T> Store<T> {
    /// 创建新的仓库
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            _item: PhantomData,
        }
    }

    /// 从配置创建
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.storage.base_path)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 确保基础目录存在，并清理过期的暂存目录
    pub async fn ensure_base_path(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| StoreError::io(&self.base_path, e))?;
        self.sweep_staging(STALE_STAGING_AGE).await?;
        Ok(())
    }

    /// 删除修改时间早于 `max_age` 的暂存条目，返回删除的数量
    ///
    /// 仍在写入的暂存区会不断刷新修改时间，不会被当作过期条目。
    pub async fn sweep_staging(&self, max_age: Duration) -> Result<usize> {
        let root = self.staging_root();
        if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
            return Ok(0);
        }

        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| StoreError::io(&root, e))?;
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&root, e))?
        {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let stale = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .map_or(max_age.is_zero(), |age| age >= max_age);
            if !stale {
                continue;
            }

            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!("Removed stale staging entry {}", path.display());
                }
                Err(e) => tracing::warn!("Failed to remove stale staging entry {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            tracing::info!("Swept {} stale staging entries under {}", removed, root.display());
        }
        Ok(removed)
    }

    /// 已提交条目的目录
    pub fn item_path(&self, tag: &Tag) -> Option<PathBuf> {
        tag.version().map(|version| self.base_path.join(tag.name()).join(version))
    }

    fn staging_root(&self) -> PathBuf {
        self.base_path.join(STAGING_DIR_NAME)
    }

    fn latest_file(&self, name: &str) -> PathBuf {
        self.base_path.join(name).join(LATEST_FILE_NAME)
    }
}

impl<T: StoreItem> Store<T> {
    /// 为 `name` 分配新版本标签并打开暂存区
    pub async fn create(&self, name: &str) -> Result<StagingArea> {
        let tag = Tag::new(name, None)?.make_new_version();
        self.stage(&tag).await
    }

    /// 为已有具体版本的标签打开暂存区
    pub async fn stage(&self, tag: &Tag) -> Result<StagingArea> {
        let version = tag
            .version()
            .ok_or_else(|| StoreError::Validation(format!("cannot stage {tag} without a version")))?;

        let path = self.staging_root().join(format!(
            "{}-{}-{}",
            tag.name(),
            version,
            uuid::Uuid::now_v7().simple()
        ));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!("Opened staging area for {} at {}", tag, path.display());
        Ok(StagingArea {
            tag: tag.clone(),
            path,
        })
    }

    /// 提交暂存区，使其对 `get` / `list` 可见
    pub async fn commit(&self, staging: &StagingArea) -> Result<Tag> {
        let tag = &staging.tag;
        let descriptor = staging.path.join(T::DESCRIPTOR);

        if !tokio::fs::try_exists(&descriptor).await.unwrap_or(false) {
            tracing::warn!("Refusing to commit {}: missing {}", tag, T::DESCRIPTOR);
            return Err(StoreError::Validation(format!(
                "staged content for {} does not contain '{}'",
                tag,
                T::DESCRIPTOR
            ))
            .into());
        }

        let item = T::from_fs(staging.path.clone()).await.map_err(|e| {
            StoreError::Validation(format!("staged '{}' for {} is invalid: {}", T::DESCRIPTOR, tag, e))
        })?;
        if item.tag() != tag {
            return Err(StoreError::Validation(format!(
                "staged '{}' describes {}, expected {}",
                T::DESCRIPTOR,
                item.tag(),
                tag
            ))
            .into());
        }

        let name_dir = self.base_path.join(tag.name());
        tokio::fs::create_dir_all(&name_dir)
            .await
            .map_err(|e| StoreError::io(&name_dir, e))?;

        let target = self
            .item_path(tag)
            .ok_or_else(|| StoreError::Validation(format!("cannot commit {tag} without a version")))?;

        // 同一标签重复提交：旧目录先移出可见位置，最后写入者生效。
        // 两次 rename 之间该标签短暂不可见
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            let replaced = self
                .staging_root()
                .join(format!("replaced-{}", uuid::Uuid::now_v7().simple()));
            tokio::fs::rename(&target, &replaced)
                .await
                .map_err(|e| StoreError::io(&target, e))?;
            if let Err(e) = tokio::fs::remove_dir_all(&replaced).await {
                tracing::warn!("Failed to clean up replaced entry {}: {}", replaced.display(), e);
            }
        }

        tokio::fs::rename(&staging.path, &target)
            .await
            .map_err(|e| StoreError::io(&target, e))?;

        if let Some(version) = tag.version() {
            write_atomic(&self.latest_file(tag.name()), version.as_bytes()).await?;
        }

        tracing::info!("Committed {} to {}", tag, self.base_path.display());
        Ok(tag.clone())
    }

    /// 丢弃未提交的暂存区
    pub async fn discard(&self, staging: StagingArea) -> Result<()> {
        if tokio::fs::try_exists(&staging.path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&staging.path)
                .await
                .map_err(|e| StoreError::io(&staging.path, e))?;
        }
        tracing::debug!("Discarded staging area for {}", staging.tag);
        Ok(())
    }

    /// 把 `name` / `name:latest` 解析为具体版本
    pub async fn resolve(&self, tag: impl IntoTag) -> Result<Tag> {
        let tag = tag.into_tag()?;
        if !tag.is_latest() {
            return Ok(tag);
        }

        let latest_file = self.latest_file(tag.name());
        let version = tokio::fs::read_to_string(&latest_file)
            .await
            .map_err(|_| StoreError::NotFound(format!("{}:latest", tag.name())))?;

        Tag::new(tag.name(), Some(version.trim()))
    }

    /// 获取条目；裸名称解析为最新版本
    pub async fn get(&self, tag: impl IntoTag) -> Result<T> {
        let tag = self.resolve(tag).await?;
        let path = self
            .item_path(&tag)
            .ok_or_else(|| StoreError::NotFound(tag.to_string()))?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(tag.to_string()).into());
        }

        T::from_fs(path).await
    }

    /// 条目是否存在
    pub async fn exists(&self, tag: impl IntoTag) -> bool {
        let Ok(tag) = self.resolve(tag).await else {
            return false;
        };
        match self.item_path(&tag) {
            Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
            None => false,
        }
    }

    /// 列出标签，按创建时间从新到旧
    pub async fn list(&self, name: Option<&str>) -> Result<Vec<Tag>> {
        Ok(self
            .list_items(name)
            .await?
            .iter()
            .map(|item| item.tag().clone())
            .collect())
    }

    /// 列出条目，按创建时间从新到旧
    pub async fn list_items(&self, name: Option<&str>) -> Result<Vec<T>> {
        let names = match name {
            Some(name) => {
                let name = Tag::new(name, None)?.name().to_string();
                if !tokio::fs::try_exists(self.base_path.join(&name)).await.unwrap_or(false) {
                    return Err(StoreError::NotFound(name).into());
                }
                vec![name]
            }
            None => self.names().await?,
        };

        let mut items = Vec::new();
        for name in names {
            items.extend(self.versions(&name).await?);
        }
        items.sort_by(|a, b| b.creation_time().cmp(&a.creation_time()));

        Ok(items)
    }

    /// 删除条目
    pub async fn delete(&self, tag: impl IntoTag) -> Result<()> {
        let tag = self.resolve(tag).await?;
        let path = self
            .item_path(&tag)
            .ok_or_else(|| StoreError::NotFound(tag.to_string()))?;

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(tag.to_string()).into());
        }

        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        tracing::info!("Deleted {}", tag);

        let latest = tokio::fs::read_to_string(self.latest_file(tag.name()))
            .await
            .ok()
            .map(|v| v.trim().to_string());
        if latest.as_deref() == tag.version() {
            self.repoint_latest(tag.name()).await?;
        }

        Ok(())
    }

    /// `latest` 指向剩余版本中最新的一个；没有剩余版本时删除名称目录
    async fn repoint_latest(&self, name: &str) -> Result<()> {
        let remaining = self.versions(name).await?;
        let newest = remaining.iter().max_by_key(|item| item.creation_time());

        match newest.and_then(|item| item.tag().version().map(str::to_string)) {
            Some(version) => {
                write_atomic(&self.latest_file(name), version.as_bytes()).await?;
                tracing::debug!("Re-pointed {}:latest to {}", name, version);
            }
            None => {
                let name_dir = self.base_path.join(name);
                tokio::fs::remove_dir_all(&name_dir)
                    .await
                    .map_err(|e| StoreError::io(&name_dir, e))?;
            }
        }

        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        self.ensure_base_path().await?;
        subdirectories(&self.base_path).await
    }

    async fn versions(&self, name: &str) -> Result<Vec<T>> {
        let name_dir = self.base_path.join(name);
        let mut items = Vec::new();

        for version in subdirectories(&name_dir).await? {
            match T::from_fs(name_dir.join(&version)).await {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!("Skipping unreadable entry {}:{}: {}", name, version, e),
            }
        }

        Ok(items)
    }
}

/// 列出非隐藏子目录名
async fn subdirectories(path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::io(path, e))?
    {
        let file_type = entry.file_type().await.map_err(|e| StoreError::io(entry.path(), e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_dir() && !name.starts_with('.') {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}
