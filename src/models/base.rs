//! 模型实体
//!
//! `Model` 把标签、元数据和一棵文件系统子树绑定在一起：
//! - 创建时位于独占的临时目录中，可写
//! - `save` 之后指向仓库中的已提交目录，只读
//! - `custom_objects` 与 runnable 类都是按需计算、每个实例只计算一次的缓存

use crate::Result;
use crate::api::error::{ForgeError, ModelError, StoreError};
use crate::core::registry::ModuleRegistry;
use crate::inference::runnable::RunnableClass;
use crate::models::metadata::{ModelInfo, MODEL_YAML_FILENAME};
use crate::models::tag::Tag;
use crate::models::types::*;
use crate::storage::fs::mirror;
use crate::storage::manager::{Store, StoreItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::OnceCell;

/// 附加对象文件名，只有非空时才写出
pub const CUSTOM_OBJECTS_FILENAME: &str = "custom_objects.json";

/// 默认 API 版本
pub const DEFAULT_API_VERSION: &str = "v1";

/// 模型仓库
pub type ModelStore = Store<Model>;

/// 模型文件系统根目录
#[derive(Debug, Clone)]
enum ModelFs {
    /// 创建后、提交前的临时目录，独占可写
    Staging(Arc<TempDir>),
    /// 仓库中已提交的目录，只读
    Committed(PathBuf),
}

impl ModelFs {
    fn root(&self) -> &Path {
        match self {
            ModelFs::Staging(dir) => dir.path(),
            ModelFs::Committed(path) => path,
        }
    }
}

/// 创建模型所需的参数
#[derive(Debug, Clone)]
pub struct NewModel {
    /// 仓库中的模型名称，版本自动生成
    pub name: String,
    /// 负责保存/加载的模块名
    pub module: String,
    pub api_version: String,
    pub signatures: ModelSignatures,
    /// 用户标签，例如 team=nlp, stage=dev
    pub labels: BTreeMap<String, String>,
    /// 加载选项，例如 `partial_kwargs`
    pub options: ModelOptions,
    /// 随模型保存的附加对象，例如分词器配置
    pub custom_objects: CustomObjects,
    /// 训练上下文或评估指标
    pub metadata: BTreeMap<String, AnyValue>,
    pub context: ModelContext,
}

impl NewModel {
    pub fn new(name: impl Into<String>, module: impl Into<String>, context: ModelContext) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            signatures: ModelSignatures::new(),
            labels: BTreeMap::new(),
            options: ModelOptions::new(),
            custom_objects: CustomObjects::new(),
            metadata: BTreeMap::new(),
            context,
        }
    }

    pub fn with_signature(mut self, method: impl Into<String>, signature: ModelSignature) -> Self {
        self.signatures.insert(method.into(), signature);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: AnyValue) -> Self {
        self.options.insert(key, value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: AnyValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_custom_object(mut self, key: impl Into<String>, value: AnyValue) -> Self {
        self.custom_objects.insert(key.into(), value);
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }
}

/// 模型实体
#[derive(Debug)]
pub struct Model {
    tag: Tag,
    fs: ModelFs,
    info: Arc<ModelInfo>,
    custom_objects: OnceCell<CustomObjects>,
    runnable: OnceCell<Arc<RunnableClass>>,
}

impl Model {
    /// 在临时目录中创建新模型，尚未写入任何仓库
    pub fn create(spec: NewModel) -> Result<Self> {
        let tag = Tag::new(&spec.name, None)?.make_new_version();

        let dir = tempfile::Builder::new()
            .prefix(&format!("modelforge_model_{}_", tag.name()))
            .tempdir()
            .map_err(|e| StoreError::io(std::env::temp_dir(), e))?;

        let info = ModelInfo {
            tag: tag.clone(),
            module: spec.module,
            api_version: spec.api_version,
            labels: spec.labels,
            options: spec.options,
            metadata: spec.metadata,
            context: spec.context,
            signatures: spec.signatures,
            creation_time: Utc::now(),
        };

        tracing::debug!("Created {} in {}", tag, dir.path().display());
        Ok(Self {
            tag,
            fs: ModelFs::Staging(Arc::new(dir)),
            info: Arc::new(info),
            custom_objects: OnceCell::new_with(Some(spec.custom_objects)),
            runnable: OnceCell::new(),
        })
    }

    /// 从已持久化的目录读取模型
    pub async fn from_persisted(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let descriptor = root.join(MODEL_YAML_FILENAME);

        let content = tokio::fs::read_to_string(&descriptor).await.map_err(|_| {
            ModelError::Corrupt(format!(
                "Failed to load model because {} does not contain a '{}'",
                root.display(),
                MODEL_YAML_FILENAME
            ))
        })?;
        let info = ModelInfo::from_yaml(&content)?;

        let model = Self {
            tag: info.tag.clone(),
            fs: ModelFs::Committed(root),
            info: Arc::new(info),
            custom_objects: OnceCell::new(),
            runnable: OnceCell::new(),
        };

        if !model.validate() {
            return Err(ModelError::Corrupt(format!(
                "Failed to load model because it contains an invalid '{MODEL_YAML_FILENAME}'"
            ))
            .into());
        }

        Ok(model)
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.info.creation_time
    }

    /// 模型根目录
    pub fn path(&self) -> &Path {
        self.fs.root()
    }

    /// 模型目录中某个条目的路径
    pub fn path_of(&self, item: impl AsRef<Path>) -> PathBuf {
        let item = item.as_ref();
        let relative = item.strip_prefix("/").unwrap_or(item);
        self.fs.root().join(relative)
    }

    /// 是否已提交到仓库（提交后只读）
    pub fn is_committed(&self) -> bool {
        matches!(self.fs, ModelFs::Committed(_))
    }

    /// 只检查描述文件是否存在
    pub fn validate(&self) -> bool {
        self.path_of(MODEL_YAML_FILENAME).is_file()
    }

    /// 附加对象，首次访问时从磁盘读取
    pub async fn custom_objects(&self) -> Result<&CustomObjects> {
        self.custom_objects
            .get_or_try_init(|| async {
                let path = self.path_of(CUSTOM_OBJECTS_FILENAME);
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok::<_, ForgeError>(CustomObjects::new());
                }

                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| StoreError::io(&path, e))?;
                serde_json::from_slice::<CustomObjects>(&bytes).map_err(|e| {
                    ForgeError::from(ModelError::Corrupt(format!("Invalid custom objects found: {e}")))
                })
            })
            .await
    }

    /// 把描述文件和附加对象写入模型目录
    pub async fn flush(&self) -> Result<()> {
        if self.is_committed() {
            return Err(ModelError::ReadOnly(self.tag.to_string()).into());
        }

        let descriptor = self.path_of(MODEL_YAML_FILENAME);
        tokio::fs::write(&descriptor, self.info.to_yaml()?)
            .await
            .map_err(|e| StoreError::io(&descriptor, e))?;

        let custom_objects = self.custom_objects().await?;
        if !custom_objects.is_empty() {
            let path = self.path_of(CUSTOM_OBJECTS_FILENAME);
            let bytes = serde_json::to_vec_pretty(custom_objects)
                .map_err(|e| ModelError::InvalidField(format!("custom objects: {e}")))?;
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
        }

        Ok(())
    }

    /// 把模型提交到仓库，并把根目录切换到已提交位置
    pub async fn save(&mut self, store: &ModelStore) -> Result<&mut Self> {
        if !self.validate() {
            tracing::warn!("Failed to create Model for {}, not saving.", self.tag);
            return Err(ModelError::Persistence(
                "Failed to save Model because it was invalid".to_string(),
            )
            .into());
        }

        let staging = store.stage(&self.tag).await?;
        if let Err(e) = mirror(self.path(), staging.path()).await {
            store.discard(staging).await?;
            return Err(e);
        }

        let tag = match store.commit(&staging).await {
            Ok(tag) => tag,
            Err(e) => {
                store.discard(staging).await?;
                return Err(e);
            }
        };

        let committed = store
            .item_path(&tag)
            .ok_or_else(|| StoreError::NotFound(tag.to_string()))?;
        self.fs = ModelFs::Committed(committed);
        // runnable 类记录了旧的根目录
        self.runnable = OnceCell::new();

        tracing::info!("Successfully saved {}", self);
        Ok(self)
    }

    /// 解析 `module` 对应的工厂并构建 runnable 类；每个实例只构建一次
    pub async fn to_runnable(&self, modules: &ModuleRegistry) -> Result<Arc<RunnableClass>> {
        let class = self
            .runnable
            .get_or_try_init(|| async {
                let factory = modules.resolve(&self.info.module).await?;
                let class = factory.get_runnable(self)?;
                tracing::debug!(
                    "Resolved runnable for {} via module '{}' ({} methods)",
                    self.tag,
                    self.info.module,
                    class.methods().len()
                );
                Ok::<_, ForgeError>(Arc::new(class))
            })
            .await?;

        Ok(Arc::clone(class))
    }

    /// 返回选项被覆盖的新模型，共享标签和根目录，不修改自身
    pub fn with_options<I, K>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, AnyValue)>,
        K: Into<String>,
    {
        Self {
            tag: self.tag.clone(),
            fs: self.fs.clone(),
            info: Arc::new(self.info.with_options(overrides)),
            custom_objects: OnceCell::new_with(self.custom_objects.get().cloned()),
            runnable: OnceCell::new(),
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag.hash(state);
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Model(tag=\"{}\", path=\"{}\")", self.tag, self.path().display())
    }
}

#[async_trait]
impl StoreItem for Model {
    const DESCRIPTOR: &'static str = MODEL_YAML_FILENAME;

    fn tag(&self) -> &Tag {
        &self.tag
    }

    fn creation_time(&self) -> DateTime<Utc> {
        self.info.creation_time
    }

    async fn from_fs(root: PathBuf) -> Result<Self> {
        Model::from_persisted(root).await
    }
}

/// 把模型从一个仓库复制到另一个；目标已存在该标签时什么也不做
pub async fn copy_model(tag: &Tag, src: &ModelStore, dst: &ModelStore) -> Result<()> {
    match dst.get(tag).await {
        Ok(_) => return Ok(()),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    let mut model = src.get(tag).await?;
    model.save(dst).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demo_spec() -> NewModel {
        NewModel::new("demo", "modelforge.testing", ModelContext::new("testing"))
            .with_signature("predict", ModelSignature::batchable(0))
            .with_label("stage", "dev")
            .with_custom_object("vocab", json!(["a", "b"]))
    }

    #[tokio::test]
    async fn test_create_is_pure() {
        let model = Model::create(demo_spec()).unwrap();
        assert!(!model.is_committed());
        assert!(!model.validate());
        assert!(model.tag().version().is_some());
        assert_eq!(model.custom_objects().await.unwrap()["vocab"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_save_without_descriptor_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        let mut model = Model::create(demo_spec()).unwrap();

        let err = model.save(&store).await.unwrap_err();
        assert!(matches!(err, ForgeError::Model(ModelError::Persistence(_))));
        assert_eq!(err.to_string(), "Model error: Failed to save Model because it was invalid");

        // 补上描述文件后可以重试
        model.flush().await.unwrap();
        model.save(&store).await.unwrap();
        assert!(model.is_committed());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());

        let mut model = Model::create(demo_spec()).unwrap();
        tokio::fs::write(model.path_of("weights.bin"), [7u8; 16]).await.unwrap();
        model.flush().await.unwrap();
        model.save(&store).await.unwrap();

        assert!(model.path().starts_with(temp_dir.path()));
        assert!(model.flush().await.is_err());

        let loaded = store.get(model.tag()).await.unwrap();
        assert_eq!(loaded, model);
        assert_eq!(loaded.info(), model.info());
        assert_eq!(std::fs::read(loaded.path_of("/weights.bin")).unwrap(), vec![7u8; 16]);
        assert_eq!(loaded.custom_objects().await.unwrap()["vocab"], json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_empty_custom_objects_are_not_written() {
        let spec = NewModel::new("plain", "modelforge.testing", ModelContext::new("testing"));
        let model = Model::create(spec).unwrap();
        model.flush().await.unwrap();
        assert!(!model.path_of(CUSTOM_OBJECTS_FILENAME).exists());
    }

    #[tokio::test]
    async fn test_from_persisted_requires_descriptor() {
        let temp_dir = TempDir::new().unwrap();
        let err = Model::from_persisted(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, ForgeError::Model(ModelError::Corrupt(_))));

        std::fs::write(temp_dir.path().join(MODEL_YAML_FILENAME), "name: [unterminated").unwrap();
        let err = Model::from_persisted(temp_dir.path()).await.unwrap_err();
        assert!(matches!(err, ForgeError::Model(ModelError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_with_options_returns_new_model() {
        let model = Model::create(demo_spec()).unwrap();
        let tuned = model.with_options([("device", json!("gpu"))]);

        assert_eq!(tuned, model);
        assert_eq!(tuned.path(), model.path());
        assert_eq!(tuned.info().options.get("device"), Some(&json!("gpu")));
        assert!(model.info().options.get("device").is_none());
    }

    #[tokio::test]
    async fn test_copy_model_between_stores() {
        let temp_dir = TempDir::new().unwrap();
        let src = ModelStore::new(temp_dir.path().join("src"));
        let dst = ModelStore::new(temp_dir.path().join("dst"));

        let mut model = Model::create(demo_spec()).unwrap();
        model.flush().await.unwrap();
        model.save(&src).await.unwrap();

        copy_model(model.tag(), &src, &dst).await.unwrap();
        copy_model(model.tag(), &src, &dst).await.unwrap();

        assert_eq!(dst.list(None).await.unwrap(), vec![model.tag().clone()]);
        assert!(src.get(model.tag()).await.is_ok());
    }
}
