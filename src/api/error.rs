use thiserror::Error;

/// 底层模型调用返回的原始错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// ModelForge 错误类型
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// 底层模型方法的失败，原样透传，不做包装
    #[error(transparent)]
    Backend(BoxError),
}

impl ForgeError {
    /// 把底层模型返回的错误包装成透传错误
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        ForgeError::Backend(err.into())
    }

    /// 是否为 NotFound
    pub fn is_not_found(&self) -> bool {
        matches!(self, ForgeError::Store(StoreError::NotFound(_)))
    }
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(String),

    /// 暂存内容缺少或无法解析描述文件
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// 模型错误
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid tag: {0}")]
    InvalidTag(String),

    /// 已提交的模型内容无法解析
    #[error("Corrupt model: {0}")]
    Corrupt(String),

    #[error("{0}")]
    Persistence(String),

    #[error("Model is read-only: {0}")]
    ReadOnly(String),

    #[error("Invalid model field: {0}")]
    InvalidField(String),
}

/// 分发错误
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Method '{method}' is not declared for model {model}")]
    MissingMethod { model: String, method: String },

    #[error("Loaded model {model} does not expose method '{method}'")]
    UnresolvedMethod { model: String, method: String },

    #[error("No runnable factory registered for module '{0}'")]
    UnknownModule(String),

    #[error("Runnable for {0} has been closed")]
    Closed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// 批处理容器 / 负载编解码错误
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("No data container registered for type {0}")]
    UnsupportedType(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid split points: {0}")]
    InvalidSplit(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ForgeError>;
