//! Runnable 分发
//!
//! `RunnableClass` 由模块工厂根据模型构建，描述有哪些方法、如何加载。
//! `instantiate` 选定设备并加载一次模型，得到 `Runnable` 实例。
//!
//! 实例的方法句柄缓存和已加载模型都归实例私有；并发分发时每条路径持有自己的实例，
//! 对底层调用本身不加锁。

use crate::Result;
use crate::api::error::{DispatchError, ForgeError};
use crate::config::RunnableConfig;
use crate::inference::backend::{Device, LoadedModel, ModelLoader, ModelMethod};
use crate::inference::params::{Arg, Params};
use crate::inference::tensor::NumericArray;
use crate::models::base::Model;
use crate::models::metadata::ModelInfo;
use crate::models::tag::Tag;
use crate::models::types::BatchDim;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 保存时写入 options 的固定关键字参数：`{ method: { kwarg: value } }`
pub const PARTIAL_KWARGS_OPTION: &str = "partial_kwargs";

/// 单个方法的分发配置
#[derive(Debug, Clone, PartialEq)]
pub struct RunnableMethod {
    pub name: String,
    pub batchable: bool,
    pub batch_dim: BatchDim,
    /// 每次调用都会补上的关键字参数；调用方显式传入的同名参数优先
    pub partial_kwargs: BTreeMap<String, Arg>,
}

/// Runnable 类
pub struct RunnableClass {
    tag: Tag,
    model_path: PathBuf,
    info: Arc<ModelInfo>,
    methods: BTreeMap<String, RunnableMethod>,
    loader: Arc<dyn ModelLoader>,
}

impl std::fmt::Debug for RunnableClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableClass")
            .field("tag", &self.tag)
            .field("framework", &self.loader.framework())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RunnableClass {
    /// 根据模型签名和 `partial_kwargs` 选项构建
    pub fn new(model: &Model, loader: Arc<dyn ModelLoader>) -> Result<Self> {
        let info = model.info();
        let mut partials = parse_partial_kwargs(info)?;

        let methods = info
            .signatures
            .iter()
            .map(|(name, signature)| {
                let method = RunnableMethod {
                    name: name.clone(),
                    batchable: signature.batchable,
                    batch_dim: signature.batch_dim,
                    partial_kwargs: partials.remove(name).unwrap_or_default(),
                };
                (name.clone(), method)
            })
            .collect();

        for name in partials.keys() {
            tracing::warn!(
                "Ignoring partial kwargs for '{}' on {}: no such signature",
                name,
                model.tag()
            );
        }

        Ok(Self {
            tag: model.tag().clone(),
            model_path: model.path().to_path_buf(),
            info: Arc::new(info.clone()),
            methods,
            loader,
        })
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn methods(&self) -> &BTreeMap<String, RunnableMethod> {
        &self.methods
    }

    pub fn method(&self, name: &str) -> Result<&RunnableMethod> {
        self.methods.get(name).ok_or_else(|| {
            DispatchError::MissingMethod {
                model: self.tag.to_string(),
                method: name.to_string(),
            }
            .into()
        })
    }

    /// 选择设备：偏好加速器时取加载器报告的第一个 GPU，否则第一个设备
    fn select_device(&self, config: &RunnableConfig) -> Device {
        let devices = self.loader.devices();
        let accelerator = devices.iter().copied().find(Device::is_accelerator);

        match accelerator {
            Some(device) if config.prefer_accelerator => device,
            _ => devices
                .iter()
                .copied()
                .find(|d| !d.is_accelerator())
                .or_else(|| devices.first().copied())
                .unwrap_or(Device::Cpu),
        }
    }

    /// 选定设备并加载模型，每个实例只加载一次
    pub async fn instantiate(self: &Arc<Self>, config: &RunnableConfig) -> Result<Runnable> {
        let device = self.select_device(config);
        tracing::info!(
            "Loading {} with {} on {}",
            self.tag,
            self.loader.framework(),
            device
        );

        let model = self.loader.load(&self.model_path, &self.info, device).await?;

        Ok(Runnable {
            class: Arc::clone(self),
            device,
            model,
            methods_cache: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }
}

fn parse_partial_kwargs(info: &ModelInfo) -> Result<BTreeMap<String, BTreeMap<String, Arg>>> {
    let Some(value) = info.options.get(PARTIAL_KWARGS_OPTION) else {
        return Ok(BTreeMap::new());
    };

    let invalid = || {
        ForgeError::from(DispatchError::InvalidArgument(format!(
            "option '{PARTIAL_KWARGS_OPTION}' must map method names to keyword arguments"
        )))
    };

    let methods = value.as_object().ok_or_else(invalid)?;
    methods
        .iter()
        .map(|(method, kwargs)| -> Result<(String, BTreeMap<String, Arg>)> {
            let kwargs = kwargs
                .as_object()
                .ok_or_else(invalid)?
                .iter()
                .map(|(k, v)| Arg::try_from(v).map(|arg| (k.clone(), arg)))
                .collect::<Result<BTreeMap<_, _>>>()?;
            Ok((method.clone(), kwargs))
        })
        .collect()
}

/// 已解析并缓存的方法
struct BoundMethod {
    handle: Arc<dyn ModelMethod>,
    partial_kwargs: BTreeMap<String, Arg>,
}

/// Runnable 实例
///
/// 底层资源只在 `close` 中释放。`release` 是异步的，`Drop` 里无法等待它，
/// 所以未关闭就被丢弃的实例只会记录一条警告，资源由后端自行回收。
pub struct Runnable {
    class: Arc<RunnableClass>,
    device: Device,
    model: Arc<dyn LoadedModel>,
    methods_cache: RwLock<HashMap<String, Arc<BoundMethod>>>,
    closed: AtomicBool,
}

impl Runnable {
    pub fn class(&self) -> &Arc<RunnableClass> {
        &self.class
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 已缓存的方法句柄数
    pub fn cached_methods(&self) -> usize {
        self.methods_cache.read().len()
    }

    /// 调用方法
    ///
    /// 未声明的方法在触碰底层模型之前就失败；底层方法的错误原样透传。
    pub async fn run(&self, method: &str, params: Params<Arg>) -> Result<NumericArray> {
        let config = self.class.method(method)?;
        if self.is_closed() {
            return Err(DispatchError::Closed(self.class.tag.to_string()).into());
        }

        let bound = self.bound_method(config)?;

        let mut params = params.map(Arg::into_native);
        for (key, value) in &bound.partial_kwargs {
            params
                .kwargs
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let output = bound.handle.call(params).await.map_err(ForgeError::Backend)?;
        Ok(output.to_numeric())
    }

    fn bound_method(&self, config: &RunnableMethod) -> Result<Arc<BoundMethod>> {
        if let Some(bound) = self.methods_cache.read().get(&config.name) {
            return Ok(Arc::clone(bound));
        }

        let handle = self.model.method(&config.name).ok_or_else(|| DispatchError::UnresolvedMethod {
            model: self.class.tag.to_string(),
            method: config.name.clone(),
        })?;
        tracing::debug!("Resolved method '{}' on {}", config.name, self.class.tag);

        let resolved = Arc::new(BoundMethod {
            handle,
            partial_kwargs: config.partial_kwargs.clone(),
        });

        // 并发首次解析时保留先写入的那个
        let mut cache = self.methods_cache.write();
        let bound = cache.entry(config.name.clone()).or_insert(resolved);
        Ok(Arc::clone(bound))
    }

    /// 释放底层资源；重复调用不报错
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.methods_cache.write().clear();
        self.model.release().await?;
        tracing::info!("Released {} on {}", self.class.tag, self.device);
        Ok(())
    }
}

impl Drop for Runnable {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::warn!(
                "Runnable for {} on {} dropped without close, backend resources were not released",
                self.class.tag,
                self.device
            );
        }
    }
}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("tag", &self.class.tag)
            .field("device", &self.device)
            .field("closed", &self.is_closed())
            .finish()
    }
}
