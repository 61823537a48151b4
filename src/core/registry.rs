//! 模块注册表
//!
//! 把模型描述文件中的 `module` 字符串映射到 runnable 工厂。
//! 注册表在进程初始化时填充，查找失败返回 `DispatchError::UnknownModule`。

use crate::Result;
use crate::api::error::DispatchError;
use crate::inference::backend::ModelLoader;
use crate::inference::runnable::RunnableClass;
use crate::models::base::Model;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Runnable 工厂
pub trait RunnableFactory: Send + Sync {
    /// 为模型构建 runnable 类
    fn get_runnable(&self, model: &Model) -> Result<RunnableClass>;
}

impl<F> RunnableFactory for F
where
    F: Fn(&Model) -> Result<RunnableClass> + Send + Sync,
{
    fn get_runnable(&self, model: &Model) -> Result<RunnableClass> {
        self(model)
    }
}

/// 基于加载器的工厂：方法来自模型签名，固定参数来自 `partial_kwargs` 选项
pub struct LoaderFactory {
    loader: Arc<dyn ModelLoader>,
}

impl LoaderFactory {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self { loader }
    }
}

impl RunnableFactory for LoaderFactory {
    fn get_runnable(&self, model: &Model) -> Result<RunnableClass> {
        RunnableClass::new(model, Arc::clone(&self.loader))
    }
}

/// 模块注册表
///
/// 可以在多个分发路径间共享（克隆共享同一张表）。
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: Arc<RwLock<HashMap<String, Arc<dyn RunnableFactory>>>>,
}

impl ModuleRegistry {
    /// 创建新的模块注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂，同名模块被替换
    pub async fn register(&self, module: impl Into<String>, factory: impl RunnableFactory + 'static) {
        let module = module.into();
        let replaced = self
            .factories
            .write()
            .await
            .insert(module.clone(), Arc::new(factory))
            .is_some();

        if replaced {
            tracing::warn!("Replaced runnable factory for module '{}'", module);
        } else {
            tracing::info!("Registered runnable factory for module '{}'", module);
        }
    }

    /// 注册一个加载器，包装成 `LoaderFactory`
    pub async fn register_loader(&self, module: impl Into<String>, loader: Arc<dyn ModelLoader>) {
        self.register(module, LoaderFactory::new(loader)).await;
    }

    /// 查找模块对应的工厂
    pub async fn resolve(&self, module: &str) -> Result<Arc<dyn RunnableFactory>> {
        self.factories
            .read()
            .await
            .get(module)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownModule(module.to_string()).into())
    }

    pub async fn is_registered(&self, module: &str) -> bool {
        self.factories.read().await.contains_key(module)
    }

    /// 列出已注册的模块名（排序）
    pub async fn list(&self) -> Vec<String> {
        let mut modules: Vec<String> = self.factories.read().await.keys().cloned().collect();
        modules.sort();
        modules
    }

    /// 移除模块
    pub async fn unregister(&self, module: &str) -> bool {
        let removed = self.factories.write().await.remove(module).is_some();
        if removed {
            tracing::info!("Unregistered runnable factory for module '{}'", module);
        }
        removed
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry").finish_non_exhaustive()
    }
}
