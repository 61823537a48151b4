//! 框架适配层抽象
//!
//! 把具体的机器学习框架隐藏在三个 trait 之后：
//! - `ModelLoader`：按设备加载模型目录
//! - `LoadedModel`：已加载的模型，按名称解析方法句柄
//! - `ModelMethod`：可调用的方法句柄
//!
//! 方法返回的错误是 `BoxError`，分发层原样透传。

use crate::Result;
use crate::api::error::BoxError;
use crate::inference::params::{Arg, Params};
use crate::inference::tensor::Tensor;
use crate::models::metadata::ModelInfo;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// 计算设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Gpu { index: u32 },
}

impl Device {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, Device::Gpu { .. })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "/device:CPU:0"),
            Device::Gpu { index } => write!(f, "/device:GPU:{index}"),
        }
    }
}

/// 方法句柄
#[async_trait]
pub trait ModelMethod: Send + Sync {
    /// 调用方法；数值参数已经转换为原生张量
    async fn call(&self, params: Params<Arg>) -> std::result::Result<Tensor, BoxError>;
}

/// 已加载的模型
#[async_trait]
pub trait LoadedModel: Send + Sync {
    /// 按名称解析方法句柄，不存在时返回 `None`
    fn method(&self, name: &str) -> Option<Arc<dyn ModelMethod>>;

    /// 释放会话/设备资源
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// 模型加载器
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// 框架名称，仅用于日志
    fn framework(&self) -> &str;

    /// 可用设备
    fn devices(&self) -> Vec<Device> {
        vec![Device::Cpu]
    }

    /// 在指定设备上加载模型目录
    async fn load(&self, path: &Path, info: &ModelInfo, device: Device) -> Result<Arc<dyn LoadedModel>>;
}

/// 用同步闭包实现的方法句柄
pub struct FnMethod<F> {
    f: F,
}

impl<F> FnMethod<F>
where
    F: Fn(Params<Arg>) -> std::result::Result<Tensor, BoxError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Arc<dyn ModelMethod> {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F> ModelMethod for FnMethod<F>
where
    F: Fn(Params<Arg>) -> std::result::Result<Tensor, BoxError> + Send + Sync,
{
    async fn call(&self, params: Params<Arg>) -> std::result::Result<Tensor, BoxError> {
        (self.f)(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "/device:CPU:0");
        assert_eq!(Device::Gpu { index: 1 }.to_string(), "/device:GPU:1");
        assert!(Device::Gpu { index: 0 }.is_accelerator());
    }

    #[tokio::test]
    async fn test_fn_method() {
        let method = FnMethod::new(|params: Params<Arg>| Ok(Tensor::scalar_f64(params.len() as f64)));
        let out = method.call(Params::new().arg(1.0).kwarg("k", 2.0)).await.unwrap();
        assert_eq!(out.to_f64_vec(), vec![2.0]);
    }
}
