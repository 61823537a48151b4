//! 模型类型定义
//!
//! 定义模型签名、批处理维度、来源上下文和加载选项。

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// 任意可序列化的值（options、metadata、custom objects 中使用）
pub type AnyValue = serde_json::Value;

/// 用户附加对象，和模型一起保存在 `custom_objects.json` 中
pub type CustomObjects = BTreeMap<String, AnyValue>;

/// 批处理维度：(输入维度, 输出维度)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BatchDim(pub usize, pub usize);

impl BatchDim {
    pub fn input(&self) -> usize {
        self.0
    }

    pub fn output(&self) -> usize {
        self.1
    }
}

impl Default for BatchDim {
    fn default() -> Self {
        BatchDim(0, 0)
    }
}

impl From<usize> for BatchDim {
    fn from(dim: usize) -> Self {
        BatchDim(dim, dim)
    }
}

impl From<(usize, usize)> for BatchDim {
    fn from((input, output): (usize, usize)) -> Self {
        BatchDim(input, output)
    }
}

// 兼容单个整数（输入输出相同）和二元组两种写法
impl<'de> Deserialize<'de> for BatchDim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Single(usize),
            Pair(usize, usize),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Single(dim) => BatchDim(dim, dim),
            Repr::Pair(input, output) => BatchDim(input, output),
        })
    }
}

/// 模型签名：模型上一个可调用的方法
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSignature {
    /// 多次调用是否可以合并成一个批次
    #[serde(default)]
    pub batchable: bool,
    /// 仅在 `batchable` 为 true 时有意义
    #[serde(default)]
    pub batch_dim: BatchDim,
    #[serde(default)]
    pub input_spec: Option<AnyValue>,
    #[serde(default)]
    pub output_spec: Option<AnyValue>,
}

impl ModelSignature {
    /// 可批处理的签名
    pub fn batchable(batch_dim: impl Into<BatchDim>) -> Self {
        Self {
            batchable: true,
            batch_dim: batch_dim.into(),
            ..Default::default()
        }
    }
}

// batchable 为 false 时不写 batch_dim；input_spec/output_spec 为空时不写
impl Serialize for ModelSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("batchable", &self.batchable)?;
        if self.batchable {
            map.serialize_entry("batch_dim", &self.batch_dim)?;
        }
        if let Some(spec) = &self.input_spec {
            map.serialize_entry("input_spec", spec)?;
        }
        if let Some(spec) = &self.output_spec {
            map.serialize_entry("output_spec", spec)?;
        }
        map.end()
    }
}

/// 方法名到签名的映射
pub type ModelSignatures = BTreeMap<String, ModelSignature>;

/// 保存模型时的环境上下文，只用于诊断
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelContext {
    pub framework_name: String,
    pub framework_versions: BTreeMap<String, String>,
    #[serde(default = "default_platform_version")]
    pub platform_version: String,
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,
}

fn default_platform_version() -> String {
    crate::VERSION.to_string()
}

fn default_runtime_version() -> String {
    crate::RUNTIME_VERSION.to_string()
}

impl ModelContext {
    pub fn new(framework_name: impl Into<String>) -> Self {
        Self {
            framework_name: framework_name.into(),
            framework_versions: BTreeMap::new(),
            platform_version: default_platform_version(),
            runtime_version: default_runtime_version(),
        }
    }

    pub fn with_framework_version(mut self, package: impl Into<String>, version: impl Into<String>) -> Self {
        self.framework_versions.insert(package.into(), version.into());
        self
    }
}

/// 模型加载选项，由 runnable 的实现解释
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelOptions(BTreeMap<String, AnyValue>);

impl ModelOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&AnyValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: AnyValue) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnyValue)> {
        self.0.iter()
    }

    /// 返回新的选项：覆盖项合并到已有选项之上，不修改自身
    pub fn with_options<I, K>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, AnyValue)>,
        K: Into<String>,
    {
        let mut merged = self.0.clone();
        merged.extend(overrides.into_iter().map(|(k, v)| (k.into(), v)));
        Self(merged)
    }
}

impl<K: Into<String>> FromIterator<(K, AnyValue)> for ModelOptions {
    fn from_iter<I: IntoIterator<Item = (K, AnyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
