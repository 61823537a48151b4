//! 批处理容器与负载编解码
//!
//! 把 N 个独立调用的输入合并成一次批量调用，再把结果拆回 N 份。
//! 容器按批数据的具体类型注册（`TypeId` 为键），在进程启动时填充。
//!
//! `split_points` 是各输入在 `batch_dim` 上长度的前缀和，从 0 开始，长度 N+1。

use crate::Result;
use crate::api::error::CodecError;
use crate::inference::tensor::{NumericArray, Tensor};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// 负载中记录容器名称的键
pub const CONTAINER_KEY: &str = "container";

/// 单个子批次的序列化结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub data: Vec<u8>,
    /// 在 `batch_dim` 上的长度
    pub batch_size: usize,
    pub metadata: BTreeMap<String, String>,
}

impl Payload {
    pub fn new(container: &str, data: Vec<u8>, batch_size: usize) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(CONTAINER_KEY.to_string(), container.to_string());
        Self {
            data,
            batch_size,
            metadata,
        }
    }

    /// 编码该负载的容器名称
    pub fn container(&self) -> Option<&str> {
        self.metadata.get(CONTAINER_KEY).map(String::as_str)
    }
}

/// 批处理容器
pub trait DataContainer: Send + Sync + 'static {
    type Batch: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// 沿 `batch_dim` 合并，返回合并结果和 `split_points`
    fn batches_to_batch(&self, batches: &[Self::Batch], batch_dim: usize) -> Result<(Self::Batch, Vec<usize>)>;

    /// 按 `split_points` 沿 `batch_dim` 拆分
    fn batch_to_batches(&self, batch: &Self::Batch, split_points: &[usize], batch_dim: usize) -> Result<Vec<Self::Batch>>;

    fn to_payload(&self, batch: &Self::Batch, batch_dim: usize) -> Result<Payload>;

    fn from_payload(&self, payload: &Payload) -> Result<Self::Batch>;

    fn batch_to_payloads(&self, batch: &Self::Batch, split_points: &[usize], batch_dim: usize) -> Result<Vec<Payload>> {
        self.batch_to_batches(batch, split_points, batch_dim)?
            .iter()
            .map(|sub| self.to_payload(sub, batch_dim))
            .collect()
    }

    fn from_batch_payloads(&self, payloads: &[Payload], batch_dim: usize) -> Result<(Self::Batch, Vec<usize>)> {
        let batches = payloads
            .iter()
            .map(|payload| self.from_payload(payload))
            .collect::<Result<Vec<_>>>()?;
        self.batches_to_batch(&batches, batch_dim)
    }
}

/// 由各段长度计算 `split_points`
pub fn split_points_of(extents: impl IntoIterator<Item = usize>) -> Vec<usize> {
    let mut points = vec![0];
    let mut acc = 0;
    for extent in extents {
        acc += extent;
        points.push(acc);
    }
    points
}

/// 由 `split_points` 计算各段长度
pub fn segment_sizes(split_points: &[usize]) -> Result<Vec<usize>> {
    match split_points.first() {
        Some(0) => {}
        _ => {
            return Err(CodecError::InvalidSplit(format!(
                "split points must start at 0, got {split_points:?}"
            ))
            .into());
        }
    }

    split_points
        .windows(2)
        .map(|w| {
            w[1].checked_sub(w[0]).ok_or_else(|| {
                CodecError::InvalidSplit(format!("split points must be non-decreasing, got {split_points:?}")).into()
            })
        })
        .collect()
}

fn batch_extent(shape: &[usize], batch_dim: usize) -> Result<usize> {
    // 0 维数据只能作为单个样本
    if shape.is_empty() {
        return Ok(1);
    }
    shape.get(batch_dim).copied().ok_or_else(|| {
        CodecError::ShapeMismatch(format!("batch dimension {batch_dim} out of range for shape {shape:?}")).into()
    })
}

fn check_container(payload: &Payload, expected: &str) -> Result<()> {
    match payload.container() {
        Some(name) if name == expected => Ok(()),
        other => Err(CodecError::UnsupportedType(format!(
            "payload encoded by '{}' cannot be decoded by '{}'",
            other.unwrap_or("unknown"),
            expected
        ))
        .into()),
    }
}

fn encode_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| CodecError::Serialization(e.to_string()).into())
}

fn decode_bincode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Serialization(e.to_string()).into())
}

/// 原生张量容器
#[derive(Debug, Clone, Copy, Default)]
pub struct TensorContainer;

impl DataContainer for TensorContainer {
    type Batch = Tensor;

    fn name(&self) -> &'static str {
        "tensor"
    }

    fn batches_to_batch(&self, batches: &[Tensor], batch_dim: usize) -> Result<(Tensor, Vec<usize>)> {
        let extents = batches
            .iter()
            .map(|t| t.dim(batch_dim))
            .collect::<Result<Vec<_>>>()?;
        Ok((Tensor::concat(batches, batch_dim)?, split_points_of(extents)))
    }

    fn batch_to_batches(&self, batch: &Tensor, split_points: &[usize], batch_dim: usize) -> Result<Vec<Tensor>> {
        batch.split(&segment_sizes(split_points)?, batch_dim)
    }

    fn to_payload(&self, batch: &Tensor, batch_dim: usize) -> Result<Payload> {
        let batch_size = batch_extent(batch.shape(), batch_dim)?;
        Ok(Payload::new(self.name(), encode_bincode(batch)?, batch_size))
    }

    fn from_payload(&self, payload: &Payload) -> Result<Tensor> {
        check_container(payload, self.name())?;
        let tensor: Tensor = decode_bincode(&payload.data)?;
        // 反序列化不经过构造函数，重新校验字节数
        Tensor::from_bytes(tensor.shape().to_vec(), tensor.dtype(), tensor.data().to_vec())
    }
}

/// f64 数组容器
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericArrayContainer;

impl DataContainer for NumericArrayContainer {
    type Batch = NumericArray;

    fn name(&self) -> &'static str {
        "numeric_array"
    }

    fn batches_to_batch(&self, batches: &[NumericArray], batch_dim: usize) -> Result<(NumericArray, Vec<usize>)> {
        let extents = batches
            .iter()
            .map(|a| a.dim(batch_dim))
            .collect::<Result<Vec<_>>>()?;
        Ok((NumericArray::concat(batches, batch_dim)?, split_points_of(extents)))
    }

    fn batch_to_batches(&self, batch: &NumericArray, split_points: &[usize], batch_dim: usize) -> Result<Vec<NumericArray>> {
        batch.split(&segment_sizes(split_points)?, batch_dim)
    }

    fn to_payload(&self, batch: &NumericArray, batch_dim: usize) -> Result<Payload> {
        let batch_size = batch_extent(batch.shape(), batch_dim)?;
        Ok(Payload::new(self.name(), encode_bincode(batch)?, batch_size))
    }

    fn from_payload(&self, payload: &Payload) -> Result<NumericArray> {
        check_container(payload, self.name())?;
        let array: NumericArray = decode_bincode(&payload.data)?;
        NumericArray::new(array.data().to_vec(), array.shape())
    }
}

/// JSON 行列表容器，只能沿第 0 维合并
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonListContainer;

impl JsonListContainer {
    fn check_dim(batch_dim: usize) -> Result<()> {
        if batch_dim != 0 {
            return Err(CodecError::ShapeMismatch(format!(
                "JSON row lists can only be batched along dimension 0, got {batch_dim}"
            ))
            .into());
        }
        Ok(())
    }
}

impl DataContainer for JsonListContainer {
    type Batch = Vec<serde_json::Value>;

    fn name(&self) -> &'static str {
        "json_list"
    }

    fn batches_to_batch(
        &self,
        batches: &[Vec<serde_json::Value>],
        batch_dim: usize,
    ) -> Result<(Vec<serde_json::Value>, Vec<usize>)> {
        Self::check_dim(batch_dim)?;
        let split_points = split_points_of(batches.iter().map(Vec::len));
        Ok((batches.concat(), split_points))
    }

    fn batch_to_batches(
        &self,
        batch: &Vec<serde_json::Value>,
        split_points: &[usize],
        batch_dim: usize,
    ) -> Result<Vec<Vec<serde_json::Value>>> {
        Self::check_dim(batch_dim)?;
        let sizes = segment_sizes(split_points)?;
        if sizes.iter().sum::<usize>() != batch.len() {
            return Err(CodecError::InvalidSplit(format!(
                "split points {split_points:?} do not cover {} rows",
                batch.len()
            ))
            .into());
        }

        let mut rest = batch.as_slice();
        Ok(sizes
            .into_iter()
            .map(|size| {
                let (head, tail) = rest.split_at(size);
                rest = tail;
                head.to_vec()
            })
            .collect())
    }

    fn to_payload(&self, batch: &Vec<serde_json::Value>, batch_dim: usize) -> Result<Payload> {
        Self::check_dim(batch_dim)?;
        let data = serde_json::to_vec(batch).map_err(|e| CodecError::Serialization(e.to_string()))?;
        Ok(Payload::new(self.name(), data, batch.len()))
    }

    fn from_payload(&self, payload: &Payload) -> Result<Vec<serde_json::Value>> {
        check_container(payload, self.name())?;
        serde_json::from_slice(&payload.data).map_err(|e| CodecError::Serialization(e.to_string()).into())
    }
}

/// 容器注册表
///
/// 以批数据类型为键；未注册的类型返回 `UnsupportedType`。
#[derive(Default)]
pub struct ContainerRegistry {
    containers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    names: BTreeMap<&'static str, &'static str>,
}

impl ContainerRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册了内置容器的注册表
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TensorContainer);
        registry.register(NumericArrayContainer);
        registry.register(JsonListContainer);
        registry
    }

    /// 注册容器，同一类型的旧容器被替换
    pub fn register<C: DataContainer>(&mut self, container: C) {
        let name = container.name();
        let erased: Arc<dyn DataContainer<Batch = C::Batch>> = Arc::new(container);
        self.containers.insert(TypeId::of::<C::Batch>(), Box::new(erased));
        self.names.insert(std::any::type_name::<C::Batch>(), name);
        tracing::debug!("Registered data container '{}' for {}", name, std::any::type_name::<C::Batch>());
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.containers.contains_key(&TypeId::of::<T>())
    }

    /// (类型名, 容器名) 列表
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.names.iter().map(|(ty, name)| (*ty, *name)).collect()
    }

    pub fn find<T: Send + Sync + 'static>(&self) -> Result<Arc<dyn DataContainer<Batch = T>>> {
        self.containers
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn DataContainer<Batch = T>>>())
            .cloned()
            .ok_or_else(|| CodecError::UnsupportedType(std::any::type_name::<T>().to_string()).into())
    }

    pub fn merge<T: Send + Sync + 'static>(&self, batches: &[T], batch_dim: usize) -> Result<(T, Vec<usize>)> {
        self.find::<T>()?.batches_to_batch(batches, batch_dim)
    }

    pub fn split<T: Send + Sync + 'static>(&self, batch: &T, split_points: &[usize], batch_dim: usize) -> Result<Vec<T>> {
        self.find::<T>()?.batch_to_batches(batch, split_points, batch_dim)
    }

    pub fn encode<T: Send + Sync + 'static>(&self, sub_batch: &T, batch_dim: usize) -> Result<Payload> {
        self.find::<T>()?.to_payload(sub_batch, batch_dim)
    }

    pub fn decode<T: Send + Sync + 'static>(&self, payload: &Payload) -> Result<T> {
        self.find::<T>()?.from_payload(payload)
    }

    pub fn encode_batch<T: Send + Sync + 'static>(
        &self,
        batch: &T,
        split_points: &[usize],
        batch_dim: usize,
    ) -> Result<Vec<Payload>> {
        self.find::<T>()?.batch_to_payloads(batch, split_points, batch_dim)
    }

    pub fn decode_batch<T: Send + Sync + 'static>(&self, payloads: &[Payload], batch_dim: usize) -> Result<(T, Vec<usize>)> {
        self.find::<T>()?.from_batch_payloads(payloads, batch_dim)
    }
}

impl std::fmt::Debug for ContainerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.names.iter()).finish()
    }
}
