//! 张量数据
//!
//! `Tensor` 是模型方法的原生输入/输出：形状 + 数据类型 + 扁平化的小端字节。
//! `NumericArray` 是调用方看到的 f64 数组。两者都按行主序存储，
//! 批处理的合并/拆分在同一套布局函数上完成。

use crate::Result;
use crate::api::error::CodecError;
use serde::{Deserialize, Serialize};

/// 张量数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32位浮点数
    F32,
    /// 64位浮点数
    F64,
    /// 32位整数
    I32,
    /// 64位整数
    I64,
    /// 无符号8位整数
    U8,
}

impl DType {
    /// 单个元素占用的字节数
    pub fn size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::U8 => 1,
        }
    }
}

/// 原生张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// 从原始字节构造，字节数必须与形状匹配
    pub fn from_bytes(shape: Vec<usize>, dtype: DType, data: Vec<u8>) -> Result<Self> {
        let expected = checked_mul(numel(&shape)?, dtype.size(), &shape)?;
        if data.len() != expected {
            return Err(CodecError::ShapeMismatch(format!(
                "shape {:?} of {:?} needs {} bytes, got {}",
                shape,
                dtype,
                expected,
                data.len()
            ))
            .into());
        }
        Ok(Self { shape, dtype, data })
    }

    pub fn from_f32(values: &[f32], shape: &[usize]) -> Result<Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(shape.to_vec(), DType::F32, data)
    }

    pub fn from_f64(values: &[f64], shape: &[usize]) -> Result<Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(shape.to_vec(), DType::F64, data)
    }

    pub fn from_i32(values: &[i32], shape: &[usize]) -> Result<Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(shape.to_vec(), DType::I32, data)
    }

    pub fn from_i64(values: &[i64], shape: &[usize]) -> Result<Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_bytes(shape.to_vec(), DType::I64, data)
    }

    /// 0 维 f64 张量
    pub fn scalar_f64(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            dtype: DType::F64,
            data: value.to_le_bytes().to_vec(),
        }
    }

    /// 0 维 i64 张量
    pub fn scalar_i64(value: i64) -> Self {
        Self {
            shape: Vec::new(),
            dtype: DType::I64,
            data: value.to_le_bytes().to_vec(),
        }
    }

    /// 0 维 u8 张量，布尔值用 0/1 表示
    pub fn scalar_bool(value: bool) -> Self {
        Self {
            shape: Vec::new(),
            dtype: DType::U8,
            data: vec![u8::from(value)],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    /// 指定维度的大小
    pub fn dim(&self, dim: usize) -> Result<usize> {
        dim_size(&self.shape, dim)
    }

    /// 按元素解码为 f64
    pub fn to_f64_vec(&self) -> Vec<f64> {
        let size = self.dtype.size();
        self.data
            .chunks_exact(size)
            .map(|chunk| match self.dtype {
                DType::F32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                DType::F64 => f64::from_le_bytes(le_bytes8(chunk)),
                DType::I32 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
                DType::I64 => i64::from_le_bytes(le_bytes8(chunk)) as f64,
                DType::U8 => chunk[0] as f64,
            })
            .collect()
    }

    pub fn to_numeric(&self) -> NumericArray {
        NumericArray {
            shape: self.shape.clone(),
            data: self.to_f64_vec(),
        }
    }

    /// 沿 `dim` 拼接，所有张量的数据类型和其余维度必须一致
    pub fn concat(parts: &[Tensor], dim: usize) -> Result<Tensor> {
        let first = parts
            .first()
            .ok_or_else(|| CodecError::ShapeMismatch("cannot concatenate zero tensors".to_string()))?;
        if let Some(other) = parts.iter().find(|t| t.dtype != first.dtype) {
            return Err(CodecError::ShapeMismatch(format!(
                "cannot concatenate {:?} with {:?}",
                first.dtype, other.dtype
            ))
            .into());
        }

        let views: Vec<(&[usize], &[u8])> = parts.iter().map(|t| (t.shape(), t.data())).collect();
        let (shape, data) = concat_along(&views, dim, first.dtype.size())?;
        Ok(Tensor {
            shape,
            dtype: first.dtype,
            data,
        })
    }

    /// 沿 `dim` 按 `sizes` 切分，`sizes` 之和必须等于该维度大小
    pub fn split(&self, sizes: &[usize], dim: usize) -> Result<Vec<Tensor>> {
        Ok(split_along(&self.shape, &self.data, sizes, dim, self.dtype.size())?
            .into_iter()
            .map(|(shape, data)| Tensor {
                shape,
                dtype: self.dtype,
                data,
            })
            .collect())
    }
}

impl From<NumericArray> for Tensor {
    fn from(array: NumericArray) -> Self {
        array.to_tensor()
    }
}

/// f64 数组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl NumericArray {
    pub fn new(data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        let expected = numel(shape)?;
        if data.len() != expected {
            return Err(CodecError::ShapeMismatch(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            ))
            .into());
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// 一维数组
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// 从嵌套的 JSON 数字数组构造，各层长度必须一致
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let mut shape = Vec::new();
        let mut cursor = value;
        while let serde_json::Value::Array(items) = cursor {
            shape.push(items.len());
            match items.first() {
                Some(first) => cursor = first,
                None => break,
            }
        }

        let mut data = Vec::with_capacity(numel(&shape)?);
        flatten_json(value, &shape, &mut data)?;
        Self::new(data, &shape)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn dim(&self, dim: usize) -> Result<usize> {
        dim_size(&self.shape, dim)
    }

    pub fn to_tensor(&self) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            dtype: DType::F64,
            data: self.data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn concat(parts: &[NumericArray], dim: usize) -> Result<NumericArray> {
        let views: Vec<(&[usize], &[f64])> = parts.iter().map(|a| (a.shape(), a.data())).collect();
        let (shape, data) = concat_along(&views, dim, 1)?;
        Ok(NumericArray { shape, data })
    }

    pub fn split(&self, sizes: &[usize], dim: usize) -> Result<Vec<NumericArray>> {
        Ok(split_along(&self.shape, &self.data, sizes, dim, 1)?
            .into_iter()
            .map(|(shape, data)| NumericArray { shape, data })
            .collect())
    }
}

impl From<Tensor> for NumericArray {
    fn from(tensor: Tensor) -> Self {
        tensor.to_numeric()
    }
}

/// 元素个数；乘积溢出 `usize` 的形状视为非法
fn numel(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| overflow(shape))
}

fn checked_mul(a: usize, b: usize, shape: &[usize]) -> Result<usize> {
    a.checked_mul(b).ok_or_else(|| overflow(shape))
}

fn overflow(shape: &[usize]) -> crate::ForgeError {
    CodecError::ShapeMismatch(format!("shape {shape:?} overflows the addressable size")).into()
}

fn dim_size(shape: &[usize], dim: usize) -> Result<usize> {
    shape.get(dim).copied().ok_or_else(|| {
        CodecError::ShapeMismatch(format!("dimension {dim} out of range for shape {shape:?}")).into()
    })
}

fn le_bytes8(chunk: &[u8]) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&chunk[..8]);
    bytes
}

fn flatten_json(value: &serde_json::Value, shape: &[usize], out: &mut Vec<f64>) -> Result<()> {
    match (value, shape.split_first()) {
        (serde_json::Value::Array(items), Some((&len, rest))) if items.len() == len => {
            items.iter().try_for_each(|item| flatten_json(item, rest, out))
        }
        (serde_json::Value::Number(n), None) => {
            let v = n
                .as_f64()
                .ok_or_else(|| CodecError::ShapeMismatch(format!("{n} is not representable as f64")))?;
            out.push(v);
            Ok(())
        }
        (serde_json::Value::Bool(b), None) => {
            out.push(if *b { 1.0 } else { 0.0 });
            Ok(())
        }
        _ => Err(CodecError::ShapeMismatch(format!(
            "ragged or non-numeric array, expected shape {shape:?} at {value}"
        ))
        .into()),
    }
}

/// 行主序布局中的 (外层块数, 单块内层长度)
fn blocks(shape: &[usize], dim: usize, unit: usize) -> Result<(usize, usize)> {
    let outer = numel(&shape[..dim])?;
    let inner = checked_mul(numel(&shape[dim + 1..])?, unit, shape)?;
    Ok((outer, inner))
}

/// 扁平数据长度必须与形状一致，否则后续的偏移计算会越界
fn check_len<E>(shape: &[usize], data: &[E], unit: usize) -> Result<()> {
    let expected = checked_mul(numel(shape)?, unit, shape)?;
    if data.len() != expected {
        return Err(CodecError::ShapeMismatch(format!(
            "shape {shape:?} needs {expected} units, got {}",
            data.len()
        ))
        .into());
    }
    Ok(())
}

/// 沿 `dim` 拼接扁平数据；`unit` 是每个元素占用的存储单元数
pub(crate) fn concat_along<E: Copy>(
    parts: &[(&[usize], &[E])],
    dim: usize,
    unit: usize,
) -> Result<(Vec<usize>, Vec<E>)> {
    let (first_shape, _) = parts
        .first()
        .ok_or_else(|| CodecError::ShapeMismatch("cannot concatenate zero arrays".to_string()))?;
    if dim >= first_shape.len() {
        return Err(CodecError::ShapeMismatch(format!(
            "dimension {dim} out of range for shape {first_shape:?}"
        ))
        .into());
    }

    for (shape, data) in parts {
        check_len(shape, data, unit)?;
        let compatible = shape.len() == first_shape.len()
            && shape
                .iter()
                .zip(first_shape.iter())
                .enumerate()
                .all(|(axis, (a, b))| axis == dim || a == b);
        if !compatible {
            return Err(CodecError::ShapeMismatch(format!(
                "cannot concatenate {shape:?} with {first_shape:?} along dimension {dim}"
            ))
            .into());
        }
    }

    let mut shape = first_shape.to_vec();
    shape[dim] = parts
        .iter()
        .try_fold(0usize, |acc, (s, _)| acc.checked_add(s[dim]))
        .ok_or_else(|| overflow(first_shape))?;
    let total_len = checked_mul(numel(&shape)?, unit, &shape)?;

    let (outer, _) = blocks(first_shape, dim, unit)?;
    let mut chunks = Vec::with_capacity(parts.len());
    for (part_shape, _) in parts {
        let (_, inner) = blocks(part_shape, dim, unit)?;
        chunks.push(checked_mul(part_shape[dim], inner, part_shape)?);
    }

    let mut data = Vec::with_capacity(total_len);
    for o in 0..outer {
        for ((_, part_data), &chunk) in parts.iter().zip(&chunks) {
            data.extend_from_slice(&part_data[o * chunk..(o + 1) * chunk]);
        }
    }

    Ok((shape, data))
}

/// 沿 `dim` 切分扁平数据
pub(crate) fn split_along<E: Copy>(
    shape: &[usize],
    data: &[E],
    sizes: &[usize],
    dim: usize,
    unit: usize,
) -> Result<Vec<(Vec<usize>, Vec<E>)>> {
    let extent = dim_size(shape, dim)?;
    check_len(shape, data, unit)?;
    let total = sizes.iter().try_fold(0usize, |acc, &s| acc.checked_add(s));
    if total != Some(extent) {
        return Err(CodecError::InvalidSplit(format!(
            "sizes {sizes:?} do not sum to dimension {dim} of {shape:?} ({extent})"
        ))
        .into());
    }

    let (outer, inner) = blocks(shape, dim, unit)?;
    let mut pieces = Vec::with_capacity(sizes.len());
    let mut start = 0;
    for &size in sizes {
        let mut piece_shape = shape.to_vec();
        piece_shape[dim] = size;

        // 总长度已校验，下面的乘积都不超过 data.len()
        let mut piece = Vec::with_capacity(outer * size * inner);
        for o in 0..outer {
            let offset = (o * extent + start) * inner;
            piece.extend_from_slice(&data[offset..offset + size * inner]);
        }

        pieces.push((piece_shape, piece));
        start += size;
    }

    Ok(pieces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_bytes_checks_length() {
        assert!(Tensor::from_bytes(vec![2, 3], DType::F32, vec![0; 24]).is_ok());
        assert!(Tensor::from_bytes(vec![2, 3], DType::F32, vec![0; 23]).is_err());
    }

    #[test]
    fn test_concat_and_split_along_inner_dim() {
        let a = Tensor::from_i64(&[1, 2, 3, 4], &[2, 2]).unwrap();
        let b = Tensor::from_i64(&[5, 6], &[2, 1]).unwrap();

        let merged = Tensor::concat(&[a.clone(), b.clone()], 1).unwrap();
        assert_eq!(merged.shape(), &[2, 3]);
        assert_eq!(merged.to_f64_vec(), vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);

        let parts = merged.split(&[2, 1], 1).unwrap();
        assert_eq!(parts, vec![a, b]);
    }

    #[test]
    fn test_concat_rejects_mismatched_shapes() {
        let a = Tensor::from_f32(&[1.0, 2.0], &[1, 2]).unwrap();
        let b = Tensor::from_f32(&[1.0, 2.0, 3.0], &[1, 3]).unwrap();
        assert!(Tensor::concat(&[a.clone(), b], 0).is_err());

        let c = Tensor::from_f64(&[1.0, 2.0], &[1, 2]).unwrap();
        assert!(Tensor::concat(&[a, c], 0).is_err());
    }

    #[test]
    fn test_split_sizes_must_cover_dimension() {
        let array = NumericArray::new(vec![1.0, 2.0, 3.0], &[3]).unwrap();
        let err = array.split(&[1, 1], 0).unwrap_err();
        assert!(matches!(err, crate::ForgeError::Codec(CodecError::InvalidSplit(_))));
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let huge = vec![1usize << 32, 1usize << 32];
        let err = Tensor::from_bytes(huge.clone(), DType::F64, Vec::new()).unwrap_err();
        assert!(matches!(err, crate::ForgeError::Codec(CodecError::ShapeMismatch(_))));

        let err = NumericArray::new(Vec::new(), &[usize::MAX, 2]).unwrap_err();
        assert!(matches!(err, crate::ForgeError::Codec(CodecError::ShapeMismatch(_))));

        let empty: &[f64] = &[];
        assert!(split_along(&huge, empty, &[0, 1, 1 << 32], 0, 1).is_err());
        assert!(concat_along(&[(huge.as_slice(), empty)], 0, 1).is_err());
    }

    #[test]
    fn test_numeric_from_json() {
        let array = NumericArray::from_json(&json!([[1, 2], [3.5, 4]])).unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.data(), &[1.0, 2.0, 3.5, 4.0]);

        assert!(NumericArray::from_json(&json!([[1, 2], [3]])).is_err());
        assert!(NumericArray::from_json(&json!(["a"])).is_err());
    }

    #[test]
    fn test_tensor_to_numeric() {
        let tensor = Tensor::from_f32(&[0.5, 1.5], &[2]).unwrap();
        assert_eq!(tensor.to_numeric(), NumericArray::from_vec(vec![0.5, 1.5]));
        assert_eq!(Tensor::scalar_bool(true).to_f64_vec(), vec![1.0]);
    }
}
