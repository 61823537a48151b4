//! 调用参数
//!
//! `Params<T>` 是位置参数 + 关键字参数的容器；`Arg` 是参数值。
//! 数值参数在进入模型方法前统一转换为原生 `Tensor`，其余类型原样传递。

use crate::Result;
use crate::api::error::DispatchError;
use crate::inference::tensor::{NumericArray, Tensor};
use std::collections::BTreeMap;

/// 位置参数 + 关键字参数
#[derive(Debug, Clone, PartialEq)]
pub struct Params<T> {
    pub args: Vec<T>,
    pub kwargs: BTreeMap<String, T>,
}

impl<T> Default for Params<T> {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }
}

impl<T> Params<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_args(args: Vec<T>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<T>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<T>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.kwargs.get(key)
    }

    pub fn len(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    /// 对每个参数值应用 `f`
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Params<U> {
        Params {
            args: self.args.into_iter().map(&mut f).collect(),
            kwargs: self.kwargs.into_iter().map(|(k, v)| (k, f(v))).collect(),
        }
    }

    pub fn try_map<U>(self, mut f: impl FnMut(T) -> Result<U>) -> Result<Params<U>> {
        Ok(Params {
            args: self.args.into_iter().map(&mut f).collect::<Result<_>>()?,
            kwargs: self
                .kwargs
                .into_iter()
                .map(|(k, v)| f(v).map(|v| (k, v)))
                .collect::<Result<_>>()?,
        })
    }
}

/// 参数值
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// 原生张量
    Tensor(Tensor),
    /// 数值数组，调用前转换为张量
    Array(NumericArray),
    Scalar(f64),
    Int(i64),
    Bool(bool),
    /// 非数值参数，原样传递
    Text(String),
}

impl Arg {
    /// 把数值参数转换为原生张量
    pub fn into_native(self) -> Arg {
        match self {
            Arg::Array(array) => Arg::Tensor(array.to_tensor()),
            Arg::Scalar(v) => Arg::Tensor(Tensor::scalar_f64(v)),
            Arg::Int(v) => Arg::Tensor(Tensor::scalar_i64(v)),
            Arg::Bool(v) => Arg::Tensor(Tensor::scalar_bool(v)),
            other => other,
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Arg::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    /// 读取标量值；单元素张量/数组也视为标量
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Arg::Scalar(v) => Some(*v),
            Arg::Int(v) => Some(*v as f64),
            Arg::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Arg::Tensor(t) if t.numel() == 1 => t.to_f64_vec().first().copied(),
            Arg::Array(a) if a.data().len() == 1 => a.data().first().copied(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Tensor> for Arg {
    fn from(tensor: Tensor) -> Self {
        Arg::Tensor(tensor)
    }
}

impl From<NumericArray> for Arg {
    fn from(array: NumericArray) -> Self {
        Arg::Array(array)
    }
}

impl From<Vec<f64>> for Arg {
    fn from(values: Vec<f64>) -> Self {
        Arg::Array(NumericArray::from_vec(values))
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Scalar(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Text(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Text(v)
    }
}

impl TryFrom<&serde_json::Value> for Arg {
    type Error = crate::ForgeError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(Arg::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Arg::Int(i)),
                None => n.as_f64().map(Arg::Scalar).ok_or_else(|| {
                    DispatchError::InvalidArgument(format!("unsupported number {n}")).into()
                }),
            },
            serde_json::Value::String(s) => Ok(Arg::Text(s.clone())),
            serde_json::Value::Array(_) => NumericArray::from_json(value)
                .map(Arg::Array)
                .map_err(|e| DispatchError::InvalidArgument(e.to_string()).into()),
            other => Err(DispatchError::InvalidArgument(format!(
                "cannot pass {other} as an argument"
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_args_become_tensors() {
        let params: Params<Arg> = Params::new()
            .arg(vec![1.0, 2.0])
            .arg("prompt")
            .kwarg("threshold", 0.5)
            .kwarg("top_k", 3i64);

        let native = params.map(Arg::into_native);
        assert!(native.args[0].as_tensor().is_some());
        assert_eq!(native.args[1], Arg::Text("prompt".to_string()));
        assert_eq!(native.get("threshold").and_then(Arg::as_f64), Some(0.5));
        assert_eq!(native.get("top_k").and_then(Arg::as_f64), Some(3.0));
    }

    #[test]
    fn test_from_json_values() {
        assert_eq!(Arg::try_from(&json!(0.5)).unwrap(), Arg::Scalar(0.5));
        assert_eq!(Arg::try_from(&json!(2)).unwrap(), Arg::Int(2));
        assert_eq!(Arg::try_from(&json!("x")).unwrap(), Arg::Text("x".to_string()));
        assert!(matches!(Arg::try_from(&json!([1, 2])).unwrap(), Arg::Array(_)));
        assert!(Arg::try_from(&json!({"a": 1})).is_err());
        assert!(Arg::try_from(&json!(null)).is_err());
    }

    #[test]
    fn test_try_map_stops_at_first_error() {
        let params: Params<serde_json::Value> = Params::new().arg(json!(1)).kwarg("bad", json!(null));
        assert!(params.try_map(|v| Arg::try_from(&v)).is_err());
    }
}
