//! 批量分发
//!
//! 可批处理的方法把 N 个调用合并成一次调用：沿输入 `batch_dim` 合并，
//! 结果沿输出 `batch_dim` 拆回 N 份。不可批处理的方法逐个调用。

use crate::Result;
use crate::inference::container::{ContainerRegistry, Payload};
use crate::inference::params::{Arg, Params};
use crate::inference::runnable::Runnable;
use crate::inference::tensor::{NumericArray, Tensor};

/// 对 N 个输入运行 `method`，按输入顺序返回 N 个结果
pub async fn run_batched(
    runnable: &Runnable,
    containers: &ContainerRegistry,
    method: &str,
    inputs: Vec<Tensor>,
) -> Result<Vec<NumericArray>> {
    let config = runnable.class().method(method)?;

    if !config.batchable {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            outputs.push(runnable.run(method, Params::from_args(vec![Arg::Tensor(input)])).await?);
        }
        return Ok(outputs);
    }

    let (merged, split_points) = containers.merge(&inputs, config.batch_dim.input())?;
    tracing::debug!(
        "Running {} calls of '{}' as one batch of {}",
        inputs.len(),
        method,
        split_points.last().copied().unwrap_or_default()
    );

    let output = runnable
        .run(method, Params::from_args(vec![Arg::Tensor(merged)]))
        .await?;
    containers.split(&output, &split_points, config.batch_dim.output())
}

/// 负载版本：解码 N 个负载，分发一次，编码 N 个结果负载
pub async fn run_payloads(
    runnable: &Runnable,
    containers: &ContainerRegistry,
    method: &str,
    payloads: &[Payload],
) -> Result<Vec<Payload>> {
    let config = runnable.class().method(method)?;

    if !config.batchable {
        let mut outputs = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let input: Tensor = containers.decode(payload)?;
            let output = runnable
                .run(method, Params::from_args(vec![Arg::Tensor(input)]))
                .await?;
            outputs.push(containers.encode(&output, 0)?);
        }
        return Ok(outputs);
    }

    let (batch, split_points) = containers.decode_batch::<Tensor>(payloads, config.batch_dim.input())?;
    let output = runnable
        .run(method, Params::from_args(vec![Arg::Tensor(batch)]))
        .await?;
    containers.encode_batch(&output, &split_points, config.batch_dim.output())
}
