//! Runnable 分发与批处理端到端测试

use async_trait::async_trait;
use modelforge::api::error::{BoxError, DispatchError, ForgeError};
use modelforge::config::RunnableConfig;
use modelforge::core::ModuleRegistry;
use modelforge::inference::{
    run_batched, run_payloads, Arg, ContainerRegistry, Device, FnMethod, LoadedModel, ModelLoader,
    ModelMethod, NumericArray, Params, RunnableClass, Tensor, PARTIAL_KWARGS_OPTION,
};
use modelforge::models::metadata::ModelInfo;
use modelforge::models::{Model, ModelContext, ModelSignature, ModelStore, NewModel};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const MODULE: &str = "modelforge.rowsum";

#[derive(Debug, thiserror::Error)]
#[error("kernel exploded")]
struct KernelError;

/// 对二维输入按行求和，并加上 `bias`
fn row_sum(params: Params<Arg>) -> Result<Tensor, BoxError> {
    let input = params
        .args
        .first()
        .and_then(Arg::as_tensor)
        .ok_or("missing input tensor")?;
    let bias = params.get("bias").and_then(Arg::as_f64).unwrap_or(0.0);

    let rows = input.shape()[0];
    let cols = input.shape()[1];
    let values = input.to_f64_vec();
    let sums: Vec<f64> = values
        .chunks(cols)
        .map(|row| row.iter().sum::<f64>() + bias)
        .collect();
    Ok(Tensor::from_f64(&sums, &[rows])?)
}

struct RowSumModel {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl LoadedModel for RowSumModel {
    fn method(&self, name: &str) -> Option<Arc<dyn ModelMethod>> {
        let calls = Arc::clone(&self.calls);
        match name {
            "predict" | "score" => Some(FnMethod::new(move |params: Params<Arg>| {
                calls.fetch_add(1, Ordering::SeqCst);
                row_sum(params)
            })),
            "explode" => Some(FnMethod::new(|_: Params<Arg>| Err(Box::new(KernelError) as BoxError))),
            _ => None,
        }
    }
}

struct RowSumLoader {
    loads: AtomicUsize,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelLoader for RowSumLoader {
    fn framework(&self) -> &str {
        "rowsum"
    }

    fn devices(&self) -> Vec<Device> {
        vec![Device::Cpu, Device::Gpu { index: 0 }]
    }

    async fn load(
        &self,
        path: &Path,
        info: &ModelInfo,
        _device: Device,
    ) -> modelforge::Result<Arc<dyn LoadedModel>> {
        assert!(path.join("model.yaml").exists());
        assert_eq!(info.module, MODULE);
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(RowSumModel {
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct Fixture {
    _dir: TempDir,
    model: Model,
    modules: ModuleRegistry,
    loader: Arc<RowSumLoader>,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = ModelStore::new(dir.path());

    let spec = NewModel::new("rowsum", MODULE, ModelContext::new("rowsum"))
        .with_signature("predict", ModelSignature::batchable(0))
        .with_signature("score", ModelSignature::default())
        .with_signature("explode", ModelSignature::default())
        .with_option(PARTIAL_KWARGS_OPTION, json!({"predict": {"bias": 0.5}}));
    let mut model = Model::create(spec).unwrap();
    model.flush().await.unwrap();
    model.save(&store).await.unwrap();
    let model = store.get("rowsum").await.unwrap();

    let loader = Arc::new(RowSumLoader {
        loads: AtomicUsize::new(0),
        calls: Arc::new(AtomicUsize::new(0)),
    });
    let modules = ModuleRegistry::new();
    modules.register_loader(MODULE, loader.clone()).await;

    Fixture {
        _dir: dir,
        model,
        modules,
        loader,
    }
}

#[tokio::test]
async fn test_partial_kwargs_and_explicit_override() {
    let fx = fixture().await;
    let class = fx.model.to_runnable(&fx.modules).await.unwrap();
    let runnable = class.instantiate(&RunnableConfig::default()).await.unwrap();
    assert_eq!(runnable.device(), Device::Gpu { index: 0 });

    let input = NumericArray::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();

    let out = runnable
        .run("predict", Params::new().arg(input.clone()))
        .await
        .unwrap();
    assert_eq!(out.data(), &[3.5, 7.5]);

    let out = runnable
        .run("predict", Params::new().arg(input).kwarg("bias", 0.25))
        .await
        .unwrap();
    assert_eq!(out.data(), &[3.25, 7.25]);

    assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(runnable.cached_methods(), 1);
}

#[tokio::test]
async fn test_to_runnable_returns_cached_class() {
    let fx = fixture().await;
    let first = fx.model.to_runnable(&fx.modules).await.unwrap();
    let second = fx.model.to_runnable(&fx.modules).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_to_runnable_builds_once() {
    let fx = fixture().await;
    let model = Arc::new(fx.model);

    let builds = Arc::new(AtomicUsize::new(0));
    let modules = ModuleRegistry::new();
    {
        let builds = Arc::clone(&builds);
        let loader: Arc<dyn ModelLoader> = fx.loader.clone();
        modules
            .register(MODULE, move |model: &Model| {
                builds.fetch_add(1, Ordering::SeqCst);
                RunnableClass::new(model, Arc::clone(&loader))
            })
            .await;
    }

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let model = Arc::clone(&model);
            let modules = modules.clone();
            tokio::spawn(async move { model.to_runnable(&modules).await })
        })
        .collect();

    let mut classes = Vec::new();
    for handle in handles {
        classes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert!(classes.iter().all(|class| Arc::ptr_eq(class, &classes[0])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_calls_share_one_handle() {
    let fx = fixture().await;
    let runnable = Arc::new(
        fx.model
            .to_runnable(&fx.modules)
            .await
            .unwrap()
            .instantiate(&RunnableConfig::default())
            .await
            .unwrap(),
    );
    let input = NumericArray::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let runnable = Arc::clone(&runnable);
            let input = input.clone();
            tokio::spawn(async move { runnable.run("predict", Params::new().arg(input)).await })
        })
        .collect();

    for handle in handles {
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out.data(), &[3.5, 7.5]);
    }

    assert_eq!(runnable.cached_methods(), 1);
    assert_eq!(fx.loader.calls.load(Ordering::SeqCst), 16);
    assert_eq!(fx.loader.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_module() {
    let fx = fixture().await;
    let err = fx.model.to_runnable(&ModuleRegistry::new()).await.unwrap_err();
    assert!(matches!(err, ForgeError::Dispatch(DispatchError::UnknownModule(_))));
}

#[tokio::test]
async fn test_missing_method_fails_before_calling_model() {
    let fx = fixture().await;
    let runnable = fx
        .model
        .to_runnable(&fx.modules)
        .await
        .unwrap()
        .instantiate(&RunnableConfig::default())
        .await
        .unwrap();

    let err = runnable.run("generate", Params::new()).await.unwrap_err();
    assert!(matches!(err, ForgeError::Dispatch(DispatchError::MissingMethod { .. })));
    assert_eq!(fx.loader.calls.load(Ordering::SeqCst), 0);
    assert_eq!(runnable.cached_methods(), 0);
}

#[tokio::test]
async fn test_backend_error_is_not_wrapped() {
    let fx = fixture().await;
    let runnable = fx
        .model
        .to_runnable(&fx.modules)
        .await
        .unwrap()
        .instantiate(&RunnableConfig::default())
        .await
        .unwrap();

    let err = runnable.run("explode", Params::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "kernel exploded");
    match err {
        ForgeError::Backend(inner) => assert!(inner.downcast_ref::<KernelError>().is_some()),
        other => panic!("Expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_twice() {
    let fx = fixture().await;
    let runnable = fx
        .model
        .to_runnable(&fx.modules)
        .await
        .unwrap()
        .instantiate(&RunnableConfig::default())
        .await
        .unwrap();

    runnable.close().await.unwrap();
    runnable.close().await.unwrap();
    assert!(runnable.is_closed());
}

#[tokio::test]
async fn test_batched_calls_run_once() {
    let fx = fixture().await;
    let runnable = fx
        .model
        .to_runnable(&fx.modules)
        .await
        .unwrap()
        .instantiate(&RunnableConfig::default())
        .await
        .unwrap();
    let containers = ContainerRegistry::with_defaults();

    let inputs = vec![
        Tensor::from_f32(&[1.0, 1.0], &[1, 2]).unwrap(),
        Tensor::from_f32(&[2.0, 2.0, 3.0, 3.0], &[2, 2]).unwrap(),
    ];
    let outputs = run_batched(&runnable, &containers, "predict", inputs.clone()).await.unwrap();
    assert_eq!(fx.loader.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outputs[0].data(), &[2.5]);
    assert_eq!(outputs[1].data(), &[4.5, 6.5]);

    // 不可批处理的方法逐个调用
    let outputs = run_batched(&runnable, &containers, "score", inputs).await.unwrap();
    assert_eq!(fx.loader.calls.load(Ordering::SeqCst), 3);
    assert_eq!(outputs[1].data(), &[4.0, 6.0]);
}

#[tokio::test]
async fn test_payload_round_trip_through_dispatch() {
    let fx = fixture().await;
    let runnable = fx
        .model
        .to_runnable(&fx.modules)
        .await
        .unwrap()
        .instantiate(&RunnableConfig::default())
        .await
        .unwrap();
    let containers = ContainerRegistry::with_defaults();

    let payloads = vec![
        containers.encode(&Tensor::from_f64(&[1.0, 2.0], &[1, 2]).unwrap(), 0).unwrap(),
        containers.encode(&Tensor::from_f64(&[3.0, 4.0, 5.0, 6.0], &[2, 2]).unwrap(), 0).unwrap(),
    ];

    let results = run_payloads(&runnable, &containers, "predict", &payloads).await.unwrap();
    assert_eq!(results.iter().map(|p| p.batch_size).collect::<Vec<_>>(), vec![1, 2]);

    let second: NumericArray = containers.decode(&results[1]).unwrap();
    assert_eq!(second.data(), &[7.5, 11.5]);
}
