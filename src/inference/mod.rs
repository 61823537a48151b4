pub mod backend;
pub mod batching;
pub mod container;
pub mod params;
pub mod runnable;
pub mod tensor;

// Re-export commonly used types
pub use backend::{Device, FnMethod, LoadedModel, ModelLoader, ModelMethod};
pub use batching::{run_batched, run_payloads};
pub use container::{
    ContainerRegistry, DataContainer, JsonListContainer, NumericArrayContainer, Payload,
    TensorContainer,
};
pub use params::{Arg, Params};
pub use runnable::{Runnable, RunnableClass, RunnableMethod, PARTIAL_KWARGS_OPTION};
pub use tensor::{DType, NumericArray, Tensor};
