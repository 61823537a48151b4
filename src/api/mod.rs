pub mod error;

pub use error::{
    BoxError, CodecError, ConfigError, DispatchError, ForgeError, ModelError, Result, StoreError,
};
