pub mod defaults;
pub mod loader;
pub mod settings;

pub use settings::{Config, LoggingConfig, RunnableConfig, StorageConfig};
