pub mod registry;

// Re-export commonly used types
pub use registry::{LoaderFactory, ModuleRegistry, RunnableFactory};
