pub mod base;
pub mod metadata;
pub mod tag;
pub mod types;

// Re-export commonly used types
pub use base::{copy_model, Model, ModelStore, NewModel};
pub use metadata::ModelInfo;
pub use tag::{IntoTag, Tag};
pub use types::*;
