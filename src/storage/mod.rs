pub mod fs;
pub mod manager;

pub use manager::{StagingArea, Store, StoreItem};
