pub mod delete;
pub mod get;
pub mod list;

pub use delete::delete;
pub use get::get;
pub use list::list;
