pub mod id;
pub mod list;
pub mod merge;
