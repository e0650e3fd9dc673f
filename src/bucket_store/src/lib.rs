mod access_queue;
mod blob_store;
mod bucket_manager;
mod catalog_db;
mod file_object;
mod file_streams;
mod fts;

pub use access_queue::*;
pub use blob_store::*;
pub use bucket_manager::*;
pub use catalog_db::*;
pub use file_object::*;
pub use file_streams::*;
pub use fts::*;

#[cfg(test)]
mod catalog_db_tests;
