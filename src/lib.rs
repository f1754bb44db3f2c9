#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod stats;
pub mod storage;
pub mod table;

pub use error::{Result, TableError};
pub use manager::TableManager;
