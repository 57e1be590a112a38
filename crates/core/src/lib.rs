pub mod config;
pub mod error;

pub use config::{ActiveLoadConfig, Config, StorageConfig};
pub use error::*;
