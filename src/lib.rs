pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::SqliteDestination;
pub use config::EtlConfig;
pub use crate::core::{
    etl::EtlEngine,
    pipeline::SalesPipeline,
    run::{RunResult, RunStatus, Stage},
};
pub use utils::error::{EtlError, Result};
