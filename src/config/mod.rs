pub mod toml_config;

pub use toml_config::EtlConfig;

#[cfg(feature = "cli")]
use crate::utils::error::{EtlError, Result};
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::path::Path;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "sales-etl")]
#[command(about = "Extract sales records from CSV, clean them and load them into the vendas table")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "etl-config.toml")]
    pub config: String,

    /// Source CSV file (overrides source.path)
    #[arg(long, env = "SALES_CSV")]
    pub source: Option<String>,

    /// Database URL (overrides load.database_url)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Destination table (overrides load.table)
    #[arg(long)]
    pub table: Option<String>,

    /// Create the destination table if missing
    #[arg(long)]
    pub create_table: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Sample CPU and memory per stage")]
    pub monitor: bool,

    #[arg(long, help = "Print the run result as JSON")]
    pub json: bool,

    /// Show the resolved plan without reading the source or touching the database
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(feature = "cli")]
impl CliConfig {
    /// 讀取設定檔並套用命令列覆蓋；設定檔不存在時需由命令列提供來源與資料庫
    pub fn resolve(&self) -> Result<EtlConfig> {
        let mut config = if Path::new(&self.config).exists() {
            EtlConfig::from_file(&self.config)?
        } else {
            let source = self.source.clone().ok_or_else(|| EtlError::MissingConfigError {
                field: format!("source.path (no config file at '{}')", self.config),
            })?;
            let database_url = self.database_url.clone().ok_or_else(|| EtlError::MissingConfigError {
                field: format!("load.database_url (no config file at '{}')", self.config),
            })?;
            EtlConfig::new(source, database_url)
        };

        if let Some(source) = &self.source {
            config.source.path = source.clone();
        }
        if let Some(url) = &self.database_url {
            config.load.database_url = url.clone();
        }
        if let Some(table) = &self.table {
            config.load.table = Some(table.clone());
        }
        if self.create_table {
            config.load.create_table = Some(true);
        }

        Ok(config)
    }
}
