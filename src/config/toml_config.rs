use crate::core::transform::DEFAULT_PRECISION;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{
    validate_delimiter, validate_identifier, validate_non_empty_string, validate_path,
    validate_positive_number, validate_range, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 60;
// 對應原排程設定的一小時執行上限
const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const MAX_PRECISION: u32 = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub pipeline: PipelineConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    pub load: LoadConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub description: Option<String>,
    /// Informational only; the external scheduler owns triggering.
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: String,
    pub delimiter: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformConfig {
    pub precision: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    pub database_url: String,
    pub table: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub create_table: Option<bool>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_format: Option<String>,
}

impl EtlConfig {
    /// 只有來源與資料庫，其餘使用預設值
    pub fn new(source_path: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            pipeline: PipelineConfig {
                name: "sales_etl_pipeline".to_string(),
                description: None,
                schedule: None,
            },
            source: SourceConfig {
                path: source_path.into(),
                delimiter: None,
                timeout_seconds: None,
            },
            transform: TransformConfig::default(),
            load: LoadConfig {
                database_url: database_url.into(),
                table: None,
                timeout_seconds: None,
                create_table: None,
                max_connections: None,
            },
            monitoring: None,
        }
    }

    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${SALES_CSV})，未設定的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("pipeline.name", &self.pipeline.name)?;
        validate_path("source.path", &self.source.path)?;
        self.delimiter()?;

        if let Some(secs) = self.source.timeout_seconds {
            validate_positive_number("source.timeout_seconds", secs, 1)?;
        }

        validate_range("transform.precision", self.precision(), 0, MAX_PRECISION)?;

        validate_non_empty_string("load.database_url", &self.load.database_url)?;
        validate_identifier("load.table", self.table())?;

        if let Some(secs) = self.load.timeout_seconds {
            validate_positive_number("load.timeout_seconds", secs, 1)?;
        }
        if let Some(max) = self.load.max_connections {
            validate_positive_number("load.max_connections", u64::from(max), 1)?;
        }

        if let Some(format) = self.monitoring.as_ref().and_then(|m| m.log_format.as_deref()) {
            if !matches!(format, "compact" | "json") {
                return Err(EtlError::InvalidConfigValueError {
                    field: "monitoring.log_format".to_string(),
                    value: format.to_string(),
                    reason: "Valid formats: compact, json".to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn source_path(&self) -> &Path {
        Path::new(&self.source.path)
    }

    pub fn delimiter(&self) -> Result<u8> {
        match self.source.delimiter.as_deref() {
            Some(d) => validate_delimiter("source.delimiter", d),
            None => Ok(b','),
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_seconds.unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS))
    }

    pub fn precision(&self) -> u32 {
        self.transform.precision.unwrap_or(DEFAULT_PRECISION)
    }

    pub fn database_url(&self) -> &str {
        &self.load.database_url
    }

    pub fn table(&self) -> &str {
        self.load.table.as_deref().unwrap_or(crate::adapters::DEFAULT_TABLE)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load.timeout_seconds.unwrap_or(DEFAULT_LOAD_TIMEOUT_SECS))
    }

    pub fn create_table(&self) -> bool {
        self.load.create_table.unwrap_or(false)
    }

    pub fn max_connections(&self) -> u32 {
        self.load.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// 取得監控設定
    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn json_logs(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.log_format.as_deref())
            .map(|f| f == "json")
            .unwrap_or(false)
    }
}

impl Validate for EtlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
