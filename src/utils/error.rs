use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Source unavailable: {path}: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("Source malformed{}: {reason}", .line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    SourceMalformed { line: Option<u64>, reason: String },

    #[error("Transform invalid: {message}")]
    TransformInvalid { message: String },

    #[error("Load rejected: {message}")]
    LoadRejected { message: String },

    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    #[error("Run aborted during {stage}")]
    RunAborted { stage: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

/// 對外回報的錯誤種類，排程器依此決定是否重試
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SourceUnavailable,
    SourceMalformed,
    TransformInvalid,
    LoadRejected,
    ConnectionLost,
    RunAborted,
    Configuration,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Source,
    Transform,
    Load,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            EtlError::SourceMalformed { .. } => ErrorKind::SourceMalformed,
            EtlError::TransformInvalid { .. } => ErrorKind::TransformInvalid,
            EtlError::LoadRejected { .. } => ErrorKind::LoadRejected,
            EtlError::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            EtlError::RunAborted { .. } => ErrorKind::RunAborted,
            EtlError::IoError(_) => ErrorKind::Io,
            EtlError::ConfigError { .. }
            | EtlError::MissingConfigError { .. }
            | EtlError::InvalidConfigValueError { .. } => ErrorKind::Configuration,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.kind() {
            ErrorKind::SourceUnavailable | ErrorKind::SourceMalformed => ErrorCategory::Source,
            ErrorKind::TransformInvalid => ErrorCategory::Transform,
            ErrorKind::LoadRejected | ErrorKind::ConnectionLost => ErrorCategory::Load,
            ErrorKind::Configuration => ErrorCategory::Configuration,
            ErrorKind::RunAborted | ErrorKind::Io => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            // 暫時性錯誤，可重試
            ErrorKind::SourceUnavailable | ErrorKind::ConnectionLost | ErrorKind::RunAborted => {
                ErrorSeverity::Medium
            }
            ErrorKind::SourceMalformed | ErrorKind::TransformInvalid | ErrorKind::LoadRejected => {
                ErrorSeverity::High
            }
            ErrorKind::Configuration | ErrorKind::Io => ErrorSeverity::Critical,
        }
    }

    /// Loads are upserts inside one transaction, so a failed run can always be
    /// repeated safely; only transient kinds are worth repeating.
    pub fn is_retryable(&self) -> bool {
        self.severity() == ErrorSeverity::Medium
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.kind() {
            ErrorKind::SourceUnavailable => {
                "Check that the source file exists and is readable, then retry the run"
            }
            ErrorKind::SourceMalformed => {
                "Fix the file structure (header and column count) before rerunning"
            }
            ErrorKind::TransformInvalid => {
                "Make sure the header contains sale_id, product, quantity, price and sale_date"
            }
            ErrorKind::LoadRejected => {
                "Inspect the destination table constraints; nothing from this run was committed"
            }
            ErrorKind::ConnectionLost => {
                "Check database connectivity and retry; the run is safe to repeat"
            }
            ErrorKind::RunAborted => "The run was cancelled; trigger it again when ready",
            ErrorKind::Configuration => "Review the configuration file and command-line flags",
            ErrorKind::Io => "Check file permissions and available disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            EtlError::SourceUnavailable { path, .. } => {
                format!("Could not read the sales file '{}'", path)
            }
            EtlError::SourceMalformed { line: Some(line), .. } => {
                format!("The sales file is malformed near line {}", line)
            }
            EtlError::SourceMalformed { line: None, .. } => {
                "The sales file is malformed".to_string()
            }
            EtlError::TransformInvalid { message } => {
                format!("The sales data cannot be processed: {}", message)
            }
            EtlError::LoadRejected { .. } => {
                "The database rejected the batch; no rows were written".to_string()
            }
            EtlError::ConnectionLost { .. } => "Lost the connection to the database".to_string(),
            EtlError::RunAborted { stage } => format!("The run was aborted during {}", stage),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if is_lock_contention(&**db) => EtlError::ConnectionLost {
                message: db.message().to_string(),
            },
            sqlx::Error::Database(db) => EtlError::LoadRejected {
                message: db.message().to_string(),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => EtlError::ConnectionLost {
                message: err.to_string(),
            },
            _ => EtlError::LoadRejected {
                message: err.to_string(),
            },
        }
    }
}

// SQLITE_BUSY / SQLITE_LOCKED，低 8 位是主錯誤碼
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Another writer holds the database; the batch itself was not rejected.
fn is_lock_contention(db: &dyn sqlx::error::DatabaseError) -> bool {
    use sqlx::error::ErrorKind as DbErrorKind;

    match db.kind() {
        DbErrorKind::UniqueViolation
        | DbErrorKind::ForeignKeyViolation
        | DbErrorKind::NotNullViolation
        | DbErrorKind::CheckViolation => false,
        _ => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
