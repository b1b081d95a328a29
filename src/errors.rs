use serde::Serialize;

/// All application errors, categorized by domain.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ── Data ──
    #[error("Kline series is empty")]
    EmptyKlines,

    #[error("Non-monotonic timestamps at row {index}: {previous} -> {current}")]
    NonMonotonicTime {
        index: usize,
        previous: i64,
        current: i64,
    },

    #[error("Insufficient data: need {needed} bars, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Invalid kline data: {0}")]
    InvalidKlines(String),

    #[error("CSV parse error at row {row}: {message}")]
    CsvParseError { row: usize, message: String },

    #[error("Failed to read file: {0}")]
    FileRead(String),

    #[error("Failed to write file: {0}")]
    FileWrite(String),

    // ── Configuration ──
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Type mismatch for parameter '{name}': expected {expected}, got {actual}")]
    ParameterTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Value {value} for parameter '{name}' is outside its declared domain")]
    ParameterOutOfDomain { name: String, value: String },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Strategy not found: {0}")]
    StrategyNotFound(String),

    // ── Evaluation ──
    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Optimization cancelled")]
    OptimizationCancelled,

    // ── Workers ──
    #[error("Worker failed for context {context}: {message}")]
    WorkerFailure { context: String, message: String },

    #[error("Data source error: {0}")]
    DataSource(String),

    // ── Live ──
    #[error("Exchange rejected order: {0}")]
    Exchange(String),

    // ── Storage ──
    #[error("Database error: {0}")]
    Database(String),

    // ── Serialization ──
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// True for errors caused by the input series rather than by configuration.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            AppError::EmptyKlines
                | AppError::NonMonotonicTime { .. }
                | AppError::InsufficientData { .. }
                | AppError::InvalidKlines(_)
                | AppError::CsvParseError { .. }
        )
    }

    /// True for errors that reject a parameter set or config before any run.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AppError::UnknownParameter(_)
                | AppError::ParameterTypeMismatch { .. }
                | AppError::ParameterOutOfDomain { .. }
                | AppError::MissingParameter(_)
                | AppError::InvalidConfig(_)
                | AppError::StrategyNotFound(_)
        )
    }
}

/// Serializable error response for reporting layers.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::EmptyKlines => "EMPTY_KLINES",
            AppError::NonMonotonicTime { .. } => "NON_MONOTONIC_TIME",
            AppError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            AppError::InvalidKlines(_) => "INVALID_KLINES",
            AppError::CsvParseError { .. } => "CSV_PARSE_ERROR",
            AppError::FileRead(_) => "FILE_READ",
            AppError::FileWrite(_) => "FILE_WRITE",
            AppError::UnknownParameter(_) => "UNKNOWN_PARAMETER",
            AppError::ParameterTypeMismatch { .. } => "PARAMETER_TYPE_MISMATCH",
            AppError::ParameterOutOfDomain { .. } => "PARAMETER_OUT_OF_DOMAIN",
            AppError::MissingParameter(_) => "MISSING_PARAMETER",
            AppError::InvalidConfig(_) => "INVALID_CONFIG",
            AppError::StrategyNotFound(_) => "STRATEGY_NOT_FOUND",
            AppError::Simulation(_) => "SIMULATION",
            AppError::OptimizationError(_) => "OPTIMIZATION_ERROR",
            AppError::OptimizationCancelled => "OPTIMIZATION_CANCELLED",
            AppError::WorkerFailure { .. } => "WORKER_FAILURE",
            AppError::DataSource(_) => "DATA_SOURCE",
            AppError::Exchange(_) => "EXCHANGE",
            AppError::Database(_) => "DATABASE",
            AppError::Serialization(_) => "SERIALIZATION",
        };
        ErrorResponse {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let response = ErrorResponse::from(self);
        response.serialize(serializer)
    }
}

// ── Conversions from external errors ──

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileRead(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        let row = err
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(0);
        AppError::CsvParseError {
            row,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        assert!(AppError::EmptyKlines.is_data_error());
        assert!(!AppError::EmptyKlines.is_config_error());
        assert!(AppError::UnknownParameter("x".into()).is_config_error());
        let worker = AppError::WorkerFailure {
            context: "ctx".into(),
            message: "boom".into(),
        };
        assert!(!worker.is_data_error() && !worker.is_config_error());
    }

    #[test]
    fn test_error_response_code() {
        let err = AppError::InsufficientData {
            needed: 10,
            available: 3,
        };
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, "INSUFFICIENT_DATA");
        assert!(resp.message.contains("need 10 bars"));
    }
}
