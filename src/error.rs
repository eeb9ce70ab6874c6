use std::fmt;

#[derive(Debug)]
pub enum MonitorError {
    DatasetError(String),
    ModelError(String),
    SchemaError(String),
    ExtractionError(String),
    SnapshotError(String),
    ControllerError(String),
    ConfigError(String),
    IoError(String),
    ParseError(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::DatasetError(msg) => write!(f, "Dataset error: {}", msg),
            MonitorError::ModelError(msg) => write!(f, "Model error: {}", msg),
            MonitorError::SchemaError(msg) => write!(f, "Schema error: {}", msg),
            MonitorError::ExtractionError(msg) => write!(f, "Extraction error: {}", msg),
            MonitorError::SnapshotError(msg) => write!(f, "Snapshot error: {}", msg),
            MonitorError::ControllerError(msg) => write!(f, "Controller error: {}", msg),
            MonitorError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            MonitorError::IoError(msg) => write!(f, "IO error: {}", msg),
            MonitorError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {}

impl MonitorError {
    /// Errors that must abort startup rather than skip a cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::DatasetError(_) | MonitorError::ConfigError(_))
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::IoError(err.to_string())
    }
}

impl From<csv::Error> for MonitorError {
    fn from(err: csv::Error) -> Self {
        MonitorError::IoError(err.to_string())
    }
}

impl From<std::num::ParseIntError> for MonitorError {
    fn from(err: std::num::ParseIntError) -> Self {
        MonitorError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(err: toml::de::Error) -> Self {
        MonitorError::ConfigError(err.to_string())
    }
}

impl From<&str> for MonitorError {
    fn from(msg: &str) -> Self {
        MonitorError::ConfigError(msg.to_string())
    }
}

impl From<String> for MonitorError {
    fn from(msg: String) -> Self {
        MonitorError::ConfigError(msg)
    }
}

impl From<ctrlc::Error> for MonitorError {
    fn from(err: ctrlc::Error) -> Self {
        MonitorError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
