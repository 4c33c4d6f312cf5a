use std::path::PathBuf;
use std::time::Duration;

/// 一次监控周期中可能出现的错误
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Failed to fetch status page from {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Failed to parse status page: {message}")]
    Parsing { message: String },

    #[error("Process table unavailable: {source}")]
    CorrelationDegraded {
        #[from]
        source: ProcessTableError,
    },

    #[error("Worker {pid} changed before it could be terminated: {message}")]
    TerminationRace { pid: u32, message: String },

    #[error("Failed to write snapshot {path}: {source}")]
    SnapshotWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Failed to discover listen address from {path}: {message}")]
    AddressDiscovery { path: PathBuf, message: String },

    #[error("Monitoring cycle did not finish within {limit:?}")]
    Timeout { limit: Duration },

    #[error("Failed to render Prometheus metrics: {source}")]
    Metrics {
        #[from]
        source: prometheus::Error,
    },
}

impl MonitorError {
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::Parsing {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// 读取进程表失败
#[derive(Debug, thiserror::Error)]
pub enum ProcessTableError {
    #[error("permission denied reading the process table")]
    PermissionDenied,

    #[error("process table is empty")]
    Empty,

    #[error("IO operation failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = MonitorError::Timeout {
            limit: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "Monitoring cycle did not finish within 60s");
    }

    #[test]
    fn test_degraded_from_table_error() {
        let err: MonitorError = ProcessTableError::PermissionDenied.into();
        assert!(matches!(err, MonitorError::CorrelationDegraded { .. }));
        assert!(err.to_string().contains("permission denied"));
    }
}
