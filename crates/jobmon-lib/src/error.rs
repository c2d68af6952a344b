//! Error types for metric data access

use thiserror::Error;

/// Errors returned by the metric data dispatcher and backend registry
#[derive(Debug, Error)]
pub enum MetricDataError {
    /// No collector is registered for the cluster
    #[error("no metric data repository configured for '{cluster}'")]
    NotConfigured { cluster: String },

    /// The collector does not implement the requested query shape
    #[error("the metric data repository for '{cluster}' does not support this query")]
    Unsupported { cluster: String },

    /// The collector call failed
    #[error("metric data repository for '{cluster}' failed")]
    Upstream {
        cluster: String,
        #[source]
        source: anyhow::Error,
    },

    /// The cold record of a job is missing or malformed
    #[error("failed to read archived data of job {job_id}")]
    ArchiveRead {
        job_id: i64,
        #[source]
        source: anyhow::Error,
    },

    /// The caller cancelled the request
    #[error("request cancelled")]
    Cancelled,

    /// The request deadline passed before the backend answered
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Configuration names a backend kind nobody registered a factory for
    #[error("unknown metric data repository '{kind}' for cluster '{cluster}'")]
    UnknownBackendKind { kind: String, cluster: String },

    /// A collector factory failed to initialise its backend
    #[error("failed to initialise metric data repository for cluster '{cluster}'")]
    BackendInit {
        cluster: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Result type for metric data operations
pub type Result<T> = std::result::Result<T, MetricDataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_configured() {
        let err = MetricDataError::NotConfigured {
            cluster: "fritz".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no metric data repository configured for 'fritz'"
        );
    }

    #[test]
    fn test_upstream_preserves_cause() {
        let err = MetricDataError::Upstream {
            cluster: "alex".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("connection refused"));
    }
}
