use thiserror::Error;

#[derive(Error, Debug)]
pub enum BenchError {
    // Discovery errors
    #[error("node discovery failed: {0}")]
    Discovery(String),

    #[error("no nodes found for service {service}")]
    NoNodes { service: String },

    // Connection errors
    #[error("failed to open cluster handle: {0}")]
    Connect(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation} failed with code {code}: {message}")]
    Query {
        operation: String,
        code: u32,
        message: String,
    },

    #[error("write conflict on {key}")]
    Conflict { key: String },

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u64 },

    // Serialization errors
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Provisioning errors
    #[error("provisioning failed: {0}")]
    Provision(String),

    // Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    // Config errors
    #[error("config error: {0}")]
    Config(String),

    // IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    /// Errors that must stop the process before any concurrent work starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BenchError::Discovery(_)
                | BenchError::NoNodes { .. }
                | BenchError::Connect(_)
                | BenchError::Provision(_)
                | BenchError::Validation(_)
                | BenchError::Config(_)
        )
    }

    /// Process exit status used by `main` when this error ends the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Validation(_) | BenchError::Config(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_are_fatal() {
        assert!(BenchError::Discovery("consul down".into()).is_fatal());
        assert!(BenchError::NoNodes {
            service: "couchbase".into()
        }
        .is_fatal());
        assert!(BenchError::Connect("refused".into()).is_fatal());
        assert!(BenchError::Provision("create failed".into()).is_fatal());
    }

    #[test]
    fn test_operation_errors_are_not_fatal() {
        let err = BenchError::Timeout {
            operation: "view query".into(),
            millis: 10,
        };
        assert!(!err.is_fatal());

        let err = BenchError::Status {
            operation: "insert".into(),
            status: 500,
            body: "boom".into(),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BenchError::Validation("bad".into()).exit_code(), 2);
        assert_eq!(BenchError::Config("bad".into()).exit_code(), 2);
        assert_eq!(BenchError::Connect("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_display_formatting() {
        let err = BenchError::Query {
            operation: "create index".into(),
            code: 5000,
            message: "index exists".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("create index"));
        assert!(msg.contains("5000"));
        assert!(msg.contains("index exists"));

        let err = BenchError::NoNodes {
            service: "couchbase".into(),
        };
        assert!(err.to_string().contains("couchbase"));
    }
}
