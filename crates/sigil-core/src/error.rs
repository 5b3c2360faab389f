use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigilError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Event log error: {0}")]
    EventLog(String),

    /// A reducer received a payload it was not written for. Wiring defect, never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Primary-key collision on a Create statement, or an optimistic append lost its race.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Out of order: {entity} expected sequence {expected}, got {got}")]
    OutOfOrder {
        entity: String,
        expected: u64,
        got: u64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock is held by another live owner.
    #[error("Lock {resource} for tenant {tenant} is held by a live owner")]
    Contended { resource: String, tenant: String },

    /// Replication lag: the read side has not observed the latest events yet.
    #[error("Transient: {0}")]
    Transient(String),

    /// A dependency failed outright, e.g. a key service refusing to generate.
    /// Unreachable stores surface as `Io`, `EventLog`, `Projection` or `Lock`,
    /// which belong to the same class. All of them stay retryable.
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Lock acquisition timed out after {timeout_ms}ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl SigilError {
    /// Whether retrying the same operation can change the outcome.
    ///
    /// Deterministic defects (wiring mistakes, sequence gaps, bad configuration)
    /// fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SigilError::InvalidArgument(_) | SigilError::OutOfOrder { .. } | SigilError::Config(_)
        )
    }
}

impl From<serde_json::Error> for SigilError {
    fn from(err: serde_json::Error) -> Self {
        SigilError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wiring_defects_are_not_retryable() {
        assert!(!SigilError::InvalidArgument("x".into()).is_retryable());
        assert!(!SigilError::OutOfOrder {
            entity: "org/1".into(),
            expected: 2,
            got: 4
        }
        .is_retryable());
        assert!(SigilError::Transient("lag".into()).is_retryable());
        assert!(SigilError::Contended {
            resource: "r".into(),
            tenant: "t".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_fatal_class_stays_retryable() {
        assert!(SigilError::Fatal("key service down".into()).is_retryable());
        assert!(SigilError::EventLog("database is locked".into()).is_retryable());
        assert!(SigilError::Lock("unreachable".into()).is_retryable());
    }
}
