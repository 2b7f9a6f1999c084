//! Error types for the reconciliation core.
//!
//! Errors are split by who has to act on them:
//! - [`BuildError`]: a single host cannot be turned into a target; reported
//!   as a warning event and skipped.
//! - [`StoreError`]: the object store refused or failed a call.
//! - [`ReconcileError`]: the whole pass for one source route failed and must
//!   go back to the work queue.

use std::time::Duration;

/// Errors returned by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Object kind.
        kind: &'static str,
        /// `namespace/name` of the object.
        key: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Object kind.
        kind: &'static str,
        /// `namespace/name` of the object.
        key: String,
    },

    /// The object was modified since it was read.
    #[error("conflict on {kind} {key}: expected version {expected}, found {actual}")]
    Conflict {
        /// Object kind.
        kind: &'static str,
        /// `namespace/name` of the object.
        key: String,
        /// Version the writer based its change on.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// The store could not be reached or failed internally.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The call did not complete within the configured deadline.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Creates a new `NotFound` error.
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    pub fn already_exists(kind: &'static str, key: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            key: key.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns true for `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true when repeating the per-host write step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. }
                | Self::Conflict { .. }
                | Self::Unavailable { .. }
                | Self::Timeout(_)
        )
    }
}

/// Errors produced while building the desired target for one host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// The host is a wildcard, an IP literal, or has no registrable domain.
    #[error("invalid host {host:?}: {reason}")]
    InvalidHost {
        /// The offending host.
        host: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// None of the host's paths referenced a backend service.
    #[error("no valid backends found for host {host:?}")]
    NoValidBackends {
        /// The host without backends.
        host: String,
    },
}

impl BuildError {
    pub(crate) fn invalid_host(host: &str, reason: &'static str) -> Self {
        Self::InvalidHost {
            host: host.to_string(),
            reason,
        }
    }
}

/// Errors that abort a reconciliation pass.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A store call failed and could not be retried locally.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The tunnel for the source route could not be determined.
    #[error("cannot resolve tunnel for class {class:?}")]
    TunnelResolution {
        /// The route's class (empty when unset).
        class: String,
    },

    /// Two hosts of one source route produced the same derived name.
    #[error("derived name {name} generated for both {first:?} and {second:?}")]
    NameCollision {
        /// The duplicated name.
        name: String,
        /// Host that claimed the name first.
        first: String,
        /// Host that collided with it.
        second: String,
    },

    /// An object at the derived name belongs to someone else.
    #[error("target {name} exists but is not owned by source uid {uid}")]
    ForeignObject {
        /// Name of the existing object.
        name: String,
        /// UID of the source route being reconciled.
        uid: String,
    },

    /// The per-host write step kept conflicting.
    #[error("giving up on target {name} after {attempts} attempts: {source}")]
    WriteRetriesExhausted {
        /// Target name.
        name: String,
        /// Attempts made.
        attempts: u32,
        /// Last store error seen.
        #[source]
        source: StoreError,
    },

    /// The source route has no UID, so its targets cannot be told apart
    /// from those of other routes.
    #[error("source route {key} has no uid")]
    MissingUid {
        /// `namespace/name` of the route.
        key: String,
    },

    /// The pass was cancelled by its caller.
    #[error("reconciliation cancelled")]
    Cancelled,
}

/// Invalid controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A `suffix=tunnel` pair in the tunnel mapping is malformed.
    #[error("invalid tunnel mapping entry {0:?}, expected suffix=tunnel")]
    TunnelMapping(String),

    /// The backend scheme is not one the downstream understands.
    #[error("unsupported backend scheme {0:?}")]
    BackendScheme(String),

    /// A numeric setting is out of range.
    #[error("{field} must be {requirement}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// Human readable constraint.
        requirement: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_store_errors() {
        assert!(StoreError::already_exists("PangolinResource", "ns/a").is_retryable());
        assert!(StoreError::unavailable("connection reset").is_retryable());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(StoreError::Conflict {
            kind: "PangolinResource",
            key: "ns/a".into(),
            expected: 1,
            actual: 2,
        }
        .is_retryable());
        assert!(!StoreError::not_found("PangolinResource", "ns/a").is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = BuildError::invalid_host("*.example.com", "wildcard hosts are not supported");
        assert_eq!(
            err.to_string(),
            "invalid host \"*.example.com\": wildcard hosts are not supported"
        );

        let err = ReconcileError::from(StoreError::not_found("Ingress", "default/app"));
        assert_eq!(err.to_string(), "Ingress default/app not found");
    }
}
