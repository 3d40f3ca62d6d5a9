/// Unified error handling for steward
///
/// Callers of the read path only ever observe `StewardError::Database` (a
/// primary failure) or an error produced by their own compute function.
/// Replica and cache-store errors are absorbed inside the router and cache
/// manager and surface as statistics and log entries instead.

use std::fmt;
use thiserror::Error;

/// Main error type for steward operations
#[derive(Debug, Error)]
pub enum StewardError {
    /// Errors reported by the database client against the primary
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Errors from a single replica
    #[error("Replica {replica_id} error: {message}")]
    Replica { replica_id: String, message: String },

    /// Cache backing store errors
    #[error("Cache store error: {0}")]
    CacheStore(#[from] CacheStoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Removing or inspecting a replica that was never registered
    #[error("Unknown replica: {replica_id}")]
    UnknownReplica { replica_id: String },

    /// Router used after `disconnect()`
    #[error("Router has been disconnected")]
    Disconnected,

    /// Registering a replica id twice
    #[error("Replica already registered: {replica_id}")]
    DuplicateReplica { replica_id: String },

    /// Cached payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors reported by a `DatabaseClient` implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("query failed: {message}")]
    Query { message: String },

    #[error("unsupported by engine: {feature}")]
    Unsupported { feature: String },

    #[error("timed out after {millis}ms")]
    Timeout { millis: u64 },
}

/// Errors reported by a `CacheStore` implementation
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("Redis {command} failed: {source}")]
    Redis {
        command: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("Command error: {command} - {message}")]
    Command { command: String, message: String },

    #[error("Store operation timed out: {operation}")]
    Timeout { operation: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for steward operations
pub type StewardResult<T> = Result<T, StewardError>;

impl StewardError {
    /// Create a replica error
    pub fn replica<S: Into<String>, M: Into<String>>(replica_id: S, message: M) -> Self {
        StewardError::Replica {
            replica_id: replica_id.into(),
            message: message.into(),
        }
    }

    /// Create an unknown replica error
    pub fn unknown_replica<S: Into<String>>(replica_id: S) -> Self {
        StewardError::UnknownReplica {
            replica_id: replica_id.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        StewardError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        StewardError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            StewardError::Replica { .. } => true,
            StewardError::CacheStore(_) => true,
            StewardError::Timeout { .. } => true,
            StewardError::Database(DatabaseError::Connection { .. }) => true,
            StewardError::Database(DatabaseError::Timeout { .. }) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            StewardError::Config(_) => ErrorSeverity::Critical,
            StewardError::Internal { .. } => ErrorSeverity::Critical,
            StewardError::Database(_) => ErrorSeverity::Error,
            StewardError::Replica { .. } => ErrorSeverity::Warning,
            StewardError::CacheStore(_) => ErrorSeverity::Warning,
            StewardError::Timeout { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

impl From<serde_json::Error> for StewardError {
    fn from(err: serde_json::Error) -> Self {
        StewardError::Serialization(err.to_string())
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

impl DatabaseError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        DatabaseError::Connection {
            message: message.into(),
        }
    }

    pub fn query<S: Into<String>>(message: S) -> Self {
        DatabaseError::Query {
            message: message.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(feature: S) -> Self {
        DatabaseError::Unsupported {
            feature: feature.into(),
        }
    }
}

impl CacheStoreError {
    pub fn redis<S: Into<String>>(command: S, source: redis::RedisError) -> Self {
        CacheStoreError::Redis {
            command: command.into(),
            source,
        }
    }

    pub fn command<S: Into<String>, M: Into<String>>(command: S, message: M) -> Self {
        CacheStoreError::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        CacheStoreError::Timeout {
            operation: operation.into(),
        }
    }
}
