use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dns::ParseError;

pub type Result<T> = std::result::Result<T, MimirError>;

/// Unified error type for the mimir DNSBL server.
#[derive(Debug, Clone, Error)]
pub enum MimirError {
    // IO errors
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    // Configuration errors
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),
    #[error("Invalid upstream server: {0}")]
    InvalidUpstreamServer(String),
    #[error("Configuration parse error: {0}")]
    ConfigParseError(String),

    // DNS wire errors
    #[error("Packet error: {0}")]
    Packet(#[from] ParseError),

    // Upstream lookup errors
    #[error("Operation timed out")]
    Timeout,
    #[error("Upstream error: {0}")]
    Upstream(String),

    // Durable store errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // Admin input errors
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),
    #[error("Validation error: {0}")]
    ValidationError(String),

    // Server state errors
    #[error("Server is shutting down")]
    ServerShutdown,
}

impl From<std::io::Error> for MimirError {
    fn from(err: std::io::Error) -> Self {
        MimirError::Io(Arc::new(err))
    }
}

impl From<sqlx::Error> for MimirError {
    fn from(err: sqlx::Error) -> Self {
        MimirError::StoreUnavailable(err.to_string())
    }
}

/// Why a single-RBL lookup failed. The tag is cached alongside the Error
/// classification and stored as text in the durable tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorKind {
    /// Upstream lookup exceeded its per-call deadline
    Timeout,
    /// Connect/send/receive failure or malformed upstream answer
    Network,
    /// Upstream reported SERVFAIL or refused the query
    UpstreamServfail,
}

impl LookupErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupErrorKind::Timeout => "timeout",
            LookupErrorKind::Network => "network",
            LookupErrorKind::UpstreamServfail => "upstream_servfail",
        }
    }

    /// Parse the stored tag; unknown tags map to Network so old rows stay
    /// readable.
    pub fn parse(s: &str) -> Self {
        match s {
            "timeout" => LookupErrorKind::Timeout,
            "upstream_servfail" => LookupErrorKind::UpstreamServfail,
            _ => LookupErrorKind::Network,
        }
    }
}

impl fmt::Display for LookupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
