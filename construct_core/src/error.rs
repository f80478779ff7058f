//! Error types for cube handles and batch operations.

use construct_env::WireError;
use thiserror::Error;

use crate::cube::CubeStatus;

/// Failures of a single cube's operations.
///
/// Every variant carries the cube's current name so a failure can be
/// correlated with the command that caused it.
#[derive(Debug, Error)]
pub enum CubeError {
    /// Pulse or refresh on a cube without an owned connection
    #[error("[{cube}] no connection")]
    NoConnection { cube: String },

    /// Lifecycle operation not allowed from the current state
    #[error("[{cube}] cannot {operation} while {status}")]
    InvalidState {
        cube: String,
        operation: &'static str,
        status: CubeStatus,
    },

    /// Opening or authenticating a session failed
    #[error("[{cube}] {operation}: connect failed: {source}")]
    Connect {
        cube: String,
        operation: &'static str,
        #[source]
        source: WireError,
    },

    /// Writing a command failed
    #[error("[{cube}] {operation} failed: {source}")]
    Send {
        cube: String,
        operation: &'static str,
        #[source]
        source: WireError,
    },

    /// Reading the state reply failed
    #[error("[{cube}] state read failed: {source}")]
    Read {
        cube: String,
        #[source]
        source: WireError,
    },

    /// The state reply is not a JSON object (often a truncated read)
    #[error("[{cube}] JSON parse error: {source}")]
    Parse {
        cube: String,
        #[source]
        source: serde_json::Error,
    },

    /// The state reply parsed but has no usable `position`
    #[error("[{cube}] invalid position format: {reason}")]
    Shape { cube: String, reason: String },

    /// The decision function returned fewer than three components
    #[error("[{cube}] decision output too short: got {len}, need 3")]
    DecisionTooShort { cube: String, len: usize },

    /// The decision function returned NaN, which has no JSON encoding
    #[error("[{cube}] decision output component {index} is NaN")]
    DecisionNotANumber { cube: String, index: usize },
}

impl CubeError {
    /// Returns the name of the cube the error belongs to.
    pub fn cube(&self) -> &str {
        match self {
            CubeError::NoConnection { cube }
            | CubeError::InvalidState { cube, .. }
            | CubeError::Connect { cube, .. }
            | CubeError::Send { cube, .. }
            | CubeError::Read { cube, .. }
            | CubeError::Parse { cube, .. }
            | CubeError::Shape { cube, .. }
            | CubeError::DecisionTooShort { cube, .. }
            | CubeError::DecisionNotANumber { cube, .. } => cube,
        }
    }

    /// Returns true if a later attempt on the same cube may succeed.
    ///
    /// Parse and shape failures usually come from a truncated read and
    /// leave the connection in place; connect failures may clear up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CubeError::Connect { .. } | CubeError::Parse { .. } | CubeError::Shape { .. }
        )
    }

    /// Returns true if the cube lost its owned connection because of this error.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            CubeError::Send { source, .. } | CubeError::Read { source, .. } => {
                source.is_connection_lost()
            }
            _ => false,
        }
    }
}

/// Failures of whole-set operations.
#[derive(Debug, Error)]
pub enum ConstructError {
    /// The batch session could not be opened
    #[error("[{operation}] Failed to connect: {source}")]
    Connect {
        operation: &'static str,
        #[source]
        source: WireError,
    },

    /// `get_cube_list` could not be written
    #[error("[{operation}] Failed to request cube list: {source}")]
    ListRequest {
        operation: &'static str,
        #[source]
        source: WireError,
    },

    /// The cube list reply could not be read
    #[error("[{operation}] Failed to read cube list: {source}")]
    ListRead {
        operation: &'static str,
        #[source]
        source: WireError,
    },

    /// The cube list reply is not a JSON object
    #[error("[{operation}] JSON unmarshal error: {source}")]
    ListParse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Pulsing needs at least one action per second
    #[error("invalid pulse rate {0}: need at least 1 action per second")]
    InvalidRate(u32),
}
