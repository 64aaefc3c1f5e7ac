//! Error taxonomy of the codec and dispatch core

use thiserror::Error as ThisError;

use crate::messages::StatusCode;

/// Reason of schema mismatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// wrong wire type, missing or repeated field
    Shape(String),
    /// integer of right type outside of range of declared width
    OutOfRange(String),
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Shape(m) => write!(f, "{}", m),
            Mismatch::OutOfRange(m) => write!(f, "{}", m),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Byte layout can not be parsed at all (truncated buffer, bad control octet, ...)
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Well formed tlv which does not have the shape declared by schema
    #[error("schema mismatch: {0}")]
    SchemaMismatch(Mismatch),

    /// Well typed value rejected by attribute constraint
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Domain level rejection raised by command handler.
    /// Missing status maps to generic failure.
    #[error("handler failure (status {status:?}, cluster status {cluster_status:?})")]
    HandlerFailure {
        status: Option<StatusCode>,
        cluster_status: Option<u8>,
    },

    /// Value produced by server side code does not conform to its declared schema.
    /// This is defect in cluster definition, never caused by peer input.
    #[error("encoding invariant violated: {0}")]
    EncodingInvariantViolation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Handler failure reporting specific interaction model status.
    /// ```
    /// # use matd::{error::Error, messages::StatusCode};
    /// fn check(level: u64) -> anyhow::Result<()> {
    ///     if level > 254 {
    ///         return Err(Error::status(StatusCode::ConstraintError).into());
    ///     }
    ///     Ok(())
    /// }
    /// assert!(check(255).is_err());
    /// ```
    pub fn status(status: StatusCode) -> Self {
        Error::HandlerFailure {
            status: Some(status),
            cluster_status: None,
        }
    }

    /// Handler failure with cluster specific status code (reported together with FAILURE)
    pub fn cluster_status(cluster_status: u8) -> Self {
        Error::HandlerFailure {
            status: Some(StatusCode::Failure),
            cluster_status: Some(cluster_status),
        }
    }

    pub fn failure() -> Self {
        Error::HandlerFailure {
            status: None,
            cluster_status: None,
        }
    }

    /// true when decoded integer does not fit declared width
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Error::SchemaMismatch(Mismatch::OutOfRange(_)))
    }

    /// true for errors caused by peer supplied bytes
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::MalformedInput(_) | Error::SchemaMismatch(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
