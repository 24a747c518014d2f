//! Error types for the appliance client.

use thiserror::Error;

/// Errors raised by [`super::NasApi`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NasError {
    /// The request never produced an HTTP response.
    #[error("{operation}: transport failure: {message}")]
    Transport {
        /// Appliance operation being performed.
        operation: String,
        /// Underlying client error.
        message: String,
    },
    /// The appliance answered with a non-200 status.
    #[error("{operation}: unexpected HTTP status {status}")]
    Status {
        /// Appliance operation being performed.
        operation: String,
        /// HTTP status code.
        status: u16,
    },
    /// Credentials rejected or session expired.
    #[error("{operation}: authentication rejected")]
    Auth {
        /// Appliance operation being performed.
        operation: String,
    },
    /// The response body could not be interpreted.
    #[error("{operation}: malformed response: {message}")]
    Parse {
        /// Appliance operation being performed.
        operation: String,
        /// Parser diagnostic.
        message: String,
    },
    /// The appliance reported that the addressed resource does not exist.
    #[error("{operation}: resource not found (result {code})")]
    NotFound {
        /// Appliance operation being performed.
        operation: String,
        /// Raw appliance result code.
        code: i64,
    },
    /// The appliance reported an unrecognised failure.
    #[error("{operation}: appliance returned result {code}")]
    Appliance {
        /// Appliance operation being performed.
        operation: String,
        /// Raw appliance result code.
        code: i64,
    },
}

impl NasError {
    /// Classifies a failing appliance result code. `-1` and `-2` mean the
    /// addressed resource is absent; every other code is an unknown failure.
    #[must_use]
    pub fn from_result(operation: &str, code: i64) -> Self {
        match code {
            -1 | -2 => Self::NotFound {
                operation: operation.to_owned(),
                code,
            },
            _ => Self::Appliance {
                operation: operation.to_owned(),
                code,
            },
        }
    }

    /// Returns `true` for [`NasError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Accepts `code` when it equals `expected`, otherwise classifies it.
///
/// # Errors
///
/// Returns [`NasError::NotFound`] or [`NasError::Appliance`] for any other
/// code.
pub fn expect_result(operation: &str, code: i64, expected: i64) -> Result<(), NasError> {
    if code == expected {
        return Ok(());
    }
    Err(NasError::from_result(operation, code))
}

/// Accepts a non-negative result as a newly allocated index.
///
/// # Errors
///
/// Returns a classified [`NasError`] for negative codes, or
/// [`NasError::Parse`] when the index does not fit.
pub fn expect_index(operation: &str, code: i64) -> Result<u32, NasError> {
    if code < 0 {
        return Err(NasError::from_result(operation, code));
    }
    u32::try_from(code).map_err(|err| NasError::Parse {
        operation: operation.to_owned(),
        message: err.to_string(),
    })
}
