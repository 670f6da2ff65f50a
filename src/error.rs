//! Errors returned by the relay's fallible operations.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::{RecordId, Role};

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), RelayError>`].
///
/// Failures never trigger an automatic retry. Operations initiated by the user also queue an
/// error-level [`Notice`](crate::RelayEvent::Notice) so the front-end can surface them.
///
/// [`Result<(), RelayError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelayError {
    /// The private store or the shared index could not be read or written. The attempted
    /// operation was aborted.
    StorageUnavailable {
        /// Which store failed and how.
        context: String,
    },
    /// An import document was rejected. Local state is untouched.
    MalformedImport {
        /// Why the document was rejected.
        reason: String,
    },
    /// The identity provider could not answer a query.
    IdentityUnavailable {
        /// A description of the failed query.
        context: String,
    },
    /// The operation is only available to clients holding a different role.
    RoleMismatch {
        /// The role the operation requires.
        expected: Role,
        /// The role the client currently holds.
        actual: Role,
    },
    /// An owner operation was invoked while no local record is active.
    NoActiveRecord,
    /// The referenced record is not in this client's private store or the shared index.
    UnknownRecord {
        /// The identifier that could not be found.
        id: RecordId,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// Serialization or deserialization of data failed.
    SerializationError {
        /// A description of what failed to serialize/deserialize.
        context: String,
    },
}

impl RelayError {
    pub(crate) fn storage(context: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            context: context.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedImport {
            reason: reason.into(),
        }
    }
}

impl Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::StorageUnavailable { context } => {
                write!(f, "Storage unavailable: {}", context)
            },
            RelayError::MalformedImport { reason } => {
                write!(f, "Import rejected: {}", reason)
            },
            RelayError::IdentityUnavailable { context } => {
                write!(f, "Identity unavailable: {}", context)
            },
            RelayError::RoleMismatch { expected, actual } => {
                write!(
                    f,
                    "Operation requires the {} role, but this client is {}",
                    expected, actual
                )
            },
            RelayError::NoActiveRecord => {
                write!(f, "No local record is active.")
            },
            RelayError::UnknownRecord { id } => {
                write!(f, "Unknown record {}", id)
            },
            RelayError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            },
            RelayError::SerializationError { context } => {
                write!(f, "Serialization error: {}", context)
            },
        }
    }
}

impl Error for RelayError {}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn storage_unavailable_display_includes_context() {
        let err = RelayError::storage("private store: disk full");
        assert_eq!(err.to_string(), "Storage unavailable: private store: disk full");
    }

    #[test]
    fn role_mismatch_display_names_both_roles() {
        let err = RelayError::RoleMismatch {
            expected: Role::Viewer,
            actual: Role::Owner,
        };
        let text = err.to_string();
        assert!(text.contains("viewer"));
        assert!(text.contains("owner"));
    }

    #[test]
    fn errors_are_std_errors() {
        let err: Box<dyn Error> = Box::new(RelayError::NoActiveRecord);
        assert_eq!(err.to_string(), "No local record is active.");
    }
}
