use std::fmt;

use crate::pack::ObjectId;

/// Failures that callers need to tell apart.
///
/// Everything in the crate returns `anyhow::Result`; these variants travel
/// inside the `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Debug)]
pub enum Error {
    /// Missing or unusable branch/remote configuration
    Config(String),
    /// Remote URL scheme we cannot speak
    UnsupportedProtocol(String),
    /// Revision expression that resolves to nothing
    UnknownRevision(String),
    /// Store lookup for an id that is not present
    ObjectNotFound(ObjectId),
    /// Object referenced by the local graph but absent from the store
    MissingObject { id: ObjectId, referenced_by: Option<ObjectId> },
    /// Object whose content cannot be parsed
    InvalidObject { id: ObjectId, reason: String },
    Pack(String),
    Protocol(String),
    RemoteRejected { ref_name: String, reason: String },
    Transport(String),
    /// Negotiation call made in the wrong session state
    InvalidState { expected: &'static str, actual: &'static str },
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::UnsupportedProtocol(url) => write!(f, "Unsupported protocol: {}", url),
            Error::UnknownRevision(rev) => write!(f, "Unknown revision: {}", rev),
            Error::ObjectNotFound(id) => write!(f, "Object not found: {}", id),
            Error::MissingObject {
                id,
                referenced_by: Some(parent),
            } => write!(f, "Missing object {} (referenced by {})", id, parent),
            Error::MissingObject {
                id,
                referenced_by: None,
            } => write!(f, "Missing object {}", id),
            Error::InvalidObject { id, reason } => {
                write!(f, "Invalid object {}: {}", id, reason)
            }
            Error::Pack(msg) => write!(f, "Pack error: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::RemoteRejected { ref_name, reason } => {
                write!(f, "Remote rejected {}: {}", ref_name, reason)
            }
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::InvalidState { expected, actual } => write!(
                f,
                "Invalid session state: expected {}, session is {}",
                expected, actual
            ),
            Error::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Find the typed error inside an `anyhow::Error` chain, if there is one.
pub fn find(err: &anyhow::Error) -> Option<&Error> {
    err.chain().find_map(|cause| cause.downcast_ref::<Error>())
}
