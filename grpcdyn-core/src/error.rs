//! # Error classification
//!
//! Every module reports failures through its own `thiserror` enum. [`ErrorKind`] is the
//! coarse taxonomy shared by all of them, so that a host can map any failure to the
//! exception type it raises in scripts.
use std::error::Error;
use std::fmt;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A file, method or type could not be found.
    NotFound,
    /// A `.proto` source could not be parsed.
    Parse,
    /// Binary descriptors or messages could not be decoded.
    Decode,
    /// The caller supplied a malformed argument.
    InvalidArgument,
    /// The operation is not legal in the current state or phase.
    FailedPrecondition,
    /// A configured size limit was exceeded.
    ResourceExhausted,
    /// The server does not implement the requested protocol.
    Unimplemented,
    /// A definition clashes with one that is already registered.
    AlreadyExists,
    /// The transport could not reach the server.
    Unavailable,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Parse => "Parse",
            ErrorKind::Decode => "Decode",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::FailedPrecondition => "FailedPrecondition",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::Unimplemented => "Unimplemented",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Renders an error followed by all of its sources, separated by `": "`.
///
/// `tonic::transport::Error` only displays "transport error" on its own, the useful
/// part lives in the source chain.
pub(crate) fn display_chain(error: &dyn Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }

    rendered
}
