//! Error types for NETCONF operations

use serde_derive::Serialize;
use thiserror::Error;

/// Errors produced by the client, the session engine and the resolver.
///
/// Fatal session errors are cloned into every pending waiter when the
/// session closes, so the type is `Clone` and transport failures are
/// carried as rendered strings.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The XPath expression is empty, all slashes, or otherwise outside the
    /// accepted grammar for the requested operation.
    #[error("invalid XPath expression: {0}")]
    InvalidXPath(String),

    /// SSH connect, authentication or channel failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A 20 second guard expired.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The framer's buffered bytes would exceed the 50 MiB ceiling.
    #[error("frame buffer limit exceeded")]
    FrameOverflow,

    /// Malformed XML or a tree that cannot be encoded.
    #[error("malformed XML: {0}")]
    Xml(String),

    /// The server hello was missing or unusable.
    #[error("malformed hello: {0}")]
    Hello(String),

    /// The server answered with an `rpc-error`.
    #[error("{}", .0.message)]
    Rpc(RpcError),

    /// An edit-config reply that did not acknowledge the change.
    #[error("server response did not include OK")]
    MissingOk,

    /// The resolver matched nothing to edit.
    #[error("Failed to build the edit config message matching the XPath/Schema")]
    EmptyResolution,

    /// The resolver matched several schema branches and
    /// `allow_multiple_edit` is off.
    #[error("Editing multiple schema branches not allowed")]
    MultipleEdit,

    /// A write operation was attempted on a read-only client.
    #[error("Operation not performed: in read-only mode")]
    ReadOnly,

    /// The schema query used for wildcard resolution returned no data.
    #[error("schema query returned no data")]
    EmptySchema,

    /// The session closed underneath an outstanding request.
    #[error("SSH session closed")]
    SessionClosed,

    /// `close()` was called on a client that never opened a session.
    #[error("NETCONF session is not opened")]
    NotOpened,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

#[cfg(feature = "ssh")]
impl From<russh::Error> for Error {
    fn from(e: russh::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

/// A classified `rpc-error` element from an `rpc-reply`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RpcError {
    /// `error-type`: the conceptual layer that rejected the request.
    pub error_type: Option<String>,
    /// `error-tag`: the standard error identifier.
    pub tag: Option<String>,
    /// `error-severity`: `error` or `warning`.
    pub severity: Option<String>,
    /// Human-readable message, either the server's `error-message` or a
    /// text inferred from the tag and `error-info`.
    pub message: String,
    /// Optional `error-info` details.
    pub info: Option<RpcErrorInfo>,
}

/// The `error-info` sub-element of an `rpc-error`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RpcErrorInfo {
    pub bad_element: Option<String>,
    pub bad_namespace: Option<String>,
    pub bad_content: Option<String>,
}
