use cairn_types::Seq;

use crate::method::MethodKind;

/// Errors produced by views and the readiness wrapper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ViewError {
    /// The view did not provide a method table.
    #[error("a view must declare a method table")]
    MissingMethodTable,

    /// A declared method has no implementation.
    #[error("expected a {kind} implementation for method '{name}'")]
    MissingMethod { name: String, kind: MethodKind },

    /// A declared method is implemented with a different convention.
    #[error("method '{name}' declared {declared} but implemented as {implemented}")]
    ConventionMismatch {
        name: String,
        declared: MethodKind,
        implemented: MethodKind,
    },

    /// The view does not declare a method with this name.
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    /// The method exists but was invoked through another convention.
    #[error("method '{name}' is {actual}, called as {called}")]
    WrongConvention {
        name: String,
        actual: MethodKind,
        called: MethodKind,
    },

    /// Call made after the instance or view was closed.
    #[error("cannot call {method}: instance closed")]
    Closed { method: String },

    /// A queued call was abandoned because the instance closed first.
    #[error("closed before ready")]
    ClosedBeforeReady,

    /// An entry arrived that does not follow the view's watermark.
    #[error("out-of-order entry: seq {seq} does not follow {since}")]
    OutOfOrder { seq: Seq, since: Seq },

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Failure inside a view implementation.
    #[error("view error: {0}")]
    Internal(String),
}

impl ViewError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// `true` for the two post-close conditions.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::ClosedBeforeReady)
    }
}

/// Convenience alias used throughout the view crate.
pub type ViewResult<T> = std::result::Result<T, ViewError>;
