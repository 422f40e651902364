use thiserror::Error;

use cairn_log::LogError;
use cairn_view::ViewError;

#[derive(Debug, Error)]
pub enum DbError {
    /// A view name collides with a facade member or an existing view.
    #[error("{0} is already in use")]
    NameInUse(String),

    /// A mutating operation was attempted after close.
    #[error("cannot {operation}: instance closed")]
    Closed { operation: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("view error: {0}")]
    View(#[from] ViewError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    pub(crate) fn closed(operation: &str) -> Self {
        Self::Closed {
            operation: operation.to_string(),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
