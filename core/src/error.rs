use thiserror::Error;

/// Errors produced by the larder core.
///
/// Uniqueness races are never reported here: the storage layer resolves them
/// by re-selecting the row that won.
#[derive(Error, Debug)]
pub enum Error {
    /// Input that can never succeed (blank names, negative quantities, unit
    /// mismatches, forbidden state transitions).
    #[error("{0}")]
    InvalidInput(String),

    /// A referenced user, ingredient, recipe, plan, prompt or suggestion does
    /// not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A collaborator outside the store (push transport) failed.
    #[error("External dependency failed: {0}")]
    External(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
