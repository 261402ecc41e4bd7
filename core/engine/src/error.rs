//! FILENAME: core/engine/src/error.rs

use thiserror::Error;

use crate::value::RowId;

#[derive(Error, Debug)]
pub enum GridError {
    /// A misconfigured model (e.g. an aggregation function that cannot be
    /// applied to a column). The caller must fix the model.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No row with id #{0} found")]
    MissingRow(RowId),

    #[error("No column with field \"{0}\" found")]
    MissingColumn(String),

    #[error("Only group nodes can be expanded or collapsed (row #{0})")]
    NotAGroup(RowId),

    #[error("A row was provided without id: {0}")]
    MissingRowId(String),

    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type GridResult<T> = Result<T, GridError>;
