use std::io;

use thiserror::Error;

use crate::common::PageId;
use crate::concurrency::TransactionId;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Field index {index} is out of range for a schema with {field_count} fields")]
    FieldIndex { index: usize, field_count: usize },

    #[error("No field named {0:?}")]
    NoSuchField(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("{context}")]
    StorageIo {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid page reference {page_id}: {reason}")]
    InvalidPageReference { page_id: PageId, reason: String },

    #[error("Transaction {tid} aborted: {reason}")]
    TransactionAborted { tid: TransactionId, reason: String },

    #[error("Iterator is {0}")]
    IteratorState(&'static str),

    #[error("No more tuples")]
    NoSuchElement,

    #[error("{0}")]
    DbOperation(String),
}

impl DbError {
    /// Bad field index, failed name lookup or a malformed schema
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DbError::FieldIndex { .. } | DbError::NoSuchField(_) | DbError::InvalidSchema(_)
        )
    }

    pub(crate) fn io(source: io::Error, context: impl Into<String>) -> Self {
        DbError::StorageIo {
            context: context.into(),
            source,
        }
    }
}

/// Attaches a context message to an io::Error, similar to anyhow::Context
pub(crate) trait IoContext<T> {
    fn io_context<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, C>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| DbError::io(e, context()))
    }
}
