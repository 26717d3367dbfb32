//! Comment store: data errors and the comment gateway.

pub mod gateway;

use std::time::Duration;

use thiserror::Error;

pub use gateway::{CommentGateway, newest_first};

use crate::backend::{BackendError, codes};
use crate::request::Interrupted;

/// Failure of a comment store operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommentError {
    #[error("Comment text must not be empty")]
    EmptyText,

    #[error("Comment not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Data error: {0}")]
    Backend(String),

    #[error("Comment request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Comment request cancelled")]
    Cancelled,
}

impl CommentError {
    /// Whether trying the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommentError::Backend(_) | CommentError::TimedOut(_))
    }
}

impl From<Interrupted> for CommentError {
    fn from(i: Interrupted) -> Self {
        match i {
            Interrupted::TimedOut(d) => CommentError::TimedOut(d),
            Interrupted::Cancelled => CommentError::Cancelled,
        }
    }
}

pub(crate) fn classify(err: &BackendError, comment_id: Option<&str>) -> CommentError {
    match err.code() {
        Some(codes::NOT_FOUND) => {
            CommentError::NotFound(comment_id.unwrap_or_default().to_string())
        }
        Some(codes::PERMISSION_DENIED) => CommentError::PermissionDenied(err.to_string()),
        _ => CommentError::Backend(err.to_string()),
    }
}
