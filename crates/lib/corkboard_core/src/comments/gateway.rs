//! Comment gateway: CRUD over the remote comment collection.
//!
//! Every failure is returned to the caller (and logged). `list` and `create`
//! retry with backoff; `create` is safe to retry because the comment id is
//! generated before the first attempt and the store never overwrites an
//! existing record.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{CommentError, classify};
use crate::backend::CommentBackend;
use crate::models::{Comment, NewComment};
use crate::request::RequestScope;

pub struct CommentGateway {
    backend: Arc<dyn CommentBackend>,
    timeout: Duration,
    attempts: u32,
}

impl CommentGateway {
    /// `attempts` bounds retries of `list` and `create`.
    pub fn new(backend: Arc<dyn CommentBackend>, timeout: Duration, attempts: u32) -> Self {
        Self {
            backend,
            timeout,
            attempts: attempts.max(1),
        }
    }

    fn scope(&self, cancel: &CancellationToken) -> RequestScope {
        RequestScope::new(self.timeout, cancel.clone())
    }

    /// All comments, newest first.
    ///
    /// An empty collection is `Ok(vec![])`; a failed fetch is always `Err`.
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<Comment>, CommentError> {
        let mut comments = self
            .scope(cancel)
            .run_with_retry(self.attempts, CommentError::is_retryable, || async {
                self.backend.fetch_all().await.map_err(|e| classify(&e, None))
            })
            .await
            .inspect_err(|e| error!(error = %e, "failed to list comments"))?;
        newest_first(&mut comments);
        debug!(count = comments.len(), "listed comments");
        Ok(comments)
    }

    /// Creates a comment and returns its id.
    pub async fn create(
        &self,
        author_user_id: &str,
        text: &str,
        author_email: &str,
        cancel: &CancellationToken,
    ) -> Result<String, CommentError> {
        if text.trim().is_empty() {
            return Err(CommentError::EmptyText);
        }
        let comment = NewComment::new(author_user_id, text, author_email);
        self.scope(cancel)
            .run_with_retry(self.attempts, CommentError::is_retryable, || async {
                self.backend
                    .put(&comment)
                    .await
                    .map_err(|e| classify(&e, Some(comment.id.as_str())))
            })
            .await
            .inspect_err(|e| error!(error = %e, "failed to create comment"))?;
        debug!(comment_id = %comment.id, "created comment");
        Ok(comment.id)
    }

    /// Replaces a comment's text.
    pub async fn update(
        &self,
        comment_id: &str,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CommentError> {
        if text.trim().is_empty() {
            return Err(CommentError::EmptyText);
        }
        self.scope(cancel)
            .run(async {
                self.backend
                    .patch_text(comment_id, text)
                    .await
                    .map_err(|e| classify(&e, Some(comment_id)))
            })
            .await
            .inspect_err(|e| error!(comment_id, error = %e, "failed to update comment"))?;
        debug!(comment_id, "updated comment");
        Ok(())
    }

    pub async fn delete(
        &self,
        comment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), CommentError> {
        self.scope(cancel)
            .run(async {
                self.backend
                    .remove(comment_id)
                    .await
                    .map_err(|e| classify(&e, Some(comment_id)))
            })
            .await
            .inspect_err(|e| error!(comment_id, error = %e, "failed to delete comment"))?;
        debug!(comment_id, "deleted comment");
        Ok(())
    }
}

/// Sorts by server timestamp, newest first. Equal timestamps fall back to
/// id order, which follows insertion order for time-ordered ids.
pub fn newest_first(comments: &mut [Comment]) {
    comments.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
