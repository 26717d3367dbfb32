//! In-process backend.
//!
//! Implements all three backend traits against plain maps. It mirrors the
//! hosted service's observable behaviour closely enough for tests and the
//! CLI demo: sequential user ids (`u1`, `u2`, ...), server-side timestamps
//! that strictly increase, and the same validation failures on sign-up and
//! sign-in. `set_offline` and `set_hanging` inject transport faults.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    Account, AuthBackend, BackendError, CommentBackend, UserDirectory, codes,
};
use crate::models::{Comment, Credential, Identity, NewComment};

/// Minimum password length the hosted service accepts.
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug)]
struct StoredAccount {
    user_id: String,
    password: String,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, StoredAccount>,
    /// session token -> user id
    tokens: HashMap<String, String>,
    profiles: HashMap<String, String>,
    comments: HashMap<String, Comment>,
    next_user: u64,
    next_token: u64,
    last_timestamp_ms: i64,
}

/// In-memory stand-in for the hosted auth service and record store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    offline: AtomicBool,
    hanging: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every call suspends forever while set.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// Number of calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of live remote sessions.
    pub fn active_sessions(&self) -> usize {
        self.lock().tokens.len()
    }

    /// Deletes an account and revokes its sessions. Comments and the
    /// profile record are left behind.
    pub fn delete_account(&self, email: &str) {
        let mut state = self.lock();
        if let Some(account) = state.accounts.remove(email) {
            state.tokens.retain(|_, uid| *uid != account.user_id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock only happens in a failing test.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("backend unreachable".into()));
        }
        Ok(())
    }

    fn issue_token(state: &mut State, user_id: &str) -> String {
        state.next_token += 1;
        let token = format!("session-{}-{}", user_id, state.next_token);
        state.tokens.insert(token.clone(), user_id.to_string());
        token
    }

    fn server_timestamp(state: &mut State) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let ts = now.max(state.last_timestamp_ms + 1);
        state.last_timestamp_ms = ts;
        DateTime::from_timestamp_millis(ts).unwrap_or_else(Utc::now)
    }
}

fn is_well_formed_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        self.enter().await?;
        if !is_well_formed_email(email) {
            return Err(BackendError::rejected(
                codes::INVALID_EMAIL,
                "The email address is badly formatted.",
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::rejected(
                codes::WEAK_PASSWORD,
                "Password should be at least 6 characters",
            ));
        }

        let mut state = self.lock();
        if state.accounts.contains_key(email) {
            return Err(BackendError::rejected(
                codes::EMAIL_IN_USE,
                "The email address is already in use by another account.",
            ));
        }
        state.next_user += 1;
        let user_id = format!("u{}", state.next_user);
        state.accounts.insert(
            email.to_string(),
            StoredAccount {
                user_id: user_id.clone(),
                password: password.to_string(),
            },
        );
        Ok(Identity::new(user_id, email))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Credential, BackendError> {
        self.enter().await?;
        if !is_well_formed_email(email) {
            return Err(BackendError::rejected(
                codes::INVALID_EMAIL,
                "The email address is badly formatted.",
            ));
        }

        let mut state = self.lock();
        let user_id = match state.accounts.get(email) {
            None => {
                return Err(BackendError::rejected(
                    codes::USER_NOT_FOUND,
                    "There is no user record corresponding to this identifier.",
                ));
            }
            Some(account) if account.password != password => {
                return Err(BackendError::rejected(
                    codes::WRONG_PASSWORD,
                    "The password is invalid.",
                ));
            }
            Some(account) => account.user_id.clone(),
        };
        let session_token = Self::issue_token(&mut state, &user_id);
        Ok(Credential {
            identity: Identity::new(user_id, email),
            session_token,
        })
    }

    async fn sign_out(&self, session_token: Option<&str>) -> Result<(), BackendError> {
        self.enter().await?;
        if let Some(token) = session_token {
            self.lock().tokens.remove(token);
        }
        Ok(())
    }

    async fn current_account(&self, session_token: &str) -> Result<Option<Account>, BackendError> {
        self.enter().await?;
        let state = self.lock();
        let Some(user_id) = state.tokens.get(session_token) else {
            return Ok(None);
        };
        let email = state
            .accounts
            .iter()
            .find(|(_, account)| account.user_id == *user_id)
            .map(|(email, _)| email.clone());
        Ok(Some(Account {
            user_id: user_id.clone(),
            email,
        }))
    }
}

#[async_trait]
impl CommentBackend for MemoryBackend {
    async fn fetch_all(&self) -> Result<Vec<Comment>, BackendError> {
        self.enter().await?;
        Ok(self.lock().comments.values().cloned().collect())
    }

    async fn put(&self, comment: &NewComment) -> Result<(), BackendError> {
        self.enter().await?;
        let mut state = self.lock();
        if state.comments.contains_key(&comment.id) {
            // A retried create: the first write already landed.
            return Ok(());
        }
        let created_at = Self::server_timestamp(&mut state);
        state.comments.insert(
            comment.id.clone(),
            Comment {
                id: comment.id.clone(),
                author_user_id: comment.author_user_id.clone(),
                author_email: comment.author_email.clone(),
                text: comment.text.clone(),
                created_at,
            },
        );
        Ok(())
    }

    async fn patch_text(&self, comment_id: &str, text: &str) -> Result<(), BackendError> {
        self.enter().await?;
        match self.lock().comments.get_mut(comment_id) {
            Some(comment) => {
                comment.text = text.to_string();
                Ok(())
            }
            None => Err(BackendError::rejected(
                codes::NOT_FOUND,
                format!("no comment with id {comment_id}"),
            )),
        }
    }

    async fn remove(&self, comment_id: &str) -> Result<(), BackendError> {
        self.enter().await?;
        self.lock().comments.remove(comment_id);
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryBackend {
    async fn put_profile(&self, user_id: &str, email: &str) -> Result<(), BackendError> {
        self.enter().await?;
        self.lock()
            .profiles
            .insert(user_id.to_string(), email.to_string());
        Ok(())
    }

    async fn email_for(&self, user_id: &str) -> Result<Option<String>, BackendError> {
        self.enter().await?;
        Ok(self.lock().profiles.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_assigns_sequential_ids() {
        let backend = MemoryBackend::new();
        let a = backend.sign_up("a@x.com", "secret1").await.unwrap();
        let b = backend.sign_up("b@x.com", "secret1").await.unwrap();
        assert_eq!(a.user_id, "u1");
        assert_eq!(b.user_id, "u2");
    }

    #[tokio::test]
    async fn sign_up_leaves_no_session_behind() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();
        backend.sign_up("b@x.com", "secret1").await.unwrap();
        assert_eq!(backend.active_sessions(), 0);
    }

    #[tokio::test]
    async fn sign_up_rejects_like_the_hosted_service() {
        let backend = MemoryBackend::new();
        let err = backend.sign_up("not-an-email", "secret1").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_EMAIL));

        let err = backend.sign_up("a@x.com", "123").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::WEAK_PASSWORD));

        backend.sign_up("a@x.com", "secret1").await.unwrap();
        let err = backend.sign_up("a@x.com", "secret2").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::EMAIL_IN_USE));
    }

    #[tokio::test]
    async fn sign_in_distinguishes_unknown_user_and_wrong_password() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();

        let err = backend.sign_in("b@x.com", "secret1").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::USER_NOT_FOUND));

        let err = backend.sign_in("a@x.com", "nope").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::WRONG_PASSWORD));
    }

    #[tokio::test]
    async fn sign_out_revokes_token() {
        let backend = MemoryBackend::new();
        backend.sign_up("a@x.com", "secret1").await.unwrap();
        let cred = backend.sign_in("a@x.com", "secret1").await.unwrap();
        let account = backend.current_account(&cred.session_token).await.unwrap();
        assert_eq!(account.unwrap().email.as_deref(), Some("a@x.com"));

        backend.sign_out(Some(&cred.session_token)).await.unwrap();
        assert!(backend
            .current_account(&cred.session_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn timestamps_strictly_increase() {
        let backend = MemoryBackend::new();
        for i in 0..20 {
            backend
                .put(&NewComment::new("u1", format!("c{i}"), "a@x.com"))
                .await
                .unwrap();
        }
        let mut all = backend.fetch_all().await.unwrap();
        all.sort_by_key(|c| c.created_at);
        for pair in all.windows(2) {
            assert!(pair[0].created_at < pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn put_is_idempotent_on_id() {
        let backend = MemoryBackend::new();
        let c = NewComment::new("u1", "hello", "a@x.com");
        backend.put(&c).await.unwrap();
        let first = backend.fetch_all().await.unwrap()[0].created_at;

        backend.put(&NewComment::new("u1", "later", "a@x.com")).await.unwrap();
        backend.put(&c).await.unwrap();

        let mut stored = backend.fetch_all().await.unwrap();
        assert_eq!(stored.len(), 2);
        crate::comments::newest_first(&mut stored);
        assert_eq!(stored[1].id, c.id);
        assert_eq!(stored[1].created_at, first);
    }

    #[tokio::test]
    async fn patch_missing_comment_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.patch_text("missing", "x").await.unwrap_err();
        assert_eq!(err.code(), Some(codes::NOT_FOUND));
    }

    #[tokio::test]
    async fn offline_fails_with_transport_and_counts_calls() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        let err = backend.fetch_all().await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn profiles_survive_account_deletion() {
        let backend = MemoryBackend::new();
        backend.put_profile("u1", "a@x.com").await.unwrap();
        backend.delete_account("a@x.com");
        assert_eq!(
            backend.email_for("u1").await.unwrap().as_deref(),
            Some("a@x.com")
        );
    }
}
