//! Session store.
//!
//! Owns the process-wide [`Session`] and publishes every change through a
//! `watch` channel. All mutations go through [`SessionStore::restore`],
//! [`SessionStore::login`] and [`SessionStore::logout`].
//!
//! The store also owns the cancellation token of the current session.
//! Requests started through [`SessionStore::request_token`] are cancelled
//! when that session ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::AuthGateway;
use crate::models::{Identity, Session};

pub struct SessionStore {
    auth: Arc<AuthGateway>,
    state: watch::Sender<Session>,
    restore_started: AtomicBool,
    session_cancel: Mutex<CancellationToken>,
}

/// Flips `is_loading` off when dropped, so restoration can never leave the
/// session loading, even if its future is dropped half way.
struct LoadingGuard<'a>(&'a watch::Sender<Session>);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|s| {
            let was_loading = s.is_loading;
            s.is_loading = false;
            was_loading
        });
    }
}

impl SessionStore {
    pub fn new(auth: Arc<AuthGateway>) -> Self {
        let (state, _) = watch::channel(Session::starting());
        Self {
            auth,
            state,
            restore_started: AtomicBool::new(false),
            session_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    /// Receiver that observes every published change.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Cancellation token for a request made on behalf of the current
    /// session. It fires when the session ends.
    pub fn request_token(&self) -> CancellationToken {
        self.cancel_slot().child_token()
    }

    /// Startup restoration. Only the first call does anything.
    ///
    /// Without a persisted token no network call is made. Any failure leaves
    /// the session logged out. `is_loading` is false afterwards on every
    /// path.
    pub async fn restore(&self) {
        if self.restore_started.swap(true, Ordering::SeqCst) {
            debug!("session restoration already ran");
            return;
        }
        let _loading = LoadingGuard(&self.state);

        let identity = if self.auth.has_persisted_session().await {
            match self.auth.current_identity(&self.request_token()).await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(error = %e, "session restoration failed, continuing logged out");
                    None
                }
            }
        } else {
            debug!("no persisted session");
            None
        };

        match &identity {
            Some(identity) => info!(user_id = %identity.user_id, "session restored"),
            None => info!("no session to restore"),
        }
        self.state.send_modify(|s| {
            if identity.is_some() {
                s.identity = identity;
            }
            s.is_loading = false;
        });
    }

    /// Records a sign-in the auth gateway has already confirmed.
    pub fn login(&self, email: &str, user_id: &str) {
        let identity = Identity::new(user_id, email);
        let switched_user = self
            .state
            .borrow()
            .user_id()
            .is_some_and(|current| current != user_id);
        if switched_user {
            self.rotate_session_token();
        }
        self.state.send_modify(|s| s.identity = Some(identity));
        info!(user_id, "session started");
    }

    /// Signs out remotely, then clears the session whatever the outcome.
    ///
    /// Requests tied to the ending session are cancelled as soon as logout
    /// begins.
    pub async fn logout(&self) {
        self.cancel_slot().cancel();

        // Sign-out gets its own token: the session's one is already cancelled.
        self.auth.sign_out(&CancellationToken::new()).await;

        self.rotate_session_token();
        self.state.send_modify(|s| s.identity = None);
        info!("session ended");
    }

    fn cancel_slot(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.session_cancel.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rotate_session_token(&self) {
        let old = std::mem::replace(&mut *self.cancel_slot(), CancellationToken::new());
        old.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::storage::{KeyValueStore, MemoryStore, SESSION_TOKEN_KEY};

    struct Fixture {
        backend: Arc<MemoryBackend>,
        store: Arc<MemoryStore>,
        auth: Arc<AuthGateway>,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = Arc::new(MemoryBackend::new());
            let store = Arc::new(MemoryStore::new());
            let auth = Arc::new(AuthGateway::new(
                backend.clone(),
                backend.clone(),
                store.clone(),
                Duration::from_millis(200),
            ));
            Self {
                backend,
                store,
                auth,
            }
        }

        fn session(&self) -> SessionStore {
            SessionStore::new(self.auth.clone())
        }

        async fn signed_in(&self) {
            let c = CancellationToken::new();
            self.auth.register("a@x.com", "secret1", &c).await.unwrap();
            self.auth.sign_in("a@x.com", "secret1", &c).await.unwrap();
        }
    }

    #[tokio::test]
    async fn restore_without_token_makes_no_network_call() {
        let f = Fixture::new();
        let session = f.session();
        assert!(session.state().is_loading);

        session.restore().await;

        let state = session.state();
        assert!(!state.is_loading);
        assert!(!state.is_authenticated());
        assert_eq!(f.backend.calls(), 0);
    }

    #[tokio::test]
    async fn restore_with_valid_token_authenticates() {
        let f = Fixture::new();
        f.signed_in().await;
        let session = f.session();

        session.restore().await;

        let state = session.state();
        assert!(!state.is_loading);
        assert_eq!(state.user_id(), Some("u1"));
        assert_eq!(state.user_email(), Some("a@x.com"));
    }

    #[tokio::test]
    async fn restore_failure_degrades_to_logged_out() {
        let f = Fixture::new();
        f.signed_in().await;
        f.backend.set_offline(true);
        let session = f.session();

        session.restore().await;

        let state = session.state();
        assert!(!state.is_loading);
        assert!(!state.is_authenticated());
    }

    #[tokio::test]
    async fn restore_with_unknown_token_is_logged_out() {
        let f = Fixture::new();
        f.store.set(SESSION_TOKEN_KEY, "forged").await.unwrap();
        let session = f.session();

        session.restore().await;

        assert!(!session.state().is_authenticated());
        assert!(!session.state().is_loading);
    }

    #[tokio::test]
    async fn dropped_restore_still_clears_loading() {
        let f = Fixture::new();
        f.signed_in().await;
        f.backend.set_hanging(true);
        let session = f.session();

        let outcome = tokio::time::timeout(Duration::from_millis(20), session.restore()).await;
        assert!(outcome.is_err());
        assert!(!session.state().is_loading);
    }

    #[tokio::test]
    async fn loading_flips_exactly_once() {
        let f = Fixture::new();
        let session = f.session();
        let mut rx = session.subscribe();

        session.restore().await;
        session.restore().await;

        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().is_loading);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn login_is_observed_by_subscribers() {
        let f = Fixture::new();
        let session = f.session();
        let mut rx = session.subscribe();

        session.login("a@x.com", "u1");

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.identity, Some(Identity::new("u1", "a@x.com")));
    }

    #[tokio::test]
    async fn logout_clears_state_even_when_backend_is_down() {
        let f = Fixture::new();
        f.signed_in().await;
        let session = f.session();
        session.restore().await;
        assert!(session.state().is_authenticated());

        f.backend.set_offline(true);
        session.logout().await;

        assert!(!session.state().is_authenticated());
        assert!(!f.auth.has_persisted_session().await);
    }

    #[tokio::test]
    async fn logout_cancels_outstanding_request_tokens() {
        let f = Fixture::new();
        let session = f.session();
        session.login("a@x.com", "u1");
        let token = session.request_token();

        session.logout().await;

        assert!(token.is_cancelled());
        assert!(!session.request_token().is_cancelled());
    }

    #[tokio::test]
    async fn switching_user_cancels_previous_requests() {
        let f = Fixture::new();
        let session = f.session();
        session.login("a@x.com", "u1");
        let token = session.request_token();

        session.login("a@x.com", "u1");
        assert!(!token.is_cancelled());

        session.login("b@x.com", "u2");
        assert!(token.is_cancelled());
    }
}
