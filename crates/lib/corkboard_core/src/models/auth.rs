//! Authentication domain models.

use serde::{Deserialize, Serialize};

/// Who the current process is signed in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
        }
    }
}

/// Result of a successful sign-up or sign-in against the auth backend.
///
/// `session_token` is opaque to everything except the backend that issued it.
#[derive(Debug, Clone)]
pub struct Credential {
    pub identity: Identity,
    pub session_token: String,
}

/// In-memory session snapshot published to subscribers.
///
/// The identity is all-or-nothing, so an authenticated session always has
/// both a user id and an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: Option<Identity>,
    /// True only until the startup restoration finishes.
    pub is_loading: bool,
}

impl Session {
    /// Session state at process start, before restoration has run.
    pub fn starting() -> Self {
        Self {
            identity: None,
            is_loading: true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }

    pub fn user_email(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.email.as_str())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::starting()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_session_is_loading_and_anonymous() {
        let s = Session::starting();
        assert!(s.is_loading);
        assert!(!s.is_authenticated());
        assert!(s.user_id().is_none());
        assert!(s.user_email().is_none());
    }

    #[test]
    fn authenticated_session_exposes_identity() {
        let s = Session {
            identity: Some(Identity::new("u1", "a@x.com")),
            is_loading: false,
        };
        assert!(s.is_authenticated());
        assert_eq!(s.user_id(), Some("u1"));
        assert_eq!(s.user_email(), Some("a@x.com"));
    }
}
