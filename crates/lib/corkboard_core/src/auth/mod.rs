//! Authentication: classified errors and the auth gateway.
//!
//! Raw backend failures never leave this module. [`classify_registration`]
//! and [`classify_sign_in`] translate them into [`AuthError`], each producing
//! only the kinds its operation can report.

pub mod gateway;

use std::time::Duration;

use thiserror::Error;

pub use gateway::AuthGateway;

use crate::backend::{BackendError, codes};
use crate::request::Interrupted;

/// Classified authentication failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email already in use")]
    EmailInUse,

    #[error("Invalid email")]
    InvalidEmail,

    #[error("Weak password")]
    WeakPassword,

    #[error("Operation not allowed")]
    OperationNotAllowed,

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("User not found")]
    UserNotFound,

    #[error("Wrong password")]
    WrongPassword,

    /// Anything the backend reported that has no dedicated kind. Carries the
    /// backend's own message.
    #[error("Auth error: {0}")]
    Unknown(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Auth request timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Auth request cancelled")]
    Cancelled,
}

impl AuthError {
    /// Text for the blocking error dialog.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::EmailInUse => "That email address is already used by another account.".into(),
            AuthError::InvalidEmail => "The email address is not valid.".into(),
            AuthError::WeakPassword => "The password must be at least 6 characters long.".into(),
            AuthError::OperationNotAllowed => "This operation is not allowed.".into(),
            AuthError::InvalidCredential => {
                "The credentials are incorrect, malformed or have expired.".into()
            }
            AuthError::UserNotFound => "No user was found with this email address.".into(),
            AuthError::WrongPassword => "The password is incorrect.".into(),
            AuthError::Unknown(message) if !message.is_empty() => message.clone(),
            AuthError::Unknown(_) => "An unknown error occurred.".into(),
            AuthError::Network(_) => "Could not reach the server. Check your connection.".into(),
            AuthError::TimedOut(_) => "The server took too long to answer. Try again.".into(),
            AuthError::Cancelled => "The request was cancelled.".into(),
        }
    }
}

impl From<Interrupted> for AuthError {
    fn from(i: Interrupted) -> Self {
        match i {
            Interrupted::TimedOut(d) => AuthError::TimedOut(d),
            Interrupted::Cancelled => AuthError::Cancelled,
        }
    }
}

/// Translates a sign-up failure. Produces `EmailInUse`, `InvalidEmail`,
/// `WeakPassword`, `OperationNotAllowed`, `InvalidCredential` or `Unknown`
/// for rejections.
pub fn classify_registration(err: &BackendError) -> AuthError {
    classify(err, |code| match code {
        codes::EMAIL_IN_USE => Some(AuthError::EmailInUse),
        codes::INVALID_EMAIL => Some(AuthError::InvalidEmail),
        codes::WEAK_PASSWORD => Some(AuthError::WeakPassword),
        codes::OPERATION_NOT_ALLOWED => Some(AuthError::OperationNotAllowed),
        codes::INVALID_CREDENTIAL => Some(AuthError::InvalidCredential),
        _ => None,
    })
}

/// Translates a sign-in failure. Produces `UserNotFound`, `WrongPassword`,
/// `InvalidEmail`, `InvalidCredential` or `Unknown` for rejections.
pub fn classify_sign_in(err: &BackendError) -> AuthError {
    classify(err, |code| match code {
        codes::USER_NOT_FOUND => Some(AuthError::UserNotFound),
        codes::WRONG_PASSWORD => Some(AuthError::WrongPassword),
        codes::INVALID_EMAIL => Some(AuthError::InvalidEmail),
        codes::INVALID_CREDENTIAL => Some(AuthError::InvalidCredential),
        _ => None,
    })
}

/// Translates failures of session reconciliation and sign-out.
pub(crate) fn classify_session(err: &BackendError) -> AuthError {
    classify(err, |code| match code {
        codes::INVALID_CREDENTIAL | codes::TOKEN_EXPIRED => Some(AuthError::InvalidCredential),
        codes::USER_NOT_FOUND => Some(AuthError::UserNotFound),
        _ => None,
    })
}

fn classify(err: &BackendError, known: impl Fn(&str) -> Option<AuthError>) -> AuthError {
    match err {
        BackendError::Rejected { code, message } => {
            known(code).unwrap_or_else(|| AuthError::Unknown(message.clone()))
        }
        BackendError::Transport(message) => AuthError::Network(message.clone()),
        BackendError::Decode(message) => AuthError::Unknown(message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(code: &str) -> BackendError {
        BackendError::rejected(code, format!("raw {code}"))
    }

    #[test]
    fn registration_codes_map_to_their_kinds() {
        assert_eq!(classify_registration(&rejected(codes::EMAIL_IN_USE)), AuthError::EmailInUse);
        assert_eq!(classify_registration(&rejected(codes::INVALID_EMAIL)), AuthError::InvalidEmail);
        assert_eq!(classify_registration(&rejected(codes::WEAK_PASSWORD)), AuthError::WeakPassword);
        assert_eq!(
            classify_registration(&rejected(codes::OPERATION_NOT_ALLOWED)),
            AuthError::OperationNotAllowed
        );
        assert_eq!(
            classify_registration(&rejected(codes::INVALID_CREDENTIAL)),
            AuthError::InvalidCredential
        );
    }

    #[test]
    fn sign_in_codes_map_to_their_kinds() {
        assert_eq!(classify_sign_in(&rejected(codes::USER_NOT_FOUND)), AuthError::UserNotFound);
        assert_eq!(classify_sign_in(&rejected(codes::WRONG_PASSWORD)), AuthError::WrongPassword);
        assert_eq!(classify_sign_in(&rejected(codes::INVALID_EMAIL)), AuthError::InvalidEmail);
        assert_eq!(
            classify_sign_in(&rejected(codes::INVALID_CREDENTIAL)),
            AuthError::InvalidCredential
        );
    }

    #[test]
    fn kinds_outside_an_operation_become_unknown_with_backend_message() {
        // Sign-in never reports a weak password, registration never a wrong one.
        assert_eq!(
            classify_sign_in(&rejected(codes::WEAK_PASSWORD)),
            AuthError::Unknown("raw auth/weak-password".into())
        );
        assert_eq!(
            classify_registration(&rejected(codes::WRONG_PASSWORD)),
            AuthError::Unknown("raw auth/wrong-password".into())
        );
    }

    #[test]
    fn transport_failures_are_network_errors() {
        let err = BackendError::Transport("connection refused".into());
        assert_eq!(
            classify_sign_in(&err),
            AuthError::Network("connection refused".into())
        );
    }

    #[test]
    fn interruptions_convert() {
        assert_eq!(AuthError::from(Interrupted::Cancelled), AuthError::Cancelled);
        let d = Duration::from_secs(1);
        assert_eq!(AuthError::from(Interrupted::TimedOut(d)), AuthError::TimedOut(d));
    }

    #[test]
    fn user_messages_are_human_readable() {
        assert_eq!(
            AuthError::WrongPassword.user_message(),
            "The password is incorrect."
        );
        assert_eq!(
            AuthError::Unknown("quota exceeded".into()).user_message(),
            "quota exceeded"
        );
        assert_eq!(
            AuthError::Unknown(String::new()).user_message(),
            "An unknown error occurred."
        );
    }
}
