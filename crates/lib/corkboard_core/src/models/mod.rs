//! Domain models shared by the gateways and the session store.

pub mod auth;
pub mod comment;

pub use auth::{Credential, Identity, Session};
pub use comment::{Comment, NewComment};
