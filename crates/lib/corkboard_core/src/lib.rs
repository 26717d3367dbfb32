//! # corkboard_core
//!
//! Client-side core of Corkboard: the session store, the auth and comment
//! gateways over a hosted backend, and the board controller the UI drives.

pub mod auth;
pub mod backend;
pub mod board;
pub mod comments;
pub mod config;
pub mod models;
pub mod request;
pub mod session;
pub mod storage;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
