use clap::{Parser, Subcommand};

/// Shared comment board backed by a hosted auth and database service.
#[derive(Parser, Debug)]
#[command(name = "corkboard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an account. Does not sign in.
    Register { email: String, password: String },

    /// Sign in and remember the session on this machine.
    Login { email: String, password: String },

    /// Sign out and forget the remembered session.
    Logout,

    /// Show who is signed in.
    Whoami,

    /// List comments, newest first. Your own are marked with `*`.
    List,

    /// Post a comment.
    Post { text: String },

    /// Replace the text of one of your comments.
    Edit { id: String, text: String },

    /// Delete one of your comments.
    Delete { id: String },

    /// Walk through a scripted session against an in-memory backend.
    Demo,

    /// Print the version.
    Version,
}
