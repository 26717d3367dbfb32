use corkboard_core::board::BoardError;
use corkboard_core::config::ConfigError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}", .0)]
    Custom(String),

    #[error("IO::{:?}: {}", .0, .0)]
    Io(#[from] std::io::Error),

    #[error("FlexiLogger::{:?}: {}", .0, .0)]
    FlexiLogger(#[from] flexi_logger::FlexiLoggerError),

    #[error("Config: {}", .0)]
    Config(#[from] ConfigError),

    #[error("{}", describe(.0))]
    Board(#[from] BoardError),
}

fn describe(err: &BoardError) -> String {
    if err.is_retryable() {
        format!("{} Run the command again to retry.", err.user_message())
    } else {
        err.user_message()
    }
}
