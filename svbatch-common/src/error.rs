//! Errors raised while loading or saving shared svbatch files

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be parsed into, or rendered from, the target type
    #[error("Configuration error: {0}")]
    Config(String),
}
