//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    /// An argument could not be used as given.
    #[display("invalid input: {_0}")]
    Input(#[error(not(source))] String),
    #[display("could not read {}", _0.display())]
    Read(#[error(not(source))] PathBuf),
    /// Writing to stdout failed.
    #[display("could not write output")]
    Output,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Read(_))
    }

    /// Process exit code for an error of this kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Input(_) => 2,
            Self::Config => 3,
            Self::Storage | Self::Read(_) | Self::Output => 1,
        }
    }
}
