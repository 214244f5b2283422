//! Service-wide error type.
//!
//! The producer and the Fortuna processor never abort on a recoverable error;
//! they log it and continue with the next tick. Request handlers map these
//! variants onto HTTP status codes in `entropyd-server`.

use thiserror::Error;

/// Errors produced by the queue store, the TRNG producer and the Fortuna core.
#[derive(Debug, Error)]
pub enum Error {
    /// Bus open or device wake failed at startup. The producer runs in
    /// software mode for the lifetime of the process.
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Mid-operation bus failure. The current hardware exchange is abandoned
    /// and the producer completes the tick in software mode.
    #[error("hardware failure: {0}")]
    HardwareTransient(String),

    /// Storage I/O or schema error.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The generator was asked to emit before its first reseed.
    #[error("generator not seeded yet")]
    NotSeeded,

    /// A request parameter is outside its documented bounds.
    #[error("out of bounds: {0}")]
    Overflow(String),

    /// A stored record failed validation. Corrupt records are logged and
    /// skipped by fetches, never returned.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// An environment variable holds an unusable value.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code when this error aborts startup: unreachable storage
    /// exits 2, every other fatal init error exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Storage(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_exit_2() {
        let err = Error::Storage(rusqlite::Error::InvalidQuery);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn init_errors_exit_1() {
        assert_eq!(Error::HardwareUnavailable("no bus".into()).exit_code(), 1);
        assert_eq!(Error::Config("PORT".into()).exit_code(), 1);
    }

    #[test]
    fn display_includes_detail() {
        let msg = format!("{}", Error::Overflow("limit must be 1-1000".into()));
        assert!(msg.contains("out of bounds"));
        assert!(msg.contains("limit"));
    }
}
