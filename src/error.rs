use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by the landmark pipeline.
///
/// Only setup paths return these. Per-packet problems are logged and skipped,
/// and shutdown reports an outcome instead of failing.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("failed to spawn producer {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("listener is {0:?}, expected Idle")]
    InvalidState(crate::listener::ListenerState),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
