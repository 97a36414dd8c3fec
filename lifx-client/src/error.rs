use std::io;

use thiserror::Error;

/// Errors returned by [crate::Client].
///
/// Nothing that happens on the wire after a command is queued is reported here.  Lost packets are
/// retried, bad packets are dropped, and failed sends are logged.
#[derive(Debug, Error)]
pub enum Error {
    /// A socket operation failed while setting up the client.
    #[error("socket {action} error: {err}")]
    Socket {
        action: &'static str,
        err: io::Error,
    },

    #[error("codec error: {0}")]
    Codec(#[from] lifx_core::Error),

    /// The client has been shut down and no longer accepts commands.
    #[error("command queue is closed")]
    QueueClosed,

    /// No local address was configured, and none could be found on the host's interfaces.
    #[error("unable to find a local IPv4 address")]
    NoLocalAddress,

    #[error("failed to spawn {name} thread: {err}")]
    Thread { name: &'static str, err: io::Error },
}

impl Error {
    pub(crate) fn socket(action: &'static str, err: io::Error) -> Self {
        Error::Socket { action, err }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
