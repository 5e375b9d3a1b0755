use std::io;

use thiserror::Error;

use imap_proto::{CommandLineError, ResponseLineError};

/// Errors surfaced while driving one session. Recoverable variants are
/// caught at the call site and turned into a wire response; fatal variants
/// drive the session supervisor into `Draining` (spec.md §7).
#[derive(Error, Debug)]
pub enum ServerTaskError {
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("bad command syntax: {0}")]
    BadSyntax(#[from] CommandLineError),
    #[error("bad upstream response syntax: {0}")]
    UpstreamBadSyntax(#[from] ResponseLineError),
    #[error("client tag already in use")]
    DuplicateClientTag,
    #[error("command denied by policy")]
    PolicyDeny,
    #[error("read from client: {0:?}")]
    ClientReadFailed(io::Error),
    #[error("write to client: {0:?}")]
    ClientWriteFailed(io::Error),
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("read from upstream: {0:?}")]
    UpstreamReadFailed(io::Error),
    #[error("write to upstream: {0:?}")]
    UpstreamWriteFailed(io::Error),
    #[error("upstream disconnected")]
    UpstreamDisconnected,
    #[error("upstream connect failed: {0:?}")]
    UpstreamConnectFailed(io::Error),
    #[error("upstream tls handshake failed: {0:?}")]
    UpstreamTlsFailed(io::Error),
    #[error("client tls handshake failed: {0:?}")]
    ClientTlsFailed(io::Error),
    #[error("upstream protocol error: {0}")]
    UpstreamProtocolError(&'static str),
    #[error("upstream did not advertise a supported SASL mechanism")]
    UpstreamNoUsableAuth,
    #[error("command timed out")]
    CommandTimeout,
    #[error("session idle timeout")]
    IdleTimeout,
}

pub type ServerTaskResult<T> = Result<T, ServerTaskError>;

impl ServerTaskError {
    /// Short, stable label for structured log fields.
    pub fn brief(&self) -> &'static str {
        match self {
            ServerTaskError::MalformedFrame(_) => "MalformedFrame",
            ServerTaskError::BadSyntax(_) => "BadSyntax",
            ServerTaskError::UpstreamBadSyntax(_) => "UpstreamBadSyntax",
            ServerTaskError::DuplicateClientTag => "DuplicateClientTag",
            ServerTaskError::PolicyDeny => "PolicyDeny",
            ServerTaskError::ClientReadFailed(_) => "ClientReadFailed",
            ServerTaskError::ClientWriteFailed(_) => "ClientWriteFailed",
            ServerTaskError::ClientDisconnected => "ClientDisconnected",
            ServerTaskError::UpstreamReadFailed(_) => "UpstreamReadFailed",
            ServerTaskError::UpstreamWriteFailed(_) => "UpstreamWriteFailed",
            ServerTaskError::UpstreamDisconnected => "UpstreamDisconnected",
            ServerTaskError::UpstreamConnectFailed(_) => "UpstreamConnectFailed",
            ServerTaskError::UpstreamTlsFailed(_) => "UpstreamTlsFailed",
            ServerTaskError::ClientTlsFailed(_) => "ClientTlsFailed",
            ServerTaskError::UpstreamProtocolError(_) => "UpstreamProtocolError",
            ServerTaskError::UpstreamNoUsableAuth => "UpstreamNoUsableAuth",
            ServerTaskError::CommandTimeout => "CommandTimeout",
            ServerTaskError::IdleTimeout => "IdleTimeout",
        }
    }

    /// Whether this error is fatal to the whole session (→ `Draining`) as
    /// opposed to recoverable at the single-command level.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServerTaskError::ClientDisconnected
                | ServerTaskError::UpstreamDisconnected
                | ServerTaskError::UpstreamConnectFailed(_)
                | ServerTaskError::UpstreamTlsFailed(_)
                | ServerTaskError::ClientTlsFailed(_)
                | ServerTaskError::UpstreamProtocolError(_)
                | ServerTaskError::UpstreamBadSyntax(_)
                | ServerTaskError::UpstreamNoUsableAuth
                | ServerTaskError::IdleTimeout
        )
    }
}

/// Startup-time configuration failures. Fatal at the CLI layer only
/// (spec.md §7): never observed once a session is running.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: yaml_rust::ScanError,
    },
    #[error("config document is not a mapping")]
    NotAMapping,
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("invalid value for key '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
