use std::path::PathBuf;

use crate::config::limits::Limits;
use crate::config::upstream::UpstreamConfig;

/// Certificate material for a client-facing listener that terminates TLS
/// immediately on accept. When absent, the listener is plain and offers
/// `STARTTLS`; when present, `STARTTLS` is never advertised (spec.md §6).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListenerTlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListenerConfig {
    pub name: String,
    pub bind_host: String,
    pub bind_port: u16,
    pub upstream: UpstreamConfig,
    pub limits: Limits,
    /// Certificate material for this listener, if any. Its role depends on
    /// `implicit_tls`: terminated at accept time when `true` (an "IMAPS"
    /// style listener, which never advertises `STARTTLS`), or held ready
    /// for a `STARTTLS` upgrade on an otherwise-plain listener when `false`.
    pub tls: Option<ListenerTlsConfig>,
    /// `true`: TLS is terminated immediately on accept and `STARTTLS` is
    /// never advertised. `false`: the listener accepts plain connections
    /// and advertises `STARTTLS` whenever `tls` is configured (spec.md §6).
    pub implicit_tls: bool,
}

impl ListenerConfig {
    pub fn new(name: String, upstream: UpstreamConfig) -> Self {
        ListenerConfig {
            name,
            bind_host: "0.0.0.0".to_string(),
            bind_port: 9993,
            upstream,
            limits: Limits::default(),
            tls: None,
            implicit_tls: false,
        }
    }
}
