/// The single shared upstream account the proxy authenticates as on behalf
/// of every client (spec.md §6). The proxy terminates client `LOGIN` /
/// `AUTHENTICATE` locally rather than forwarding client-supplied
/// credentials upstream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// `true`: connect wrapped in TLS from the first byte (IMAPS-style).
    /// `false`: connect in the clear; the proxy never issues `STARTTLS` to
    /// the upstream itself (spec.md is silent on a clear-to-TLS upgrade on
    /// this leg, so `use_tls` is the whole knob).
    pub use_tls: bool,
}

impl UpstreamConfig {
    pub fn new(host: String, port: u16, username: String, password: String) -> Self {
        UpstreamConfig {
            host,
            port,
            username,
            password,
            use_tls: true,
        }
    }
}
