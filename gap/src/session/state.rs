use imap_proto::Tag;

/// The session supervisor's own lifecycle (spec.md §4.6, C6).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionPhase {
    Handshaking,
    Proxying,
    Draining,
    Closed,
}

/// IMAP4 session state tracked independently for each side of the proxy
/// (spec.md §3). `client_state` reflects what the proxy has told the
/// client; `upstream_state` reflects what the proxy believes the upstream
/// session has reached.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImapState {
    Unauth,
    Auth,
    Selected,
    Logout,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub client_state: ImapState,
    pub upstream_state: ImapState,
    pub selected_mailbox: Option<String>,
    /// Set once a `STARTTLS` upgrade has been negotiated on the
    /// client-facing socket; a second `STARTTLS` is then refused.
    pub tls_active: bool,
    /// Set while an `IDLE` issued by the client is outstanding, carrying
    /// the (client tag, upstream tag) pair it was bound under. `DONE` is
    /// routed against this rather than going through ordinary tag lookup,
    /// since `DONE` itself carries no tag (supplemented IDLE feature).
    pub idle: Option<(Tag, Tag)>,
}

impl SessionState {
    pub fn new() -> Self {
        SessionState {
            phase: SessionPhase::Handshaking,
            client_state: ImapState::Unauth,
            upstream_state: ImapState::Unauth,
            selected_mailbox: None,
            tls_active: false,
            idle: None,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
