use imap_proto::ParsedCommand;

/// Which keyword a denial is synthesized with (spec.md §4.5).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DenyKind {
    No,
    Bad,
}

/// The outcome of evaluating one client command against the ACL.
#[derive(Debug, Clone)]
pub enum PolicyDecision {
    Allow,
    Deny { kind: DenyKind, message: String },
    /// The on-the-wire behavior of `Rewrite` is intentionally
    /// under-specified by the source material (spec.md §9 Open Questions);
    /// the gate accepts it and the forwarding pipeline substitutes `args`
    /// before binding, but no built-in policy currently produces it.
    Rewrite(Box<[u8]>),
}

/// Everything the policy function needs to decide, besides the command
/// itself (spec.md §3, §4.5).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClientState {
    Unauth,
    Auth,
    Selected,
    Logout,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct PolicyContext<'a> {
    pub session_identity: &'a str,
    pub command_name: &'a str,
    pub parsed: ParsedCommand,
    pub args: Option<&'a [u8]>,
    pub client_state: ClientState,
    pub selected_mailbox: Option<&'a str>,
}

/// A pure decision function, consulted exactly once per client command
/// before any upstream visibility (spec.md §4.5). Boxed so the session
/// supervisor can hold one without a generic parameter threading through
/// every layer.
pub type PolicyFn = Box<dyn Fn(&PolicyContext) -> PolicyDecision + Send + Sync>;

/// A policy that allows everything; the default when no ACL is configured.
pub fn allow_all() -> PolicyFn {
    Box::new(|_ctx| PolicyDecision::Allow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_all_allows_every_command() {
        let policy = allow_all();
        let ctx = PolicyContext {
            session_identity: "alice",
            command_name: "SELECT",
            parsed: ParsedCommand::Select,
            args: Some(b"Forbidden"),
            client_state: ClientState::Auth,
            selected_mailbox: None,
        };
        assert!(matches!(policy(&ctx), PolicyDecision::Allow));
    }

    #[test]
    fn deny_carries_kind_and_message() {
        let policy: PolicyFn = Box::new(|ctx| {
            if ctx.args == Some(&b"Forbidden"[..]) {
                PolicyDecision::Deny {
                    kind: DenyKind::No,
                    message: "Access denied".to_string(),
                }
            } else {
                PolicyDecision::Allow
            }
        });
        let ctx = PolicyContext {
            session_identity: "alice",
            command_name: "SELECT",
            parsed: ParsedCommand::Select,
            args: Some(b"Forbidden"),
            client_state: ClientState::Auth,
            selected_mailbox: None,
        };
        match policy(&ctx) {
            PolicyDecision::Deny { kind, message } => {
                assert_eq!(kind, DenyKind::No);
                assert_eq!(message, "Access denied");
            }
            _ => panic!("expected Deny"),
        }
    }
}
