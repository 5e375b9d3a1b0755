use imap_proto::{
    Command, CommandData, CommandDataLine, CommandResult, OngoingResponse, ParsedCommand,
    Response, ServerStatus,
};

use crate::capability::CapabilityFilter;
use crate::codec::LineCodec;
use crate::error::ServerTaskResult;
use crate::io::BoxedStream;
use crate::policy::{ClientState, DenyKind, PolicyContext, PolicyDecision, PolicyFn};
use crate::session::state::{ImapState, SessionPhase, SessionState};
use crate::tracker::{ForwardedCommand, TagTracker};

/// What the session supervisor must do after one client line has been
/// handled (spec.md §4.4, §4.6, and the STARTTLS supplement).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ClientEvent {
    /// Nothing beyond the ordinary forward/deny/synthesized response.
    Handled,
    /// `STARTTLS` was accepted; the caller must upgrade the client socket
    /// in place before reading the next line.
    StartTlsAccepted,
    /// `LOGOUT` was forwarded; the caller must transition to `Draining`
    /// once in-flight commands drain (spec.md §4.6).
    LogoutRequested,
}

/// What the session supervisor must do after one upstream line has been
/// routed (spec.md §4.4 "upstream → client" contract).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UpstreamEvent {
    Continue,
    /// `* BYE` was seen; the caller must transition to `Draining`
    /// (Design Note, spec.md §9).
    ByeReceived,
}

fn to_policy_state(state: ImapState) -> ClientState {
    match state {
        ImapState::Unauth => ClientState::Unauth,
        ImapState::Auth => ClientState::Auth,
        ImapState::Selected => ClientState::Selected,
        ImapState::Logout => ClientState::Logout,
        ImapState::Timeout => ClientState::Timeout,
    }
}

/// Handles one raw client line end to end: parse, gate, and either forward,
/// deny, or terminate locally (spec.md §4.4 "client → upstream" contract).
#[allow(clippy::too_many_arguments)]
pub async fn forward_client_line(
    raw_line: &[u8],
    client: &mut LineCodec<BoxedStream>,
    upstream: &mut LineCodec<BoxedStream>,
    tracker: &mut TagTracker,
    policy: &PolicyFn,
    state: &mut SessionState,
    session_identity: &mut Option<String>,
    listener_is_tls: bool,
    capability_filter: &mut CapabilityFilter,
) -> ServerTaskResult<ClientEvent> {
    if state.idle.is_some() && is_done_line(raw_line) {
        upstream.write_raw(b"DONE\r\n").await?;
        return Ok(ClientEvent::Handled);
    }

    let mut cmd = match Command::parse_line(raw_line) {
        Ok(cmd) => cmd,
        Err(_) => {
            client.write_raw(b"* BAD Syntax error\r\n").await?;
            return Ok(ClientEvent::Handled);
        }
    };

    if matches!(state.phase, SessionPhase::Draining | SessionPhase::Closed) {
        let reply = imap_proto::format_tagged(&cmd.tag, "BAD", "Connection closing");
        client.write_raw(&reply).await?;
        return Ok(ClientEvent::Handled);
    }

    if cmd.parsed == ParsedCommand::StartTls {
        return handle_starttls(&cmd, client, state, listener_is_tls).await;
    }

    if matches!(cmd.parsed, ParsedCommand::Login | ParsedCommand::Authenticate) {
        return handle_local_auth(&cmd, client, policy, state, session_identity).await;
    }

    if cmd.parsed == ParsedCommand::Enable {
        return handle_enable(&cmd, client, upstream, tracker, capability_filter).await;
    }

    let ctx = PolicyContext {
        session_identity: session_identity.as_deref().unwrap_or(""),
        command_name: cmd.name.as_str(),
        parsed: cmd.parsed,
        args: cmd.args.as_deref(),
        client_state: to_policy_state(state.client_state),
        selected_mailbox: state.selected_mailbox.as_deref(),
    };

    match policy(&ctx) {
        PolicyDecision::Deny { kind, message } => {
            let keyword = match kind {
                DenyKind::No => "NO",
                DenyKind::Bad => "BAD",
            };
            let reply = imap_proto::format_tagged(&cmd.tag, keyword, &message);
            client.write_raw(&reply).await?;
            return Ok(ClientEvent::Handled);
        }
        PolicyDecision::Rewrite(new_args) => {
            cmd.args = if new_args.is_empty() { None } else { Some(new_args) };
        }
        PolicyDecision::Allow => {}
    }

    if tracker.lookup_by_client(&cmd.tag).is_some() {
        let reply = imap_proto::format_tagged(&cmd.tag, "BAD", "Command tag already in use");
        client.write_raw(&reply).await?;
        return Ok(ClientEvent::Handled);
    }

    let upstream_tag = tracker.allocate();
    let wire = cmd.render(&upstream_tag);
    if tracker
        .bind(cmd.tag.clone(), upstream_tag.clone(), cmd.name.to_string(), cmd.args.clone())
        .is_none()
    {
        let reply = imap_proto::format_tagged(&cmd.tag, "BAD", "Command tag already in use");
        client.write_raw(&reply).await?;
        return Ok(ClientEvent::Handled);
    }

    if let Err(e) = upstream.write_line(&wire).await {
        tracker.cancel(&cmd.tag);
        return Err(e);
    }

    if cmd.parsed == ParsedCommand::Idle {
        state.idle = Some((cmd.tag.clone(), upstream_tag));
    }

    if cmd.parsed == ParsedCommand::Logout {
        return Ok(ClientEvent::LogoutRequested);
    }

    Ok(ClientEvent::Handled)
}

/// Whether `raw_line` is a bare `DONE` terminating an in-progress `IDLE`.
/// `DONE` carries no tag, so it cannot go through [`Command::parse_line`].
fn is_done_line(raw_line: &[u8]) -> bool {
    raw_line
        .strip_suffix(b"\r\n")
        .map(|body| body.eq_ignore_ascii_case(b"DONE"))
        .unwrap_or(false)
}

/// Handles `ENABLE` locally: forwards only the capability tokens the proxy
/// recognizes, and answers `OK` without forwarding anything if none survive
/// filtering (grounded in the teacher's `handle_enable_command`).
async fn handle_enable(
    cmd: &Command,
    client: &mut LineCodec<BoxedStream>,
    upstream: &mut LineCodec<BoxedStream>,
    tracker: &mut TagTracker,
    capability_filter: &mut CapabilityFilter,
) -> ServerTaskResult<ClientEvent> {
    let args = cmd.args.as_deref().unwrap_or(&[]);
    let requested: Vec<String> = String::from_utf8_lossy(args)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let accepted = capability_filter.filter_list(&requested);

    if accepted.is_empty() {
        let reply = imap_proto::format_tagged(&cmd.tag, "OK", "no enabled");
        client.write_raw(&reply).await?;
        return Ok(ClientEvent::Handled);
    }

    if tracker.lookup_by_client(&cmd.tag).is_some() {
        let reply = imap_proto::format_tagged(&cmd.tag, "BAD", "Command tag already in use");
        client.write_raw(&reply).await?;
        return Ok(ClientEvent::Handled);
    }

    let upstream_tag = tracker.allocate();
    let wire = {
        let mut out = Vec::new();
        out.extend_from_slice(upstream_tag.as_bytes());
        out.extend_from_slice(b" ENABLE ");
        out.extend_from_slice(accepted.join(" ").as_bytes());
        out
    };
    if tracker
        .bind(
            cmd.tag.clone(),
            upstream_tag.clone(),
            "ENABLE".to_string(),
            Some(accepted.join(" ").into_bytes().into_boxed_slice()),
        )
        .is_none()
    {
        let reply = imap_proto::format_tagged(&cmd.tag, "BAD", "Command tag already in use");
        client.write_raw(&reply).await?;
        return Ok(ClientEvent::Handled);
    }
    if let Err(e) = upstream.write_line(&wire).await {
        tracker.cancel(&cmd.tag);
        return Err(e);
    }
    Ok(ClientEvent::Handled)
}

/// Parses a whitespace/quote-delimited `LOGIN userid password` argument
/// pair. The core does not decompose arguments beyond this (spec.md §4.2);
/// this is local-auth bookkeeping, not wire parsing.
fn parse_login_args(args: &[u8]) -> Option<(String, String)> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < args.len() {
        while i < args.len() && args[i] == b' ' {
            i += 1;
        }
        if i >= args.len() {
            break;
        }
        if args[i] == b'"' {
            let start = i + 1;
            let mut j = start;
            while j < args.len() && args[j] != b'"' {
                j += 1;
            }
            tokens.push(String::from_utf8_lossy(&args[start..j]).to_string());
            i = (j + 1).min(args.len());
        } else {
            let start = i;
            while i < args.len() && args[i] != b' ' {
                i += 1;
            }
            tokens.push(String::from_utf8_lossy(&args[start..i]).to_string());
        }
    }
    if tokens.len() >= 2 {
        Some((tokens.remove(0), tokens.remove(0)))
    } else {
        None
    }
}

/// Terminates `LOGIN`/`AUTHENTICATE` at the proxy rather than forwarding
/// them: the upstream connection is already authenticated with the
/// configured service account (spec.md §6 `UpstreamConfig`), so the
/// client's own credentials only ever establish `session_identity` for the
/// policy gate (spec.md §1 "authenticates the client locally").
async fn handle_local_auth(
    cmd: &Command,
    client: &mut LineCodec<BoxedStream>,
    policy: &PolicyFn,
    state: &mut SessionState,
    session_identity: &mut Option<String>,
) -> ServerTaskResult<ClientEvent> {
    let identity = match cmd.parsed {
        ParsedCommand::Login => {
            let args = cmd.args.as_deref().unwrap_or(&[]);
            match parse_login_args(args) {
                Some((user, _pass)) => user,
                None => {
                    let reply =
                        imap_proto::format_tagged(&cmd.tag, "BAD", "Invalid LOGIN arguments");
                    client.write_raw(&reply).await?;
                    return Ok(ClientEvent::Handled);
                }
            }
        }
        ParsedCommand::Authenticate => match authenticate_plain(cmd, client).await? {
            Some(user) => user,
            None => return Ok(ClientEvent::Handled), // response already sent
        },
        _ => unreachable!("handle_local_auth only called for LOGIN/AUTHENTICATE"),
    };

    let ctx = PolicyContext {
        session_identity: &identity,
        command_name: cmd.name.as_str(),
        parsed: cmd.parsed,
        args: cmd.args.as_deref(),
        client_state: to_policy_state(state.client_state),
        selected_mailbox: state.selected_mailbox.as_deref(),
    };
    match policy(&ctx) {
        PolicyDecision::Deny { kind, message } => {
            let keyword = match kind {
                DenyKind::No => "NO",
                DenyKind::Bad => "BAD",
            };
            let reply = imap_proto::format_tagged(&cmd.tag, keyword, &message);
            client.write_raw(&reply).await?;
        }
        PolicyDecision::Allow | PolicyDecision::Rewrite(_) => {
            *session_identity = Some(identity);
            state.client_state = ImapState::Auth;
            state.upstream_state = ImapState::Auth;
            let text = if cmd.parsed == ParsedCommand::Login {
                "LOGIN completed"
            } else {
                "AUTHENTICATE completed"
            };
            let reply = imap_proto::format_tagged(&cmd.tag, "OK", text);
            client.write_raw(&reply).await?;
        }
    }
    Ok(ClientEvent::Handled)
}

/// Runs a `PLAIN`-only local SASL exchange with the client, via SASL-IR or
/// a continuation round trip, and returns the authenticated identity.
/// Returns `Ok(None)` once a terminal response has already been written to
/// the client (mechanism rejected or decode failure).
async fn authenticate_plain(
    cmd: &Command,
    client: &mut LineCodec<BoxedStream>,
) -> ServerTaskResult<Option<String>> {
    let args = cmd.args.as_deref().unwrap_or(&[]);
    let mut tokens = args.split(|&b| b == b' ').filter(|t| !t.is_empty());
    let mechanism = tokens.next().unwrap_or(b"");
    if !mechanism.eq_ignore_ascii_case(b"PLAIN") {
        let reply =
            imap_proto::format_tagged(&cmd.tag, "NO", "Unsupported authentication mechanism");
        client.write_raw(&reply).await?;
        return Ok(None);
    }

    let response_b64 = match tokens.next() {
        Some(initial) => String::from_utf8_lossy(initial).to_string(),
        None => {
            client.write_raw(b"+ \r\n").await?;
            let line = client.read_line_as_server().await?;
            let body = line.strip_suffix(b"\r\n").unwrap_or(&line);
            String::from_utf8_lossy(body).to_string()
        }
    };

    match crate::sasl::decode_plain_response(&response_b64) {
        Some((authcid, _password)) => Ok(Some(authcid)),
        None => {
            let reply = imap_proto::format_tagged(&cmd.tag, "NO", "Authentication failed");
            client.write_raw(&reply).await?;
            Ok(None)
        }
    }
}

/// Handles `STARTTLS` locally: validates preconditions and replies, but
/// leaves the actual TLS handshake to the session supervisor, which owns
/// the `TlsAcceptor` (spec.md §6, supplemented STARTTLS feature).
async fn handle_starttls(
    cmd: &Command,
    client: &mut LineCodec<BoxedStream>,
    state: &mut SessionState,
    listener_is_tls: bool,
) -> ServerTaskResult<ClientEvent> {
    if listener_is_tls || state.tls_active {
        let reply = imap_proto::format_tagged(&cmd.tag, "BAD", "STARTTLS not available");
        client.write_raw(&reply).await?;
        return Ok(ClientEvent::Handled);
    }
    let reply = imap_proto::format_tagged(&cmd.tag, "OK", "Begin TLS negotiation now");
    client.write_raw(&reply).await?;
    state.tls_active = true;
    Ok(ClientEvent::StartTlsAccepted)
}

/// Routes one raw upstream line to the client (spec.md §4.4 "upstream →
/// client" contract).
pub async fn forward_upstream_line(
    raw_line: Vec<u8>,
    client: &mut LineCodec<BoxedStream>,
    upstream: &mut LineCodec<BoxedStream>,
    tracker: &mut TagTracker,
    state: &mut SessionState,
    capability_filter: &mut CapabilityFilter,
) -> ServerTaskResult<UpstreamEvent> {
    let parsed = Response::parse_line(&raw_line)?;
    match parsed {
        Response::ContinuationRequest => {
            client.write_raw(&raw_line).await?;
            Ok(UpstreamEvent::Continue)
        }
        Response::ServerStatus(ServerStatus::Close) => {
            client.write_raw(&raw_line).await?;
            Ok(UpstreamEvent::ByeReceived)
        }
        Response::ServerStatus(_) => {
            client.write_raw(&raw_line).await?;
            Ok(UpstreamEvent::Continue)
        }
        Response::CommandData(data) => {
            relay_untagged_data(&raw_line, &data, client, upstream, capability_filter).await?;
            Ok(UpstreamEvent::Continue)
        }
        Response::CommandResult(result) => {
            match tracker.complete(&result.tag) {
                Some(record) => {
                    let reply = imap_proto::format_tagged(
                        &record.client_tag,
                        result_keyword(result.result),
                        &String::from_utf8_lossy(&result.text),
                    );
                    client.write_raw(&reply).await?;
                    if record.command == "IDLE" {
                        state.idle = None;
                    }
                    apply_state_change(&record, result.result, state);
                }
                None => {
                    // Unknown or already-cancelled tag: defensive
                    // pass-through (spec.md §4.4 edge cases) rather than a
                    // silent drop of bytes we can't account for.
                    client.write_raw(&raw_line).await?;
                }
            }
            Ok(UpstreamEvent::Continue)
        }
    }
}

fn result_keyword(result: CommandResult) -> &'static str {
    match result {
        CommandResult::Success => "OK",
        CommandResult::Fail => "NO",
        CommandResult::ProtocolError => "BAD",
    }
}

/// Updates `client_state`/`selected_mailbox` on the matching `OK`
/// completion of a state-changing command (spec.md §4.5); `NO`/`BAD` never
/// change state.
fn apply_state_change(record: &ForwardedCommand, result: CommandResult, state: &mut SessionState) {
    if result != CommandResult::Success {
        return;
    }
    match record.command.as_str() {
        "SELECT" | "EXAMINE" => {
            state.client_state = ImapState::Selected;
            state.upstream_state = ImapState::Selected;
            state.selected_mailbox = record
                .args
                .as_ref()
                .map(|a| String::from_utf8_lossy(a).trim().to_string());
        }
        "CLOSE" | "UNSELECT" => {
            state.client_state = ImapState::Auth;
            state.upstream_state = ImapState::Auth;
            state.selected_mailbox = None;
        }
        "LOGOUT" => {
            state.client_state = ImapState::Logout;
            state.upstream_state = ImapState::Logout;
        }
        _ => {}
    }
}

/// Relays one untagged data line, rewriting `* CAPABILITY` through the
/// capability filter, then relays any trailing literal octets (and the
/// lines that continue after them) verbatim (supplemented feature:
/// capability filtering, spec.md §4.4 payload pass-through).
async fn relay_untagged_data(
    raw_line: &[u8],
    data: &CommandDataLine,
    client: &mut LineCodec<BoxedStream>,
    upstream: &mut LineCodec<BoxedStream>,
    capability_filter: &mut CapabilityFilter,
) -> ServerTaskResult<()> {
    match data.command_data {
        CommandData::Capability | CommandData::Enabled => {
            let (prefix, keyword) = if data.command_data == CommandData::Capability {
                ("* CAPABILITY", "CAPABILITY")
            } else {
                ("* ENABLED", "ENABLED")
            };
            let body = raw_line.strip_suffix(b"\r\n").unwrap_or(raw_line);
            let text = String::from_utf8_lossy(body);
            let rest = text.strip_prefix(prefix).unwrap_or("");
            let tokens: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            let filtered = capability_filter.filter_list(&tokens);
            let reply = imap_proto::format_untagged(keyword, &filtered.join(" "));
            client.write_raw(&reply).await?;
        }
        CommandData::Other => {
            client.write_raw(raw_line).await?;
        }
    }

    let mut pending = data.literal_data;
    while let Some(size) = pending {
        let octets = upstream.read_exact_literal(size).await?;
        client.write_raw(&octets).await?;
        let continuation = upstream.read_line_passthrough().await?;
        client.write_raw(&continuation).await?;
        let mut ongoing = OngoingResponse::default();
        ongoing.parse_continue_line(&continuation)?;
        pending = ongoing.literal_data;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Side;
    use crate::policy::allow_all;
    use tokio::io::duplex;

    fn pair() -> (LineCodec<BoxedStream>, tokio::io::DuplexStream) {
        let (a, b): (tokio::io::DuplexStream, tokio::io::DuplexStream) = duplex(8192);
        (
            LineCodec::new(Box::new(a) as BoxedStream, Side::Client, 65536, 1024 * 1024),
            b,
        )
    }

    #[tokio::test]
    async fn s1_tag_rewrite_on_simple_command() {
        use tokio::io::AsyncReadExt;
        use tokio::io::AsyncWriteExt;

        let (mut client_codec, mut client_peer) = pair();
        let (mut upstream_codec, mut upstream_peer) = pair();
        let mut tracker = TagTracker::new();
        let policy = allow_all();
        let mut state = SessionState::new();
        state.phase = SessionPhase::Proxying;
        let mut identity = Some("alice".to_string());
        let mut filter = CapabilityFilter::new();

        client_peer.write_all(b"A001 NOOP\r\n").await.unwrap();
        let line = client_codec.read_line_as_server().await.unwrap();
        let event = forward_client_line(
            &line,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &policy,
            &mut state,
            &mut identity,
            false,
            &mut filter,
        )
        .await
        .unwrap();
        assert_eq!(event, ClientEvent::Handled);

        let mut buf = vec![0u8; 64];
        let n = upstream_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"P0001 NOOP\r\n");

        upstream_peer
            .write_all(b"P0001 OK NOOP completed\r\n")
            .await
            .unwrap();
        let resp = upstream_codec.read_line_passthrough().await.unwrap();
        forward_upstream_line(
            resp,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &mut state,
            &mut filter,
        )
        .await
        .unwrap();

        let mut buf = vec![0u8; 64];
        let n = client_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"A001 OK NOOP completed\r\n");
    }

    #[tokio::test]
    async fn s3_policy_deny_never_touches_upstream() {
        use tokio::io::AsyncReadExt;
        use tokio::io::AsyncWriteExt;

        let (mut client_codec, mut client_peer) = pair();
        let (mut upstream_codec, mut upstream_peer) = pair();
        let mut tracker = TagTracker::new();
        let policy: PolicyFn = Box::new(|_ctx| PolicyDecision::Deny {
            kind: DenyKind::No,
            message: "Access denied".to_string(),
        });
        let mut state = SessionState::new();
        state.phase = SessionPhase::Proxying;
        let mut identity = Some("alice".to_string());
        let mut filter = CapabilityFilter::new();

        client_peer
            .write_all(b"A003 SELECT Forbidden\r\n")
            .await
            .unwrap();
        let line = client_codec.read_line_as_server().await.unwrap();
        forward_client_line(
            &line,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &policy,
            &mut state,
            &mut identity,
            false,
            &mut filter,
        )
        .await
        .unwrap();

        let mut buf = vec![0u8; 64];
        let n = client_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"A003 NO Access denied\r\n");

        drop(upstream_codec);
        let mut buf = vec![0u8; 16];
        let res = upstream_peer.try_read(&mut buf);
        assert!(res.is_err() || res.unwrap() == 0);
    }

    #[tokio::test]
    async fn s4_duplicate_client_tag_is_rejected_before_second_forward() {
        use tokio::io::AsyncReadExt;
        use tokio::io::AsyncWriteExt;

        let (mut client_codec, mut client_peer) = pair();
        let (mut upstream_codec, mut upstream_peer) = pair();
        let mut tracker = TagTracker::new();
        let policy = allow_all();
        let mut state = SessionState::new();
        state.phase = SessionPhase::Proxying;
        let mut identity = Some("alice".to_string());
        let mut filter = CapabilityFilter::new();

        client_peer.write_all(b"A004 NOOP\r\n").await.unwrap();
        let line = client_codec.read_line_as_server().await.unwrap();
        forward_client_line(
            &line,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &policy,
            &mut state,
            &mut identity,
            false,
            &mut filter,
        )
        .await
        .unwrap();
        let mut buf = vec![0u8; 64];
        let n = upstream_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"P0001 NOOP\r\n");

        client_peer
            .write_all(b"A004 CAPABILITY\r\n")
            .await
            .unwrap();
        let line = client_codec.read_line_as_server().await.unwrap();
        forward_client_line(
            &line,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &policy,
            &mut state,
            &mut identity,
            false,
            &mut filter,
        )
        .await
        .unwrap();

        let mut buf = vec![0u8; 64];
        let n = client_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"A004 BAD Command tag already in use\r\n");
    }

    #[tokio::test]
    async fn idle_then_done_routes_through_the_bound_upstream_tag() {
        use tokio::io::AsyncReadExt;
        use tokio::io::AsyncWriteExt;

        let (mut client_codec, mut client_peer) = pair();
        let (mut upstream_codec, mut upstream_peer) = pair();
        let mut tracker = TagTracker::new();
        let policy = allow_all();
        let mut state = SessionState::new();
        state.phase = SessionPhase::Proxying;
        let mut identity = Some("alice".to_string());
        let mut filter = CapabilityFilter::new();

        client_peer.write_all(b"A005 IDLE\r\n").await.unwrap();
        let line = client_codec.read_line_as_server().await.unwrap();
        forward_client_line(
            &line,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &policy,
            &mut state,
            &mut identity,
            false,
            &mut filter,
        )
        .await
        .unwrap();
        assert!(state.idle.is_some());

        let mut buf = vec![0u8; 64];
        let n = upstream_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"P0001 IDLE\r\n");

        client_peer.write_all(b"DONE\r\n").await.unwrap();
        let line = client_codec.read_line_as_server().await.unwrap();
        forward_client_line(
            &line,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &policy,
            &mut state,
            &mut identity,
            false,
            &mut filter,
        )
        .await
        .unwrap();

        let mut buf = vec![0u8; 64];
        let n = upstream_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"DONE\r\n");

        upstream_peer
            .write_all(b"P0001 OK IDLE terminated\r\n")
            .await
            .unwrap();
        let resp = upstream_codec.read_line_passthrough().await.unwrap();
        forward_upstream_line(
            resp,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &mut state,
            &mut filter,
        )
        .await
        .unwrap();
        assert!(state.idle.is_none());
    }

    #[tokio::test]
    async fn enable_with_no_recognized_tokens_answers_locally() {
        use tokio::io::AsyncWriteExt;

        let (mut client_codec, mut client_peer) = pair();
        let (mut upstream_codec, mut upstream_peer) = pair();
        let mut tracker = TagTracker::new();
        let policy = allow_all();
        let mut state = SessionState::new();
        state.phase = SessionPhase::Proxying;
        let mut identity = Some("alice".to_string());
        let mut filter = CapabilityFilter::new();

        client_peer
            .write_all(b"A006 ENABLE COMPRESS=DEFLATE\r\n")
            .await
            .unwrap();
        let line = client_codec.read_line_as_server().await.unwrap();
        forward_client_line(
            &line,
            &mut client_codec,
            &mut upstream_codec,
            &mut tracker,
            &policy,
            &mut state,
            &mut identity,
            false,
            &mut filter,
        )
        .await
        .unwrap();

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 64];
        let n = client_peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"A006 OK no enabled\r\n");

        drop(upstream_codec);
        let mut buf = vec![0u8; 16];
        let res = upstream_peer.try_read(&mut buf);
        assert!(res.is_err() || res.unwrap() == 0);
    }
}
