pub mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use slog::{error, info, warn, Logger};

use imap_proto::format_untagged;

use crate::capability::CapabilityFilter;
use crate::codec::{LineCodec, Side};
use crate::config::ListenerConfig;
use crate::error::{ServerTaskError, ServerTaskResult};
use crate::forward::{forward_client_line, forward_upstream_line, ClientEvent, UpstreamEvent};
use crate::io::BoxedStream;
use crate::log::session_logger;
use crate::policy::PolicyFn;
use crate::tls;
use crate::tracker::TagTracker;
use crate::upstream;

use state::{SessionPhase, SessionState};

/// How long `Draining` waits for in-flight commands before forcing
/// `Closed` (spec.md §4.6 "waits up to a drain deadline"). Not part of the
/// configuration surface in spec.md §6, so this is a fixed constant rather
/// than a per-listener knob.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Owns one accepted client connection end to end: upstream handshake,
/// greeting, the `Proxying` read loop, and teardown (spec.md §4.6, C6).
pub async fn run_session(
    client_io: BoxedStream,
    peer: std::net::SocketAddr,
    cfg: Arc<ListenerConfig>,
    policy: Arc<PolicyFn>,
    parent_logger: Logger,
) {
    let (logger, session_id) = session_logger(&parent_logger, peer);
    info!(logger, "session accepted"; "listener" => &cfg.name);

    let mut client_codec = LineCodec::new(
        client_io,
        Side::Client,
        cfg.limits.max_line_bytes,
        cfg.limits.max_literal_bytes,
    );
    let mut state = SessionState::new();
    let mut tracker = TagTracker::new();
    let mut identity: Option<String> = None;
    let mut capability_filter = CapabilityFilter::new();

    let connect_timeout = Duration::from_secs(10);
    let upstream_io = match upstream::connect(&cfg.upstream, connect_timeout).await {
        Ok(io) => io,
        Err(e) => {
            warn!(logger, "upstream connect failed"; "error" => e.brief());
            let _ = client_codec
                .write_raw(b"* BYE Upstream unavailable\r\n")
                .await;
            return;
        }
    };
    let handshake = match upstream::handshake(upstream_io, &cfg.upstream, &cfg.limits).await {
        Ok(h) => h,
        Err(e) => {
            warn!(logger, "upstream handshake failed"; "error" => e.brief());
            let _ = client_codec
                .write_raw(b"* BYE Upstream unavailable\r\n")
                .await;
            return;
        }
    };
    let mut upstream_codec = handshake.codec;

    let mut caps = capability_filter.filter_list(&handshake.capabilities);
    if !caps.iter().any(|c| c.eq_ignore_ascii_case("IMAP4rev1")) {
        caps.insert(0, "IMAP4rev1".to_string());
    }
    if !cfg.implicit_tls && cfg.tls.is_some() {
        caps.push("STARTTLS".to_string());
    }
    let greeting = format_untagged(
        "OK",
        &format!("[CAPABILITY {}] Granular Access Proxy ready", caps.join(" ")),
    );
    if let Err(e) = client_codec.write_raw(&greeting).await {
        warn!(logger, "failed to send greeting"; "error" => e.brief());
        return;
    }
    state.phase = SessionPhase::Proxying;

    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let mut last_activity = Instant::now();
    let mut draining_since: Option<Instant> = None;
    let mut client_gone = false;

    loop {
        if state.phase == SessionPhase::Closed {
            break;
        }

        tokio::select! {
            line = client_codec.read_line_as_server(), if !client_gone => {
                match line {
                    Ok(raw) => {
                        last_activity = Instant::now();
                        handle_client_line(
                            &raw,
                            &mut client_codec,
                            &mut upstream_codec,
                            &mut tracker,
                            &policy,
                            &mut state,
                            &mut identity,
                            cfg.implicit_tls,
                            &cfg,
                            &logger,
                            &mut capability_filter,
                        ).await;
                    }
                    Err(e) => {
                        client_gone = true;
                        handle_client_failure(e, &mut tracker, &mut upstream_codec, &mut state, &logger).await;
                    }
                }
            }
            line = upstream_codec.read_line_passthrough() => {
                match line {
                    Ok(raw) => {
                        last_activity = Instant::now();
                        match forward_upstream_line(
                            raw, &mut client_codec, &mut upstream_codec, &mut tracker, &mut state, &mut capability_filter,
                        ).await {
                            Ok(UpstreamEvent::Continue) => {}
                            Ok(UpstreamEvent::ByeReceived) => {
                                state.phase = SessionPhase::Draining;
                            }
                            Err(e) => {
                                warn!(logger, "upstream protocol error"; "error" => e.brief());
                                teardown_upstream_failure(&mut client_codec, &mut tracker, &mut state).await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(logger, "upstream read failed"; "error" => e.brief());
                        teardown_upstream_failure(&mut client_codec, &mut tracker, &mut state).await;
                    }
                }
            }
            _ = sweep.tick() => {
                sweep_once(
                    &mut tracker, &mut client_codec, &cfg, &mut state, last_activity, &mut draining_since, &logger,
                ).await;
            }
        }
    }

    info!(logger, "session closed"; "session_id" => session_id.to_string());
}

#[allow(clippy::too_many_arguments)]
async fn handle_client_line(
    raw: &[u8],
    client_codec: &mut LineCodec<BoxedStream>,
    upstream_codec: &mut LineCodec<BoxedStream>,
    tracker: &mut TagTracker,
    policy: &PolicyFn,
    state: &mut SessionState,
    identity: &mut Option<String>,
    listener_is_tls: bool,
    cfg: &Arc<ListenerConfig>,
    logger: &Logger,
    capability_filter: &mut CapabilityFilter,
) {
    match forward_client_line(
        raw,
        client_codec,
        upstream_codec,
        tracker,
        policy,
        state,
        identity,
        listener_is_tls,
        capability_filter,
    )
    .await
    {
        Ok(ClientEvent::Handled) => {}
        Ok(ClientEvent::LogoutRequested) => {
            state.phase = SessionPhase::Draining;
        }
        Ok(ClientEvent::StartTlsAccepted) => {
            if let Some(tls_cfg) = &cfg.tls {
                let placeholder: BoxedStream =
                    Box::new(tokio::io::join(tokio::io::empty(), tokio::io::sink()));
                let owned = std::mem::replace(
                    client_codec,
                    LineCodec::new(
                        placeholder,
                        Side::Client,
                        cfg.limits.max_line_bytes,
                        cfg.limits.max_literal_bytes,
                    ),
                );
                match upgrade_client_tls(owned, tls_cfg, cfg).await {
                    Ok(upgraded) => *client_codec = upgraded,
                    Err(e) => {
                        error!(logger, "STARTTLS upgrade failed"; "error" => e.brief());
                        state.phase = SessionPhase::Draining;
                    }
                }
            } else {
                state.phase = SessionPhase::Draining;
            }
        }
        Err(e) => {
            warn!(logger, "client protocol error"; "error" => e.brief());
            if e.is_fatal() {
                state.phase = SessionPhase::Draining;
            }
        }
    }
}

async fn upgrade_client_tls(
    codec: LineCodec<BoxedStream>,
    tls_cfg: &crate::config::ListenerTlsConfig,
    cfg: &ListenerConfig,
) -> ServerTaskResult<LineCodec<BoxedStream>> {
    let (io, leftover) = codec.into_parts();
    if !leftover.is_empty() {
        return Err(ServerTaskError::MalformedFrame(
            "client sent data before completing STARTTLS",
        ));
    }
    let acceptor = tls::build_acceptor(tls_cfg).map_err(|_| {
        ServerTaskError::ClientTlsFailed(std::io::Error::other(
            "failed to load STARTTLS certificate material",
        ))
    })?;
    let tls_stream = acceptor
        .accept(io)
        .await
        .map_err(ServerTaskError::ClientTlsFailed)?;
    Ok(LineCodec::new(
        Box::new(tls_stream),
        Side::Client,
        cfg.limits.max_line_bytes,
        cfg.limits.max_literal_bytes,
    ))
}

/// Handles the client socket closing or erroring (spec.md §4.6 "Client
/// disconnect during Proxying"): cancels every in-flight record and sends
/// `LOGOUT` upstream so the upstream session terminates cleanly.
async fn handle_client_failure(
    e: ServerTaskError,
    tracker: &mut TagTracker,
    upstream_codec: &mut LineCodec<BoxedStream>,
    state: &mut SessionState,
    logger: &Logger,
) {
    warn!(logger, "client disconnected"; "error" => e.brief());
    tracker.drain();
    let _ = upstream_codec.write_line(b"Z9999 LOGOUT").await;
    state.phase = SessionPhase::Closed;
}

/// Handles an upstream disconnect or protocol violation during `Proxying`
/// (spec.md §4.6, §7): synthesizes `NO` for every in-flight command in
/// submission order, sends `* BYE`, then closes.
async fn teardown_upstream_failure(
    client_codec: &mut LineCodec<BoxedStream>,
    tracker: &mut TagTracker,
    state: &mut SessionState,
) {
    let drained = tracker.drain();
    for record in drained {
        let reply =
            imap_proto::format_tagged(&record.client_tag, "NO", "Upstream disconnected");
        let _ = client_codec.write_raw(&reply).await;
    }
    let _ = client_codec
        .write_raw(b"* BYE Upstream disconnected\r\n")
        .await;
    state.phase = SessionPhase::Closed;
}

/// Periodic command-timeout and idle-timeout sweep (spec.md §5). Also
/// forces `Draining` → `Closed` once the drain deadline elapses.
#[allow(clippy::too_many_arguments)]
async fn sweep_once(
    tracker: &mut TagTracker,
    client_codec: &mut LineCodec<BoxedStream>,
    cfg: &Arc<ListenerConfig>,
    state: &mut SessionState,
    last_activity: Instant,
    draining_since: &mut Option<Instant>,
    logger: &Logger,
) {
    if state.phase == SessionPhase::Proxying {
        let cutoff = Instant::now() - Duration::from_secs(cfg.limits.command_timeout_s);
        let expired = tracker.expire_older_than(cutoff);
        for record in expired {
            let reply = imap_proto::format_tagged(&record.client_tag, "BAD", "Command timeout");
            let _ = client_codec.write_raw(&reply).await;
            warn!(logger, "command timed out"; "command" => record.command);
        }

        if tracker.in_flight_count() == 0
            && last_activity.elapsed() >= Duration::from_secs(cfg.limits.idle_timeout_s)
        {
            info!(logger, "idle timeout");
            state.phase = SessionPhase::Draining;
        }
    }

    if state.phase == SessionPhase::Draining {
        let since = *draining_since.get_or_insert_with(Instant::now);
        if tracker.in_flight_count() == 0 || since.elapsed() >= DRAIN_DEADLINE {
            tracker.drain();
            state.phase = SessionPhase::Closed;
        }
    }
}
