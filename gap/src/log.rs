use slog::{o, Drain, Logger};
use uuid::Uuid;

/// Builds the coarse, process-level logger: listener startup/shutdown and
/// configuration errors. Never stored in a global/static — the caller
/// threads it through `main` and down to whatever needs it.
pub fn process_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "gap"))
}

/// Derives a per-session logger carrying a fresh `session_id` field. Called
/// once per accepted connection; passed down through the session
/// supervisor, forwarding pipeline, and tag tracker instead of a
/// process-wide singleton.
pub fn session_logger(parent: &Logger, peer: std::net::SocketAddr) -> (Logger, Uuid) {
    let session_id = Uuid::new_v4();
    let logger = parent.new(o!(
        "session_id" => session_id.to_string(),
        "peer" => peer.to_string(),
    ));
    (logger, session_id)
}
