use std::sync::Arc;

use slog::{error, info, Logger};
use tokio::net::TcpListener;

use crate::config::ListenerConfig;
use crate::io::BoxedStream;
use crate::policy::PolicyFn;
use crate::session::run_session;
use crate::tls;

/// Binds one listener and accepts connections forever, spawning a session
/// task per connection (spec.md §4.6 "Accept on listening socket →
/// Handshaking"). Returns only on a bind failure.
pub async fn serve_listener(
    cfg: Arc<ListenerConfig>,
    policy: Arc<PolicyFn>,
    logger: Logger,
) -> std::io::Result<()> {
    let addr = (cfg.bind_host.as_str(), cfg.bind_port);
    let listener = TcpListener::bind(addr).await?;
    info!(logger, "listener bound"; "name" => &cfg.name, "addr" => format!("{}:{}", cfg.bind_host, cfg.bind_port));

    let acceptor = if cfg.implicit_tls {
        match &cfg.tls {
            Some(tls_cfg) => Some(tls::build_acceptor(tls_cfg).map_err(|e| {
                std::io::Error::other(format!("failed to build TLS acceptor: {e}"))
            })?),
            None => {
                return Err(std::io::Error::other(
                    "implicit_tls is set but no tls certificate material is configured",
                ))
            }
        }
    } else {
        None
    };

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(logger, "accept failed"; "error" => e.to_string());
                continue;
            }
        };
        let _ = stream.set_nodelay(true);

        let cfg = Arc::clone(&cfg);
        let policy = Arc::clone(&policy);
        let logger = logger.clone();
        let acceptor = acceptor.clone();

        tokio::spawn(async move {
            let client_io: BoxedStream = match acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => Box::new(tls_stream),
                    Err(e) => {
                        error!(logger, "client TLS handshake failed"; "error" => e.to_string(), "peer" => peer.to_string());
                        return;
                    }
                },
                None => Box::new(stream),
            };
            run_session(client_io, peer, cfg, policy, logger).await;
        });
    }
}
