use std::time::Duration;

use imap_proto::{Response, ServerStatus};
use tokio::net::TcpStream;

use crate::codec::{LineCodec, Side};
use crate::config::{Limits, UpstreamConfig};
use crate::error::{ServerTaskError, ServerTaskResult};
use crate::io::BoxedStream;
use crate::sasl::SaslMechanism;
use crate::tls;

/// Opens the TCP connection to the upstream, wrapping it in TLS
/// immediately when `UpstreamConfig.use_tls` (spec.md §6).
pub async fn connect(cfg: &UpstreamConfig, connect_timeout: Duration) -> ServerTaskResult<BoxedStream> {
    let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect((cfg.host.as_str(), cfg.port)))
        .await
        .map_err(|_| {
            ServerTaskError::UpstreamConnectFailed(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "connect timed out",
            ))
        })?
        .map_err(ServerTaskError::UpstreamConnectFailed)?;

    if cfg.use_tls {
        let connector = tls::build_connector();
        let name = tls::server_name(&cfg.host)?;
        let tls_stream = connector
            .connect(name, tcp)
            .await
            .map_err(ServerTaskError::UpstreamTlsFailed)?;
        Ok(Box::new(tls_stream))
    } else {
        Ok(Box::new(tcp))
    }
}

/// Result of the one-time upstream handshake performed during
/// `Handshaking` (spec.md §4.6): the ready codec plus the capability
/// tokens the upstream advertised, used to compute the intersection
/// advertised to the client.
pub struct UpstreamHandshake {
    pub codec: LineCodec<BoxedStream>,
    pub capabilities: Vec<String>,
}

/// Exchanges greetings and authenticates to the upstream using the
/// configured account, selecting the first mechanism from `PLAIN`,
/// `LOGIN`, `CRAM-MD5` (in that order) that the upstream advertises
/// (spec.md §6).
pub async fn handshake(
    io: BoxedStream,
    cfg: &UpstreamConfig,
    limits: &Limits,
) -> ServerTaskResult<UpstreamHandshake> {
    let mut codec = LineCodec::new(io, Side::Upstream, limits.max_line_bytes, limits.max_literal_bytes);

    let greeting = codec.read_line_passthrough().await?;
    let greeting = Response::parse_line(&greeting)
        .map_err(|_| ServerTaskError::UpstreamProtocolError("unparsable upstream greeting"))?;

    let already_authenticated = matches!(greeting, Response::ServerStatus(ServerStatus::Authenticated));
    if matches!(greeting, Response::ServerStatus(ServerStatus::Close)) {
        return Err(ServerTaskError::UpstreamProtocolError(
            "upstream greeted with BYE",
        ));
    }

    let capabilities = query_capabilities(&mut codec).await?;

    if !already_authenticated {
        authenticate(&mut codec, cfg, &capabilities).await?;
    }

    Ok(UpstreamHandshake { codec, capabilities })
}

async fn query_capabilities(codec: &mut LineCodec<BoxedStream>) -> ServerTaskResult<Vec<String>> {
    codec.write_line(b"G0000 CAPABILITY").await?;
    let mut capabilities = Vec::new();
    loop {
        let line = codec.read_line_passthrough().await?;
        if line.starts_with(b"* CAPABILITY") {
            let text = String::from_utf8_lossy(&line[b"* CAPABILITY".len()..]);
            capabilities = text
                .split_whitespace()
                .map(|s| s.to_ascii_uppercase())
                .collect();
            continue;
        }
        if line.starts_with(b"G0000 ") {
            return Ok(capabilities);
        }
    }
}

async fn authenticate(
    codec: &mut LineCodec<BoxedStream>,
    cfg: &UpstreamConfig,
    capabilities: &[String],
) -> ServerTaskResult<()> {
    let auth_tokens: Vec<String> = capabilities
        .iter()
        .filter_map(|c| c.strip_prefix("AUTH=").map(str::to_string))
        .collect();
    let mechanism = SaslMechanism::select(&auth_tokens).ok_or(ServerTaskError::UpstreamNoUsableAuth)?;

    codec
        .write_line(format!("G0001 AUTHENTICATE {}", mechanism.name()).as_bytes())
        .await?;

    match mechanism {
        crate::sasl::SaslMechanism::Plain => {
            let continuation = codec.read_line_passthrough().await?;
            expect_continuation(&continuation)?;
            let response = crate::sasl::plain_initial_response(&cfg.username, &cfg.password);
            codec.write_line(response.as_bytes()).await?;
        }
        crate::sasl::SaslMechanism::Login => {
            let continuation = codec.read_line_passthrough().await?;
            expect_continuation(&continuation)?;
            codec
                .write_line(crate::sasl::login_username_response(&cfg.username).as_bytes())
                .await?;
            let continuation = codec.read_line_passthrough().await?;
            expect_continuation(&continuation)?;
            codec
                .write_line(crate::sasl::login_password_response(&cfg.password).as_bytes())
                .await?;
        }
        crate::sasl::SaslMechanism::CramMd5 => {
            let continuation = codec.read_line_passthrough().await?;
            let challenge = expect_continuation(&continuation)?;
            let response = crate::sasl::cram_md5_response(&cfg.username, &cfg.password, challenge)
                .ok_or(ServerTaskError::UpstreamProtocolError(
                    "malformed CRAM-MD5 challenge",
                ))?;
            codec.write_line(response.as_bytes()).await?;
        }
    }

    let final_line = codec.read_line_passthrough().await?;
    match Response::parse_line(&final_line) {
        Ok(Response::CommandResult(r)) if r.tag.as_str() == "G0001" => match r.result {
            imap_proto::CommandResult::Success => Ok(()),
            _ => Err(ServerTaskError::UpstreamProtocolError(
                "upstream rejected configured credentials",
            )),
        },
        _ => Err(ServerTaskError::UpstreamProtocolError(
            "unexpected response to AUTHENTICATE",
        )),
    }
}

fn expect_continuation(line: &[u8]) -> ServerTaskResult<&str> {
    let body = line
        .strip_suffix(b"\r\n")
        .and_then(|b| b.strip_prefix(b"+"))
        .ok_or(ServerTaskError::UpstreamProtocolError(
            "expected a SASL continuation",
        ))?;
    std::str::from_utf8(body.trim_ascii_start())
        .map_err(|_| ServerTaskError::UpstreamProtocolError("non-UTF-8 SASL challenge"))
}
