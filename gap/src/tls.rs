use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::path::Path;
use std::sync::Arc;

use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::{rustls, TlsAcceptor, TlsConnector};

use crate::config::ListenerTlsConfig;
use crate::error::{ConfigError, ServerTaskError, ServerTaskResult};

/// Builds a `TlsAcceptor` for the client-facing listener from a PEM
/// certificate chain and private key (used both for a `tls:`-configured
/// listener and for a mid-session `STARTTLS` upgrade).
pub fn build_acceptor(cfg: &ListenerTlsConfig) -> Result<TlsAcceptor, ConfigError> {
    let certs = load_certs(&cfg.cert_path)?;
    let key = load_key(&cfg.key_path)?;

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ConfigError::InvalidValue {
            key: "tls",
            reason: e.to_string(),
        })?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = StdBufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = StdBufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "tls.key",
            reason: "no private key found in file".to_string(),
        })
}

/// Builds a `TlsConnector` trusting the platform's webpki roots, used for
/// `UpstreamConfig.use_tls = true` (implicit TLS from the first byte).
pub fn build_connector() -> TlsConnector {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(client_config))
}

pub fn server_name(host: &str) -> ServerTaskResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| ServerTaskError::UpstreamProtocolError("invalid upstream TLS server name"))
}
