use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use md5::Md5;

/// Client-side SASL mechanisms the proxy can use to authenticate itself to
/// the upstream, in the preference order spec.md §6 requires them to be
/// offered: `PLAIN`, `LOGIN`, `CRAM-MD5`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SaslMechanism {
    Plain,
    Login,
    CramMd5,
}

impl SaslMechanism {
    pub fn name(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::Login => "LOGIN",
            SaslMechanism::CramMd5 => "CRAM-MD5",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Some(SaslMechanism::Plain),
            "LOGIN" => Some(SaslMechanism::Login),
            "CRAM-MD5" => Some(SaslMechanism::CramMd5),
            _ => None,
        }
    }

    /// Picks the first mechanism from spec.md §6's preference order that
    /// appears among the upstream's advertised `AUTH=` capability tokens.
    pub fn select(advertised: &[String]) -> Option<Self> {
        [SaslMechanism::Plain, SaslMechanism::Login, SaslMechanism::CramMd5]
            .into_iter()
            .find(|m| advertised.iter().any(|a| a.eq_ignore_ascii_case(m.name())))
    }
}

/// Builds the PLAIN initial response: `NUL authzid NUL authcid NUL
/// password`, base64-encoded for the wire (RFC 4616).
pub fn plain_initial_response(authcid: &str, password: &str) -> String {
    let raw = format!("\0{authcid}\0{password}");
    STANDARD.encode(raw)
}

/// Decodes a client's PLAIN initial response (`NUL authzid NUL authcid NUL
/// password`, base64) into `(authcid, password)`, used when the proxy acts
/// as the SASL *server* terminating the client's own `AUTHENTICATE PLAIN`
/// locally rather than forwarding it upstream.
pub fn decode_plain_response(b64: &str) -> Option<(String, String)> {
    let raw = STANDARD.decode(b64.trim()).ok()?;
    let mut parts = raw.splitn(3, |&b| b == 0);
    let _authzid = parts.next()?;
    let authcid = parts.next()?;
    let password = parts.next()?;
    Some((
        String::from_utf8_lossy(authcid).to_string(),
        String::from_utf8_lossy(password).to_string(),
    ))
}

/// Builds the two base64-encoded lines of a LOGIN exchange: username then
/// password, each sent in response to the upstream's base64-encoded
/// `Username:`/`Password:` prompts.
pub fn login_username_response(authcid: &str) -> String {
    STANDARD.encode(authcid)
}

pub fn login_password_response(password: &str) -> String {
    STANDARD.encode(password)
}

/// Builds the CRAM-MD5 response to a base64-encoded challenge (RFC 2195):
/// `username SP hex(hmac_md5(password, challenge))`, base64-encoded.
pub fn cram_md5_response(authcid: &str, password: &str, challenge_b64: &str) -> Option<String> {
    let challenge = STANDARD.decode(challenge_b64.trim()).ok()?;
    let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes()).ok()?;
    mac.update(&challenge);
    let digest = mac.finalize().into_bytes();
    let hex = digest.iter().fold(String::with_capacity(32), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    });
    Some(STANDARD.encode(format!("{authcid} {hex}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_first_advertised_in_preference_order() {
        let advertised = vec!["CRAM-MD5".to_string(), "LOGIN".to_string()];
        assert_eq!(SaslMechanism::select(&advertised), Some(SaslMechanism::Login));
    }

    #[test]
    fn selects_none_when_nothing_supported() {
        let advertised = vec!["XOAUTH2".to_string()];
        assert_eq!(SaslMechanism::select(&advertised), None);
    }

    #[test]
    fn plain_initial_response_encodes_nul_separated_triple() {
        let encoded = plain_initial_response("alice", "hunter2");
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"\0alice\0hunter2");
    }

    #[test]
    fn decode_plain_response_recovers_authcid_and_password() {
        let encoded = plain_initial_response("alice", "hunter2");
        let (authcid, password) = decode_plain_response(&encoded).unwrap();
        assert_eq!(authcid, "alice");
        assert_eq!(password, "hunter2");
    }

    #[test]
    fn decode_plain_response_rejects_malformed_input() {
        assert!(decode_plain_response("not-base64!!").is_none());
        assert!(decode_plain_response(&STANDARD.encode("nosep")).is_none());
    }

    #[test]
    fn cram_md5_response_is_deterministic() {
        let challenge = STANDARD.encode("<1896.697170952@mail.example.com>");
        let r1 = cram_md5_response("alice", "hunter2", &challenge).unwrap();
        let r2 = cram_md5_response("alice", "hunter2", &challenge).unwrap();
        assert_eq!(r1, r2);
    }
}
