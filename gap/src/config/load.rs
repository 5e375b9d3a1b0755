use std::fs;
use std::path::Path;

use yaml_rust::{yaml, Yaml, YamlLoader};

use crate::config::limits::Limits;
use crate::config::listener::{ListenerConfig, ListenerTlsConfig};
use crate::config::upstream::UpstreamConfig;
use crate::error::ConfigError;

/// Calls `f(key, value)` for every entry of a YAML mapping, normalizing
/// keys to lowercase-with-underscores first (mirrors the teacher's
/// `g3_yaml::foreach_kv`, reimplemented here since no such helper crate
/// ships with the retrieval pack's sources).
fn foreach_kv(
    map: &yaml::Hash,
    mut f: impl FnMut(&str, &Yaml) -> Result<(), ConfigError>,
) -> Result<(), ConfigError> {
    for (k, v) in map {
        let key = k.as_str().ok_or(ConfigError::NotAMapping)?;
        f(&normalize_key(key), v)?;
    }
    Ok(())
}

fn normalize_key(k: &str) -> String {
    k.trim().to_ascii_lowercase().replace('-', "_")
}

fn as_str<'a>(key: &'static str, v: &'a Yaml) -> Result<&'a str, ConfigError> {
    v.as_str().ok_or_else(|| ConfigError::InvalidValue {
        key,
        reason: "expected a string".to_string(),
    })
}

fn as_u16(key: &'static str, v: &Yaml) -> Result<u16, ConfigError> {
    v.as_i64()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            reason: "expected an integer in 0..65536".to_string(),
        })
}

fn as_u64(key: &'static str, v: &Yaml) -> Result<u64, ConfigError> {
    v.as_i64()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            reason: "expected a non-negative integer".to_string(),
        })
}

fn as_usize(key: &'static str, v: &Yaml) -> Result<usize, ConfigError> {
    as_u64(key, v).map(|n| n as usize)
}

fn as_bool(key: &'static str, v: &Yaml) -> Result<bool, ConfigError> {
    v.as_bool().ok_or_else(|| ConfigError::InvalidValue {
        key,
        reason: "expected true or false".to_string(),
    })
}

fn as_hash<'a>(key: &'static str, v: &'a Yaml) -> Result<&'a yaml::Hash, ConfigError> {
    v.as_hash().ok_or_else(|| ConfigError::InvalidValue {
        key,
        reason: "expected a mapping".to_string(),
    })
}

fn parse_limits(v: &Yaml) -> Result<Limits, ConfigError> {
    let mut limits = Limits::default();
    let map = as_hash("limits", v)?;
    foreach_kv(map, |k, v| {
        match k {
            "max_line_bytes" => limits.max_line_bytes = as_usize("max_line_bytes", v)?,
            "max_literal_bytes" => limits.max_literal_bytes = as_u64("max_literal_bytes", v)?,
            "command_timeout_s" => limits.command_timeout_s = as_u64("command_timeout_s", v)?,
            "idle_timeout_s" => limits.idle_timeout_s = as_u64("idle_timeout_s", v)?,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "limits",
                    reason: format!("unknown key '{k}'"),
                })
            }
        }
        Ok(())
    })?;
    Ok(limits)
}

fn parse_upstream(v: &Yaml) -> Result<UpstreamConfig, ConfigError> {
    let map = as_hash("upstream", v)?;
    let mut host = None;
    let mut port = None;
    let mut username = None;
    let mut password = None;
    let mut use_tls = true;
    foreach_kv(map, |k, v| {
        match k {
            "host" => host = Some(as_str("upstream.host", v)?.to_string()),
            "port" => port = Some(as_u16("upstream.port", v)?),
            "username" => username = Some(as_str("upstream.username", v)?.to_string()),
            "password" => password = Some(as_str("upstream.password", v)?.to_string()),
            "use_tls" => use_tls = as_bool("upstream.use_tls", v)?,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "upstream",
                    reason: format!("unknown key '{k}'"),
                })
            }
        }
        Ok(())
    })?;
    Ok(UpstreamConfig {
        host: host.ok_or(ConfigError::MissingKey("upstream.host"))?,
        port: port.ok_or(ConfigError::MissingKey("upstream.port"))?,
        username: username.ok_or(ConfigError::MissingKey("upstream.username"))?,
        password: password.ok_or(ConfigError::MissingKey("upstream.password"))?,
        use_tls,
    })
}

fn parse_tls(v: &Yaml) -> Result<ListenerTlsConfig, ConfigError> {
    let map = as_hash("tls", v)?;
    let mut cert_path = None;
    let mut key_path = None;
    foreach_kv(map, |k, v| {
        match k {
            "cert" | "cert_path" => cert_path = Some(as_str("tls.cert", v)?.into()),
            "key" | "key_path" => key_path = Some(as_str("tls.key", v)?.into()),
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "tls",
                    reason: format!("unknown key '{k}'"),
                })
            }
        }
        Ok(())
    })?;
    Ok(ListenerTlsConfig {
        cert_path: cert_path.ok_or(ConfigError::MissingKey("tls.cert"))?,
        key_path: key_path.ok_or(ConfigError::MissingKey("tls.key"))?,
    })
}

fn parse_listener(doc: &Yaml) -> Result<ListenerConfig, ConfigError> {
    let map = doc.as_hash().ok_or(ConfigError::NotAMapping)?;

    let mut name = "default".to_string();
    let mut bind_host = "0.0.0.0".to_string();
    let mut bind_port = 9993u16;
    let mut upstream = None;
    let mut limits = Limits::default();
    let mut tls = None;
    let mut implicit_tls = false;

    foreach_kv(map, |k, v| {
        match k {
            "name" => name = as_str("name", v)?.to_string(),
            "bind_host" => bind_host = as_str("bind_host", v)?.to_string(),
            "bind_port" => bind_port = as_u16("bind_port", v)?,
            "upstream" => upstream = Some(parse_upstream(v)?),
            "limits" => limits = parse_limits(v)?,
            "tls" => tls = Some(parse_tls(v)?),
            "implicit_tls" => implicit_tls = as_bool("implicit_tls", v)?,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "listener",
                    reason: format!("unknown key '{k}'"),
                })
            }
        }
        Ok(())
    })?;

    Ok(ListenerConfig {
        name,
        bind_host,
        bind_port,
        upstream: upstream.ok_or(ConfigError::MissingKey("upstream"))?,
        limits,
        tls,
        implicit_tls,
    })
}

/// Loads every listener document from one YAML file. Each `---`-separated
/// document describes one listener; a single-document file with a top
/// level `listeners:` sequence is also accepted.
pub fn load(path: &Path) -> Result<Vec<ListenerConfig>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let docs = YamlLoader::load_from_str(&content).map_err(|source| ConfigError::Yaml {
        path: path.display().to_string(),
        source,
    })?;
    let doc = docs.first().ok_or(ConfigError::NotAMapping)?;

    if let Some(map) = doc.as_hash() {
        if let Some(seq) = map
            .get(&Yaml::String("listeners".to_string()))
            .and_then(Yaml::as_vec)
        {
            return seq.iter().map(parse_listener).collect();
        }
    }
    Ok(vec![parse_listener(doc)?])
}
