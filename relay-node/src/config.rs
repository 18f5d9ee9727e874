//! Load node config from file and environment.

use std::path::{Path, PathBuf};

use relay_p2p::RelayerConfig;
use serde::Deserialize;

/// Port used when no config file is found.
pub const DEFAULT_P2P_PORT: u16 = 9000;

/// Node configuration. File: ~/.config/relayer/config.toml or /etc/relayer/config.toml.
/// Env overrides: RELAYER_P2P_PORT, RELAYER_KEY_PATH, RELAYER_LOG_LEVEL.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Log level (default "info"). RUST_LOG takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Identity key file: hex of the protobuf-encoded libp2p private key.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    pub p2p: RelayerConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            key_path: None,
            p2p: RelayerConfig::new(DEFAULT_P2P_PORT, Vec::new()),
        }
    }
}

/// Load config: explicit path, else the first config file found, else defaults;
/// then env vars on top.
pub fn load(explicit: Option<&Path>) -> Result<NodeConfig, ConfigLoadError> {
    let mut c = match explicit {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => NodeConfig::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok())?;
    Ok(c)
}

fn apply_env(
    c: &mut NodeConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigLoadError> {
    if let Some(s) = var("RELAYER_P2P_PORT") {
        c.p2p.port = s.parse().map_err(|_| ConfigLoadError::Env {
            var: "RELAYER_P2P_PORT",
            value: s,
        })?;
    }
    if let Some(s) = var("RELAYER_KEY_PATH") {
        c.key_path = Some(PathBuf::from(s));
    }
    if let Some(s) = var("RELAYER_LOG_LEVEL") {
        c.log_level = s;
    }
    Ok(())
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/relayer/config.toml"));
    }
    out.push(PathBuf::from("/etc/relayer/config.toml"));
    out
}

fn load_file(path: &Path) -> Result<NodeConfig, ConfigLoadError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {var}={value}")]
    Env { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_p2p::{Keypair, Multiaddr};
    use std::collections::HashMap;
    use std::time::Duration;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        let path = write(
            &dir,
            &format!(
                r#"
log_level = "debug"
key_path = "/var/lib/relayer/p2p.key"

[p2p]
port = 9001
bootstrap_timeout_secs = 5

[[p2p.peers]]
id = "{peer}"
addrs = ["/ip4/10.0.0.2/tcp/9001", "/dns4/relayer-2/tcp/9001"]
"#
            ),
        );
        let c = load_file(&path).unwrap();
        assert_eq!(c.log_level, "debug");
        assert_eq!(c.key_path, Some(PathBuf::from("/var/lib/relayer/p2p.key")));
        assert_eq!(c.p2p.port, 9001);
        assert_eq!(c.p2p.bootstrap_timeout, Duration::from_secs(5));
        assert_eq!(c.p2p.peers.len(), 1);
        assert_eq!(c.p2p.peers[0].id, peer);
        assert_eq!(
            c.p2p.peers[0].addrs[0],
            "/ip4/10.0.0.2/tcp/9001".parse::<Multiaddr>().unwrap()
        );
        assert!(c.p2p.validate().is_ok());
    }

    #[test]
    fn defaults_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[p2p]\nport = 9100\n");
        let c = load(Some(&path)).unwrap();
        assert_eq!(c.log_level, "info");
        assert!(c.key_path.is_none());
        assert!(c.p2p.peers.is_empty());
        assert_eq!(
            c.p2p.bootstrap_timeout,
            relay_p2p::config::DEFAULT_BOOTSTRAP_TIMEOUT
        );
    }

    #[test]
    fn bad_peer_id_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "[p2p]\nport = 1\n[[p2p.peers]]\nid = \"P1\"\naddrs = [\"/ip4/1.2.3.4/tcp/1\"]\n",
        );
        assert!(matches!(load(Some(&path)), Err(ConfigLoadError::Parse { .. })));
    }

    #[test]
    fn unknown_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[p2p]\nport = 1\nrelay = true\n");
        assert!(matches!(load(Some(&path)), Err(ConfigLoadError::Parse { .. })));
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(Some(&dir.path().join("nope.toml"))),
            Err(ConfigLoadError::Read { .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RELAYER_P2P_PORT", "9555"),
            ("RELAYER_KEY_PATH", "/tmp/k"),
            ("RELAYER_LOG_LEVEL", "warn"),
        ]
        .into_iter()
        .collect();
        let mut c = NodeConfig::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.p2p.port, 9555);
        assert_eq!(c.key_path, Some(PathBuf::from("/tmp/k")));
        assert_eq!(c.log_level, "warn");

        let err = apply_env(&mut c, |k| {
            (k == "RELAYER_P2P_PORT").then(|| "not-a-port".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigLoadError::Env { var: "RELAYER_P2P_PORT", .. }));
    }

    #[test]
    fn accepts_libp2p_peer_ids() {
        let dir = tempfile::tempdir().unwrap();
        let id = "12D3KooWD3eckifWpRn9wQpMG9R9hX3sD158z7EqHWmweQAJU5SA";
        let path = write(
            &dir,
            &format!(
                r#"
[p2p]
port = 9000

[[p2p.peers]]
id = "{id}"
addrs = ["/ip4/10.0.0.1/tcp/9000/p2p/{id}"]

[[p2p.peers]]
id = "QmYyQSo1c1Ym7orWxLYvCrM2EmxFTANf8wXmmE7DWjhx5N"
addrs = ["/ip4/10.0.0.2/tcp/9000"]
"#
            ),
        );
        let c = load(Some(&path)).unwrap();
        assert_eq!(c.p2p.peers[0].id.to_string(), id);
        assert_eq!(
            c.p2p.peers[1].id.to_string(),
            "QmYyQSo1c1Ym7orWxLYvCrM2EmxFTANf8wXmmE7DWjhx5N"
        );
        assert!(c.p2p.validate().is_ok());
    }
}
