/// Configuration management
use crate::error::{InboxError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Address of the local messaging daemon
const DEFAULT_DAEMON_ADDR: &str = "127.0.0.1:8892";

/// Short-form DID of the default store-and-forward relay
pub const DEFAULT_RELAY_SHORT_FORM: &str = "did:key:relay";

/// Inbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Messaging daemon the message source talks to
    pub daemon_addr: SocketAddr,

    /// Relay placeholder excluded from peer identification
    pub relay_did: String,

    /// Optional data directory for the local message store (defaults to `.inbox`)
    pub data_dir: Option<PathBuf>,

    /// Local user's DID; builds short-circuit while this is unset
    pub self_did: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_addr: DEFAULT_DAEMON_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8892))),
            relay_did: DEFAULT_RELAY_SHORT_FORM.to_string(),
            data_dir: None,
            self_did: None,
        }
    }
}

impl Config {
    /// Create config from command line flags. Non-flag arguments are
    /// returned alongside the config, in order.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Self::default();
        let mut rest = Vec::new();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--daemon" => {
                    let addr = flag_value(args, i, "--daemon", "an address")?;
                    config.daemon_addr = parse_addr(addr)?;
                    i += 2;
                }
                "--relay" => {
                    config.relay_did = flag_value(args, i, "--relay", "a DID")?.to_string();
                    i += 2;
                }
                "--data-dir" => {
                    let path = flag_value(args, i, "--data-dir", "a path")?;
                    config.data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--did" => {
                    config.self_did = Some(flag_value(args, i, "--did", "a DID")?.to_string());
                    i += 2;
                }
                other => {
                    rest.push(other.to_string());
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(addr) = std::env::var("INBOX_DAEMON_ADDR") {
            config.daemon_addr = parse_addr(&addr)?;
        }
        if let Ok(relay) = std::env::var("INBOX_RELAY_DID") {
            config.relay_did = relay;
        }
        if let Ok(did) = std::env::var("INBOX_SELF_DID") {
            config.self_did = Some(did);
        }

        Ok((config, rest))
    }

    /// Base URL of the messaging daemon
    pub fn daemon_base_url(&self) -> String {
        format!("http://{}", self.daemon_addr)
    }

    /// Directory holding the local message store
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from(".inbox"))
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str, what: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| InboxError::Config(format!("{} requires {} argument", flag, what)))
}

fn parse_addr(raw: &str) -> Result<SocketAddr> {
    raw.parse::<SocketAddr>()
        .map_err(|_| InboxError::Config(format!("Invalid daemon address: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.daemon_base_url(), "http://127.0.0.1:8892");
        assert_eq!(config.relay_did, DEFAULT_RELAY_SHORT_FORM);
        assert!(config.self_did.is_none());
        assert_eq!(config.data_dir(), PathBuf::from(".inbox"));
    }

    #[test]
    fn test_flags_and_positionals() {
        let (config, rest) = Config::from_args(&args(&[
            "conversations",
            "--daemon",
            "127.0.0.1:9000",
            "--data-dir",
            "/tmp/inbox",
            "extra",
        ]))
        .unwrap();

        assert_eq!(config.daemon_addr.port(), 9000);
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/inbox"));
        assert_eq!(rest, vec!["conversations".to_string(), "extra".to_string()]);
    }

    #[test]
    fn test_missing_flag_value() {
        let err = Config::from_args(&args(&["--relay"])).unwrap_err();
        assert!(matches!(err, InboxError::Config(_)));
    }

    #[test]
    fn test_bad_daemon_address() {
        let err = Config::from_args(&args(&["--daemon", "not-an-addr"])).unwrap_err();
        assert!(err.to_string().contains("not-an-addr"));
    }
}
