use std::{
    ffi::OsString,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use compact_str::CompactString;
use tracing::Level;

use crate::{logging::LogFormat, responder::Reply, wire::REQUEST_IP};

pub const DEFAULT_SERVER: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(Ipv4Addr::LOCALHOST),
    5000,
);
pub const DEFAULT_CLIENTS: usize = 6;
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// Clients wake up to renew after this share of the granted lease has elapsed.
pub const RENEWAL_FRACTION: f64 = 0.7;
pub const RECV_BUFFER_LEN: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Args(#[from] pico_args::Error),
    #[error("receive timeout must be at least one second")]
    ZeroTimeout,
    #[error("--reply is not valid JSON: {0}")]
    InvalidReply(#[source] serde_json::Error),
    #[error("unexpected arguments: {0:?}")]
    Unexpected(Vec<OsString>),
}

/// Settings shared read-only by every simulated client.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: SocketAddr,
    pub command: CompactString,
    pub receive_timeout: Duration,
    pub renewal_fraction: f64,
    pub recv_buffer_len: usize,
    pub clients: usize,
    pub seed: Option<u64>,
    pub log_level: Level,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER,
            command: REQUEST_IP.into(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            renewal_fraction: RENEWAL_FRACTION,
            recv_buffer_len: RECV_BUFFER_LEN,
            clients: DEFAULT_CLIENTS,
            seed: None,
            log_level: Level::INFO,
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_args(mut args: pico_args::Arguments) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let receive_timeout = match args.opt_value_from_str::<_, u64>("--timeout")? {
            Some(0) => return Err(ConfigError::ZeroTimeout),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.receive_timeout,
        };

        let config = Config {
            server: args
                .opt_value_from_str("--server")?
                .unwrap_or(defaults.server),
            clients: args
                .opt_value_from_str(["-n", "--clients"])?
                .unwrap_or(defaults.clients),
            seed: args.opt_value_from_str("--seed")?,
            log_level: args
                .opt_value_from_str("--log-level")?
                .unwrap_or(defaults.log_level),
            log_format: args
                .opt_value_from_str("--log-format")?
                .unwrap_or(defaults.log_format),
            receive_timeout,
            ..defaults
        };

        finish(args)?;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub bind: SocketAddr,
    pub reply: Reply,
    pub log_level: Level,
    pub log_format: LogFormat,
}

impl ResponderConfig {
    pub fn from_args(mut args: pico_args::Arguments) -> Result<Self, ConfigError> {
        let silent = args.contains("--silent");
        let raw_reply: Option<String> = args.opt_value_from_str("--reply")?;

        let reply = match (silent, raw_reply) {
            (true, _) => Reply::Silent,
            (false, Some(raw)) => {
                Reply::Json(serde_json::from_str(&raw).map_err(ConfigError::InvalidReply)?)
            }
            (false, None) => Reply::default(),
        };

        let config = ResponderConfig {
            bind: args.opt_value_from_str("--bind")?.unwrap_or(DEFAULT_SERVER),
            log_level: args.opt_value_from_str("--log-level")?.unwrap_or(Level::INFO),
            log_format: args.opt_value_from_str("--log-format")?.unwrap_or_default(),
            reply,
        };

        finish(args)?;
        Ok(config)
    }
}

fn finish(args: pico_args::Arguments) -> Result<(), ConfigError> {
    let remaining = args.finish();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Unexpected(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> pico_args::Arguments {
        pico_args::Arguments::from_vec(list.iter().map(OsString::from).collect())
    }

    #[test]
    fn defaults_match_reference_client() {
        let config = Config::from_args(args(&[])).unwrap();
        assert_eq!(config.clients, 6);
        assert_eq!(config.receive_timeout, Duration::from_secs(5));
        assert_eq!(config.server, "127.0.0.1:5000".parse().unwrap());
        assert_eq!(config.command, REQUEST_IP);
        assert_eq!(config.recv_buffer_len, 1024);
        assert_eq!(config.renewal_fraction, 0.7);
        assert_eq!(config.seed, None);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn overrides() {
        let config = Config::from_args(args(&[
            "-n",
            "12",
            "--server",
            "10.1.2.3:6767",
            "--timeout",
            "2",
            "--seed",
            "17",
            "--log-level",
            "debug",
            "--log-format",
            "json",
        ]))
        .unwrap();

        assert_eq!(config.clients, 12);
        assert_eq!(config.server, "10.1.2.3:6767".parse().unwrap());
        assert_eq!(config.receive_timeout, Duration::from_secs(2));
        assert_eq!(config.seed, Some(17));
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_zero_timeout() {
        assert!(matches!(
            Config::from_args(args(&["--timeout", "0"])),
            Err(ConfigError::ZeroTimeout)
        ));
    }

    #[test]
    fn rejects_unknown_flags_and_bad_values() {
        assert!(matches!(
            Config::from_args(args(&["--bogus"])),
            Err(ConfigError::Unexpected(_))
        ));
        assert!(matches!(
            Config::from_args(args(&["--server", "nowhere"])),
            Err(ConfigError::Args(_))
        ));
    }

    #[test]
    fn responder_reply_modes() {
        let config = ResponderConfig::from_args(args(&[])).unwrap();
        assert_eq!(config.reply, Reply::default());

        let config = ResponderConfig::from_args(args(&["--silent"])).unwrap();
        assert_eq!(config.reply, Reply::Silent);

        let config =
            ResponderConfig::from_args(args(&["--reply", r#"{"status":"NO_IP_ASSIGNED"}"#]))
                .unwrap();
        assert_eq!(
            config.reply,
            Reply::Json(serde_json::json!({"status": "NO_IP_ASSIGNED"}))
        );

        assert!(matches!(
            ResponderConfig::from_args(args(&["--reply", "{"])),
            Err(ConfigError::InvalidReply(_))
        ));
    }
}
