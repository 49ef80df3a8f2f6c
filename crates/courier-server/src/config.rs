use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, ensure};

use courier_gateway::{ConnectionConfig, ReconnectPolicy};

/// Runtime settings, read from `COURIER_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub listen_addr: SocketAddr,
    pub peer_url: String,
    /// Run the embedded simulator on this port.
    pub simulator_port: Option<u16>,
    pub seed_conversations: u32,
    pub heartbeat: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = var("COURIER_HOST", "127.0.0.1");
        let port: u16 = parse(&var("COURIER_PORT", "3000"), "COURIER_PORT")?;
        let listen_addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let simulator: bool = parse(&var("COURIER_SIMULATOR", "true"), "COURIER_SIMULATOR")?;
        let simulator_port: u16 = parse(&var("COURIER_SIMULATOR_PORT", "8080"), "COURIER_SIMULATOR_PORT")?;

        let heartbeat = seconds(&var("COURIER_HEARTBEAT_SECS", "10"), "COURIER_HEARTBEAT_SECS")?;
        let backoff_base = seconds(&var("COURIER_BACKOFF_BASE_SECS", "1"), "COURIER_BACKOFF_BASE_SECS")?;
        let backoff_cap = seconds(&var("COURIER_BACKOFF_CAP_SECS", "30"), "COURIER_BACKOFF_CAP_SECS")?;
        ensure!(!heartbeat.is_zero(), "COURIER_HEARTBEAT_SECS must be positive");
        ensure!(!backoff_base.is_zero(), "COURIER_BACKOFF_BASE_SECS must be positive");
        ensure!(
            backoff_base <= backoff_cap,
            "COURIER_BACKOFF_BASE_SECS must not exceed COURIER_BACKOFF_CAP_SECS"
        );

        Ok(Self {
            db_path: PathBuf::from(var("COURIER_DB_PATH", "courier.db")),
            listen_addr,
            peer_url: var("COURIER_PEER_URL", "ws://127.0.0.1:8080/"),
            simulator_port: simulator.then_some(simulator_port),
            seed_conversations: parse(&var("COURIER_SEED_CONVERSATIONS", "200"), "COURIER_SEED_CONVERSATIONS")?,
            heartbeat,
            backoff_base,
            backoff_cap,
        })
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            heartbeat_interval: self.heartbeat,
            reconnect: ReconnectPolicy {
                base: self.backoff_base,
                cap: self.backoff_cap,
            },
            ..ConnectionConfig::default()
        }
    }
}

fn parse<T>(value: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {}: {:?}", key, value))
}

fn seconds(value: &str, key: &str) -> Result<Duration> {
    parse::<u64>(value, key).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("courier.db"));
        assert_eq!(config.listen_addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.peer_url, "ws://127.0.0.1:8080/");
        assert_eq!(config.simulator_port, Some(8080));
        assert_eq!(config.seed_conversations, 200);

        let connection = config.connection();
        assert_eq!(connection.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(connection.max_missed_pongs, 2);
        assert_eq!(connection.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("COURIER_PORT", "4000"),
            ("COURIER_SIMULATOR", "false"),
            ("COURIER_BACKOFF_BASE_SECS", "2"),
            ("COURIER_BACKOFF_CAP_SECS", "60"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr.port(), 4000);
        assert_eq!(config.simulator_port, None);
        assert_eq!(config.backoff_base, Duration::from_secs(2));
        assert_eq!(config.backoff_cap, Duration::from_secs(60));
    }

    #[test]
    fn invalid_numbers_are_errors() {
        assert!(config(&[("COURIER_PORT", "http")]).is_err());
        assert!(config(&[("COURIER_HEARTBEAT_SECS", "0")]).is_err());
        assert!(config(&[("COURIER_BACKOFF_BASE_SECS", "40")]).is_err());
        assert!(config(&[("COURIER_SIMULATOR", "maybe")]).is_err());
    }
}
