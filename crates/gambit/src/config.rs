//! Server configuration.
//!
//! Every knob has a default; a deployment overrides the ones it cares
//! about through `GAMBIT_*` environment variables:
//!
//! | Variable | Default |
//! |---|---|
//! | `GAMBIT_BIND` | `0.0.0.0:8080` |
//! | `GAMBIT_QUEUE_TIMEOUT_SECS` | 60 |
//! | `GAMBIT_TABLE_TTL_SECS` | 600 |
//! | `GAMBIT_DISCONNECT_GRACE_SECS` | 60 |
//! | `GAMBIT_FINISHED_RETENTION_SECS` | 120 |
//! | `GAMBIT_MAX_CONNECTIONS_PER_IP` | 10 |
//! | `GAMBIT_MAX_MESSAGES_PER_SEC` | 10 |
//! | `GAMBIT_MAX_ROOMS` | 1000 |
//! | `GAMBIT_DRAIN_TIMEOUT_SECS` | 30 |
//! | `GAMBIT_IDLE_TIMEOUT_SECS` | 120 |
//! | `GAMBIT_KEEPALIVE_SECS` | 30 |
//!
//! A variable that is set but does not parse is ignored with a warning.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use gambit_matchmaking::{QueueConfig, TableConfig};
use gambit_resilience::ShutdownConfig;
use gambit_session::SessionConfig;
use gambit_transport::TransportConfig;
use tracing::warn;

/// How often each periodic task runs.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Queue timeout check followed by a match scan.
    ///
    /// Default: 5 seconds.
    pub queue_scan: Duration,

    /// Flag falls, disconnect forfeits, and purging of finished games.
    ///
    /// Default: 10 seconds.
    pub session_sweep: Duration,

    /// Expiry of unanswered open tables.
    ///
    /// Default: 30 seconds.
    pub table_sweep: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            queue_scan: Duration::from_secs(5),
            session_sweep: Duration::from_secs(10),
            table_sweep: Duration::from_secs(30),
        }
    }
}

/// Everything a [`GambitServer`](crate::GambitServer) needs to know.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub transport: TransportConfig,
    pub queue: QueueConfig,
    pub tables: TableConfig,
    pub session: SessionConfig,

    /// How long a finished game stays around for players to reconnect and
    /// review it.
    pub finished_retention: Duration,

    pub max_connections_per_ip: u32,
    pub max_messages_per_sec: u32,

    /// Concurrent games in progress before new pairings are refused.
    pub max_rooms: usize,

    pub shutdown: ShutdownConfig,
    pub sweeps: SweepConfig,

    /// Finished games that may wait for the store before new ones are
    /// dropped.
    pub persistence_capacity: usize,

    /// A socket that sends nothing for this long, not even a pong, is
    /// closed.
    pub idle_timeout: Duration,

    /// How often the server pings each socket. Must be well under
    /// `idle_timeout` so a live client that is only waiting keeps its seat.
    ///
    /// Default: 30 seconds.
    pub keepalive_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            transport: TransportConfig::default(),
            queue: QueueConfig::default(),
            tables: TableConfig::default(),
            session: SessionConfig::default(),
            finished_retention: Duration::from_secs(120),
            max_connections_per_ip: 10,
            max_messages_per_sec: 10,
            max_rooms: 1000,
            shutdown: ShutdownConfig::default(),
            sweeps: SweepConfig::default(),
            persistence_capacity: 256,
            idle_timeout: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by whatever `GAMBIT_*` variables are set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(bind) = lookup("GAMBIT_BIND") {
            config.bind_addr = bind;
        }
        if let Some(secs) = parse(&lookup, "GAMBIT_QUEUE_TIMEOUT_SECS") {
            config.queue.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "GAMBIT_TABLE_TTL_SECS") {
            config.tables.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "GAMBIT_DISCONNECT_GRACE_SECS") {
            config.session.disconnect_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "GAMBIT_FINISHED_RETENTION_SECS") {
            config.finished_retention = Duration::from_secs(secs);
        }
        if let Some(n) = parse(&lookup, "GAMBIT_MAX_CONNECTIONS_PER_IP") {
            config.max_connections_per_ip = n;
        }
        if let Some(n) = parse(&lookup, "GAMBIT_MAX_MESSAGES_PER_SEC") {
            config.max_messages_per_sec = n;
        }
        if let Some(n) = parse(&lookup, "GAMBIT_MAX_ROOMS") {
            config.max_rooms = n;
        }
        if let Some(secs) = parse(&lookup, "GAMBIT_DRAIN_TIMEOUT_SECS") {
            config.shutdown.drain_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "GAMBIT_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "GAMBIT_KEEPALIVE_SECS") {
            config.keepalive_interval = Duration::from_secs(secs);
        }

        config
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_matches_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.transport.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.queue.timeout, Duration::from_secs(60));
        assert_eq!(config.tables.ttl, Duration::from_secs(600));
        assert_eq!(config.session.disconnect_grace, Duration::from_secs(60));
        assert_eq!(config.finished_retention, Duration::from_secs(120));
        assert_eq!(config.max_connections_per_ip, 10);
        assert_eq!(config.max_messages_per_sec, 10);
        assert_eq!(config.max_rooms, 1000);
        assert_eq!(config.shutdown.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.sweeps.queue_scan, Duration::from_secs(5));
        assert_eq!(config.sweeps.session_sweep, Duration::from_secs(10));
        assert_eq!(config.sweeps.table_sweep, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_from_lookup_no_variables_gives_defaults() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_rooms, 1000);
    }

    #[test]
    fn test_from_lookup_overrides_each_setting() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("GAMBIT_BIND", "127.0.0.1:9000"),
            ("GAMBIT_QUEUE_TIMEOUT_SECS", "90"),
            ("GAMBIT_TABLE_TTL_SECS", "300"),
            ("GAMBIT_DISCONNECT_GRACE_SECS", "15"),
            ("GAMBIT_FINISHED_RETENTION_SECS", "5"),
            ("GAMBIT_MAX_CONNECTIONS_PER_IP", "3"),
            ("GAMBIT_MAX_MESSAGES_PER_SEC", "20"),
            ("GAMBIT_MAX_ROOMS", "50"),
            ("GAMBIT_DRAIN_TIMEOUT_SECS", "1"),
            ("GAMBIT_IDLE_TIMEOUT_SECS", "45"),
            ("GAMBIT_KEEPALIVE_SECS", "15"),
        ]));
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.queue.timeout, Duration::from_secs(90));
        assert_eq!(config.tables.ttl, Duration::from_secs(300));
        assert_eq!(config.session.disconnect_grace, Duration::from_secs(15));
        assert_eq!(config.finished_retention, Duration::from_secs(5));
        assert_eq!(config.max_connections_per_ip, 3);
        assert_eq!(config.max_messages_per_sec, 20);
        assert_eq!(config.max_rooms, 50);
        assert_eq!(config.shutdown.drain_timeout, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Duration::from_secs(45));
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_from_lookup_unparsable_value_keeps_default() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("GAMBIT_MAX_ROOMS", "lots"),
            ("GAMBIT_DISCONNECT_GRACE_SECS", "-4"),
        ]));
        assert_eq!(config.max_rooms, 1000);
        assert_eq!(config.session.disconnect_grace, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_trims_whitespace() {
        let config = ServerConfig::from_lookup(lookup(&[("GAMBIT_MAX_ROOMS", " 12 ")]));
        assert_eq!(config.max_rooms, 12);
    }
}
