//! Configuration
//!
//! Defaults match the reference game. Every value can be overridden from
//! `CRASH_*` environment variables (and `PORT`); `validate` runs before
//! anything starts.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::core::money::{Cents, Multiplier};
use crate::game::growth::DEFAULT_GROWTH_RATE;
use crate::game::sampler::{DEFAULT_ALPHA, DEFAULT_MAX_CRASH};

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidVar {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },

    /// A value is outside its allowed range.
    #[error("{field} {reason}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// What is wrong.
        reason: &'static str,
    },
}

/// Round engine timing and distribution parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Betting window, in whole seconds (one countdown event per second).
    pub betting_seconds: u32,
    /// Pause between closing bets and takeoff.
    pub lock_delay: Duration,
    /// Multiplier tick cadence.
    pub tick_interval: Duration,
    /// Exponential growth rate per second.
    pub growth_rate: f64,
    /// Crash cap.
    pub max_crash: Multiplier,
    /// Tail shape of the crash distribution, in `(0, 1]`.
    pub alpha: f64,
    /// Pause between a crash and the next betting window.
    pub cooldown: Duration,
    /// Largest accepted stake, if any.
    pub max_bet: Option<Cents>,
    /// Fixed server seed (hex in the environment); random when `None`.
    pub server_seed: Option<[u8; 32]>,
    /// Request mailbox capacity.
    pub mailbox_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            betting_seconds: 7,
            lock_delay: Duration::from_secs(1),
            tick_interval: Duration::from_millis(100),
            growth_rate: DEFAULT_GROWTH_RATE,
            max_crash: DEFAULT_MAX_CRASH,
            alpha: DEFAULT_ALPHA,
            cooldown: Duration::from_secs(2),
            max_bet: None,
            server_seed: None,
            mailbox_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables.
    ///
    /// | Variable                  | Field            |
    /// |---------------------------|------------------|
    /// | `CRASH_BETTING_SECONDS`   | betting_seconds  |
    /// | `CRASH_LOCK_MS`           | lock_delay       |
    /// | `CRASH_TICK_MS`           | tick_interval    |
    /// | `CRASH_GROWTH_RATE`       | growth_rate      |
    /// | `CRASH_MAX_MULTIPLIER`    | max_crash        |
    /// | `CRASH_ALPHA`             | alpha            |
    /// | `CRASH_COOLDOWN_MS`       | cooldown         |
    /// | `CRASH_MAX_BET`           | max_bet          |
    /// | `CRASH_SERVER_SEED`       | server_seed      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("CRASH_BETTING_SECONDS") {
            config.betting_seconds = parse("CRASH_BETTING_SECONDS", &v)?;
        }
        if let Some(v) = lookup("CRASH_LOCK_MS") {
            config.lock_delay = Duration::from_millis(parse("CRASH_LOCK_MS", &v)?);
        }
        if let Some(v) = lookup("CRASH_TICK_MS") {
            config.tick_interval = Duration::from_millis(parse("CRASH_TICK_MS", &v)?);
        }
        if let Some(v) = lookup("CRASH_GROWTH_RATE") {
            config.growth_rate = parse("CRASH_GROWTH_RATE", &v)?;
        }
        if let Some(v) = lookup("CRASH_MAX_MULTIPLIER") {
            let max: f64 = parse("CRASH_MAX_MULTIPLIER", &v)?;
            if !(max.is_finite() && max >= 1.0) {
                return Err(ConfigError::InvalidVar {
                    var: "CRASH_MAX_MULTIPLIER",
                    value: v.clone(),
                });
            }
            config.max_crash = Multiplier::from_f64_rounded(max);
        }
        if let Some(v) = lookup("CRASH_ALPHA") {
            config.alpha = parse("CRASH_ALPHA", &v)?;
        }
        if let Some(v) = lookup("CRASH_COOLDOWN_MS") {
            config.cooldown = Duration::from_millis(parse("CRASH_COOLDOWN_MS", &v)?);
        }
        if let Some(v) = lookup("CRASH_MAX_BET") {
            let max: f64 = parse("CRASH_MAX_BET", &v)?;
            config.max_bet = Some(Cents::from_amount(max).map_err(|_| ConfigError::InvalidVar {
                var: "CRASH_MAX_BET",
                value: v.clone(),
            })?);
        }
        if let Some(v) = lookup("CRASH_SERVER_SEED") {
            config.server_seed = Some(parse_seed(&v)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.betting_seconds == 0 {
            return Err(out_of_range("betting_seconds", "must be at least 1"));
        }
        if self.tick_interval.is_zero() {
            return Err(out_of_range("tick_interval", "must be non-zero"));
        }
        if !(self.growth_rate.is_finite() && self.growth_rate > 0.0) {
            return Err(out_of_range("growth_rate", "must be a positive finite number"));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(out_of_range("alpha", "must lie in (0, 1]"));
        }
        if self.mailbox_capacity == 0 {
            return Err(out_of_range("mailbox_capacity", "must be non-zero"));
        }
        Ok(())
    }
}

/// WebSocket server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-session outbound queue length.
    pub outbound_capacity: usize,
    /// Gateway broadcast buffer; sessions further behind skip ahead.
    pub broadcast_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 4000)),
            max_connections: 1000,
            outbound_capacity: 64,
            broadcast_capacity: 1024,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PORT`, `CRASH_BIND_ADDR` and
    /// `CRASH_MAX_CONNECTIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("CRASH_BIND_ADDR") {
            config.bind_addr = parse("CRASH_BIND_ADDR", &v)?;
        }
        if let Some(v) = lookup("PORT") {
            config.bind_addr.set_port(parse("PORT", &v)?);
        }
        if let Some(v) = lookup("CRASH_MAX_CONNECTIONS") {
            config.max_connections = parse("CRASH_MAX_CONNECTIONS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(out_of_range("max_connections", "must be non-zero"));
        }
        if self.outbound_capacity == 0 {
            return Err(out_of_range("outbound_capacity", "must be non-zero"));
        }
        if self.broadcast_capacity == 0 {
            return Err(out_of_range("broadcast_capacity", "must be non-zero"));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        var,
        value: value.to_string(),
    })
}

fn parse_seed(value: &str) -> Result<[u8; 32], ConfigError> {
    let invalid = || ConfigError::InvalidVar {
        var: "CRASH_SERVER_SEED",
        value: value.to_string(),
    };
    let bytes = hex::decode(value.trim()).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

fn out_of_range(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::OutOfRange { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: BTreeMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.betting_seconds, 7);
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.max_crash.hundredths(), 10_000);
        assert_eq!(config.alpha, 0.6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let seed = "ab".repeat(32);
        let config = EngineConfig::from_lookup(lookup(&[
            ("CRASH_BETTING_SECONDS", "9"),
            ("CRASH_TICK_MS", "500"),
            ("CRASH_MAX_MULTIPLIER", "20"),
            ("CRASH_MAX_BET", "250.5"),
            ("CRASH_SERVER_SEED", seed.as_str()),
        ]))
        .unwrap();

        assert_eq!(config.betting_seconds, 9);
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert_eq!(config.max_crash.hundredths(), 2_000);
        assert_eq!(config.max_bet, Some(Cents(25_050)));
        assert_eq!(config.server_seed, Some([0xab; 32]));
    }

    #[test]
    fn test_env_parse_errors() {
        let err = EngineConfig::from_lookup(lookup(&[("CRASH_ALPHA", "heavy")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "CRASH_ALPHA", .. }));

        let err = EngineConfig::from_lookup(lookup(&[("CRASH_SERVER_SEED", "abcd")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "CRASH_SERVER_SEED", .. }));

        // A cap below 1.00x would crash every round at takeoff
        for bad in ["0.5", "-3", "NaN", "inf"] {
            let err = EngineConfig::from_lookup(lookup(&[("CRASH_MAX_MULTIPLIER", bad)])).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidVar { var: "CRASH_MAX_MULTIPLIER", .. }),
                "{} accepted",
                bad
            );
        }
        let config = EngineConfig::from_lookup(lookup(&[("CRASH_MAX_MULTIPLIER", "1")])).unwrap();
        assert_eq!(config.max_crash, Multiplier::ONE);
    }

    #[test]
    fn test_server_env() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 4000);

        let config = ServerConfig::from_lookup(lookup(&[
            ("CRASH_BIND_ADDR", "127.0.0.1:9000"),
            ("PORT", "8081"),
            ("CRASH_MAX_CONNECTIONS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8081".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_connections, 5);

        let err = ServerConfig::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVar { var: "PORT", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("CRASH_MAX_CONNECTIONS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "max_connections", .. }));
    }

    #[test]
    fn test_validation() {
        let bad_alpha = EngineConfig { alpha: 1.5, ..Default::default() };
        assert!(bad_alpha.validate().is_err());

        let zero_alpha = EngineConfig { alpha: 0.0, ..Default::default() };
        assert!(zero_alpha.validate().is_err());

        let no_window = EngineConfig { betting_seconds: 0, ..Default::default() };
        assert!(no_window.validate().is_err());

        let no_tick = EngineConfig { tick_interval: Duration::ZERO, ..Default::default() };
        assert!(no_tick.validate().is_err());

        let flat = EngineConfig { growth_rate: 0.0, ..Default::default() };
        assert!(flat.validate().is_err());
    }
}
