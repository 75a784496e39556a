//! Server configuration parsed from environment variables.
//!
//! A `.env` file is loaded by `main` before this runs. Values that are
//! present but unparsable are errors; absent values take the defaults below.

pub const DEFAULT_PORT: u16 = 2567;
pub const DEFAULT_MAX_CLIENTS: usize = 20;
pub const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Clients admitted per room.
    pub max_clients: usize,
    /// Drop a room once its last client leaves.
    pub auto_dispose: bool,
    /// Reject writes, claims and releases that conflict with the current owner.
    pub enforce_ownership: bool,
    /// Clear ownership of every field held by a leaving session.
    pub release_on_leave: bool,
    /// Outbound frames buffered per client before drops.
    pub client_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            auto_dispose: true,
            enforce_ownership: true,
            release_on_leave: true,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Build typed config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 2567
    /// - `ROOM_MAX_CLIENTS`: default 20
    /// - `ROOM_AUTO_DISPOSE`: default true
    /// - `ENFORCE_OWNERSHIP`: default true
    /// - `RELEASE_ON_LEAVE`: default true
    /// - `CLIENT_CHANNEL_CAPACITY`: default 256
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is set to an unparsable or zero value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            port: parse_var(&lookup, "PORT", defaults.port)?,
            max_clients: parse_var(&lookup, "ROOM_MAX_CLIENTS", defaults.max_clients)?,
            auto_dispose: parse_bool(&lookup, "ROOM_AUTO_DISPOSE", defaults.auto_dispose)?,
            enforce_ownership: parse_bool(&lookup, "ENFORCE_OWNERSHIP", defaults.enforce_ownership)?,
            release_on_leave: parse_bool(&lookup, "RELEASE_ON_LEAVE", defaults.release_on_leave)?,
            client_channel_capacity: parse_var(&lookup, "CLIENT_CHANNEL_CAPACITY", defaults.client_channel_capacity)?,
        };

        if config.max_clients == 0 {
            return Err(ConfigError::Zero { var: "ROOM_MAX_CLIENTS" });
        }
        if config.client_channel_capacity == 0 {
            return Err(ConfigError::Zero { var: "CLIENT_CHANNEL_CAPACITY" });
        }
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { var, value: raw }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
