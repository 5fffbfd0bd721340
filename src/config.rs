//! Deployment configuration, read from an optional `namelock.json5` in the
//! data directory. Every field is optional; command line flags override what
//! the file says.

use std::{
    io,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    time::Duration,
};

use fs_err as fs;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "namelock.json5";

pub const DEFAULT_COMMAND_PREFIX: &str = "!";
pub const DEFAULT_KEEP_ALIVE_PORT: u16 = 8080;
pub const DEFAULT_KEEP_ALIVE_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Timing knobs for the scheduler and executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementPolicy {
    /// How long an event-driven reconsideration waits before evaluating, so a
    /// burst of events resolves against the state after the burst.
    pub settle_delay: Duration,

    /// Minimum time between two rename attempts on one channel.
    pub cooldown: Duration,

    /// How long a channel is left alone after a transient platform error.
    pub backoff: Duration,

    /// Period of the sweep over every locked channel.
    pub sweep_interval: Duration,

    /// Upper bound on each platform read or rename.
    pub call_timeout: Duration,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(5),
            backoff: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub command_prefix: Option<String>,

    #[serde(default, deserialize_with = "optional_duration")]
    pub settle_delay: Option<Duration>,

    #[serde(default, deserialize_with = "optional_duration")]
    pub cooldown: Option<Duration>,

    #[serde(default, deserialize_with = "optional_duration")]
    pub backoff: Option<Duration>,

    #[serde(default, deserialize_with = "optional_duration")]
    pub sweep_interval: Option<Duration>,

    #[serde(default, deserialize_with = "optional_duration")]
    pub call_timeout: Option<Duration>,

    #[serde(default)]
    pub keep_alive_port: Option<u16>,

    #[serde(default)]
    pub keep_alive_address: Option<IpAddr>,

    /// Read separately by logging before the rest of the file is parsed.
    #[serde(default)]
    pub file_log_level: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("error parsing config file {}: {message}", path.display())]
    Json5 { path: PathBuf, message: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

impl ConfigFile {
    /// Loads `namelock.json5` from `data_dir`. A missing file yields the
    /// default, empty configuration.
    pub fn load_from_dir(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE_NAME);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("No {} in {}", CONFIG_FILE_NAME, data_dir.display());
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        Self::load_from_str(&contents, &path)
    }

    pub fn load_from_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        json5::from_str(contents).map_err(|err| ConfigError::Json5 {
            path: path.to_owned(),
            message: err.to_string(),
        })
    }

    pub fn command_prefix(&self) -> &str {
        self.command_prefix
            .as_deref()
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(DEFAULT_COMMAND_PREFIX)
    }

    pub fn keep_alive_port(&self) -> u16 {
        self.keep_alive_port.unwrap_or(DEFAULT_KEEP_ALIVE_PORT)
    }

    pub fn keep_alive_address(&self) -> IpAddr {
        self.keep_alive_address.unwrap_or(DEFAULT_KEEP_ALIVE_ADDRESS)
    }

    /// The enforcement policy described by this file, with defaults filling
    /// any field it leaves out.
    pub fn policy(&self) -> Result<EnforcementPolicy, ConfigError> {
        let defaults = EnforcementPolicy::default();

        let policy = EnforcementPolicy {
            settle_delay: self.settle_delay.unwrap_or(defaults.settle_delay),
            cooldown: self.cooldown.unwrap_or(defaults.cooldown),
            backoff: self.backoff.unwrap_or(defaults.backoff),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            call_timeout: self.call_timeout.unwrap_or(defaults.call_timeout),
        };

        // Settle delay and cooldown may be zero; the rest would spin or never
        // complete.
        if policy.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "sweepInterval",
            });
        }
        if policy.call_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "callTimeout",
            });
        }

        Ok(policy)
    }
}

fn optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    text.map(|text| humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom))
        .transpose()
}
