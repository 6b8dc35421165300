use std::path::PathBuf;

use ::config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "solarlink";
const ENV_PREFIX: &str = "SOLARLINK";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SolarLinkConfig {
    pub port: u16,
    /// holds `logs/` and `credentials.json`
    pub data_dir: PathBuf,
    pub public_dir: PathBuf,
    pub powerwall_url: String,
    /// gateways ship a self-signed certificate
    pub accept_invalid_certs: bool,
    pub poll_interval_secs: u64,
    pub log_interval_secs: u64,
    /// watts
    pub route_epsilon: f64,
}

impl Default for SolarLinkConfig {
    fn default() -> Self {
        Self {
            port: 54047,
            data_dir: PathBuf::from("./data"),
            public_dir: PathBuf::from("./public"),
            powerwall_url: "https://192.168.0.214:7600".to_string(),
            accept_invalid_certs: true,
            poll_interval_secs: 10,
            log_interval_secs: 300,
            route_epsilon: 50.0,
        }
    }
}

impl SolarLinkConfig {
    /// Defaults, then the config file, then `SOLARLINK_*` env vars.
    ///
    /// An explicit `path` must exist; the default `solarlink.*` is optional.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::with_name(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let cfg: Self = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 || self.log_interval_secs == 0 {
            return Err(ConfigError::Message(
                "poll_interval_secs and log_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
