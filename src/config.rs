use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use ipnet::Ipv4Net;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

/// How a pool picks an address among the free host indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    Sequential,
    #[default]
    Random,
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // unrecognised algorithm names fall back to random
        let name = String::deserialize(deserializer)?;
        Ok(match name.as_str() {
            "sequential" => Self::Sequential,
            _ => Self::Random,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PoolConfig {
    pub interfaces: Vec<String>,
    pub network: Ipv4Net,
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    pub pools: HashMap<String, PoolConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let pool = PoolConfig {
            interfaces: vec!["vboxnet0".to_string()],
            network: Ipv4Net::new(Ipv4Addr::new(192, 168, 99, 0), 24)
                .expect("default network prefix is valid"),
            start: 2,
            end: 99,
            algorithm: Algorithm::Random,
            lifetime: Duration::from_secs(24 * 60 * 60),
        };

        Self {
            pools: HashMap::from([("default".to_string(), pool)]),
        }
    }
}

impl Config {
    /// Loads the configuration file, falling back to the built-in default
    /// pool when the file is missing or unparseable.
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::load(path).await {
            Ok(config) => config,
            Err(error) => {
                warn!(path = %path.display(), %error, "unable to load configuration, using defaults");
                Self::default()
            }
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pools.is_empty() {
            return Err(Error::Config("no pools configured".to_string()));
        }

        for (name, pool) in &self.pools {
            pool.validate(name)?;
        }

        Ok(())
    }
}

impl PoolConfig {
    fn validate(&self, name: &str) -> Result<()> {
        if self.interfaces.is_empty() {
            return Err(Error::Config(format!("pool {name} serves no interfaces")));
        }

        if self.start < 1 {
            return Err(Error::Config(format!(
                "pool {name}: start index must be at least 1"
            )));
        }

        if self.start > self.end {
            return Err(Error::Config(format!(
                "pool {name}: start index {} exceeds end index {}",
                self.start, self.end
            )));
        }

        let host_bits = 32 - u32::from(self.network.prefix_len());
        let max_host = (1u64 << host_bits).saturating_sub(2);
        if u64::from(self.end) > max_host {
            return Err(Error::Config(format!(
                "pool {name}: end index {} does not fit in {}",
                self.end, self.network
            )));
        }

        if self.lifetime.is_zero() {
            return Err(Error::Config(format!(
                "pool {name}: lifetime must be nonzero"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [Pools.lan]
        Interfaces = ["eth1", "eth2"]
        Network = "192.168.99.0/24"
        Start = 2
        End = 99
        Algorithm = "sequential"
        Lifetime = "24h"
    "#;

    #[test]
    fn parses_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());

        let pool = &config.pools["lan"];
        assert_eq!(pool.interfaces, vec!["eth1", "eth2"]);
        assert_eq!(pool.network.to_string(), "192.168.99.0/24");
        assert_eq!(pool.start, 2);
        assert_eq!(pool.end, 99);
        assert_eq!(pool.algorithm, Algorithm::Sequential);
        assert_eq!(pool.lifetime, Duration::from_secs(86400));
    }

    #[test]
    fn unrecognised_algorithm_falls_back_to_random() {
        let config: Config =
            toml::from_str(&SAMPLE.replace("\"sequential\"", "\"fancy\"")).unwrap();
        assert_eq!(config.pools["lan"].algorithm, Algorithm::Random);
    }

    #[test]
    fn missing_algorithm_defaults_to_random() {
        let without = SAMPLE.replace("Algorithm = \"sequential\"", "");
        let config: Config = toml::from_str(&without).unwrap();
        assert_eq!(config.pools["lan"].algorithm, Algorithm::Random);
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.pools.contains_key("default"));
    }

    #[test]
    fn rejects_inverted_range() {
        let config: Config = toml::from_str(&SAMPLE.replace("End = 99", "End = 1")).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_start() {
        let config: Config = toml::from_str(&SAMPLE.replace("Start = 2", "Start = 0")).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_end_past_subnet() {
        let config: Config = toml::from_str(&SAMPLE.replace("End = 99", "End = 255")).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_interfaces() {
        let config: Config =
            toml::from_str(&SAMPLE.replace("[\"eth1\", \"eth2\"]", "[]")).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_lifetime() {
        let config: Config = toml::from_str(&SAMPLE.replace("\"24h\"", "\"0s\"")).unwrap();
        assert!(config.validate().is_err());
    }
}
