//! Controller configuration.
//!
//! Every setting can come from a flag or from a `PIC_*` environment
//! variable. [`Config::default`] yields the same values as an empty
//! command line.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

const SUPPORTED_SCHEMES: [&str; 3] = ["http", "https", "h2c"];

const DEFAULT_INGRESS_CLASS: &str = "pangolin";
const DEFAULT_TUNNEL_NAME: &str = "default";
const DEFAULT_BACKEND_SCHEME: &str = "http";
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_HEALTH_PORT: u16 = 8081;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WRITE_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

#[derive(Debug, Clone, Parser)]
#[command(name = "pic-controller")]
#[command(about = "Reconciles Ingress routes into per-host Pangolin resources")]
#[command(version)]
pub struct Config {
    /// Ingress class handled by this controller; `<class>-<suffix>` selects a mapped tunnel
    #[arg(long, env = "PIC_INGRESS_CLASS", default_value = DEFAULT_INGRESS_CLASS)]
    pub ingress_class: String,

    /// Tunnel used by routes of the plain ingress class
    #[arg(
        long = "default-tunnel",
        env = "PIC_DEFAULT_TUNNEL",
        default_value = DEFAULT_TUNNEL_NAME
    )]
    pub default_tunnel_name: String,

    /// Class suffix to tunnel aliases, e.g. `eu=tunnel-eu,us=tunnel-us`
    #[arg(
        long,
        env = "PIC_TUNNEL_MAPPING",
        value_parser = parse_tunnel_mapping,
        default_value = ""
    )]
    pub tunnel_mapping: TunnelMapping,

    /// Scheme used to reach backend services
    #[arg(long, env = "PIC_BACKEND_SCHEME", default_value = DEFAULT_BACKEND_SCHEME)]
    pub backend_scheme: String,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "PIC_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Address of the health check server
    #[arg(long, env = "PIC_HEALTH_ADDR", default_value = DEFAULT_HEALTH_ADDR)]
    pub health_addr: SocketAddr,

    /// Deadline for a single store call, in milliseconds
    #[arg(long, env = "PIC_STORE_TIMEOUT_MS", default_value_t = DEFAULT_STORE_TIMEOUT_MS)]
    pub store_timeout_ms: u64,

    /// Attempts for one target write before the pass fails
    #[arg(long, env = "PIC_WRITE_RETRIES", default_value_t = DEFAULT_WRITE_RETRIES)]
    pub write_retries: u32,

    /// First requeue delay after a failed pass, in milliseconds
    #[arg(long, env = "PIC_BACKOFF_BASE_MS", default_value_t = DEFAULT_BACKOFF_BASE_MS)]
    pub backoff_base_ms: u64,

    /// Upper bound for the requeue delay, in milliseconds
    #[arg(long, env = "PIC_BACKOFF_MAX_MS", default_value_t = DEFAULT_BACKOFF_MAX_MS)]
    pub backoff_max_ms: u64,

    /// JSON file with tunnels and routes to load into the store at startup
    #[arg(long, env = "PIC_SEED")]
    pub seed: Option<PathBuf>,

    /// Reconcile every seeded route once, print the resulting targets and exit
    #[arg(long)]
    pub once: bool,
}

/// Class suffix to tunnel name aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelMapping(pub BTreeMap<String, String>);

impl TunnelMapping {
    pub fn get(&self, suffix: &str) -> Option<&str> {
        self.0.get(suffix).map(String::as_str)
    }
}

/// Parses `suffix=tunnel` pairs separated by commas. Blank input is an empty mapping.
pub fn parse_tunnel_mapping(raw: &str) -> Result<TunnelMapping, ConfigError> {
    let mut mapping = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (suffix, tunnel) = entry
            .split_once('=')
            .map(|(s, t)| (s.trim(), t.trim()))
            .filter(|(s, t)| !s.is_empty() && !t.is_empty())
            .ok_or_else(|| ConfigError::TunnelMapping(entry.to_string()))?;
        mapping.insert(suffix.to_string(), tunnel.to_string());
    }
    Ok(TunnelMapping(mapping))
}

impl Config {
    /// Checks cross-field constraints clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_SCHEMES.contains(&self.backend_scheme.as_str()) {
            return Err(ConfigError::BackendScheme(self.backend_scheme.clone()));
        }
        if self.ingress_class.is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "ingress_class",
                requirement: "non-empty",
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::OutOfRange {
                field: "workers",
                requirement: "at least 1",
            });
        }
        if self.write_retries == 0 {
            return Err(ConfigError::OutOfRange {
                field: "write_retries",
                requirement: "at least 1",
            });
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "store_timeout_ms",
                requirement: "greater than 0",
            });
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::OutOfRange {
                field: "backoff_base_ms",
                requirement: "greater than 0 and not above backoff_max_ms",
            });
        }
        Ok(())
    }

    /// Prefix of multi-tunnel classes, e.g. `pangolin-`.
    pub fn class_prefix(&self) -> String {
        format!("{}-", self.ingress_class)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingress_class: DEFAULT_INGRESS_CLASS.to_string(),
            default_tunnel_name: DEFAULT_TUNNEL_NAME.to_string(),
            tunnel_mapping: TunnelMapping::default(),
            backend_scheme: DEFAULT_BACKEND_SCHEME.to_string(),
            workers: DEFAULT_WORKERS,
            health_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HEALTH_PORT)),
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            write_retries: DEFAULT_WRITE_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            seed: None,
            once: false,
        }
    }
}
