use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MimirError, Result};

/// Console log verbosity. Maps onto tracing filter directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    None,
    Error,
    #[default]
    Info,
    Verbose,
}

impl LogLevel {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "error" => Ok(LogLevel::Error),
            "info" => Ok(LogLevel::Info),
            "verbose" => Ok(LogLevel::Verbose),
            other => Err(MimirError::ConfigParseError(format!(
                "Invalid log level: {}",
                other
            ))),
        }
    }

    /// Directive for the tracing EnvFilter.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Error => "error",
            LogLevel::Info => "info",
            LogLevel::Verbose => "debug",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind both the UDP and TCP DNS listeners to
    pub bind_addr: SocketAddr,

    /// Upstream recursive resolver for forwarded and RBL lookups
    pub upstream_resolver: SocketAddr,

    /// Timeout for a single upstream query
    pub upstream_timeout: Duration,

    /// Hard wall-clock deadline for aggregate fan-out
    pub aggregate_timeout: Duration,

    /// Console log verbosity
    pub log_level: LogLevel,

    /// JSON file with the RBL server list
    pub rbl_servers_file: PathBuf,

    /// Optional JSON file with aggregate zone definitions
    pub aggregate_zones_file: Option<PathBuf>,

    /// Durable store location (path or ":memory:")
    pub database_path: String,

    /// Maximum connections in the durable store pool
    pub database_pool_max: u32,

    /// Whether the in-memory cache tier is enabled; when off, every lookup
    /// goes straight to the durable tier
    pub memory_cache_enabled: bool,

    /// Maximum entries held by the in-memory tier
    pub memory_cache_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8053".parse().expect("default bind address"),
            upstream_resolver: "8.8.8.8:53".parse().expect("default upstream address"),
            upstream_timeout: Duration::from_secs(5),
            aggregate_timeout: Duration::from_millis(250),
            log_level: LogLevel::Info,
            rbl_servers_file: PathBuf::from("rbl_servers.json"),
            aggregate_zones_file: None,
            database_path: "mimir.db".to_string(),
            database_pool_max: 5,
            memory_cache_enabled: true,
            memory_cache_size: 10_000,
        }
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

impl ServerConfig {
    /// Build a configuration from defaults overridden by MIMIR_* environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(bind_addr) = std::env::var("MIMIR_BIND_ADDR") {
            config.bind_addr = bind_addr
                .parse()
                .map_err(|_| MimirError::InvalidBindAddress(bind_addr))?;
        }

        if let Ok(upstream) = std::env::var("MIMIR_UPSTREAM_RESOLVER") {
            config.upstream_resolver = parse_resolver_addr(&upstream)?;
        }

        if let Ok(timeout_str) = std::env::var("MIMIR_UPSTREAM_TIMEOUT") {
            let secs = timeout_str.parse::<u64>().map_err(|_| {
                MimirError::ConfigParseError(format!("Invalid upstream timeout: {}", timeout_str))
            })?;
            if secs == 0 {
                return Err(MimirError::ConfigParseError(
                    "Upstream timeout must be greater than 0".to_string(),
                ));
            }
            config.upstream_timeout = Duration::from_secs(secs);
        }

        if let Ok(timeout_str) = std::env::var("MIMIR_AGGREGATE_TIMEOUT_MS") {
            let millis = timeout_str.parse::<u64>().map_err(|_| {
                MimirError::ConfigParseError(format!("Invalid aggregate timeout: {}", timeout_str))
            })?;
            if millis == 0 {
                return Err(MimirError::ConfigParseError(
                    "Aggregate timeout must be greater than 0".to_string(),
                ));
            }
            config.aggregate_timeout = Duration::from_millis(millis);
        }

        if let Ok(level) = std::env::var("MIMIR_LOG_LEVEL") {
            config.log_level = LogLevel::parse(&level)?;
        }

        if let Ok(path) = std::env::var("MIMIR_RBL_SERVERS_FILE") {
            config.rbl_servers_file = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("MIMIR_AGGREGATE_ZONES_FILE") {
            config.aggregate_zones_file = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("MIMIR_DATABASE_PATH") {
            config.database_path = path;
        }

        if let Ok(pool_max) = std::env::var("MIMIR_DATABASE_POOL_MAX") {
            let size = pool_max.parse::<u32>().map_err(|_| {
                MimirError::ConfigParseError(format!("Invalid pool size: {}", pool_max))
            })?;
            if size == 0 {
                return Err(MimirError::ConfigParseError(
                    "Pool size must be greater than 0".to_string(),
                ));
            }
            config.database_pool_max = size;
        }

        if let Ok(enabled) = std::env::var("MIMIR_MEMORY_CACHE_ENABLED") {
            config.memory_cache_enabled = parse_bool(&enabled, true);
        }

        if let Ok(size_str) = std::env::var("MIMIR_MEMORY_CACHE_SIZE") {
            let size = size_str.parse::<usize>().map_err(|_| {
                MimirError::ConfigParseError(format!("Invalid cache size: {}", size_str))
            })?;
            if size == 0 {
                return Err(MimirError::ConfigParseError(
                    "Memory cache size must be greater than 0".to_string(),
                ));
            }
            config.memory_cache_size = size;
        }

        Ok(config)
    }
}

/// Accept an upstream resolver with or without an explicit port; plain
/// addresses get the standard DNS port.
pub fn parse_resolver_addr(value: &str) -> Result<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = value.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, 53));
    }
    Err(MimirError::InvalidUpstreamServer(value.to_string()))
}
