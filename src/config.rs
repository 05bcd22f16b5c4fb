//! Server configuration loaded from environment variables (and `.env`).
//!
//! All settings have defaults so the server starts with zero configuration
//! for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::TOKEN_TTL;
use crate::broadcast::DEFAULT_CAPACITY;

pub const DEV_JWT_SECRET: &str = "your-secret-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// The part of the config needed before logging exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Env: `LOG_FORMAT` (`pretty` | `json`)
    pub format: LogFormat,

    /// Also write daily-rotated log files here. Env: `LOG_DIR`
    pub dir: Option<PathBuf>,
}

impl LogSettings {
    /// Load `.env` if present, then read `LOG_FORMAT` and `LOG_DIR`.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = match lookup("LOG_FORMAT").map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self {
            format,
            dir: lookup("LOG_DIR").filter(|s| !s.is_empty()).map(PathBuf::from),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    /// Env: `HTTP_ADDR`, or `PORT` for the port alone. Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// Sled database directory. Env: `DATA_DIR`. Default: `./fee_portal_data`
    pub data_dir: PathBuf,

    /// HMAC secret for bearer tokens. Env: `JWT_SECRET`
    pub jwt_secret: String,

    /// Env: `TOKEN_TTL_HOURS`. Default: 24 hours
    pub token_ttl: Duration,

    /// Env: `BCRYPT_COST`. Default: `bcrypt::DEFAULT_COST`
    pub bcrypt_cost: u32,

    /// Per-subscriber buffer of the payment broadcast. Env: `BROADCAST_CAPACITY`
    pub broadcast_capacity: usize,

    /// Allowed browser origin. Env: `CORS_ORIGIN`. Default: any
    pub cors_origin: Option<String>,

    pub logging: LogSettings,
}

// Manual impl keeps the secret out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("http_addr", &self.http_addr)
            .field("data_dir", &self.data_dir)
            .field("token_ttl", &self.token_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("broadcast_capacity", &self.broadcast_capacity)
            .field("cors_origin", &self.cors_origin)
            .field("logging", &self.logging)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 5000).into(),
            data_dir: PathBuf::from("./fee_portal_data"),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            token_ttl: TOKEN_TTL,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            broadcast_capacity: DEFAULT_CAPACITY,
            cors_origin: None,
            logging: LogSettings {
                format: LogFormat::Pretty,
                dir: None,
            },
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    ///
    /// Problems are reported through `tracing`, so install the subscriber first.
    pub fn from_env() -> Self {
        let dotenv_loaded = dotenvy::dotenv().is_ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok());
        if dotenv_loaded {
            tracing::debug!("Loaded .env");
        }
        config
    }

    /// Build from any key lookup, falling back to defaults on missing or invalid values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        } else if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, using default"),
            }
        }

        if let Some(dir) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => config.jwt_secret = secret,
            None => tracing::warn!("JWT_SECRET not set, using the development secret"),
        }

        if let Some(val) = lookup("TOKEN_TTL_HOURS") {
            match val.parse::<u64>() {
                Ok(hours) if hours > 0 => config.token_ttl = Duration::from_secs(hours * 3600),
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_HOURS, using default"),
            }
        }

        if let Some(val) = lookup("BCRYPT_COST") {
            // bcrypt accepts 4..=31
            match val.parse::<u32>() {
                Ok(cost) if (4..=31).contains(&cost) => config.bcrypt_cost = cost,
                _ => tracing::warn!(value = %val, "Invalid BCRYPT_COST, using default"),
            }
        }

        if let Some(val) = lookup("BROADCAST_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.broadcast_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid BROADCAST_CAPACITY, using default"),
            }
        }

        if let Some(origin) = lookup("CORS_ORIGIN").filter(|s| !s.is_empty() && s != "*") {
            config.cors_origin = Some(origin);
        }

        config.logging = LogSettings::from_lookup(&lookup);

        // RUST_LOG is read directly by tracing-subscriber's EnvFilter

        config
    }
}
