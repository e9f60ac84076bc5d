use serde::Deserialize;
use std::fmt;
use std::time::Duration;

const MASK: &str = "******";

/// Connection settings for the Redis tier.
///
/// Durations are plain milliseconds so any serde format can carry them.
/// `Debug` output masks the password; log [`RedisOptions::sanitized`] when a
/// copy of the whole struct is needed.
#[derive(Clone, Deserialize)]
pub struct RedisOptions {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u32,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub db: i64,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Connections opened eagerly at connect time
    #[serde(default = "default_min_idle_conns")]
    pub min_idle_conns: usize,

    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Connect with `rediss://`
    #[serde(default)]
    pub enable_tls: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u32 {
    6379
}

fn default_pool_size() -> usize {
    100
}

fn default_min_idle_conns() -> usize {
    10
}

fn default_dial_timeout_ms() -> u64 {
    5_000
}

fn default_io_timeout_ms() -> u64 {
    3_000
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: String::new(),
            db: 0,
            pool_size: default_pool_size(),
            min_idle_conns: default_min_idle_conns(),
            dial_timeout_ms: default_dial_timeout_ms(),
            read_timeout_ms: default_io_timeout_ms(),
            write_timeout_ms: default_io_timeout_ms(),
            enable_tls: false,
        }
    }
}

impl RedisOptions {
    /// Checks the options, reporting every problem at once.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.host.trim().is_empty() {
            errors.push("redis host cannot be empty".to_string());
        }
        if self.port == 0 || self.port > 65535 {
            errors.push(format!("redis port {} must be between 1 and 65535", self.port));
        }
        if self.pool_size == 0 {
            errors.push("redis pool size must be greater than 0".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// A copy with the password masked, safe to log.
    pub fn sanitized(&self) -> Self {
        let mut sanitized = self.clone();
        if !sanitized.password.is_empty() {
            sanitized.password = MASK.to_string();
        }
        sanitized
    }

    /// Connection URL, `redis://` or `rediss://` depending on `enable_tls`.
    ///
    /// The password is percent-encoded.
    pub fn url(&self) -> String {
        let scheme = if self.enable_tls { "rediss" } else { "redis" };
        let auth = if self.password.is_empty() {
            String::new()
        } else {
            format!(":{}@", urlencoding::encode(&self.password))
        };
        format!("{scheme}://{auth}{}:{}/{}", self.host, self.port, self.db)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl fmt::Debug for RedisOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() { "" } else { MASK };
        f.debug_struct("RedisOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &password)
            .field("db", &self.db)
            .field("pool_size", &self.pool_size)
            .field("min_idle_conns", &self.min_idle_conns)
            .field("dial_timeout_ms", &self.dial_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("write_timeout_ms", &self.write_timeout_ms)
            .field("enable_tls", &self.enable_tls)
            .finish()
    }
}
