//! Configuration management for the bot runtime
//!
//! Loads an optional TOML file, then applies `BOT_*` environment overrides,
//! then validates.
//!
//! Environment variables:
//! - `BOT_ID`: bot instance identity (default: 0)
//! - `BOT_KEY_PREFIX`: first key segment (default: "bot")
//! - `BOT_RATE_LIMIT_WINDOW_SECONDS`: fixed window length (default: 2)
//! - `BOT_RATE_LIMIT_MAX_PER_WINDOW`: admits per window (default: 3)
//! - `BOT_RATE_LIMIT_FAIL_OPEN`: admit when the counter backend fails (default: true)
//! - `BOT_RATE_LIMIT_NOTIFY`: send one throttling notice per window (default: true)
//! - `BOT_ACCESS_GATE_CACHE_TTL_SECONDS`: eligibility cache TTL (default: 30)
//! - `BOT_ACCESS_GATE_CACHE_CAPACITY`: eligibility cache bound (default: 10000)
//! - `BOT_ACCESS_GATE_FAIL_OPEN`: admit when the eligibility lookup fails (default: false)
//! - `BOT_DATABASE_PATH`: SQLite eligibility database
//! - `BOT_BACKEND`: `memory` or `redis` (default: memory)
//! - `BOT_REDIS_URL`: Redis DSN (default: redis://127.0.0.1:6379)
//! - `BOT_BACKEND_TIMEOUT_MS`: bound on every store round-trip (default: 500)
//! - `BOT_ISOLATE_EVENTS`: serialize handler bodies per subject (default: true)
//! - `BOT_LOCK_FAIL_OPEN`: run handlers unlocked when the lock backend fails (default: true)
//! - `BOT_LOG_LEVEL`: log filter when `RUST_LOG` is unset (default: info)

use bot_admission::{AccessGateConfig, FailPolicy, RateLimitRule};
use bot_session::IsolationConfig;
use bot_storage::KeyScope;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    pub bot: BotSection,
    pub rate_limit: RateLimitConfig,
    pub access_gate: AccessGateSection,
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotSection {
    pub bot_id: i64,
    pub key_prefix: String,
    pub key_scope: KeyScope,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            bot_id: 0,
            key_prefix: "bot".to_string(),
            key_scope: KeyScope::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub max_per_window: u32,
    pub fail_open: bool,
    pub notify: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 2,
            max_per_window: 3,
            fail_open: true,
            notify: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessGateSection {
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
    pub fail_open: bool,
    pub database_path: Option<PathBuf>,
    pub blocked_users: Vec<i64>,
    pub denied_chats: Vec<i64>,
}

impl Default for AccessGateSection {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 30,
            cache_capacity: 10_000,
            fail_open: false,
            database_path: None,
            blocked_users: Vec::new(),
            denied_chats: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            other => Err(ConfigError::Invalid(format!("unknown backend kind '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub redis_url: String,
    pub connection_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub state_ttl_seconds: Option<u64>,
    pub data_ttl_seconds: Option<u64>,
    pub isolate_events: bool,
    pub lock_ttl_seconds: u64,
    /// Run the handler without the lock when the backend cannot be reached.
    pub lock_fail_open: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_ttl_seconds: None,
            data_ttl_seconds: None,
            isolate_events: true,
            lock_ttl_seconds: 30,
            lock_fail_open: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn parse_env<T: FromStr>(var: &str, value: &str, target: &mut T) {
    match value.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => tracing::warn!(var, value, "ignoring unparsable environment override"),
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot: BotSection::default(),
            rate_limit: RateLimitConfig::default(),
            access_gate: AccessGateSection::default(),
            backend: BackendConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BotConfig {
    /// File (if any), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `BOT_*` overrides from `lookup`. Unparsable numbers are
    /// ignored with a warning; an unknown backend kind is an error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BOT_ID") {
            parse_env("BOT_ID", &v, &mut self.bot.bot_id);
        }
        if let Some(v) = lookup("BOT_KEY_PREFIX") {
            self.bot.key_prefix = v;
        }
        if let Some(v) = lookup("BOT_RATE_LIMIT_WINDOW_SECONDS") {
            parse_env("BOT_RATE_LIMIT_WINDOW_SECONDS", &v, &mut self.rate_limit.window_seconds);
        }
        if let Some(v) = lookup("BOT_RATE_LIMIT_MAX_PER_WINDOW") {
            parse_env("BOT_RATE_LIMIT_MAX_PER_WINDOW", &v, &mut self.rate_limit.max_per_window);
        }
        if let Some(v) = lookup("BOT_RATE_LIMIT_FAIL_OPEN") {
            self.rate_limit.fail_open = parse_bool_env(&v);
        }
        if let Some(v) = lookup("BOT_RATE_LIMIT_NOTIFY") {
            self.rate_limit.notify = parse_bool_env(&v);
        }
        if let Some(v) = lookup("BOT_ACCESS_GATE_CACHE_TTL_SECONDS") {
            parse_env(
                "BOT_ACCESS_GATE_CACHE_TTL_SECONDS",
                &v,
                &mut self.access_gate.cache_ttl_seconds,
            );
        }
        if let Some(v) = lookup("BOT_ACCESS_GATE_CACHE_CAPACITY") {
            parse_env(
                "BOT_ACCESS_GATE_CACHE_CAPACITY",
                &v,
                &mut self.access_gate.cache_capacity,
            );
        }
        if let Some(v) = lookup("BOT_ACCESS_GATE_FAIL_OPEN") {
            self.access_gate.fail_open = parse_bool_env(&v);
        }
        if let Some(v) = lookup("BOT_DATABASE_PATH") {
            self.access_gate.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("BOT_BACKEND") {
            self.backend.kind = v.parse()?;
        }
        if let Some(v) = lookup("BOT_REDIS_URL") {
            self.backend.redis_url = v;
        }
        if let Some(v) = lookup("BOT_BACKEND_TIMEOUT_MS") {
            parse_env(
                "BOT_BACKEND_TIMEOUT_MS",
                &v,
                &mut self.backend.connection_timeout_ms,
            );
        }
        if let Some(v) = lookup("BOT_ISOLATE_EVENTS") {
            self.session.isolate_events = parse_bool_env(&v);
        }
        if let Some(v) = lookup("BOT_LOCK_FAIL_OPEN") {
            self.session.lock_fail_open = parse_bool_env(&v);
        }
        if let Some(v) = lookup("BOT_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "rateLimit.windowSeconds must be greater than zero".into(),
            ));
        }
        if self.rate_limit.max_per_window == 0 {
            return Err(ConfigError::Invalid(
                "rateLimit.maxPerWindow must be greater than zero".into(),
            ));
        }
        if self.backend.connection_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "backend.connectionTimeoutMs must be greater than zero".into(),
            ));
        }
        if self.session.lock_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "session.lockTtlSeconds must be greater than zero".into(),
            ));
        }
        if self.access_gate.cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "accessGate.cacheCapacity must be greater than zero".into(),
            ));
        }
        if self.backend.kind == BackendKind::Redis && self.backend.redis_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "backend.redisUrl is required for the redis backend".into(),
            ));
        }
        Ok(())
    }

    pub fn rate_limit_rule(&self) -> RateLimitRule {
        RateLimitRule::new(self.rate_limit.max_per_window, self.rate_limit.window_seconds)
    }

    pub fn rate_limit_policy(&self) -> FailPolicy {
        FailPolicy::from_fail_open(self.rate_limit.fail_open)
    }

    pub fn isolation_policy(&self) -> FailPolicy {
        FailPolicy::from_fail_open(self.session.lock_fail_open)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.connection_timeout_ms)
    }

    pub fn access_gate_config(&self) -> AccessGateConfig {
        AccessGateConfig {
            cache_ttl: Duration::from_secs(self.access_gate.cache_ttl_seconds),
            cache_capacity: NonZeroUsize::new(self.access_gate.cache_capacity)
                .unwrap_or(NonZeroUsize::MIN),
            lookup_timeout: self.backend_timeout(),
            fail_policy: FailPolicy::from_fail_open(self.access_gate.fail_open),
        }
    }

    pub fn isolation_config(&self) -> IsolationConfig {
        IsolationConfig {
            lease: Duration::from_secs(self.session.lock_ttl_seconds),
            ..IsolationConfig::default()
        }
    }

    pub fn state_ttl(&self) -> Option<Duration> {
        self.session.state_ttl_seconds.map(Duration::from_secs)
    }

    pub fn data_ttl(&self) -> Option<Duration> {
        self.session.data_ttl_seconds.map(Duration::from_secs)
    }
}
