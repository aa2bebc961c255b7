use std::fmt;
use std::time::Duration;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StoreError;
use crate::types::DatabaseType;

/// Default upper bound of open connections.
pub const DEFAULT_MAX_OPEN: u32 = 25;
/// Default upper bound of idle connections.
pub const DEFAULT_MAX_IDLE: u32 = 25;
/// Default maximum lifetime of a pooled connection.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

/// AES key material. Wiped from memory on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    /// # Errors
    /// Returns [`StoreError::ConfigError`] unless the key is 16, 24 or 32 bytes long.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, StoreError> {
        let bytes = bytes.into();
        match bytes.len() {
            16 | 24 | 32 => Ok(Self(bytes)),
            other => Err(StoreError::ConfigError(format!(
                "encryption key must be 16, 24 or 32 bytes, got {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_open: u32,
    /// Validated against `max_open` only. The pool has no separate idle cap, so this
    /// has no effect beyond `max_open`; idle connections are reaped by `idle_timeout`.
    pub max_idle: u32,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub connection_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_open: DEFAULT_MAX_OPEN,
            max_idle: DEFAULT_MAX_IDLE,
            max_lifetime: Some(DEFAULT_MAX_LIFETIME),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything needed to open a [`crate::Connection`] or [`crate::BucketStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_type: DatabaseType,
    /// `Postgres` connection string, or the `SQLite` database path (`:memory:` allowed).
    pub connection_string: String,
    pub limits: PoolLimits,
    pub encryption_key: Option<EncryptionKey>,
    /// Whether stored payloads are sealed. Fixed for the lifetime of a connection.
    pub encrypted: bool,
}

impl StoreConfig {
    #[must_use]
    pub fn builder(db_type: DatabaseType, connection_string: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(db_type, connection_string)
    }

    #[cfg(feature = "sqlite")]
    #[must_use]
    pub fn sqlite_builder(path: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(DatabaseType::Sqlite, path)
    }

    #[cfg(feature = "postgres")]
    #[must_use]
    pub fn postgres_builder(connection_string: impl Into<String>) -> StoreConfigBuilder {
        StoreConfigBuilder::new(DatabaseType::Postgres, connection_string)
    }

    /// # Errors
    /// Returns [`StoreError::ConfigError`] describing the first invalid setting.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.connection_string.trim().is_empty() {
            return Err(StoreError::ConfigError(
                "connection string is required".to_string(),
            ));
        }
        if self.limits.max_open == 0 {
            return Err(StoreError::ConfigError(
                "max_open must be at least 1".to_string(),
            ));
        }
        if self.limits.max_idle > self.limits.max_open {
            return Err(StoreError::ConfigError(format!(
                "max_idle ({}) cannot exceed max_open ({})",
                self.limits.max_idle, self.limits.max_open
            )));
        }
        if let Some(key) = &self.encryption_key {
            EncryptionKey::from_bytes(key.as_bytes().to_vec())?;
        }
        #[cfg(feature = "postgres")]
        if self.db_type == DatabaseType::Postgres {
            self.connection_string
                .parse::<tokio_postgres::Config>()
                .map_err(|e| StoreError::ConfigError(format!("invalid postgres connection string: {e}")))?;
        }
        Ok(())
    }

    /// The raw key, present even when encryption is switched off.
    #[must_use]
    pub fn key_bytes(&self) -> Option<&[u8]> {
        self.encryption_key.as_ref().map(EncryptionKey::as_bytes)
    }
}

/// Fluent builder for [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    #[must_use]
    pub fn new(db_type: DatabaseType, connection_string: impl Into<String>) -> Self {
        Self {
            config: StoreConfig {
                db_type,
                connection_string: connection_string.into(),
                limits: PoolLimits::default(),
                encryption_key: None,
                encrypted: false,
            },
        }
    }

    /// Supply a key and switch encryption on.
    #[must_use]
    pub fn encryption_key(mut self, key: EncryptionKey) -> Self {
        self.config.encryption_key = Some(key);
        self.config.encrypted = true;
        self
    }

    #[must_use]
    pub fn encrypted(mut self, encrypted: bool) -> Self {
        self.config.encrypted = encrypted;
        self
    }

    #[must_use]
    pub fn max_open(mut self, max_open: u32) -> Self {
        self.config.limits.max_open = max_open;
        self
    }

    #[must_use]
    pub fn max_idle(mut self, max_idle: u32) -> Self {
        self.config.limits.max_idle = max_idle;
        self
    }

    #[must_use]
    pub fn max_lifetime(mut self, max_lifetime: Option<Duration>) -> Self {
        self.config.limits.max_lifetime = max_lifetime;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.config.limits.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.limits.connection_timeout = timeout;
        self
    }

    /// # Errors
    /// See [`StoreConfig::validate`].
    pub fn finish(self) -> Result<StoreConfig, StoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
