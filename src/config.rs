//! Runtime configuration.
//!
//! Everything the server needs is carried in an explicit [`Config`] built once at
//! startup and handed to [`app`](crate::app). Nothing is read from ambient state
//! after that, so tests can run isolated instances side by side with distinct
//! secrets.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use time::Duration;
use tower_sessions::cookie::Key;

use crate::error::{Error, Result};

/// Default cookie name carrying the session id.
pub const DEFAULT_COOKIE_NAME: &str = "chocolatechip";

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sea-ORM connection string.
    pub database_url: String,
    /// Address the HTTP listener binds to.
    pub bind_addr: SocketAddr,
    pub session: SessionConfig,
}

impl Config {
    /// Reads the configuration from the environment, loading a `.env` file first if
    /// one is present.
    ///
    /// | Variable               | Default                          |
    /// |------------------------|----------------------------------|
    /// | `DATABASE_URL`         | `sqlite://chocolatechip.db?mode=rwc` |
    /// | `BIND_ADDR`            | `127.0.0.1:3000`                 |
    /// | `SESSION_COOKIE_NAME`  | `chocolatechip`                  |
    /// | `SESSION_MAX_AGE_SECS` | `3600`                           |
    /// | `SESSION_CLEANUP_SECS` | `3600`                           |
    /// | `SESSION_HTTP_ONLY`    | `true`                           |
    /// | `SESSION_SECURE`       | `false`                          |
    /// | `SESSION_SECRET`       | random per process               |
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source, see [`Config::from_env`].
    ///
    /// Both session durations must be positive and `SESSION_SECRET`, when given,
    /// must be at least 64 bytes long.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = SessionConfig::default();
        let key = match lookup("SESSION_SECRET") {
            Some(secret) => Key::try_from(secret.as_bytes()).map_err(|_| {
                Error::Config("SESSION_SECRET must be at least 64 bytes".to_string())
            })?,
            None => {
                tracing::warn!("SESSION_SECRET not set, sessions will not survive a restart");
                defaults.key.clone()
            }
        };

        let max_age = parse_var(&lookup, "SESSION_MAX_AGE_SECS", 3600i64)?;
        if max_age <= 0 {
            return Err(Error::Config(
                "SESSION_MAX_AGE_SECS must be greater than zero".to_string(),
            ));
        }
        let cleanup_secs = parse_var(&lookup, "SESSION_CLEANUP_SECS", 3600u64)?;
        if cleanup_secs == 0 {
            return Err(Error::Config(
                "SESSION_CLEANUP_SECS must be greater than zero".to_string(),
            ));
        }

        let session = SessionConfig {
            cookie_name: lookup("SESSION_COOKIE_NAME").unwrap_or(defaults.cookie_name),
            max_age: Duration::seconds(max_age),
            cleanup_interval: StdDuration::from_secs(cleanup_secs),
            http_only: parse_var(&lookup, "SESSION_HTTP_ONLY", defaults.http_only)?,
            secure: parse_var(&lookup, "SESSION_SECURE", defaults.secure)?,
            key,
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://chocolatechip.db?mode=rwc".to_string()),
            bind_addr: parse_var(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            session,
        })
    }
}

/// Session cookie and lifetime policy.
#[derive(Clone)]
pub struct SessionConfig {
    /// Name of the cookie carrying the signed session id.
    pub cookie_name: String,
    /// Cookie max-age, and how far every qualifying request pushes the expiry.
    pub max_age: Duration,
    /// Period of the background sweep removing expired rows.
    pub cleanup_interval: StdDuration,
    /// Hide the cookie from client-side script.
    pub http_only: bool,
    /// Only send the cookie over HTTPS.
    pub secure: bool,
    /// Signs the cookie value.
    pub key: Key,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            max_age: Duration::hours(1),
            cleanup_interval: StdDuration::from_secs(60 * 60),
            http_only: true,
            secure: false,
            key: Key::generate(),
        }
    }
}

impl SessionConfig {
    /// Sets the cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Sets the session lifetime. Must be positive.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Toggles the `HttpOnly` attribute.
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Toggles the `Secure` attribute.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the key signing the cookie.
    pub fn with_key(mut self, key: Key) -> Self {
        self.key = key;
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cookie_name", &self.cookie_name)
            .field("max_age", &self.max_age)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("http_only", &self.http_only)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        None => Ok(default),
    }
}
