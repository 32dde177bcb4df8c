//! Connection parameters for remote databases.

use crate::error::{InsDbError, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const USERNAME_ENV: &str = "INSDB_USERNAME";
pub const PASSWORD_ENV: &str = "INSDB_PASSWORD";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// True when `location` names a server rather than a snapshot on disk.
pub fn is_remote_location(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub read_only: bool,
    /// Where `download` stores data file content; a temporary directory when unset.
    pub download_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            username: None,
            password: None,
            read_only: false,
            download_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Fills missing credentials from `INSDB_USERNAME` / `INSDB_PASSWORD`.
    pub fn with_env_fallback(self) -> Self {
        self.with_fallback(|key| std::env::var(key).ok())
    }

    pub fn with_fallback(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if self.username.is_none() {
            self.username = lookup(USERNAME_ENV);
        }
        if self.password.is_none() {
            self.password = lookup(PASSWORD_ENV);
        }
        self
    }

    /// Both credentials, or an authentication error naming what is missing.
    pub fn credentials(&self) -> Result<(&str, &str)> {
        let username = self.username.as_deref().ok_or_else(|| {
            InsDbError::Authentication(format!(
                "no username given (use --username or {USERNAME_ENV})"
            ))
        })?;
        let password = self.password.as_deref().ok_or_else(|| {
            InsDbError::Authentication(format!(
                "no password given (use --password or {PASSWORD_ENV})"
            ))
        })?;
        Ok((username, password))
    }
}
