//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::filter::AttachmentFilter;

/// Default poll interval: 5 minutes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_INBOX: &str = "INBOX";
pub const DEFAULT_DONE_FOLDER: &str = "done";
pub const DEFAULT_UPLOAD_URL: &str = "https://api.lexoffice.io/v1/files";

/// IMAP connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    /// Folder scanned each cycle.
    pub inbox: String,
    /// Folder processed messages are moved into.
    pub done_folder: String,
}

/// Upload API settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub url: String,
    pub api_key: SecretString,
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub mailbox: MailboxConfig,
    pub upload: UploadConfig,
    pub poll_interval: Duration,
    pub filter: AttachmentFilter,
}

impl Config {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// Blank values count as missing. The host, user, password and API key
    /// are required; everything else falls back to a default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require =
            |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()));

        let host = require("IMAP_SERVER")?;
        let user = require("IMAP_USER")?;
        let password = require("IMAP_PASSWORD")?;
        let api_key = require("LEXOFFICE_API_KEY")?;

        let port = match get("IMAP_PORT") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "IMAP_PORT".into(),
                message: format!("{raw:?}: {e}"),
            })?,
            None => DEFAULT_IMAP_PORT,
        };

        let poll_interval = get("POLL_INTERVAL_MINUTES")
            .and_then(|s| parse_minutes(&s))
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let extra_patterns: Vec<String> = get("ATTACHMENT_IGNORE_PATTERNS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let filter = AttachmentFilter::with_defaults_and(&extra_patterns)?;

        Ok(Self {
            mailbox: MailboxConfig {
                host,
                port,
                user,
                password: SecretString::from(password),
                inbox: get("IMAP_INBOX").unwrap_or_else(|| DEFAULT_INBOX.to_string()),
                done_folder: get("IMAP_DONE_FOLDER")
                    .unwrap_or_else(|| DEFAULT_DONE_FOLDER.to_string()),
            },
            upload: UploadConfig {
                url: get("LEXOFFICE_API_URL").unwrap_or_else(|| DEFAULT_UPLOAD_URL.to_string()),
                api_key: SecretString::from(api_key),
            },
            poll_interval,
            filter,
        })
    }
}

/// Fractional minutes (`"1.5"` is 90 s). `None` for non-positive,
/// non-finite or out-of-range values.
fn parse_minutes(raw: &str) -> Option<Duration> {
    let mins = raw.parse::<f64>().ok().filter(|m| m.is_finite() && *m > 0.0)?;
    Duration::try_from_secs_f64(mins * 60.0)
        .ok()
        .filter(|d| !d.is_zero())
}
