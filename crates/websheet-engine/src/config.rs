use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime switches of a sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetOptions {
    /// Show error messages in rendered output
    pub debug: bool,
    /// Evaluate every cell when an output table is requested
    pub eager_eval: bool,
    pub admin_user: String,
    /// The admin can read every cell (permissions are still evaluated)
    pub admin_override: bool,
    /// Deliver mail through the configured mailer instead of logging it
    pub send_mail: bool,
    pub mail_sender: String,
    /// Seconds between time-trigger polls
    pub poll_interval_secs: u64,
}

impl Default for SheetOptions {
    fn default() -> Self {
        Self {
            debug: false,
            eager_eval: true,
            admin_user: "admin".to_string(),
            admin_override: true,
            send_mail: false,
            mail_sender: "websheets@localhost".to_string(),
            poll_interval_secs: 10,
        }
    }
}

impl SheetOptions {
    /// Load options from `WEBSHEET_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let flag = |key: &'static str, default: bool| match lookup(key) {
            None => Ok(default),
            Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid { key, value }),
        };

        let poll_interval_secs = match lookup("WEBSHEET_POLL_INTERVAL") {
            None => defaults.poll_interval_secs,
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "WEBSHEET_POLL_INTERVAL",
                value,
            })?,
        };

        Ok(Self {
            debug: flag("WEBSHEET_DEBUG", defaults.debug)?,
            eager_eval: flag("WEBSHEET_EAGER_EVAL", defaults.eager_eval)?,
            admin_user: lookup("WEBSHEET_ADMIN").unwrap_or(defaults.admin_user),
            admin_override: flag("WEBSHEET_ADMIN_OVERRIDE", defaults.admin_override)?,
            send_mail: flag("WEBSHEET_SEND_MAIL", defaults.send_mail)?,
            mail_sender: lookup("WEBSHEET_MAIL_SENDER").unwrap_or(defaults.mail_sender),
            poll_interval_secs,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
