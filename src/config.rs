use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::info;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Settings supplied by whoever composes the client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public Firebase Web API key
    pub firebase_api_key: String,
    pub project_id: String,
    pub cloudinary_cloud_name: Option<String>,
    /// Unsigned upload preset for avatar images
    pub cloudinary_upload_preset: Option<String>,
    /// Emails granted admin rights when their account is created
    pub admin_emails: Vec<String>,
    /// How often subscriptions re-read their target
    pub poll_interval: Duration,
}

impl Config {
    pub fn new(firebase_api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            firebase_api_key: firebase_api_key.into(),
            project_id: project_id.into(),
            cloudinary_cloud_name: None,
            cloudinary_upload_preset: None,
            admin_emails: Vec::new(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn with_cloudinary(mut self, cloud_name: &str, upload_preset: &str) -> Self {
        self.cloudinary_cloud_name = Some(cloud_name.to_string());
        self.cloudinary_upload_preset = Some(upload_preset.to_string());
        self
    }

    pub fn with_admin_emails<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_emails = emails.into_iter().map(Into::into).collect();
        self
    }

    /// Read `SAVORELLA_*` variables, loading a `.env` file first if present.
    ///
    /// `SAVORELLA_FIREBASE_API_KEY` and `SAVORELLA_PROJECT_ID` are required.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::new(
            required("SAVORELLA_FIREBASE_API_KEY")?,
            required("SAVORELLA_PROJECT_ID")?,
        );
        config.cloudinary_cloud_name = optional("SAVORELLA_CLOUDINARY_CLOUD");
        config.cloudinary_upload_preset = optional("SAVORELLA_CLOUDINARY_PRESET");
        config.admin_emails = optional("SAVORELLA_ADMIN_EMAILS")
            .map(|list| parse_list(&list))
            .unwrap_or_default();
        if let Some(ms) = optional("SAVORELLA_POLL_INTERVAL_MS") {
            config.poll_interval = parse_poll_interval(&ms)?;
        } else {
            info!(
                "SAVORELLA_POLL_INTERVAL_MS not set, using default: {}",
                DEFAULT_POLL_INTERVAL_MS
            );
        }
        Ok(config)
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails
            .iter()
            .any(|e| e.eq_ignore_ascii_case(email.trim()))
    }
}

fn required(key: &str) -> Result<String> {
    optional(key).ok_or_else(|| anyhow!("{} must be set", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Milliseconds between polls; zero is rejected.
fn parse_poll_interval(ms: &str) -> Result<Duration> {
    let parsed: u64 = ms
        .parse()
        .map_err(|e| anyhow!("invalid SAVORELLA_POLL_INTERVAL_MS {:?}: {}", ms, e))?;
    if parsed == 0 {
        return Err(anyhow!("SAVORELLA_POLL_INTERVAL_MS must be greater than zero"));
    }
    Ok(Duration::from_millis(parsed))
}

fn parse_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
