//! Client configuration
//!
//! Loaded from TOML, with every field defaulted so an empty file (or no
//! file at all) yields a working local setup.
//!
//! ```toml
//! api_base_url = "https://sign.example.com/api"
//! request_timeout_ms = 30000
//! submit_timeout_base_ms = 60000
//! submit_timeout_per_document_ms = 30000
//! progress_tick_ms = 1500
//! release_grace_ms = 500
//! completion_delay_ms = 1500
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `api_base_url`
pub const ENV_API_URL: &str = "DOCSIGN_API_URL";
/// Environment variable overriding `api_token`
pub const ENV_API_TOKEN: &str = "DOCSIGN_API_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST base URL, without trailing slash
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,
    /// Timeout for ordinary requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Fixed part of the batch submission timeout
    #[serde(default = "default_submit_timeout_base_ms")]
    pub submit_timeout_base_ms: u64,
    /// Per-document part of the batch submission timeout
    #[serde(default = "default_submit_timeout_per_document_ms")]
    pub submit_timeout_per_document_ms: u64,
    /// Interval of the cosmetic progress ticker
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
    /// Ticker cap, as a fraction of the document count
    #[serde(default = "default_progress_ceiling")]
    pub progress_ceiling: f64,
    /// Delay before a replaced document handle is released
    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,
    /// Delay between completion and the completion side effect
    #[serde(default = "default_completion_delay_ms")]
    pub completion_delay_ms: u64,
    /// Health check interval for `PollingConnectivity`
    #[serde(default = "default_connectivity_poll_ms")]
    pub connectivity_poll_ms: u64,
    /// Sent as `displayQrCode` on every signature
    #[serde(default)]
    pub display_qr_code: bool,
}

fn default_api_base_url() -> String {
    "http://localhost:3001/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_submit_timeout_base_ms() -> u64 {
    60_000
}

fn default_submit_timeout_per_document_ms() -> u64 {
    30_000
}

fn default_progress_tick_ms() -> u64 {
    1_500
}

fn default_progress_ceiling() -> f64 {
    0.9
}

fn default_release_grace_ms() -> u64 {
    500
}

fn default_completion_delay_ms() -> u64 {
    1_500
}

fn default_connectivity_poll_ms() -> u64 {
    5_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            submit_timeout_base_ms: default_submit_timeout_base_ms(),
            submit_timeout_per_document_ms: default_submit_timeout_per_document_ms(),
            progress_tick_ms: default_progress_tick_ms(),
            progress_ceiling: default_progress_ceiling(),
            release_grace_ms: default_release_grace_ms(),
            completion_delay_ms: default_completion_delay_ms(),
            connectivity_poll_ms: default_connectivity_poll_ms(),
            display_qr_code: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the TOML is malformed
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DOCSIGN_API_URL` / `DOCSIGN_API_TOKEN` overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.is_empty() {
                self.api_base_url = url;
            }
        }
        if let Ok(token) = std::env::var(ENV_API_TOKEN) {
            if !token.is_empty() {
                self.api_token = Some(token);
            }
        }
        self
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(self.progress_ceiling > 0.0 && self.progress_ceiling < 1.0) {
            anyhow::bail!(
                "progress_ceiling must be between 0 and 1 (got {})",
                self.progress_ceiling
            );
        }
        if self.progress_tick_ms == 0 {
            anyhow::bail!("progress_tick_ms must be positive");
        }
        if self.connectivity_poll_ms == 0 {
            anyhow::bail!("connectivity_poll_ms must be positive");
        }
        Ok(())
    }

    /// Base URL with any trailing slash removed
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Timeout for the batch submission of `document_count` documents
    pub fn submit_timeout(&self, document_count: usize) -> Duration {
        let per_doc = self
            .submit_timeout_per_document_ms
            .saturating_mul(document_count as u64);
        Duration::from_millis(self.submit_timeout_base_ms.saturating_add(per_doc))
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms)
    }

    pub fn release_grace(&self) -> Duration {
        Duration::from_millis(self.release_grace_ms)
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    pub fn connectivity_poll(&self) -> Duration {
        Duration::from_millis(self.connectivity_poll_ms)
    }
}
