//! Configuration types for the fundwatch system
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main fundwatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundwatchConfig {
    /// Fundraising service configuration
    pub service: ServiceConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Campaigns to poll
    pub campaigns: Vec<CampaignConfig>,

    /// Optional poller settings
    #[serde(default)]
    pub poller: PollerConfig,
}

impl FundwatchConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            service: ServiceConfig::default(),
            state_store: StateStoreConfig::default(),
            campaigns: Vec::new(),
            poller: PollerConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.campaigns.is_empty() {
            return Err(crate::Error::config("No campaigns configured"));
        }

        for campaign in &self.campaigns {
            campaign.validate()?;
        }

        self.service.validate()?;
        self.state_store.validate()?;
        self.poller.validate()?;

        Ok(())
    }
}

impl Default for FundwatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Fundraising service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceConfig {
    /// Tiltify public API
    Tiltify {
        /// OAuth access token
        access_token: String,
        /// API base URL override (defaults to the public endpoint)
        base_url: Option<String>,
    },

    /// Custom service
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ServiceConfig {
    /// Validate the service configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ServiceConfig::Tiltify {
                access_token,
                base_url,
            } => {
                if access_token.is_empty() {
                    return Err(crate::Error::config("Tiltify access token cannot be empty"));
                }
                if let Some(url) = base_url
                    && !url.starts_with("https://")
                    && !url.starts_with("http://")
                {
                    return Err(crate::Error::config(format!(
                        "Tiltify base URL must use HTTP or HTTPS scheme. Got: {}",
                        url
                    )));
                }
                Ok(())
            }
            ServiceConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom service factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom service config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the service type name
    pub fn type_name(&self) -> &str {
        match self {
            ServiceConfig::Tiltify { .. } => "tiltify",
            ServiceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig::Tiltify {
            access_token: String::new(),
            base_url: None,
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,

    /// Custom state store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("State file path cannot be empty"))
            }
            StateStoreConfig::Custom { factory, .. } if factory.is_empty() => {
                Err(crate::Error::config("Custom state store factory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Get the state store type name
    pub fn type_name(&self) -> &str {
        match self {
            StateStoreConfig::File { .. } => "file",
            StateStoreConfig::Memory => "memory",
            StateStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// A campaign to poll
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Campaign id on the fundraising platform
    pub id: String,

    /// Polling interval for this campaign (in seconds)
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,

    /// Whether this campaign is polled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl CampaignConfig {
    /// Create a new campaign configuration
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            polling_interval_secs: default_polling_interval_secs(),
            enabled: true,
        }
    }

    /// Set the polling interval
    pub fn with_polling_interval_secs(mut self, secs: u64) -> Self {
        self.polling_interval_secs = secs;
        self
    }

    /// Enable or disable the campaign
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Polling interval as a duration
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.id.trim().is_empty() {
            return Err(crate::Error::config("Campaign id cannot be empty"));
        }
        if self.polling_interval_secs == 0 {
            return Err(crate::Error::config(format!(
                "Polling interval for campaign {} must be > 0",
                self.id
            )));
        }
        Ok(())
    }
}

fn default_polling_interval_secs() -> u64 {
    15
}

fn default_enabled() -> bool {
    true
}

/// Poll scheduler and reconciler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Consecutive backoff attempts before a campaign is shut down
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential backoff (in milliseconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound of the backoff delay (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Donation matches are re-polled every `polling_interval × multiplier`
    #[serde(default = "default_donation_matches_polling_multiplier")]
    pub donation_matches_polling_multiplier: u32,

    /// Milestones are re-fetched every `polling_interval × multiplier`
    #[serde(default = "default_milestones_polling_multiplier")]
    pub milestones_polling_multiplier: u32,

    /// Keep at most this many processed donation ids per campaign
    ///
    /// `None` keeps every id. Pruning is safe only for ids older than the
    /// donation watermark, which the API no longer returns.
    #[serde(default)]
    pub max_tracked_donation_ids: Option<usize>,

    /// Capacity of the event channels
    ///
    /// A full domain event channel makes pollers wait for the consumer.
    /// Poller lifecycle events are dropped with a warning instead.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl PollerConfig {
    /// Validate the poller configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.initial_delay_ms == 0 {
            return Err(crate::Error::config("Initial backoff delay must be > 0"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(crate::Error::config(
                "Maximum backoff delay must not be below the initial delay",
            ));
        }
        if self.donation_matches_polling_multiplier == 0 || self.milestones_polling_multiplier == 0
        {
            return Err(crate::Error::config("Polling multipliers must be > 0"));
        }
        if self.max_tracked_donation_ids == Some(0) {
            return Err(crate::Error::config(
                "max_tracked_donation_ids must be > 0 when set",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Initial backoff delay as a duration
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Maximum backoff delay as a duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            donation_matches_polling_multiplier: default_donation_matches_polling_multiplier(),
            milestones_polling_multiplier: default_milestones_polling_multiplier(),
            max_tracked_donation_ids: None,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_max_retries() -> u32 {
    12
}

fn default_initial_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    900_000
}

fn default_donation_matches_polling_multiplier() -> u32 {
    4
}

fn default_milestones_polling_multiplier() -> u32 {
    20
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> FundwatchConfig {
        FundwatchConfig {
            service: ServiceConfig::Tiltify {
                access_token: "token".into(),
                base_url: None,
            },
            campaigns: vec![CampaignConfig::new("campaign-1")],
            ..FundwatchConfig::new()
        }
    }

    #[test]
    fn test_defaults() {
        let poller = PollerConfig::default();
        assert_eq!(poller.max_retries, 12);
        assert_eq!(poller.initial_delay(), Duration::from_millis(2_000));
        assert_eq!(poller.max_delay(), Duration::from_millis(900_000));
        assert!(poller.max_tracked_donation_ids.is_none());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_rejects_missing_campaigns_and_token() {
        let mut config = valid_config();
        config.campaigns.clear();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.service = ServiceConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_interval_and_bad_delays() {
        let mut config = valid_config();
        config.campaigns = vec![CampaignConfig::new("c").with_polling_interval_secs(0)];
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.poller.max_delay_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserializes_with_defaults() {
        let config: FundwatchConfig = serde_json::from_value(serde_json::json!({
            "service": {"type": "tiltify", "access_token": "abc", "base_url": null},
            "campaigns": [{"id": "c1"}]
        }))
        .unwrap();

        assert_eq!(config.campaigns[0].polling_interval_secs, 15);
        assert!(config.campaigns[0].enabled);
        assert_eq!(config.state_store.type_name(), "memory");
        assert_eq!(config.poller.donation_matches_polling_multiplier, 4);
    }
}
