use serde::Deserialize;

use crate::thresholds::{ThresholdSettings, TierSchedule};

/// Root engine configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `REWARDS_ENGINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub thresholds: ThresholdDefaults,
    #[serde(default)]
    pub cards: CardConfig,
    #[serde(default)]
    pub recalculation: RecalculationConfig,
    #[serde(default)]
    pub events: EventConfig,
}

/// Seed values for the first threshold snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdDefaults {
    #[serde(default = "default_standard_schedule")]
    pub standard: TierSchedule,
    #[serde(default = "default_early_schedule")]
    pub early_access: TierSchedule,
    #[serde(default)]
    pub early_access_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardConfig {
    #[serde(default = "default_number_prefix")]
    pub number_prefix: String,
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    #[serde(default = "default_listing_page_limit")]
    pub listing_page_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecalculationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Delay between commit and the first page, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_node_id() -> String {
    "rewards-01".to_string()
}
fn default_standard_schedule() -> TierSchedule {
    ThresholdSettings::default().standard
}
fn default_early_schedule() -> TierSchedule {
    ThresholdSettings::default().early_access
}
fn default_number_prefix() -> String {
    "TAJI".to_string()
}
fn default_validity_days() -> u32 {
    365
}
fn default_listing_page_limit() -> usize {
    10
}
fn default_page_size() -> usize {
    100
}
fn default_channel_capacity() -> usize {
    1024
}

impl ThresholdDefaults {
    pub fn settings(&self) -> ThresholdSettings {
        ThresholdSettings {
            standard: self.standard,
            early_access_enabled: self.early_access_enabled,
            early_access: self.early_access,
        }
    }
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            standard: default_standard_schedule(),
            early_access: default_early_schedule(),
            early_access_enabled: false,
        }
    }
}

impl Default for CardConfig {
    fn default() -> Self {
        Self {
            number_prefix: default_number_prefix(),
            validity_days: default_validity_days(),
            listing_page_limit: default_listing_page_limit(),
        }
    }
}

impl Default for RecalculationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            delay_ms: 0,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            thresholds: ThresholdDefaults::default(),
            cards: CardConfig::default(),
            recalculation: RecalculationConfig::default(),
            events: EventConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("REWARDS_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> crate::LoyaltyResult<()> {
        if self.recalculation.page_size == 0 {
            return Err(crate::LoyaltyError::Validation(
                "recalculation.page_size must be positive".into(),
            ));
        }
        if self.cards.number_prefix.trim().is_empty() {
            return Err(crate::LoyaltyError::Validation(
                "cards.number_prefix must not be empty".into(),
            ));
        }
        self.thresholds.settings().validate()
    }
}
