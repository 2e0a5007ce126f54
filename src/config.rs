use crate::TouchpointError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Key of the referrer field in the attribution record
pub const REFERRER_KEY: &str = "referrer";

/// Value stored in the referrer field when no external referrer is known
pub const DIRECT: &str = "direct";

/// Longest cookie lifetime browsers honour
pub const MAX_LIFETIME_DAYS: f64 = 400.0;

const INTERNAL_PREFIX: &str = "int_";

/// Family an attribution field belongs to, derived from its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFamily {
    Utm,
    Internal,
    Referrer,
}

impl FieldFamily {
    pub fn of(key: &str) -> Self {
        if key == REFERRER_KEY {
            FieldFamily::Referrer
        } else if key.starts_with(INTERNAL_PREFIX) {
            FieldFamily::Internal
        } else {
            FieldFamily::Utm
        }
    }
}

/// Preset attribution rule sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Variant {
    Standard,
    Extended,
    LongRetention,
}

impl Variant {
    pub fn config(self) -> AttributionConfig {
        match self {
            Variant::Standard => AttributionConfig::standard(),
            Variant::Extended => AttributionConfig::extended(),
            Variant::LongRetention => AttributionConfig::long_retention(),
        }
    }
}

/// Rules the attribution engine runs with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionConfig {
    pub fields: Vec<String>,
    pub first_touch_prefix: String,
    pub last_touch_prefix: String,
    pub retention_days: f64,
    pub paid_mediums: Vec<String>,
    pub paid_override_fields: Vec<String>,
    pub internal_tracking: bool,
    pub session_key: String,
    pub session_ttl_days: f64,
    /// Hosts (with port) where forms are written directly instead of
    /// waiting for the form library
    #[serde(default)]
    pub direct_populate_hosts: Vec<String>,
}

impl AttributionConfig {
    /// UTM fields with the cpc/psm/web paid allow-list and 30 day retention
    pub fn standard() -> Self {
        Self {
            fields: strings(&["utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content"]),
            first_touch_prefix: "__ft_".to_string(),
            last_touch_prefix: "__lt_".to_string(),
            retention_days: 30.0,
            paid_mediums: strings(&["cpc", "psm", "web"]),
            paid_override_fields: strings(&["utm_medium", "utm_source", "utm_campaign", "utm_term", "utm_content"]),
            internal_tracking: false,
            session_key: "__utm_tracking_session".to_string(),
            session_ttl_days: 1.0 / 48.0,
            direct_populate_hosts: strings(&["127.0.0.1:8080"]),
        }
    }

    /// Adds `utm_adgroup`, the internal-tracking family and the extra paid mediums
    pub fn extended() -> Self {
        Self {
            fields: strings(&[
                "utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content", "utm_adgroup",
                "int_medium", "int_source", "int_campaign", "int_adgroup", "int_content",
            ]),
            paid_mediums: strings(&["cpc", "psm", "web", "csy", "dml", "rdk"]),
            paid_override_fields: strings(&[
                "utm_medium", "utm_source", "utm_campaign", "utm_term", "utm_content", "utm_adgroup",
            ]),
            internal_tracking: true,
            ..Self::standard()
        }
    }

    /// Standard rules with a 180 day retention window
    pub fn long_retention() -> Self {
        Self {
            retention_days: 180.0,
            ..Self::standard()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, TouchpointError> {
        let raw = fs::read_to_string(path)?;
        let config: AttributionConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TouchpointError> {
        if self.fields.is_empty() {
            return Err(TouchpointError::Config("fields must not be empty".to_string()));
        }
        if self.first_touch_prefix.is_empty() || self.last_touch_prefix.is_empty() {
            return Err(TouchpointError::Config("cookie prefixes must not be empty".to_string()));
        }
        if self.first_touch_prefix == self.last_touch_prefix {
            return Err(TouchpointError::Config(format!(
                "first and last touch prefixes must differ (both {:?})",
                self.first_touch_prefix
            )));
        }
        for (name, days) in [("retention_days", self.retention_days), ("session_ttl_days", self.session_ttl_days)] {
            if !(days > 0.0 && days <= MAX_LIFETIME_DAYS) {
                return Err(TouchpointError::Config(format!(
                    "{} must be in (0, {}], got {}",
                    name, MAX_LIFETIME_DAYS, days
                )));
            }
        }
        if self.session_key.is_empty() {
            return Err(TouchpointError::Config("session_key must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn first_touch_key(&self, field: &str) -> String {
        format!("{}{}", self.first_touch_prefix, field)
    }

    pub fn last_touch_key(&self, field: &str) -> String {
        format!("{}{}", self.last_touch_prefix, field)
    }

    pub fn fields_in(&self, family: FieldFamily) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .map(String::as_str)
            .filter(move |key| FieldFamily::of(key) == family)
    }

    /// Every field persisted in the record, referrer last
    pub fn record_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str).chain(std::iter::once(REFERRER_KEY))
    }

    pub fn is_paid_medium(&self, medium: &str) -> bool {
        self.paid_mediums.iter().any(|m| m == medium)
    }
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self::standard()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
