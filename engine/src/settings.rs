//! Typed engine settings backed by the synced storage namespace.
//!
//! Settings are loaded once at startup, merged per-key over hardcoded
//! defaults (stored keys win, missing keys keep their defaults), and replaced
//! wholesale when a settings-changed notification arrives. Malformed stored
//! values are normalized silently: an unrecognized value keeps its default,
//! and a non-list `excludedDomains` is coerced to an empty list.
//!
//! The stored document lives under the `"autoCloseSettings"` key in the
//! synced namespace, with camelCase field names:
//!
//! ```json
//! {
//!   "enabled": true,
//!   "thresholdValue": 30,
//!   "thresholdUnit": "minutes",
//!   "excludedDomains": ["*.example.com"],
//!   "excludePinned": true,
//!   "debugMode": false,
//!   "downtimePolicy": "absolute"
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::host::{Namespace, StateStore};

/// Storage key for the settings document in the synced namespace.
pub const SETTINGS_KEY: &str = "autoCloseSettings";

/// Unit for the inactivity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl ThresholdUnit {
    /// Milliseconds per unit.
    #[must_use]
    pub fn multiplier_ms(self) -> i64 {
        match self {
            Self::Seconds => 1_000,
            Self::Minutes => 60 * 1_000,
            Self::Hours => 60 * 60 * 1_000,
            Self::Days => 24 * 60 * 60 * 1_000,
        }
    }
}

/// Policy for reconciling inactivity accrued while the process was down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DowntimePolicy {
    /// The threshold is absolute: tabs that overshot it during downtime are
    /// closed retroactively at startup.
    Absolute,
    /// Overshot timers are re-armed to a full fresh threshold at startup;
    /// reconciliation never closes tabs under this policy.
    Continue,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Master switch; when false the sweep is a no-op.
    pub enabled: bool,

    /// Inactivity threshold magnitude, interpreted per [`Self::threshold_unit`].
    pub threshold_value: i64,

    /// Unit for [`Self::threshold_value`].
    pub threshold_unit: ThresholdUnit,

    /// Domain exclusion patterns, evaluated by [`crate::domains::is_excluded`].
    #[serde(deserialize_with = "lenient_string_list")]
    pub excluded_domains: Vec<String>,

    /// Whether pinned tabs are exempt from auto-close.
    pub exclude_pinned: bool,

    /// Enables per-tab diagnostic output.
    pub debug_mode: bool,

    /// How missed time during process downtime is reconciled.
    pub downtime_policy: DowntimePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_value: 30,
            threshold_unit: ThresholdUnit::Minutes,
            excluded_domains: Vec::new(),
            exclude_pinned: true,
            debug_mode: false,
            downtime_policy: DowntimePolicy::Absolute,
        }
    }
}

impl Settings {
    /// Loads settings from the synced namespace.
    ///
    /// A missing document or an unavailable store degrades to defaults; the
    /// engine must be able to start while storage is temporarily down.
    pub async fn load<S: StateStore>(store: &S) -> Self {
        match store.get(Namespace::Synced, SETTINGS_KEY).await {
            Ok(Some(value)) => {
                let settings = Self::from_value(value);
                info!(?settings, "settings loaded");
                settings
            }
            Ok(None) => {
                info!("no stored settings found, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(error = %e, "settings unavailable, falling back to defaults");
                Self::default()
            }
        }
    }

    /// Merges a stored settings document over the defaults.
    ///
    /// Each recognized key overrides its default independently; a key whose
    /// value has the wrong shape keeps the default. This is also the path
    /// taken by settings-changed notifications, which deliver the full new
    /// document.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let mut settings = Self::default();

        let Value::Object(map) = value else {
            warn!("stored settings are not an object, using defaults");
            return settings;
        };

        if let Some(v) = map.get("enabled") {
            match v.as_bool() {
                Some(b) => settings.enabled = b,
                None => warn!("ignoring malformed enabled value"),
            }
        }
        if let Some(v) = map.get("thresholdValue") {
            match v.as_i64() {
                Some(n) => settings.threshold_value = n,
                None => warn!("ignoring malformed thresholdValue"),
            }
        }
        if let Some(v) = map.get("thresholdUnit") {
            match serde_json::from_value::<ThresholdUnit>(v.clone()) {
                Ok(unit) => settings.threshold_unit = unit,
                Err(_) => warn!(value = %v, "ignoring unrecognized thresholdUnit"),
            }
        }
        if let Some(v) = map.get("excludedDomains") {
            settings.excluded_domains = coerce_string_list(v);
        }
        if let Some(v) = map.get("excludePinned") {
            match v.as_bool() {
                Some(b) => settings.exclude_pinned = b,
                None => warn!("ignoring malformed excludePinned value"),
            }
        }
        if let Some(v) = map.get("debugMode") {
            match v.as_bool() {
                Some(b) => settings.debug_mode = b,
                None => warn!("ignoring malformed debugMode value"),
            }
        }
        if let Some(v) = map.get("downtimePolicy") {
            match serde_json::from_value::<DowntimePolicy>(v.clone()) {
                Ok(policy) => settings.downtime_policy = policy,
                Err(_) => warn!(value = %v, "ignoring unrecognized downtimePolicy"),
            }
        }

        settings
    }

    /// The inactivity threshold in milliseconds.
    ///
    /// Integer arithmetic throughout; no rounding.
    #[must_use]
    pub fn threshold_ms(&self) -> i64 {
        self.threshold_value.saturating_mul(self.threshold_unit.multiplier_ms())
    }
}

/// Coerces a stored value into a list of strings.
///
/// Non-list values become the empty list; non-string elements are dropped.
fn coerce_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_owned))
            .collect(),
        _ => {
            warn!("excludedDomains is not a list, coercing to empty");
            Vec::new()
        }
    }
}

/// Deserializer for `excluded_domains` honoring the list invariant.
fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_string_list(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::store::MemoryStore;

    #[test]
    fn defaults_match_shipping_configuration() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert_eq!(settings.threshold_value, 30);
        assert_eq!(settings.threshold_unit, ThresholdUnit::Minutes);
        assert!(settings.excluded_domains.is_empty());
        assert!(settings.exclude_pinned);
        assert!(!settings.debug_mode);
        assert_eq!(settings.downtime_policy, DowntimePolicy::Absolute);
    }

    #[test]
    fn from_value_merges_stored_keys_over_defaults() {
        let settings = Settings::from_value(json!({
            "thresholdValue": 10,
            "thresholdUnit": "seconds",
            "excludedDomains": ["example.com"]
        }));

        assert_eq!(settings.threshold_value, 10);
        assert_eq!(settings.threshold_unit, ThresholdUnit::Seconds);
        assert_eq!(settings.excluded_domains, vec!["example.com".to_string()]);
        // Missing keys keep defaults.
        assert!(settings.enabled);
        assert!(settings.exclude_pinned);
        assert_eq!(settings.downtime_policy, DowntimePolicy::Absolute);
    }

    #[test]
    fn from_value_coerces_non_list_excluded_domains() {
        let settings = Settings::from_value(json!({"excludedDomains": "not-a-list"}));
        assert!(settings.excluded_domains.is_empty());

        let settings = Settings::from_value(json!({"excludedDomains": 42}));
        assert!(settings.excluded_domains.is_empty());
    }

    #[test]
    fn from_value_drops_non_string_list_elements() {
        let settings =
            Settings::from_value(json!({"excludedDomains": ["a.com", 1, null, "b.com"]}));
        assert_eq!(
            settings.excluded_domains,
            vec!["a.com".to_string(), "b.com".to_string()]
        );
    }

    #[test]
    fn from_value_keeps_defaults_for_malformed_keys() {
        let settings = Settings::from_value(json!({
            "enabled": "yes",
            "thresholdValue": "soon",
            "thresholdUnit": "fortnights",
            "downtimePolicy": 7
        }));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn from_value_tolerates_non_object() {
        assert_eq!(Settings::from_value(json!([1, 2, 3])), Settings::default());
        assert_eq!(Settings::from_value(json!(null)), Settings::default());
    }

    #[test]
    fn threshold_ms_uses_unit_multiplier() {
        let mut settings = Settings::default();
        settings.threshold_value = 10;

        settings.threshold_unit = ThresholdUnit::Seconds;
        assert_eq!(settings.threshold_ms(), 10_000);

        settings.threshold_unit = ThresholdUnit::Minutes;
        assert_eq!(settings.threshold_ms(), 600_000);

        settings.threshold_unit = ThresholdUnit::Hours;
        assert_eq!(settings.threshold_ms(), 36_000_000);

        settings.threshold_unit = ThresholdUnit::Days;
        assert_eq!(settings.threshold_ms(), 864_000_000);
    }

    #[test]
    fn settings_serialize_with_camel_case_fields() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(value["thresholdValue"], 30);
        assert_eq!(value["thresholdUnit"], "minutes");
        assert_eq!(value["excludePinned"], true);
        assert_eq!(value["downtimePolicy"], "absolute");
        assert!(value.get("threshold_value").is_none());
    }

    #[test]
    fn settings_deserialize_coerces_excluded_domains() {
        let settings: Settings =
            serde_json::from_value(json!({"excludedDomains": {"nested": true}})).unwrap();
        assert!(settings.excluded_domains.is_empty());
    }

    #[tokio::test]
    async fn load_returns_stored_settings() {
        let store = MemoryStore::new();
        store
            .seed(Namespace::Synced, SETTINGS_KEY, json!({"enabled": false}))
            .await;

        let settings = Settings::load(&store).await;
        assert!(!settings.enabled);
    }

    #[tokio::test]
    async fn load_falls_back_to_defaults_when_missing() {
        let store = MemoryStore::new();
        let settings = Settings::load(&store).await;
        assert_eq!(settings, Settings::default());
    }
}
