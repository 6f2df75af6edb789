//! User preferences persisted next to the device list.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::storage::{KeyValueStore, keys};
use crate::tracing::prelude::*;

/// Theme applied when none has been chosen.
pub const DEFAULT_THEME: &str = "dark";

/// Theme names a presentation layer is expected to know.
pub const THEMES: &[&str] = &[
    "dark",
    "light",
    "cupcake",
    "bumblebee",
    "emerald",
    "corporate",
    "synthwave",
    "retro",
    "cyberpunk",
    "valentine",
    "halloween",
    "garden",
    "forest",
    "aqua",
    "lofi",
    "pastel",
    "fantasy",
    "wireframe",
    "black",
    "luxury",
    "dracula",
    "cmyk",
    "autumn",
    "business",
    "acid",
    "lemonade",
    "night",
    "coffee",
    "winter",
    "dim",
    "nord",
    "sunset",
];

/// Optional columns of the device table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum Column {
    Address,
    AsicModel,
    BestDiff,
    HashRate,
    Temp,
    Frequency,
    Voltage,
    Power,
}

impl Column {
    pub fn visible_by_default(self) -> bool {
        !matches!(self, Column::AsicModel)
    }

    pub fn title(self) -> &'static str {
        match self {
            Column::Address => "Address",
            Column::AsicModel => "ASIC",
            Column::BestDiff => "Best Diff",
            Column::HashRate => "Hash Rate",
            Column::Temp => "Temp",
            Column::Frequency => "Freq",
            Column::Voltage => "Voltage",
            Column::Power => "Power",
        }
    }
}

/// Read and write persisted preferences.
#[derive(Clone)]
pub struct Settings {
    store: Arc<dyn KeyValueStore>,
    default_interval: Duration,
    min_interval: Duration,
}

impl Settings {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &MonitorConfig) -> Self {
        Self {
            store,
            default_interval: config.default_refresh_interval,
            min_interval: config.min_refresh_interval,
        }
    }

    /// Stored refresh interval, or the default when nothing valid is stored.
    pub fn refresh_interval(&self) -> Duration {
        let Some(raw) = self.store.get(keys::REFRESH_INTERVAL) else {
            return self.default_interval;
        };
        match raw.trim().parse::<u64>().map(Duration::from_millis) {
            Ok(interval) if interval >= self.min_interval => interval,
            _ => {
                warn!(value = %raw, "Ignoring invalid stored refresh interval");
                self.default_interval
            }
        }
    }

    pub fn set_refresh_interval(&self, interval: Duration) -> Result<()> {
        if interval < self.min_interval {
            return Err(Error::InvalidSetting(format!(
                "refresh interval must be at least {}s",
                self.min_interval.as_secs_f64()
            )));
        }
        self.store
            .set(keys::REFRESH_INTERVAL, &interval.as_millis().to_string())
    }

    /// Visible columns, in table order.
    pub fn visible_columns(&self) -> BTreeSet<Column> {
        let stored = self
            .store
            .get(keys::VISIBLE_COLUMNS)
            .and_then(|json| match serde_json::from_str::<BTreeSet<Column>>(&json) {
                Ok(columns) => Some(columns),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable column settings");
                    None
                }
            });

        stored.unwrap_or_else(|| Column::iter().filter(|c| c.visible_by_default()).collect())
    }

    pub fn set_column_visible(&self, column: Column, visible: bool) -> Result<()> {
        let mut columns = self.visible_columns();
        if visible {
            columns.insert(column);
        } else {
            columns.remove(&column);
        }
        let json = serde_json::to_string(&columns)?;
        self.store.set(keys::VISIBLE_COLUMNS, &json)
    }

    pub fn theme(&self) -> String {
        self.store
            .get(keys::THEME)
            .unwrap_or_else(|| DEFAULT_THEME.to_string())
    }

    pub fn set_theme(&self, theme: &str) -> Result<()> {
        let theme = theme.trim();
        if !THEMES.contains(&theme) {
            return Err(Error::InvalidSetting(format!("unknown theme `{theme}`")));
        }
        self.store.set(keys::THEME, theme)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::storage::MemoryStore;

    fn settings() -> (Settings, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Settings::new(store.clone(), &MonitorConfig::default()), store)
    }

    #[test]
    fn refresh_interval_defaults_and_persists() {
        let (settings, store) = settings();
        assert_eq!(settings.refresh_interval(), Duration::from_secs(10));

        settings
            .set_refresh_interval(Duration::from_secs(30))
            .unwrap();
        assert_eq!(settings.refresh_interval(), Duration::from_secs(30));
        assert_eq!(store.get(keys::REFRESH_INTERVAL).as_deref(), Some("30000"));
    }

    #[test]
    fn refresh_interval_below_minimum_is_rejected() {
        let (settings, _) = settings();
        let err = settings
            .set_refresh_interval(Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSetting(_)));
        assert_eq!(settings.refresh_interval(), Duration::from_secs(10));
    }

    #[test_case("abc" ; "not a number")]
    #[test_case("200" ; "below minimum")]
    fn bad_stored_interval_falls_back_to_default(raw: &str) {
        let (settings, store) = settings();
        store.set(keys::REFRESH_INTERVAL, raw).unwrap();
        assert_eq!(settings.refresh_interval(), Duration::from_secs(10));
    }

    #[test]
    fn asic_model_column_is_hidden_by_default() {
        let (settings, _) = settings();
        let visible = settings.visible_columns();
        assert!(!visible.contains(&Column::AsicModel));
        assert_eq!(visible.len(), 7);
    }

    #[test]
    fn column_visibility_round_trips() {
        let (settings, _) = settings();
        settings.set_column_visible(Column::AsicModel, true).unwrap();
        settings.set_column_visible(Column::Voltage, false).unwrap();

        let visible = settings.visible_columns();
        assert!(visible.contains(&Column::AsicModel));
        assert!(!visible.contains(&Column::Voltage));
    }

    #[test_case("hash-rate", Column::HashRate)]
    #[test_case("ASIC-MODEL", Column::AsicModel)]
    #[test_case("best-diff", Column::BestDiff)]
    fn column_names_parse(name: &str, expected: Column) {
        assert_eq!(name.parse::<Column>().unwrap(), expected);
    }

    #[test]
    fn theme_defaults_to_dark_and_rejects_unknown_names() {
        let (settings, _) = settings();
        assert_eq!(settings.theme(), "dark");

        settings.set_theme("nord").unwrap();
        assert_eq!(settings.theme(), "nord");

        assert!(settings.set_theme("neon-pink").is_err());
        assert_eq!(settings.theme(), "nord");
    }
}
