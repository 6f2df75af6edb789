//! Device API data transfer objects.
//!
//! These mirror the JSON served by AxeOS at `/api/system/info` and accepted
//! at `PATCH /api/system`. Devices in the field run many firmware versions,
//! so every status field is optional on the wire: a missing or `null` value
//! reads as zero or empty. A payload that is not an object, or has a field of
//! the wrong type, fails as a whole.

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::BestDifficulty;

/// Status snapshot of one device.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    /// Current hash rate in GH/s.
    #[serde(default, deserialize_with = "null_as_default")]
    pub hash_rate: f64,
    /// ASIC temperature in °C.
    #[serde(default, deserialize_with = "null_as_default")]
    pub temp: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shares_accepted: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shares_rejected: u64,
    /// ASIC clock in MHz.
    #[serde(default, deserialize_with = "null_as_default")]
    pub frequency: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub small_core_count: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub asic_count: u32,
    /// Power draw in watts.
    #[serde(default, deserialize_with = "null_as_default")]
    pub power: f64,
    /// Input voltage in millivolts.
    #[serde(default, deserialize_with = "null_as_default")]
    pub voltage: f64,
    #[serde(rename = "ASICModel", default, deserialize_with = "null_as_default")]
    pub asic_model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hostname: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stratum_user: String,
    /// All-time best share difficulty.
    #[serde(default, deserialize_with = "null_as_default")]
    pub best_diff: BestDifficulty,
    /// Best share difficulty since boot.
    #[serde(default, deserialize_with = "null_as_default")]
    pub best_session_diff: BestDifficulty,
}

/// Writable device settings for `PATCH /api/system`.
///
/// Only fields that are set are sent; the device keeps the rest.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,
    /// Core voltage in millivolts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_voltage: Option<u32>,
    /// Manual fan duty cycle (0--100).
    #[serde(rename = "fanspeed", skip_serializing_if = "Option::is_none")]
    pub fan_speed: Option<u8>,
    /// Automatic fan control, sent as 0/1 like the device expects.
    #[serde(
        rename = "autofanspeed",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bool_as_int"
    )]
    pub auto_fan_speed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl DeviceSettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

mod bool_as_int {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<bool>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_u8(u8::from(*v)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(Option::<u8>::deserialize(d)?.map(|v| v != 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAMMA_INFO: &str = r#"{
        "power": 17.2,
        "voltage": 5062.5,
        "current": 3531.25,
        "temp": 58.5,
        "vrTemp": 49,
        "hashRate": 1105.3,
        "bestDiff": "4.29G",
        "bestSessionDiff": "81.2M",
        "coreVoltage": 1200,
        "hostname": "bitaxe-gamma",
        "sharesAccepted": 4113,
        "sharesRejected": 7,
        "uptimeSeconds": 86400,
        "ASICModel": "BM1370",
        "stratumUser": "bc1qexample.worker",
        "frequency": 525,
        "smallCoreCount": 2040,
        "asicCount": 1
    }"#;

    #[test]
    fn parses_device_info_payload() {
        let status: DeviceStatus = serde_json::from_str(GAMMA_INFO).unwrap();

        assert_eq!(status.hostname, "bitaxe-gamma");
        assert_eq!(status.asic_model, "BM1370");
        assert_eq!(status.shares_accepted, 4113);
        assert_eq!(status.small_core_count, 2040);
        assert!((status.hash_rate - 1105.3).abs() < 1e-9);
        assert!((status.best_diff.value() - 4.29e9).abs() < 1.0);
        assert!((status.best_session_diff.value() - 81.2e6).abs() < 1.0);
    }

    #[test]
    fn missing_and_null_fields_default() {
        let status: DeviceStatus =
            serde_json::from_str(r#"{"hashRate": 500.0, "temp": null, "hostname": null}"#).unwrap();

        assert_eq!(status.hash_rate, 500.0);
        assert_eq!(status.temp, 0.0);
        assert_eq!(status.hostname, "");
        assert_eq!(status.asic_count, 0);
        assert_eq!(status.best_diff.value(), 0.0);
    }

    #[test]
    fn numeric_best_diff_is_accepted() {
        let status: DeviceStatus = serde_json::from_str(r#"{"bestDiff": 1200000}"#).unwrap();
        assert_eq!(status.best_diff, BestDifficulty::Numeric(1_200_000.0));
    }

    #[test]
    fn wrong_field_type_fails_whole_payload() {
        assert!(serde_json::from_str::<DeviceStatus>(r#"{"hashRate": "fast"}"#).is_err());
        assert!(serde_json::from_str::<DeviceStatus>(r#"{"hostname": "cut"#).is_err());
        assert!(serde_json::from_str::<DeviceStatus>("42").is_err());
    }

    #[test]
    fn settings_patch_only_sends_set_fields() {
        let patch = DeviceSettingsPatch {
            frequency: Some(550),
            auto_fan_speed: Some(true),
            ..Default::default()
        };

        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"frequency": 550, "autofanspeed": 1}));
        assert!(!patch.is_empty());
        assert!(DeviceSettingsPatch::default().is_empty());
    }
}
