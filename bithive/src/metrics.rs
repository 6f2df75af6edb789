//! Metrics derived from a device's reported status.
//!
//! Hash rates are in GH/s throughout, matching what AxeOS reports.

/// Temperature at which a device is flagged for attention (°C).
pub const TEMP_CAUTION_C: f64 = 62.0;

/// Temperature at which a device is considered overheating (°C).
pub const TEMP_OVERHEAT_C: f64 = 68.0;

/// Hash rate a device should produce at its configured clock, in GH/s.
///
/// Each small core completes one hash per clock cycle, so the nominal rate
/// is `frequency × cores per chip × chips`, scaled from MH/s to GH/s.
pub fn expected_hashrate(frequency_mhz: f64, small_core_count: u32, asic_count: u32) -> f64 {
    frequency_mhz * f64::from(small_core_count) * f64::from(asic_count) / 1000.0
}

/// Energy per terahash in J/TH, or `None` without a positive hash rate.
pub fn efficiency_j_per_th(power_w: f64, hashrate_gh: f64) -> Option<f64> {
    (hashrate_gh > 0.0).then(|| power_w / hashrate_gh * 1000.0)
}

/// Share of accepted shares as a percentage, or `None` before any share.
pub fn acceptance_percent(accepted: u64, rejected: u64) -> Option<f64> {
    let total = accepted + rejected;
    (total > 0).then(|| accepted as f64 / total as f64 * 100.0)
}

/// Render a GH/s value as TH/s with two decimals.
pub fn format_hashrate_th(hashrate_gh: f64) -> String {
    format!("{:.2} TH/s", hashrate_gh / 1000.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureStatus {
    Healthy,
    Caution,
    Overheating,
}

impl TemperatureStatus {
    pub fn classify(temp_c: f64) -> Self {
        if temp_c >= TEMP_OVERHEAT_C {
            TemperatureStatus::Overheating
        } else if temp_c >= TEMP_CAUTION_C {
            TemperatureStatus::Caution
        } else {
            TemperatureStatus::Healthy
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TemperatureStatus::Healthy => "Healthy",
            TemperatureStatus::Caution => "Caution",
            TemperatureStatus::Overheating => "Warning: Overheating",
        }
    }
}
