//! Folding one settled poll cycle into a fleet snapshot.

use serde::Serialize;

use crate::api_client::types::DeviceStatus;
use crate::metrics::expected_hashrate;
use crate::poller::DevicePoll;
use crate::tracing::prelude::*;
use crate::types::{ErrorLatch, LatchStatus};

/// Fleet-wide totals for one cycle.
///
/// Additive fields are sums over the devices that returned data.
/// `temp`, `small_core_count` and `asic_count` are means over those same
/// devices, not over the whole registry.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    /// Total hash rate in GH/s; `None` when no device returned data.
    pub hash_rate: Option<f64>,
    pub best_diff: f64,
    pub best_session_diff: f64,
    pub temp: f64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub frequency: f64,
    pub small_core_count: f64,
    pub asic_count: f64,
    pub power: f64,
    pub asic_model: String,
    pub hostname: String,
    pub stratum_user: String,
}

/// One device's line in the fleet table.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRow {
    pub address: String,
    pub status: Option<DeviceStatus>,
    pub error: Option<String>,
    /// GH/s the device should produce at its reported clock.
    pub expected_hash_rate: Option<f64>,
    /// Latest trailing average from the device's history.
    pub avg_hash_rate: Option<f64>,
    /// A request to the device is in flight. Other fields hold the last
    /// settled values, if any.
    pub fetching: bool,
}

impl DeviceRow {
    pub fn from_poll(poll: &DevicePoll) -> Self {
        Self {
            address: poll.address.clone(),
            status: poll.data.clone(),
            error: poll.error().map(str::to_string),
            expected_hash_rate: poll
                .data
                .as_ref()
                .map(|s| expected_hashrate(s.frequency, s.small_core_count, s.asic_count)),
            avg_hash_rate: None,
            fetching: poll.is_fetching(),
        }
    }
}

/// Everything a presentation layer needs about the fleet right now.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    /// Settled cycles so far; 0 before the first one completes.
    pub cycle: u64,
    /// False while a cycle is in flight.
    pub settled: bool,
    pub summary: FleetSummary,
    /// Trailing average of the fleet hash rate.
    pub avg_hash_rate: Option<f64>,
    pub rows: Vec<DeviceRow>,
    pub devices_with_data: usize,
    pub devices_without_data: usize,
    /// Sticky: some device failed in this cycle or an earlier one, and no
    /// clean cycle has happened since.
    pub any_error: bool,
}

impl FleetSnapshot {
    /// Mark a cycle over `addresses` as launched.
    ///
    /// Rows are rebuilt in the new registry order with every device
    /// fetching. Devices already in the table keep their last data; new
    /// ones start empty. The summary is left as it was.
    pub fn mark_in_flight(&mut self, addresses: &[String]) {
        let previous = std::mem::take(&mut self.rows);
        self.settled = false;
        self.rows = addresses
            .iter()
            .map(|address| match previous.iter().find(|row| &row.address == address) {
                Some(row) => DeviceRow {
                    fetching: true,
                    ..row.clone()
                },
                None => DeviceRow::from_poll(&DevicePoll::fetching(address.as_str())),
            })
            .collect();
    }
}

/// Fold statuses into a [`FleetSummary`].
pub fn summarize<'a>(statuses: impl IntoIterator<Item = &'a DeviceStatus>) -> FleetSummary {
    let mut summary = FleetSummary::default();
    let mut hash_rate = 0.0;
    let mut responding = 0usize;

    for status in statuses {
        responding += 1;
        hash_rate += status.hash_rate;
        summary.best_diff = summary.best_diff.max(status.best_diff.value());
        summary.best_session_diff = summary
            .best_session_diff
            .max(status.best_session_diff.value());
        summary.temp += status.temp;
        summary.shares_accepted += status.shares_accepted;
        summary.shares_rejected += status.shares_rejected;
        summary.frequency += status.frequency;
        summary.small_core_count += f64::from(status.small_core_count);
        summary.asic_count += f64::from(status.asic_count);
        summary.power += status.power;
        join_dashed(&mut summary.asic_model, &status.asic_model);
        join_dashed(&mut summary.hostname, &status.hostname);
        join_dashed(&mut summary.stratum_user, &status.stratum_user);
    }

    if responding > 0 {
        let n = responding as f64;
        summary.temp /= n;
        summary.small_core_count /= n;
        summary.asic_count /= n;
        summary.hash_rate = Some(hash_rate);
    }

    summary
}

fn join_dashed(acc: &mut String, next: &str) {
    if acc.is_empty() {
        acc.push_str(next);
    } else {
        acc.push('-');
        acc.push_str(next);
    }
}

/// Turns settled cycles into snapshots, carrying the sticky error flag from
/// one cycle to the next.
#[derive(Debug, Default)]
pub struct Aggregator {
    errors: ErrorLatch,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the snapshot for a settled cycle.
    ///
    /// History fields (`avg_hash_rate`) are left empty for the caller to
    /// fill once the cycle has been recorded.
    pub fn settle(&mut self, cycle: u64, polls: &[DevicePoll]) -> FleetSnapshot {
        debug_assert!(polls.iter().all(|p| !p.is_fetching()));

        let summary = summarize(polls.iter().filter_map(|p| p.data.as_ref()));
        let devices_with_data = polls.iter().filter(|p| p.data.is_some()).count();
        let error_count = polls.iter().filter(|p| p.is_error()).count();

        match self.errors.settle(error_count) {
            LatchStatus::Raised => warn!(
                failed = error_count,
                devices = polls.len(),
                "Some devices are not responding"
            ),
            LatchStatus::Cleared => info!(devices = polls.len(), "All devices responding again"),
            LatchStatus::Held | LatchStatus::Clear => {}
        }

        let rows = polls.iter().map(DeviceRow::from_poll).collect();

        FleetSnapshot {
            cycle,
            settled: true,
            summary,
            avg_hash_rate: None,
            rows,
            devices_with_data,
            devices_without_data: polls.len() - devices_with_data,
            any_error: self.errors.is_raised(),
        }
    }

    pub fn any_error(&self) -> bool {
        self.errors.is_raised()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::api_client::FetchError;
    use crate::types::BestDifficulty;

    fn device(hostname: &str, hash_rate: f64, temp: f64) -> DeviceStatus {
        DeviceStatus {
            hostname: hostname.to_string(),
            hash_rate,
            temp,
            shares_accepted: 100,
            shares_rejected: 1,
            frequency: 500.0,
            small_core_count: 1000,
            asic_count: 2,
            power: 15.0,
            asic_model: "BM1366".to_string(),
            stratum_user: format!("user.{hostname}"),
            ..Default::default()
        }
    }

    fn timeout() -> FetchError {
        FetchError::Timeout(Duration::from_secs(2))
    }

    #[test]
    fn no_data_means_unknown_hashrate_and_zero_sums() {
        let polls = vec![
            DevicePoll::failed("a", &timeout()),
            DevicePoll::failed("b", &timeout()),
        ];

        let snapshot = Aggregator::new().settle(1, &polls);

        assert_eq!(snapshot.summary.hash_rate, None);
        assert_eq!(snapshot.summary.power, 0.0);
        assert_eq!(snapshot.summary.shares_accepted, 0);
        assert_eq!(snapshot.summary.temp, 0.0);
        assert!(!snapshot.summary.temp.is_nan());
        assert_eq!(snapshot.devices_with_data, 0);
        assert_eq!(snapshot.devices_without_data, 2);
    }

    #[test]
    fn empty_fleet_has_unknown_hashrate() {
        let snapshot = Aggregator::new().settle(1, &[]);
        assert_eq!(snapshot.summary, FleetSummary::default());
        assert!(!snapshot.any_error);
    }

    #[test]
    fn means_divide_by_responding_devices_only() {
        let polls = vec![
            DevicePoll::ready("a", device("a", 500.0, 50.0)),
            DevicePoll::failed("b", &timeout()),
            DevicePoll::ready("c", device("c", 700.0, 60.0)),
        ];

        let snapshot = Aggregator::new().settle(1, &polls);
        let summary = &snapshot.summary;

        assert_eq!(summary.hash_rate, Some(1200.0));
        assert_eq!(summary.power, 30.0);
        assert_eq!(summary.shares_accepted, 200);
        assert_eq!(summary.shares_rejected, 2);
        assert_eq!(summary.frequency, 1000.0);
        assert_eq!(summary.temp, 55.0);
        assert_eq!(summary.small_core_count, 1000.0);
        assert_eq!(summary.asic_count, 2.0);
        assert_eq!(snapshot.devices_with_data, 2);
        assert_eq!(snapshot.devices_without_data, 1);
    }

    #[test]
    fn best_difficulty_compares_across_wire_shapes() {
        let mut a = device("a", 1.0, 50.0);
        a.best_diff = BestDifficulty::from("1.2M");
        a.best_session_diff = BestDifficulty::Numeric(900_000.0);
        let mut b = device("b", 1.0, 50.0);
        b.best_diff = BestDifficulty::Numeric(1_100_000.0);
        b.best_session_diff = BestDifficulty::from("950K");

        let summary = summarize([&a, &b]);
        assert!((summary.best_diff - 1_200_000.0).abs() < 1e-6);
        assert!((summary.best_session_diff - 950_000.0).abs() < 1e-6);
    }

    #[test]
    fn text_fields_join_with_dashes_without_dedup() {
        let a = device("bitaxe", 1.0, 50.0);
        let b = device("bitaxe", 1.0, 50.0);

        let summary = summarize([&a, &b]);
        assert_eq!(summary.hostname, "bitaxe-bitaxe");
        assert_eq!(summary.asic_model, "BM1366-BM1366");
        assert_eq!(summary.stratum_user, "user.bitaxe-user.bitaxe");
    }

    #[test]
    fn rows_follow_poll_order_with_expected_hashrate() {
        let polls = vec![
            DevicePoll::failed("a", &timeout()),
            DevicePoll::ready("b", device("b", 900.0, 50.0)),
        ];

        let snapshot = Aggregator::new().settle(1, &polls);

        assert_eq!(snapshot.rows[0].address, "a");
        assert!(snapshot.rows[0].status.is_none());
        assert!(snapshot.rows[0].error.is_some());
        assert_eq!(snapshot.rows[0].expected_hash_rate, None);

        assert_eq!(snapshot.rows[1].address, "b");
        assert_eq!(snapshot.rows[1].error, None);
        assert_eq!(snapshot.rows[1].expected_hash_rate, Some(1000.0));
    }

    #[test]
    fn launched_cycle_marks_rows_fetching_and_keeps_last_data() {
        let polls = vec![
            DevicePoll::ready("a", device("a", 500.0, 50.0)),
            DevicePoll::failed("b", &timeout()),
        ];
        let mut snapshot = Aggregator::new().settle(1, &polls);
        assert!(snapshot.rows.iter().all(|row| !row.fetching));

        let addresses = vec!["c".to_string(), "a".to_string()];
        snapshot.mark_in_flight(&addresses);

        assert!(!snapshot.settled);
        assert_eq!(snapshot.summary.hash_rate, Some(500.0));
        assert_eq!(snapshot.rows.len(), 2);
        assert!(snapshot.rows.iter().all(|row| row.fetching));

        assert_eq!(snapshot.rows[0].address, "c");
        assert!(snapshot.rows[0].status.is_none());
        assert!(snapshot.rows[0].error.is_none());

        assert_eq!(snapshot.rows[1].address, "a");
        assert_eq!(snapshot.rows[1].status.as_ref().map(|s| s.hash_rate), Some(500.0));
    }

    #[test]
    fn error_flag_is_sticky_until_a_clean_cycle() {
        let mut aggregator = Aggregator::new();
        let ok = DevicePoll::ready("a", device("a", 1.0, 50.0));
        let bad = DevicePoll::failed("b", &timeout());

        assert!(aggregator.settle(1, &[ok.clone(), bad.clone()]).any_error);

        // A different device failing keeps the flag up.
        let bad_a = DevicePoll::failed("a", &timeout());
        let ok_b = DevicePoll::ready("b", device("b", 1.0, 50.0));
        assert!(aggregator.settle(2, &[bad_a, ok_b.clone()]).any_error);

        assert!(!aggregator.settle(3, &[ok, ok_b]).any_error);
        assert!(!aggregator.any_error());
    }
}
