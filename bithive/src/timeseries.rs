//! Rolling hash rate and temperature history.
//!
//! One series per device, keyed by the hostname the device reports, plus one
//! fleet-wide series. Each append computes a trailing average and prunes
//! samples that have aged out of the window. Appends only touch memory: the
//! series changed since the last write are handed out by
//! [`TimeSeriesStore::take_dirty`] for [`write_series`], so a cycle's worth
//! of appends costs one write per series.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{KeyValueStore, keys};
use crate::tracing::prelude::*;

/// One point of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesSample {
    /// Sequence number within this process; not persisted.
    #[serde(skip)]
    pub index: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub hash_rate: f64,
    pub avg_hash_rate: f64,
    pub temp: f64,
}

/// Which series a sample belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeriesKey {
    Device(String),
    Fleet,
}

impl SeriesKey {
    /// Key for a device's history. Devices that report no hostname are
    /// tracked under their address instead.
    pub fn device(hostname: &str, address: &str) -> Self {
        if hostname.is_empty() {
            SeriesKey::Device(address.to_string())
        } else {
            SeriesKey::Device(hostname.to_string())
        }
    }

    fn storage_key(&self) -> String {
        match self {
            SeriesKey::Device(name) => format!("{}{name}", keys::DEVICE_HISTORY_PREFIX),
            SeriesKey::Fleet => keys::FLEET_HISTORY.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Series {
    samples: Vec<TimeSeriesSample>,
    next_index: u64,
}

/// Changed series, ready to be written with [`write_series`].
pub type DirtySeries = Vec<(SeriesKey, Vec<TimeSeriesSample>)>;

pub struct TimeSeriesStore {
    store: Arc<dyn KeyValueStore>,
    window_ms: i64,
    average_window: usize,
    series: HashMap<SeriesKey, Series>,
    dirty: HashSet<SeriesKey>,
    /// Set by [`TimeSeriesStore::reset`]: series not yet in memory start
    /// empty instead of being read back.
    detached: bool,
}

impl TimeSeriesStore {
    /// `window` is the retention age; `average_window` the number of
    /// samples, current included, in the trailing average.
    pub fn new(store: Arc<dyn KeyValueStore>, window: Duration, average_window: usize) -> Self {
        Self {
            store,
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            average_window: average_window.max(1),
            series: HashMap::new(),
            dirty: HashSet::new(),
            detached: false,
        }
    }

    /// Record a sample taken at `now_ms` and return it.
    pub fn append(
        &mut self,
        key: &SeriesKey,
        hash_rate: f64,
        temp: f64,
        now_ms: i64,
    ) -> TimeSeriesSample {
        let average_window = self.average_window;
        let window_ms = self.window_ms;
        let series = self.load(key);

        let previous = series
            .samples
            .iter()
            .rev()
            .take(average_window - 1)
            .map(|s| s.hash_rate);
        let (sum, count) = previous.fold((hash_rate, 1usize), |(sum, n), h| (sum + h, n + 1));

        let sample = TimeSeriesSample {
            index: series.next_index,
            timestamp: now_ms,
            hash_rate,
            avg_hash_rate: sum / count as f64,
            temp,
        };
        series.next_index += 1;
        series.samples.push(sample.clone());

        let before = series.samples.len();
        series
            .samples
            .retain(|s| now_ms.saturating_sub(s.timestamp) <= window_ms);
        let pruned = before - series.samples.len();
        if pruned > 0 {
            trace!(?key, pruned, "Pruned aged-out samples");
        }

        self.dirty.insert(key.clone());
        sample
    }

    /// Samples of `key` in ascending time order.
    pub fn series(&mut self, key: &SeriesKey) -> &[TimeSeriesSample] {
        &self.load(key).samples
    }

    /// Copies of the series appended to since the last call, for the
    /// caller to write out.
    pub fn take_dirty(&mut self) -> DirtySeries {
        let mut dirty: DirtySeries = self
            .dirty
            .drain()
            .filter_map(|key| {
                let samples = self.series.get(&key)?.samples.clone();
                Some((key, samples))
            })
            .collect();
        dirty.sort_by_key(|(key, _)| key.storage_key());
        dirty
    }

    /// Forget all history. Unwritten samples are dropped and nothing more is
    /// read from the store, which the caller resets on its own.
    pub fn reset(&mut self) {
        self.series.clear();
        self.dirty.clear();
        self.detached = true;
    }

    fn load(&mut self, key: &SeriesKey) -> &mut Series {
        let store = &self.store;
        let detached = self.detached;
        self.series.entry(key.clone()).or_insert_with(|| {
            let stored = if detached {
                None
            } else {
                store.get(&key.storage_key())
            };
            let mut samples: Vec<TimeSeriesSample> = match stored {
                Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                    warn!(?key, error = %e, "Stored history is unreadable, starting empty");
                    Vec::new()
                }),
                None => Vec::new(),
            };
            for (i, sample) in samples.iter_mut().enumerate() {
                sample.index = i as u64;
            }
            Series {
                next_index: samples.len() as u64,
                samples,
            }
        })
    }
}

/// Store `samples` as the persisted form of `key`.
pub fn write_series(
    store: &dyn KeyValueStore,
    key: &SeriesKey,
    samples: &[TimeSeriesSample],
) -> Result<()> {
    let json = serde_json::to_string(samples)?;
    store.set(&key.storage_key(), &json)
}
