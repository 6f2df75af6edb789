//! Commands sent from [`super::MonitorHandle`] to the monitor task.
//!
//! Each command carries a oneshot reply channel so the caller can await
//! the outcome.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::Result;
use crate::timeseries::{SeriesKey, TimeSeriesSample};

pub enum MonitorCommand {
    /// Register a device. Replies whether the registry changed.
    AddDevice {
        address: String,
        reply: oneshot::Sender<Result<bool>>,
    },

    /// Unregister every entry for a device. Replies how many were removed.
    RemoveDevice {
        address: String,
        reply: oneshot::Sender<Result<usize>>,
    },

    /// Current registry contents, in display order.
    ListDevices { reply: oneshot::Sender<Vec<String>> },

    RefreshInterval { reply: oneshot::Sender<Duration> },

    /// Persist a new refresh interval and apply it to the running clock.
    SetRefreshInterval {
        interval: Duration,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Start a cycle now. Replies false if one was already in flight.
    Refresh { reply: oneshot::Sender<bool> },

    /// Drop all history, keeping devices and preferences.
    ResetCharts { reply: oneshot::Sender<Result<()>> },

    History {
        key: SeriesKey,
        reply: oneshot::Sender<Vec<TimeSeriesSample>>,
    },
}
