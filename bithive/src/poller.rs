//! Concurrent status fan-out across the fleet.
//!
//! One cycle issues one status request per registered address, all at once,
//! and waits for every one of them to settle. Each request carries its own
//! timeout; a device that does not answer in time has its request dropped
//! and is reported as failed, without delaying or affecting the others.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;

use crate::api_client::FetchError;
use crate::api_client::types::DeviceStatus;
use crate::tracing::prelude::*;

/// Anything that can fetch a device's status by address.
///
/// Implemented by [`crate::api_client::Client`]; tests substitute fakes.
#[async_trait]
pub trait DeviceFetcher: Send + Sync {
    async fn fetch_status(&self, address: &str) -> Result<DeviceStatus, FetchError>;
}

/// Where a device's request stands within the current cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Fetching,
    Ready,
    /// The request failed; the text is for display and logs only.
    Failed(String),
}

/// Result of polling one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePoll {
    pub address: String,
    pub data: Option<DeviceStatus>,
    pub state: PollState,
}

impl DevicePoll {
    pub fn fetching(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            data: None,
            state: PollState::Fetching,
        }
    }

    pub fn ready(address: impl Into<String>, status: DeviceStatus) -> Self {
        Self {
            address: address.into(),
            data: Some(status),
            state: PollState::Ready,
        }
    }

    pub fn failed(address: impl Into<String>, error: &FetchError) -> Self {
        Self {
            address: address.into(),
            data: None,
            state: PollState::Failed(error.to_string()),
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.state == PollState::Fetching
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, PollState::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            PollState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Poll every address concurrently and wait for all of them.
///
/// Results come back in the order of `addresses`. Never fails as a whole:
/// individual failures are reported in the corresponding [`DevicePoll`].
pub async fn poll_fleet(
    fetcher: &dyn DeviceFetcher,
    addresses: &[String],
    timeout: Duration,
) -> Vec<DevicePoll> {
    let polls = addresses
        .iter()
        .map(|address| poll_device(fetcher, address, timeout));
    join_all(polls).await
}

async fn poll_device(fetcher: &dyn DeviceFetcher, address: &str, timeout: Duration) -> DevicePoll {
    let result = match tokio::time::timeout(timeout, fetcher.fetch_status(address)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout(timeout)),
    };

    match result {
        Ok(status) => {
            trace!(address, hashrate = status.hash_rate, "Device status received");
            DevicePoll::ready(address, status)
        }
        Err(e) => {
            debug!(address, error = %e, "Device poll failed");
            DevicePoll::failed(address, &e)
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scriptable fetcher for tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::StatusCode;

    use super::DeviceFetcher;
    use crate::api_client::FetchError;
    use crate::api_client::types::DeviceStatus;

    #[derive(Clone)]
    pub enum Behavior {
        Respond(DeviceStatus, Duration),
        HttpError(StatusCode),
        Hang,
    }

    #[derive(Default)]
    pub struct FakeFetcher {
        behaviors: Mutex<HashMap<String, Behavior>>,
        pub calls: AtomicUsize,
        in_flight: AtomicUsize,
        pub max_in_flight: AtomicUsize,
    }

    impl FakeFetcher {
        pub fn set(&self, address: &str, behavior: Behavior) {
            self.behaviors.lock().insert(address.to_string(), behavior);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DeviceFetcher for FakeFetcher {
        async fn fetch_status(&self, address: &str) -> Result<DeviceStatus, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let behavior = self.behaviors.lock().get(address).cloned();
            match behavior {
                Some(Behavior::Respond(status, delay)) => {
                    tokio::time::sleep(delay).await;
                    Ok(status)
                }
                Some(Behavior::HttpError(code)) => Err(FetchError::Status(code)),
                Some(Behavior::Hang) | None => std::future::pending().await,
            }
        }
    }

    pub fn status(hostname: &str, hash_rate: f64) -> DeviceStatus {
        DeviceStatus {
            hostname: hostname.to_string(),
            hash_rate,
            temp: 55.0,
            ..Default::default()
        }
    }
}
