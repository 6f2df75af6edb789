//! HTTP client for the AxeOS device API.

pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, header};
use thiserror::Error;

use crate::poller::DeviceFetcher;
use types::{DeviceSettingsPatch, DeviceStatus};

const ACCEPT: &str = "application/json, text/plain, */*";

/// Why a request to a device produced no usable answer.
///
/// The fan-out treats every variant the same way (no data this cycle); the
/// distinction exists for logs and for direct device control.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("device answered with HTTP {0}")]
    Status(StatusCode),

    #[error("malformed status payload: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout)
        } else {
            FetchError::Network(err)
        }
    }
}

/// Client for talking to devices by address.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    timeout: Duration,
}

impl Client {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Normalize a device address into the base URL of its API.
    ///
    /// `10.0.0.5` becomes `http://10.0.0.5/api`; an address already carrying
    /// a scheme or the `/api` suffix is left alone in that respect.
    pub fn api_base(address: &str) -> String {
        let address = address.trim();
        let mut url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        if !url.ends_with("/api") {
            let trimmed = url.trim_end_matches('/').len();
            url.truncate(trimmed);
            url.push_str("/api");
        }
        url
    }

    /// Fetch the status snapshot of one device.
    pub async fn get_status(&self, address: &str) -> Result<DeviceStatus, FetchError> {
        let url = format!("{}/system/info", Self::api_base(address));
        let response = self
            .http
            .get(&url)
            .header(header::ACCEPT, ACCEPT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;
        serde_json::from_slice(&body).map_err(FetchError::Malformed)
    }

    /// Push changed settings to a device.
    pub async fn update_settings(
        &self,
        address: &str,
        patch: &DeviceSettingsPatch,
    ) -> Result<(), FetchError> {
        let url = format!("{}/system", Self::api_base(address));
        let response = self
            .http
            .patch(&url)
            .header(header::ACCEPT, ACCEPT)
            .json(patch)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(FetchError::Status(status)),
        }
    }

    /// Ask a device to reboot.
    pub async fn restart(&self, address: &str) -> Result<(), FetchError> {
        let url = format!("{}/system/restart", Self::api_base(address));
        let response = self
            .http
            .post(&url)
            .header(header::ACCEPT, ACCEPT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(e, self.timeout))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(FetchError::Status(status)),
        }
    }
}

#[async_trait]
impl DeviceFetcher for Client {
    async fn fetch_status(&self, address: &str) -> Result<DeviceStatus, FetchError> {
        self.get_status(address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_adds_scheme_and_suffix() {
        assert_eq!(Client::api_base("10.0.0.5"), "http://10.0.0.5/api");
        assert_eq!(Client::api_base("10.0.0.5:8080/"), "http://10.0.0.5:8080/api");
        assert_eq!(Client::api_base("http://bitaxe.local"), "http://bitaxe.local/api");
        assert_eq!(Client::api_base("http://bitaxe.local/api"), "http://bitaxe.local/api");
        assert_eq!(Client::api_base(" https://miner "), "https://miner/api");
    }

    #[tokio::test]
    async fn unreachable_device_is_a_network_error() {
        // Port 9 on loopback is not expected to be listening.
        let client = Client::with_timeout(Duration::from_millis(500));
        let err = client.get_status("127.0.0.1:9").await.unwrap_err();
        assert!(
            matches!(err, FetchError::Network(_) | FetchError::Timeout(_)),
            "unexpected error {err:?}"
        );
    }
}
