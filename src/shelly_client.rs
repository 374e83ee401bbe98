use crate::error::MeterError;
use crate::meter_link::{MeterClient, MeterConnector, MeterReading};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// HTTP client for a Shelly EM using its REST API.
/// API is documented at https://shelly-api-docs.shelly.cloud/gen1/#shelly-em
pub struct ShellyClient {
    device: String,
    endpoint_url: String,
    client: reqwest::Client,
}

impl ShellyClient {
    pub fn new(device: &str, endpoint_url: &str, timeout: Duration) -> Result<Self, MeterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| MeterError::Transport {
                device: device.to_string(),
                source,
            })?;
        Ok(Self {
            device: device.to_string(),
            endpoint_url: endpoint_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, MeterError> {
        let transport = |source: reqwest::Error| MeterError::Transport {
            device: self.device.clone(),
            source,
        };
        let response = self
            .client
            .get(format!("{}{}", self.endpoint_url, endpoint))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(MeterError::Status {
                device: self.device.clone(),
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(transport)?;
        serde_json::from_str(&body).map_err(|e| MeterError::Malformed {
            device: self.device.clone(),
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl MeterClient for ShellyClient {
    async fn relay_state(&self, index: u8) -> Result<bool, MeterError> {
        let relay: RelayStatus = self.get_json(&format!("/relay/{index}")).await?;
        Ok(relay.ison)
    }

    async fn emeter(&self, index: u8) -> Result<MeterReading, MeterError> {
        let endpoint = format!("/emeter/{index}");
        let emeter: EmeterStatus = self.get_json(&endpoint).await?;
        if emeter.voltage < 0.0 || !emeter.voltage.is_finite() {
            return Err(MeterError::Malformed {
                device: self.device.clone(),
                endpoint,
                reason: format!("voltage {} out of range", emeter.voltage),
            });
        }
        if !emeter.is_valid {
            return Err(MeterError::Malformed {
                device: self.device.clone(),
                endpoint,
                reason: "channel reports its measurement as invalid".to_string(),
            });
        }
        Ok(MeterReading {
            voltage: emeter.voltage,
            power: emeter.power,
            reactive: emeter.reactive,
            timestamp: Instant::now(),
        })
    }

    async fn set_relay(&self, index: u8, on: bool) -> Result<(), MeterError> {
        let turn = if on { "on" } else { "off" };
        let endpoint = format!("/relay/{index}?turn={turn}");
        let relay: RelayStatus = self.get_json(&endpoint).await?;
        if relay.ison != on {
            return Err(MeterError::Malformed {
                device: self.device.clone(),
                endpoint,
                reason: format!("relay reports ison={} after the command", relay.ison),
            });
        }
        Ok(())
    }
}

/// Creates [`ShellyClient`]s for one device
#[derive(Debug, Clone)]
pub struct ShellyConnector {
    device: String,
    endpoint_url: String,
    timeout: Duration,
}

impl ShellyConnector {
    pub fn new(device: &str, endpoint_url: &str, timeout: Duration) -> Self {
        Self {
            device: device.to_string(),
            endpoint_url: endpoint_url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl MeterConnector for ShellyConnector {
    type Client = ShellyClient;

    fn device(&self) -> &str {
        &self.device
    }

    async fn connect(&self) -> Result<ShellyClient, MeterError> {
        ShellyClient::new(&self.device, &self.endpoint_url, self.timeout)
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStatus {
    pub ison: bool,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmeterStatus {
    pub power: f64,
    #[serde(default)]
    pub reactive: f64,
    pub voltage: f64,
    #[serde(default = "default_valid")]
    pub is_valid: bool,
}

fn default_valid() -> bool {
    true
}
