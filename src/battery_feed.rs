use crate::battery::{BatteryPath, BatteryTelemetry};
use crate::shared_state::Shutdown;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Answer of the telemetry gateway for one path
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayValue {
    /// `null` while the value is invalid on the bus
    pub value: Option<f64>,
}

/// HTTP client for the gateway exposing the system service's values
pub struct SystemGatewayAPI {
    endpoint_url: String,
    client: reqwest::Client,
}

impl SystemGatewayAPI {
    pub fn new(endpoint_url: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        Ok(Self {
            endpoint_url: endpoint_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub async fn read_value(&self, path: BatteryPath) -> Result<GatewayValue, anyhow::Error> {
        if self.endpoint_url.is_empty() {
            anyhow::bail!("No gateway connection");
        }
        let result = self
            .client
            .get(format!(
                "{}/{}{}",
                self.endpoint_url,
                path.entity(),
                path.as_str()
            ))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }
}

/// Background task mirroring the gateway's battery values into [`BatteryTelemetry`]
pub struct BatteryFeed {
    api: SystemGatewayAPI,
    telemetry: BatteryTelemetry,
    period: Duration,
}

impl BatteryFeed {
    pub fn new(api: SystemGatewayAPI, telemetry: BatteryTelemetry, period: Duration) -> Self {
        Self {
            api,
            telemetry,
            period,
        }
    }

    /// Spawns the feed as its own task
    pub fn spawn(self, shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(&self, shutdown: Shutdown) {
        info!("Starting battery telemetry feed");
        loop {
            self.refresh().await;
            if shutdown.sleep(self.period).await {
                break;
            }
        }
        info!("Battery telemetry feed exiting");
    }

    /// Reads every path once. A path that still cannot be read after the
    /// retries, or that the gateway reports as `null`, becomes unknown.
    pub async fn refresh(&self) {
        for path in BatteryPath::ALL {
            match self.read_with_retry(path).await {
                Ok(reading) => {
                    debug!(path = path.as_str(), value = ?reading.value, "Battery value");
                    self.telemetry.update(path, reading.value);
                }
                Err(e) => {
                    warn!(path = path.as_str(), error = %e, "Battery value lost");
                    self.telemetry.update(path, None);
                }
            }
        }
    }

    async fn read_with_retry(&self, path: BatteryPath) -> Result<GatewayValue, anyhow::Error> {
        const MAX_RETRIES: u32 = 3;

        let mut attempt = 1;
        loop {
            match self.api.read_value(path).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < MAX_RETRIES => {
                    debug!(
                        path = path.as_str(),
                        attempt,
                        error = %e,
                        "Gateway read failed, retrying"
                    );
                    sleep(Duration::from_millis(50 * attempt as u64)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!("all {MAX_RETRIES} attempts failed")));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::BatteryStateSource;

    fn feed_for(server: &mockito::Server, telemetry: &BatteryTelemetry) -> BatteryFeed {
        let api = SystemGatewayAPI::new(&server.url(), Duration::from_secs(1)).unwrap();
        BatteryFeed::new(api, telemetry.clone(), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_read_value() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/com.victronenergy.system/Dc/Battery/Soc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"value": 87.5}"#)
            .create_async()
            .await;

        let api = SystemGatewayAPI::new(&server.url(), Duration::from_secs(1)).unwrap();
        let result = api.read_value(BatteryPath::Soc).await.unwrap();

        assert_eq!(result.value, Some(87.5));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_connection() {
        let api = SystemGatewayAPI::new("", Duration::from_secs(1)).unwrap();
        let result = api.read_value(BatteryPath::Soc).await;
        assert_eq!(result.unwrap_err().to_string(), "No gateway connection");
    }

    #[tokio::test]
    async fn test_refresh_marks_null_unknown() {
        let mut server = mockito::Server::new_async().await;
        let _soc = server
            .mock("GET", "/com.victronenergy.system/Dc/Battery/Soc")
            .with_status(200)
            .with_body(r#"{"value": 64.0}"#)
            .create_async()
            .await;
        let _ttg = server
            .mock("GET", "/com.victronenergy.system/Dc/Battery/TimeToGo")
            .with_status(200)
            .with_body(r#"{"value": null}"#)
            .create_async()
            .await;
        let _rest = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"value": 1.0}"#)
            .create_async()
            .await;

        let telemetry = BatteryTelemetry::new();
        telemetry.update(BatteryPath::TimeToGo, Some(3600.0));
        feed_for(&server, &telemetry).refresh().await;

        assert_eq!(telemetry.value(BatteryPath::Soc), Some(64.0));
        assert_eq!(telemetry.value(BatteryPath::TimeToGo), None);
        assert_eq!(telemetry.value(BatteryPath::Voltage), Some(1.0));
    }

    #[tokio::test]
    async fn test_gateway_failure_forgets_last_value() {
        let mut server = mockito::Server::new_async().await;
        let _all = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(503)
            .expect_at_least(3)
            .create_async()
            .await;

        let telemetry = BatteryTelemetry::new();
        telemetry.update(BatteryPath::Soc, Some(42.0));
        telemetry.update(BatteryPath::Voltage, Some(52.0));
        feed_for(&server, &telemetry).refresh().await;

        assert_eq!(telemetry.value(BatteryPath::Soc), None);
        assert_eq!(telemetry.value(BatteryPath::Voltage), None);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_forgets_soc() {
        let telemetry = BatteryTelemetry::new();
        telemetry.update(BatteryPath::Soc, Some(42.0));
        let api = SystemGatewayAPI::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let feed = BatteryFeed::new(api, telemetry.clone(), Duration::from_millis(10));

        feed.refresh().await;

        assert_eq!(telemetry.value(BatteryPath::Soc), None);
    }
}
