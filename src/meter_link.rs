use crate::error::MeterError;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

/// One instantaneous reading of an emeter channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    pub voltage: f64,
    /// Negative while exporting
    pub power: f64,
    pub reactive: f64,
    pub timestamp: Instant,
}

/// The query surface of a remote meter/relay device
#[async_trait]
pub trait MeterClient: Send + Sync {
    async fn relay_state(&self, index: u8) -> Result<bool, MeterError>;
    async fn emeter(&self, index: u8) -> Result<MeterReading, MeterError>;
    async fn set_relay(&self, index: u8, on: bool) -> Result<(), MeterError>;
}

/// Builds a fresh client for a device
#[async_trait]
pub trait MeterConnector: Send + Sync {
    type Client: MeterClient;

    /// Name of the device, used in log lines
    fn device(&self) -> &str;
    async fn connect(&self) -> Result<Self::Client, MeterError>;
}

/// A lazily established connection that is reused across cycles and
/// dropped only after a transport failure
pub struct MeterLink<C: MeterConnector> {
    connector: C,
    connection: Option<C::Client>,
}

impl<C: MeterConnector> MeterLink<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            connection: None,
        }
    }

    pub fn device(&self) -> &str {
        self.connector.device()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub async fn relay_state(&mut self, index: u8) -> Result<bool, MeterError> {
        let client = self.checkout().await?;
        let result = client.relay_state(index).await;
        self.checkin(client, &result);
        result
    }

    pub async fn emeter(&mut self, index: u8) -> Result<MeterReading, MeterError> {
        let client = self.checkout().await?;
        let result = client.emeter(index).await;
        self.checkin(client, &result);
        result
    }

    pub async fn set_relay(&mut self, index: u8, on: bool) -> Result<(), MeterError> {
        let client = self.checkout().await?;
        let result = client.set_relay(index, on).await;
        self.checkin(client, &result);
        result
    }

    async fn checkout(&mut self) -> Result<C::Client, MeterError> {
        match self.connection.take() {
            Some(client) => Ok(client),
            None => {
                debug!(device = self.connector.device(), "Connecting");
                self.connector.connect().await
            }
        }
    }

    fn checkin<T>(&mut self, client: C::Client, result: &Result<T, MeterError>) {
        match result {
            Err(e) if e.is_transport() => {
                // Reset connection on error to force reconnect
                warn!(device = self.connector.device(), error = %e, "Dropping meter connection");
            }
            _ => self.connection = Some(client),
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory meters shared by the controller tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        emeters: HashMap<u8, (f64, f64, f64)>,
        relays: HashMap<u8, bool>,
        offline: bool,
        relay_offline: bool,
        reject_commands: bool,
        commands: Vec<(u8, bool)>,
    }

    /// A scripted device. Clones share state so a test can keep a handle.
    #[derive(Clone, Default)]
    pub struct FakeMeter {
        state: Arc<Mutex<FakeState>>,
        pub connects: Arc<AtomicU32>,
    }

    impl FakeMeter {
        pub fn set_emeter(&self, index: u8, voltage: f64, power: f64, reactive: f64) {
            let mut state = self.state.lock().unwrap();
            state.emeters.insert(index, (voltage, power, reactive));
        }

        pub fn set_relay(&self, index: u8, on: bool) {
            self.state.lock().unwrap().relays.insert(index, on);
        }

        pub fn relay(&self, index: u8) -> bool {
            self.state.lock().unwrap().relays.get(&index).copied().unwrap_or(false)
        }

        pub fn set_offline(&self, offline: bool) {
            self.state.lock().unwrap().offline = offline;
        }

        /// Only relay queries fail; emeter reads keep working
        pub fn set_relay_offline(&self, offline: bool) {
            self.state.lock().unwrap().relay_offline = offline;
        }

        /// Relay queries work but switching answers with an HTTP error
        pub fn set_reject_commands(&self, reject: bool) {
            self.state.lock().unwrap().reject_commands = reject;
        }

        pub fn commands(&self) -> Vec<(u8, bool)> {
            self.state.lock().unwrap().commands.clone()
        }

        pub fn connect_count(&self) -> u32 {
            self.connects.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl MeterClient for FakeMeter {
        async fn relay_state(&self, index: u8) -> Result<bool, MeterError> {
            let state = self.state.lock().unwrap();
            if state.offline || state.relay_offline {
                return Err(MeterError::Unreachable("fake".into()));
            }
            Ok(state.relays.get(&index).copied().unwrap_or(false))
        }

        async fn emeter(&self, index: u8) -> Result<MeterReading, MeterError> {
            let state = self.state.lock().unwrap();
            if state.offline {
                return Err(MeterError::Unreachable("fake".into()));
            }
            let (voltage, power, reactive) =
                state.emeters.get(&index).copied().unwrap_or_default();
            Ok(MeterReading {
                voltage,
                power,
                reactive,
                timestamp: Instant::now(),
            })
        }

        async fn set_relay(&self, index: u8, on: bool) -> Result<(), MeterError> {
            let mut state = self.state.lock().unwrap();
            if state.offline || state.relay_offline {
                return Err(MeterError::Unreachable("fake".into()));
            }
            if state.reject_commands {
                return Err(MeterError::Status {
                    device: "fake".into(),
                    endpoint: format!("/relay/{index}"),
                    status: 500,
                });
            }
            state.commands.push((index, on));
            state.relays.insert(index, on);
            Ok(())
        }
    }

    #[async_trait]
    impl MeterConnector for FakeMeter {
        type Client = FakeMeter;

        fn device(&self) -> &str {
            "fake meter"
        }

        async fn connect(&self) -> Result<FakeMeter, MeterError> {
            self.connects.fetch_add(1, Ordering::Relaxed);
            if self.state.lock().unwrap().offline {
                return Err(MeterError::Unreachable("fake".into()));
            }
            Ok(self.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeMeter;
    use super::*;

    #[tokio::test]
    async fn test_connection_is_reused_across_calls() {
        let meter = FakeMeter::default();
        meter.set_emeter(0, 230.0, 500.0, 10.0);
        let mut link = MeterLink::new(meter.clone());

        assert!(!link.is_connected());
        let reading = link.emeter(0).await.unwrap();
        assert_eq!(reading.power, 500.0);
        link.relay_state(0).await.unwrap();
        link.emeter(1).await.unwrap();

        assert!(link.is_connected());
        assert_eq!(meter.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_drops_connection() {
        let meter = FakeMeter::default();
        let mut link = MeterLink::new(meter.clone());
        link.emeter(0).await.unwrap();

        meter.set_relay_offline(true);
        assert!(link.relay_state(0).await.is_err());
        assert!(!link.is_connected());

        meter.set_relay_offline(false);
        assert!(!link.relay_state(0).await.unwrap());
        assert_eq!(meter.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_slot_empty() {
        let meter = FakeMeter::default();
        meter.set_offline(true);
        let mut link = MeterLink::new(meter.clone());
        assert!(link.emeter(0).await.is_err());
        assert!(!link.is_connected());
    }
}
