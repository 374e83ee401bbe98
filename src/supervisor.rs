use crate::battery::BatteryTelemetry;
use crate::battery_feed::{BatteryFeed, SystemGatewayAPI};
use crate::config::Config;
use crate::grid_relay::{GridRelayController, GridRelaySettings};
use crate::load_balance::{LoadBalanceEstimator, LoadBalanceSettings};
use crate::shared_state::{SharedSoc, Shutdown};
use crate::shelly_client::ShellyConnector;
use crate::telemetry::VirtualInverter;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Starts the control loops and holds the state they share
pub struct Supervisor {
    config: Config,
    inverter: VirtualInverter,
    battery: BatteryTelemetry,
    soc: SharedSoc,
    shutdown: Shutdown,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            inverter: VirtualInverter::default(),
            battery: BatteryTelemetry::new(),
            soc: SharedSoc::default(),
            shutdown: Shutdown::new(),
        }
    }

    /// The telemetry the loops publish to
    pub fn inverter(&self) -> VirtualInverter {
        self.inverter.clone()
    }

    pub fn soc(&self) -> SharedSoc {
        self.soc.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Primes the battery values, then spawns the feed and both control loops.
    /// The returned tasks are never awaited on shutdown.
    pub async fn start(&self) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let config = &self.config;
        info!(
            grid_meter = %config.grid_meter_url,
            load_meter = %config.load_meter_url,
            grid_control = %config.grid_control_url,
            "Starting control loops"
        );

        let gateway = SystemGatewayAPI::new(&config.battery_source_url, config.meter_timeout)?;
        let feed = BatteryFeed::new(gateway, self.battery.clone(), config.cycle_period);
        // The load loop treats a missing SOC as fatal, so read it before it starts
        feed.refresh().await;

        let load_loop = LoadBalanceEstimator::new(
            ShellyConnector::new("load meter", &config.load_meter_url, config.meter_timeout),
            Arc::new(self.battery.clone()),
            Arc::new(self.inverter.clone()),
            self.soc.clone(),
            LoadBalanceSettings {
                period: config.cycle_period,
                backoff: config.load_backoff,
                frequency_hz: config.ac_frequency_hz,
            },
        );

        let grid_loop = GridRelayController::new(
            ShellyConnector::new("grid meter", &config.grid_meter_url, config.meter_timeout),
            ShellyConnector::new("grid control", &config.grid_control_url, config.meter_timeout),
            Arc::new(self.inverter.clone()),
            self.soc.clone(),
            GridRelaySettings {
                period: config.cycle_period,
                backoff: config.grid_backoff,
                frequency_hz: config.ac_frequency_hz,
                storm_override: config.storm_override,
            },
        );

        let handles = vec![
            feed.spawn(self.shutdown.clone()),
            tokio::spawn(load_loop.run(self.shutdown.clone())),
            tokio::spawn(grid_loop.run(self.shutdown.clone())),
        ];
        info!("All control loops started");
        Ok(handles)
    }

    /// Runs until Ctrl-C or a fatal loop failure
    pub async fn run(self) -> anyhow::Result<()> {
        let _loops = self.start().await?;

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received");
                    shutdown.trigger();
                }
                Err(e) => warn!(error = %e, "Cannot listen for interrupts"),
            }
        });

        self.shutdown.wait().await;
        info!("Shutdown requested");
        Ok(())
    }
}
