//! Grid-tie relay control.
//!
//! Once per cycle the grid meter's two phases are sampled and published, then
//! the relay is switched according to two rules:
//! - while the relay is on, net export or a near-idle import must persist for
//!   [`EXPORT_COUNTDOWN_DEPTH`] consecutive cycles before the relay drops
//! - while the relay is off, a low battery (or the storm override) brings it back

use crate::energy::EnergyCounter;
use crate::error::{CycleError, MeterError};
use crate::meter_link::{MeterConnector, MeterLink, MeterReading};
use crate::phase_flow::PhaseFlow;
use crate::shared_state::{SharedSoc, Shutdown};
use crate::telemetry::{paths, TelemetryBatch, TelemetryPublisher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Consecutive qualifying cycles needed before the relay drops
pub const EXPORT_COUNTDOWN_DEPTH: u32 = 5;
/// SOC at or below which the grid is reconnected
pub const LOW_SOC_THRESHOLD: f64 = 5.0;
/// Near-idle import band (exclusive) treated like export
pub const DEAD_BAND_LOW: f64 = 10.0;
pub const DEAD_BAND_HIGH: f64 = 100.0;
/// `/Ac/ActiveIn/ActiveInput` value meaning "no input"
pub const NO_ACTIVE_INPUT: i64 = 240;

const RELAY_INDEX: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On,
    Off,
}

impl RelayCommand {
    pub fn is_on(self) -> bool {
        self == RelayCommand::On
    }
}

/// True when the grid meter's total power may not stay grid-tied
pub fn is_unsafe_to_stay_tied(total_power: f64) -> bool {
    total_power < 0.0 || (total_power > DEAD_BAND_LOW && total_power < DEAD_BAND_HIGH)
}

/// Hysteresis state of the relay decision. Lives as long as the process.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayDecisionState {
    relay_commanded_on: bool,
    export_countdown: u32,
    storm_override: bool,
}

impl RelayDecisionState {
    pub fn new(storm_override: bool) -> Self {
        Self {
            relay_commanded_on: false,
            export_countdown: EXPORT_COUNTDOWN_DEPTH,
            storm_override,
        }
    }

    pub fn export_countdown(&self) -> u32 {
        self.export_countdown
    }

    pub fn relay_commanded_on(&self) -> bool {
        self.relay_commanded_on
    }

    pub fn storm_override(&self) -> bool {
        self.storm_override
    }

    pub fn set_storm_override(&mut self, storm_override: bool) {
        self.storm_override = storm_override;
    }

    /// Decides the command for one cycle given the relay's observed state.
    /// Returns `None` when the relay should be left alone.
    pub fn decide(&mut self, relay_on: bool, total_power: f64, soc: f64) -> Option<RelayCommand> {
        self.relay_commanded_on = relay_on;
        if relay_on {
            if is_unsafe_to_stay_tied(total_power) {
                self.export_countdown = self.export_countdown.saturating_sub(1);
                debug!(countdown = self.export_countdown, total_power, "Zero export countdown");
            } else {
                self.export_countdown = EXPORT_COUNTDOWN_DEPTH;
            }
            // The countdown stays at zero until power is healthy again
            if self.export_countdown == 0 {
                return Some(RelayCommand::Off);
            }
        } else if soc <= LOW_SOC_THRESHOLD || self.storm_override {
            return Some(RelayCommand::On);
        }
        None
    }

    /// Records that a command reached the relay
    pub fn commanded(&mut self, command: RelayCommand) {
        self.relay_commanded_on = command.is_on();
    }
}

impl Default for RelayDecisionState {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Relay status observed in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    On,
    Off,
    /// The control relay could not be queried
    Offline,
}

/// What one grid cycle saw and did
#[derive(Debug, Clone, PartialEq)]
pub struct GridCycle {
    pub flow: PhaseFlow,
    pub relay: RelayStatus,
    pub command: Option<RelayCommand>,
    pub export_countdown: u32,
}

/// Timing and static inputs of the grid loop
#[derive(Debug, Clone)]
pub struct GridRelaySettings {
    pub period: Duration,
    pub backoff: Duration,
    pub frequency_hz: f64,
    pub storm_override: bool,
}

/// Owns the grid meter, the grid-tie relay and the relay decision state
pub struct GridRelayController<G: MeterConnector, R: MeterConnector> {
    grid_meter: MeterLink<G>,
    grid_control: MeterLink<R>,
    publisher: Arc<dyn TelemetryPublisher>,
    soc: SharedSoc,
    decision: RelayDecisionState,
    settings: GridRelaySettings,
    grid_import: EnergyCounter,
    last_good: Option<PhaseFlow>,
}

impl<G: MeterConnector, R: MeterConnector> GridRelayController<G, R> {
    pub fn new(
        grid_meter: G,
        grid_control: R,
        publisher: Arc<dyn TelemetryPublisher>,
        soc: SharedSoc,
        settings: GridRelaySettings,
    ) -> Self {
        Self {
            grid_meter: MeterLink::new(grid_meter),
            grid_control: MeterLink::new(grid_control),
            publisher,
            soc,
            decision: RelayDecisionState::new(settings.storm_override),
            settings,
            grid_import: EnergyCounter::new(),
            last_good: None,
        }
    }

    pub fn decision(&self) -> &RelayDecisionState {
        &self.decision
    }

    pub fn set_storm_override(&mut self, storm_override: bool) {
        self.decision.set_storm_override(storm_override);
    }

    /// Runs cycles until shutdown is requested
    pub async fn run(mut self, shutdown: Shutdown) {
        info!("Starting grid relay loop");
        loop {
            let pause = match self.run_cycle().await {
                Ok(_) => self.settings.period,
                Err(CycleError::Transient(e)) => {
                    warn!(error = %e, "Grid cycle skipped, backing off");
                    self.settings.backoff + self.settings.period
                }
                Err(CycleError::Fatal(e)) => {
                    error!(error = %e, "Grid loop cannot continue");
                    shutdown.trigger();
                    break;
                }
            };
            if shutdown.sleep(pause).await {
                break;
            }
        }
        info!("Grid relay loop exiting");
    }

    /// One sample-publish-decide pass
    pub async fn run_cycle(&mut self) -> Result<GridCycle, CycleError> {
        let flow = match self.read_phases().await {
            Ok((l1, l2)) => PhaseFlow::from_readings(&l1, &l2, self.settings.frequency_hz),
            Err(e) => {
                warn!(
                    device = self.grid_meter.device(),
                    error = %e,
                    last_good_power = ?self.last_good.map(|f| f.total_power()),
                    "Grid meter read failed, publishing zeroed values"
                );
                self.publish_flow(&PhaseFlow::default());
                self.grid_import.pause();
                return Err(e.into());
            }
        };
        self.last_good = Some(flow);
        self.publish_flow(&flow);

        let total_power = flow.total_power();
        let relay_on = match self.grid_control.relay_state(RELAY_INDEX).await {
            Ok(on) => on,
            Err(e) => {
                info!(device = self.grid_control.device(), error = %e, "Grid AC: OFFLINE");
                return Ok(self.report(flow, RelayStatus::Offline, None));
            }
        };

        let soc = self.soc.get().await;
        let command = self.decision.decide(relay_on, total_power, soc);
        if relay_on {
            info!(
                "Grid AC: {}V, L1 Power: {}W, L2 Power: {}W, Total Power: {}W",
                flow.voltage_l1, flow.power_l1, flow.power_l2, total_power
            );
        } else {
            info!("Grid AC: Available, Relay OFF");
        }

        if let Some(command) = command {
            self.switch_relay(command, soc, total_power).await?;
        }

        let relay = if relay_on {
            RelayStatus::On
        } else {
            RelayStatus::Off
        };
        Ok(self.report(flow, relay, command))
    }

    async fn read_phases(&mut self) -> Result<(MeterReading, MeterReading), MeterError> {
        let l1 = self.grid_meter.emeter(0).await?;
        let l2 = self.grid_meter.emeter(1).await?;
        Ok((l1, l2))
    }

    async fn switch_relay(
        &mut self,
        command: RelayCommand,
        soc: f64,
        total_power: f64,
    ) -> Result<(), CycleError> {
        match self.grid_control.set_relay(RELAY_INDEX, command.is_on()).await {
            Ok(()) => {
                self.decision.commanded(command);
                match command {
                    RelayCommand::Off => {
                        warn!(total_power, "GRID OFF: zero export countdown expired")
                    }
                    RelayCommand::On if soc <= LOW_SOC_THRESHOLD => {
                        warn!(soc, "GRID ON: battery low")
                    }
                    RelayCommand::On => warn!(soc, "GRID ON: storm override"),
                }
                Ok(())
            }
            Err(e) => {
                error!(
                    device = self.grid_control.device(),
                    ?command,
                    error = %e,
                    "Relay command failed"
                );
                Err(e.into())
            }
        }
    }

    fn publish_flow(&mut self, flow: &PhaseFlow) {
        let import_kwh = self.grid_import.add(flow.total_power(), Instant::now());
        let mut batch = TelemetryBatch::new()
            .set(paths::IN_L1_P, flow.power_l1)
            .set(paths::IN_L2_P, flow.power_l2)
            .set(paths::IN_P, flow.total_power())
            .set(paths::IN_L1_V, flow.voltage_l1)
            .set(paths::IN_L2_V, flow.voltage_l2)
            .set(paths::IN_L1_F, flow.frequency)
            .set(paths::IN_L2_F, flow.frequency)
            .set(paths::IN_L1_I, flow.current_l1)
            .set(paths::IN_L2_I, flow.current_l2)
            .set(paths::ENERGY_AC_IN1_TO_AC_OUT, import_kwh);
        batch = if flow.connected {
            batch
                .set(paths::IN_CONNECTED, 1i64)
                .set(paths::IN_ACTIVE_INPUT, 0i64)
                .set(paths::ALARM_GRID_LOST, 0i64)
        } else {
            batch
                .set(paths::IN_CONNECTED, 0i64)
                .set(paths::IN_ACTIVE_INPUT, NO_ACTIVE_INPUT)
        };
        self.publisher.publish(batch);
    }

    fn report(
        &self,
        flow: PhaseFlow,
        relay: RelayStatus,
        command: Option<RelayCommand>,
    ) -> GridCycle {
        GridCycle {
            flow,
            relay,
            command,
            export_countdown: self.decision.export_countdown(),
        }
    }
}
