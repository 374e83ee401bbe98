//! AC load and battery loop.
//!
//! Publishes the virtual inverter's AC output (load meter net of AC-coupled
//! PV), its charge state and the battery summary, and keeps the shared SOC
//! current for the grid loop.

use crate::battery::{BatterySnapshot, BatteryStateSource};
use crate::charge_state::{
    derive_charge_state, round_to, ChargeState, TimeRemaining, VebusChargeState,
};
use crate::energy::EnergyCounter;
use crate::error::{CycleError, MeterError};
use crate::meter_link::{MeterConnector, MeterLink, MeterReading};
use crate::phase_flow::phase_current;
use crate::shared_state::{SharedSoc, Shutdown};
use crate::telemetry::{paths, TelemetryBatch, TelemetryPublisher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const RELAY_INDEX: u8 = 0;

/// What one load cycle derived
#[derive(Debug, Clone, PartialEq)]
pub struct LoadCycle {
    pub soc: f64,
    pub output_voltage: f64,
    pub output_power: f64,
    pub charge_state: ChargeState,
    pub vebus_charge_state: VebusChargeState,
    pub time_remaining: TimeRemaining,
}

#[derive(Debug, Clone)]
pub struct LoadBalanceSettings {
    pub period: Duration,
    pub backoff: Duration,
    pub frequency_hz: f64,
}

/// Owns the AC-load meter and derives the inverter output and battery state
pub struct LoadBalanceEstimator<L: MeterConnector> {
    load_meter: MeterLink<L>,
    battery: Arc<dyn BatteryStateSource>,
    publisher: Arc<dyn TelemetryPublisher>,
    soc: SharedSoc,
    settings: LoadBalanceSettings,
    inverter_output: EnergyCounter,
    started: Instant,
}

impl<L: MeterConnector> LoadBalanceEstimator<L> {
    pub fn new(
        load_meter: L,
        battery: Arc<dyn BatteryStateSource>,
        publisher: Arc<dyn TelemetryPublisher>,
        soc: SharedSoc,
        settings: LoadBalanceSettings,
    ) -> Self {
        Self {
            load_meter: MeterLink::new(load_meter),
            battery,
            publisher,
            soc,
            settings,
            inverter_output: EnergyCounter::new(),
            started: Instant::now(),
        }
    }

    /// Runs cycles until shutdown is requested. A missing SOC stops the whole process.
    pub async fn run(mut self, shutdown: Shutdown) {
        info!("Starting AC loads and battery loop");
        loop {
            let pause = match self.run_cycle().await {
                Ok(_) => self.settings.period,
                Err(CycleError::Transient(e)) => {
                    warn!(error = %e, "Load cycle skipped, backing off");
                    self.settings.backoff + self.settings.period
                }
                Err(CycleError::Fatal(e)) => {
                    error!(error = %e, "Load loop cannot continue, shutting down");
                    shutdown.trigger();
                    break;
                }
            };
            if shutdown.sleep(pause).await {
                break;
            }
        }
        info!("AC loads and battery loop exiting");
    }

    pub async fn run_cycle(&mut self) -> Result<LoadCycle, CycleError> {
        let (relay_on, l1, l2) = match self.read_load_meter().await {
            Ok(readings) => readings,
            Err(e) => {
                self.inverter_output.pause();
                return Err(e);
            }
        };

        let snapshot = BatterySnapshot::read(self.battery.as_ref());
        let soc = snapshot.soc.ok_or_else(|| {
            CycleError::Fatal("battery SOC is unavailable, relay safety cannot be evaluated".into())
        })?;
        self.soc.set(soc).await;

        let cycle = self.derive_and_publish(soc, &l1, &l2, &snapshot)?;

        info!(
            "L-N: {}V, L1 Power: {}W, L2 Power: {}W, Total Power: {}W",
            cycle.output_voltage,
            l1.power,
            l2.power,
            l1.power + l2.power
        );
        info!(
            "L1 Reactive Power: {} VAR, L2 Reactive Power: {} VAR",
            l1.reactive, l2.reactive
        );
        info!(
            "Battery: {:.1}%, {:.2}V, Current: {}A, Consumed: {} ah, {} hrs",
            soc,
            snapshot.voltage.unwrap_or_default(),
            snapshot.current.map(|c| round_to(c, 1)).unwrap_or_default(),
            snapshot
                .consumed_ah
                .map(|ah| round_to(ah, 1).to_string())
                .unwrap_or_else(|| "?".to_string()),
            cycle.time_remaining
        );
        info!(
            "AC PV: Relay On: {}, PV Power: {}W, PV Current: {}A",
            relay_on,
            snapshot.total_pv_power().trunc(),
            snapshot.pv_current
        );

        Ok(cycle)
    }

    async fn read_load_meter(&mut self) -> Result<(bool, MeterReading, MeterReading), CycleError> {
        let device = self.load_meter.device().to_string();
        let context =
            |phase: &str, e: MeterError| CycleError::Transient(format!("{device} {phase}: {e}"));
        let relay_on = self
            .load_meter
            .relay_state(RELAY_INDEX)
            .await
            .map_err(|e| context("relay", e))?;
        let l1 = self
            .load_meter
            .emeter(0)
            .await
            .map_err(|e| context("phase L1", e))?;
        let l2 = self
            .load_meter
            .emeter(1)
            .await
            .map_err(|e| context("phase L2", e))?;
        Ok((relay_on, l1, l2))
    }

    /// Computes the output and battery values and publishes them as one batch.
    /// Nothing is published when a required battery value is unknown.
    fn derive_and_publish(
        &mut self,
        soc: f64,
        l1: &MeterReading,
        l2: &MeterReading,
        snapshot: &BatterySnapshot,
    ) -> Result<LoadCycle, CycleError> {
        let battery_voltage = snapshot
            .voltage
            .ok_or_else(|| CycleError::Transient("battery voltage is unavailable".into()))?;
        let battery_current = snapshot
            .current
            .map(|c| round_to(c, 1))
            .ok_or_else(|| CycleError::Transient("battery current is unavailable".into()))?;

        // Both output phases share the line-neutral voltage measured on L1
        let ln_voltage = round_to(l1.voltage, 2);
        let delta_l1 = l1.power - snapshot.pv_l1_power;
        let delta_l2 = l2.power - snapshot.pv_l2_power;
        let output_power = delta_l1 + delta_l2;

        let (charge_state, vebus_charge_state) =
            derive_charge_state(ln_voltage, battery_voltage, battery_current);
        let time_remaining =
            TimeRemaining::estimate(battery_current, snapshot.consumed_ah, snapshot.time_to_go_s);

        let now = Instant::now();
        let inverter_kwh = self.inverter_output.add(output_power, now);

        let mut batch = TelemetryBatch::new()
            .set(paths::OUT_L1_P, delta_l1)
            .set(paths::OUT_L2_P, delta_l2)
            .set(paths::OUT_P, output_power)
            .set(paths::OUT_L1_F, self.settings.frequency_hz)
            .set(paths::OUT_L2_F, self.settings.frequency_hz)
            .set(paths::OUT_L1_V, ln_voltage)
            .set(paths::OUT_L2_V, ln_voltage)
            .set(paths::OUT_L1_I, phase_current(l1.power, ln_voltage))
            .set(paths::OUT_L2_I, phase_current(l2.power, ln_voltage))
            .set(paths::VEBUS_CHARGE_STATE, vebus_charge_state.code())
            .set(paths::STATE, charge_state.code())
            .set(paths::DC_VOLTAGE, round_to(battery_voltage, 2))
            .set(paths::DC_CURRENT, round_to(battery_current, 2))
            .set(paths::ENERGY_INVERTER_TO_AC_OUT, inverter_kwh)
            .set(
                paths::ENERGY_TIME,
                now.duration_since(self.started).as_secs_f64(),
            );
        if let Some(power) = snapshot.power {
            batch = batch.set(paths::DC_POWER, power);
        }
        self.publisher.publish(batch);

        Ok(LoadCycle {
            soc,
            output_voltage: ln_voltage,
            output_power,
            charge_state,
            vebus_charge_state,
            time_remaining,
        })
    }
}
