use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, trace};

/// Paths of the virtual vebus inverter
pub mod paths {
    pub const MGMT_PROCESS_NAME: &str = "/Mgmt/ProcessName";
    pub const MGMT_PROCESS_VERSION: &str = "/Mgmt/ProcessVersion";
    pub const MGMT_CONNECTION: &str = "/Mgmt/Connection";
    pub const DEVICE_INSTANCE: &str = "/DeviceInstance";
    pub const PRODUCT_ID: &str = "/ProductId";
    pub const PRODUCT_NAME: &str = "/ProductName";
    pub const FIRMWARE_VERSION: &str = "/FirmwareVersion";
    pub const HARDWARE_VERSION: &str = "/HardwareVersion";
    pub const CONNECTED: &str = "/Connected";

    pub const STATE: &str = "/State";
    pub const MODE: &str = "/Mode";
    pub const POWER_MEASUREMENT_TYPE: &str = "/Ac/PowerMeasurementType";
    pub const VEBUS_CHARGE_STATE: &str = "/VebusChargeState";
    pub const VEBUS_ERROR: &str = "/VebusError";
    pub const NUMBER_OF_PHASES: &str = "/Ac/NumberOfPhases";

    pub const OUT_L1_P: &str = "/Ac/Out/L1/P";
    pub const OUT_L2_P: &str = "/Ac/Out/L2/P";
    pub const OUT_L1_I: &str = "/Ac/Out/L1/I";
    pub const OUT_L2_I: &str = "/Ac/Out/L2/I";
    pub const OUT_L1_V: &str = "/Ac/Out/L1/V";
    pub const OUT_L2_V: &str = "/Ac/Out/L2/V";
    pub const OUT_L1_F: &str = "/Ac/Out/L1/F";
    pub const OUT_L2_F: &str = "/Ac/Out/L2/F";
    pub const OUT_P: &str = "/Ac/Out/P";

    pub const IN_L1_P: &str = "/Ac/ActiveIn/L1/P";
    pub const IN_L2_P: &str = "/Ac/ActiveIn/L2/P";
    pub const IN_P: &str = "/Ac/ActiveIn/P";
    pub const IN_L1_V: &str = "/Ac/ActiveIn/L1/V";
    pub const IN_L2_V: &str = "/Ac/ActiveIn/L2/V";
    pub const IN_L1_F: &str = "/Ac/ActiveIn/L1/F";
    pub const IN_L2_F: &str = "/Ac/ActiveIn/L2/F";
    pub const IN_L1_I: &str = "/Ac/ActiveIn/L1/I";
    pub const IN_L2_I: &str = "/Ac/ActiveIn/L2/I";
    pub const IN_CONNECTED: &str = "/Ac/ActiveIn/Connected";
    pub const IN_ACTIVE_INPUT: &str = "/Ac/ActiveIn/ActiveInput";

    pub const DC_VOLTAGE: &str = "/Dc/0/Voltage";
    pub const DC_POWER: &str = "/Dc/0/Power";
    pub const DC_CURRENT: &str = "/Dc/0/Current";

    pub const ALARM_GRID_LOST: &str = "/Alarms/GridLost";

    pub const ENERGY_GRID_TO_DC: &str = "/Energy/GridToDc";
    pub const ENERGY_GRID_TO_AC_OUT: &str = "/Energy/GridToAcOut";
    pub const ENERGY_DC_TO_AC_OUT: &str = "/Energy/DcToAcOut";
    pub const ENERGY_AC_IN1_TO_INVERTER: &str = "/Energy/AcIn1ToInverter";
    pub const ENERGY_AC_IN1_TO_AC_OUT: &str = "/Energy/AcIn1ToAcOut";
    pub const ENERGY_INVERTER_TO_AC_OUT: &str = "/Energy/InverterToAcOut";
    pub const ENERGY_TIME: &str = "/Energy/Time";
}

/// A value stored on a telemetry path
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl TelemetryValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::Int(v) => Some(*v as f64),
            TelemetryValue::Float(v) => Some(*v),
            TelemetryValue::Text(_) => None,
        }
    }
}

impl From<i64> for TelemetryValue {
    fn from(value: i64) -> Self {
        TelemetryValue::Int(value)
    }
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        TelemetryValue::Float(value)
    }
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        TelemetryValue::Text(value.to_string())
    }
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Int(v) => write!(f, "{v}"),
            TelemetryValue::Float(v) => write!(f, "{v}"),
            TelemetryValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Path updates produced by one loop cycle, applied together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryBatch {
    updates: Vec<(&'static str, TelemetryValue)>,
}

impl TelemetryBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: &'static str, value: impl Into<TelemetryValue>) -> Self {
        self.updates.push((path, value.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(&'static str, TelemetryValue)> {
        self.updates.iter()
    }
}

/// Sink for derived values. Fire-and-forget: callers get no acknowledgment.
pub trait TelemetryPublisher: Send + Sync {
    /// Applies every update of `batch` or none of them
    fn publish(&self, batch: TelemetryBatch);

    fn set_path(&self, path: &'static str, value: TelemetryValue) {
        self.publish(TelemetryBatch::new().set(path, value));
    }
}

/// Static identity of the emulated device
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub process_name: String,
    pub process_version: String,
    pub connection: String,
    pub device_instance: i64,
    pub product_id: i64,
    pub product_name: String,
    pub firmware_version: i64,
    pub hardware_version: i64,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            process_name: env!("CARGO_PKG_NAME").to_string(),
            process_version: env!("CARGO_PKG_VERSION").to_string(),
            connection: "com.victronenergy.vebus.acinverter".to_string(),
            device_instance: 264,
            product_id: 127,
            product_name: "AC Inverter".to_string(),
            firmware_version: 100,
            hardware_version: 100,
        }
    }
}

/// The emulated inverter's attribute set. Only paths registered at creation
/// can be written.
#[derive(Clone)]
pub struct VirtualInverter {
    values: Arc<Mutex<BTreeMap<&'static str, TelemetryValue>>>,
}

impl VirtualInverter {
    pub fn new(identity: DeviceIdentity) -> Self {
        use paths::*;

        let mut values: BTreeMap<&'static str, TelemetryValue> = BTreeMap::new();
        let mut add = |path: &'static str, value: TelemetryValue| {
            values.insert(path, value);
        };

        add(MGMT_PROCESS_NAME, identity.process_name.as_str().into());
        add(MGMT_PROCESS_VERSION, identity.process_version.as_str().into());
        add(MGMT_CONNECTION, identity.connection.as_str().into());
        add(DEVICE_INSTANCE, identity.device_instance.into());
        add(PRODUCT_ID, identity.product_id.into());
        add(PRODUCT_NAME, identity.product_name.as_str().into());
        add(FIRMWARE_VERSION, identity.firmware_version.into());
        add(HARDWARE_VERSION, identity.hardware_version.into());
        add(CONNECTED, TelemetryValue::Int(1));

        add(STATE, TelemetryValue::Int(0));
        add(MODE, TelemetryValue::Int(3));
        add(POWER_MEASUREMENT_TYPE, TelemetryValue::Int(0));
        add(VEBUS_CHARGE_STATE, TelemetryValue::Int(0));
        add(VEBUS_ERROR, TelemetryValue::Int(0));
        add(NUMBER_OF_PHASES, TelemetryValue::Int(2));
        add(ALARM_GRID_LOST, TelemetryValue::Int(0));
        add(IN_CONNECTED, TelemetryValue::Int(0));
        add(IN_ACTIVE_INPUT, TelemetryValue::Int(0));

        // Measured values read -1 until the first cycle publishes them
        for path in [
            OUT_L1_P, OUT_L2_P, OUT_L1_I, OUT_L2_I, OUT_L1_V, OUT_L2_V, OUT_L1_F, OUT_L2_F, OUT_P,
            IN_L1_P, IN_L2_P, IN_P, IN_L1_V, IN_L2_V, IN_L1_F, IN_L2_F, IN_L1_I, IN_L2_I,
            DC_VOLTAGE, DC_POWER, DC_CURRENT,
        ] {
            add(path, TelemetryValue::Int(-1));
        }

        for path in [
            ENERGY_GRID_TO_DC,
            ENERGY_GRID_TO_AC_OUT,
            ENERGY_DC_TO_AC_OUT,
            ENERGY_AC_IN1_TO_INVERTER,
            ENERGY_AC_IN1_TO_AC_OUT,
            ENERGY_INVERTER_TO_AC_OUT,
            ENERGY_TIME,
        ] {
            add(path, TelemetryValue::Int(0));
        }

        Self {
            values: Arc::new(Mutex::new(values)),
        }
    }

    pub fn get(&self, path: &str) -> Option<TelemetryValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Convenience for numeric paths
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(|v| v.as_f64())
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, TelemetryValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for VirtualInverter {
    fn default() -> Self {
        Self::new(DeviceIdentity::default())
    }
}

impl TelemetryPublisher for VirtualInverter {
    fn publish(&self, batch: TelemetryBatch) {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((path, _)) = batch.iter().find(|(path, _)| !values.contains_key(*path)) {
            error!(path, "Rejecting telemetry batch with unknown path");
            return;
        }
        for (path, value) in batch.updates {
            trace!(path, %value, "Publish");
            values.entry(path).and_modify(|entry| *entry = value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::paths::*;
    use super::*;

    #[test]
    fn test_schema_defaults() {
        let inverter = VirtualInverter::default();
        assert_eq!(inverter.get(DEVICE_INSTANCE), Some(TelemetryValue::Int(264)));
        assert_eq!(inverter.get(PRODUCT_NAME), Some("AC Inverter".into()));
        assert_eq!(inverter.get_f64(OUT_P), Some(-1.0));
        assert_eq!(inverter.get_f64(NUMBER_OF_PHASES), Some(2.0));
        assert_eq!(inverter.get_f64(MODE), Some(3.0));
        assert_eq!(inverter.get_f64(ENERGY_TIME), Some(0.0));
    }

    #[test]
    fn test_publish_batch() {
        let inverter = VirtualInverter::default();
        inverter.publish(
            TelemetryBatch::new()
                .set(OUT_L1_P, 120.5)
                .set(OUT_L2_P, 80.0)
                .set(STATE, 9i64),
        );
        assert_eq!(inverter.get_f64(OUT_L1_P), Some(120.5));
        assert_eq!(inverter.get_f64(OUT_L2_P), Some(80.0));
        assert_eq!(inverter.get(STATE), Some(TelemetryValue::Int(9)));
    }

    #[test]
    fn test_unknown_path_rejects_whole_batch() {
        let inverter = VirtualInverter::default();
        inverter.publish(
            TelemetryBatch::new()
                .set(OUT_L1_P, 120.5)
                .set("/Ac/Out/L3/P", 10.0),
        );
        assert_eq!(inverter.get_f64(OUT_L1_P), Some(-1.0));
        assert_eq!(inverter.get("/Ac/Out/L3/P"), None);
    }

    #[test]
    fn test_set_path() {
        let inverter = VirtualInverter::default();
        inverter.set_path(ALARM_GRID_LOST, TelemetryValue::Int(2));
        assert_eq!(inverter.get_f64(ALARM_GRID_LOST), Some(2.0));
    }

    #[test]
    fn test_clones_share_values() {
        let inverter = VirtualInverter::default();
        let writer = inverter.clone();
        writer.set_path(DC_VOLTAGE, 52.4.into());
        assert_eq!(inverter.get_f64(DC_VOLTAGE), Some(52.4));
        assert!(inverter.snapshot().contains_key(DC_VOLTAGE));
    }
}
