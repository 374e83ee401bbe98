use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Service that owns the system-wide battery and PV summary
pub const SYSTEM_ENTITY: &str = "com.victronenergy.system";

/// The fixed set of values read from the system service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatteryPath {
    Soc,
    Current,
    Voltage,
    Power,
    ConsumedAmphours,
    TimeToGo,
    PvCurrent,
    PvOnOutputL1Power,
    PvOnOutputL2Power,
}

impl BatteryPath {
    pub const ALL: [BatteryPath; 9] = [
        BatteryPath::Soc,
        BatteryPath::Current,
        BatteryPath::Voltage,
        BatteryPath::Power,
        BatteryPath::ConsumedAmphours,
        BatteryPath::TimeToGo,
        BatteryPath::PvCurrent,
        BatteryPath::PvOnOutputL1Power,
        BatteryPath::PvOnOutputL2Power,
    ];

    pub fn entity(&self) -> &'static str {
        SYSTEM_ENTITY
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatteryPath::Soc => "/Dc/Battery/Soc",
            BatteryPath::Current => "/Dc/Battery/Current",
            BatteryPath::Voltage => "/Dc/Battery/Voltage",
            BatteryPath::Power => "/Dc/Battery/Power",
            BatteryPath::ConsumedAmphours => "/Dc/Battery/ConsumedAmphours",
            BatteryPath::TimeToGo => "/Dc/Battery/TimeToGo",
            BatteryPath::PvCurrent => "/Dc/Pv/Current",
            BatteryPath::PvOnOutputL1Power => "/Ac/PvOnOutput/L1/Power",
            BatteryPath::PvOnOutputL2Power => "/Ac/PvOnOutput/L2/Power",
        }
    }
}

/// Read-only access to externally maintained battery telemetry.
/// `None` means the value is currently unknown.
pub trait BatteryStateSource: Send + Sync {
    fn value(&self, path: BatteryPath) -> Option<f64>;
}

/// Last known values of every [`BatteryPath`], shared between the feed that
/// writes them and the loops that read them
#[derive(Debug, Clone, Default)]
pub struct BatteryTelemetry {
    values: Arc<RwLock<HashMap<BatteryPath, f64>>>,
}

impl BatteryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value; `None` or a non-finite number marks the path unknown
    pub fn update(&self, path: BatteryPath, value: Option<f64>) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        match value.filter(|v| v.is_finite()) {
            Some(v) => {
                values.insert(path, v);
            }
            None => {
                values.remove(&path);
            }
        }
    }
}

impl BatteryStateSource for BatteryTelemetry {
    fn value(&self, path: BatteryPath) -> Option<f64> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
            .copied()
    }
}

/// Battery and PV values for one load loop cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BatterySnapshot {
    pub soc: Option<f64>,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub consumed_ah: Option<f64>,
    pub time_to_go_s: Option<f64>,
    /// PV values default to zero when unknown
    pub pv_current: f64,
    pub pv_l1_power: f64,
    pub pv_l2_power: f64,
}

impl BatterySnapshot {
    pub fn read<S: BatteryStateSource + ?Sized>(source: &S) -> Self {
        Self {
            soc: source.value(BatteryPath::Soc),
            voltage: source.value(BatteryPath::Voltage),
            current: source.value(BatteryPath::Current),
            power: source.value(BatteryPath::Power),
            consumed_ah: source.value(BatteryPath::ConsumedAmphours),
            time_to_go_s: source.value(BatteryPath::TimeToGo),
            pv_current: source.value(BatteryPath::PvCurrent).unwrap_or(0.0),
            pv_l1_power: source.value(BatteryPath::PvOnOutputL1Power).unwrap_or(0.0),
            pv_l2_power: source.value(BatteryPath::PvOnOutputL2Power).unwrap_or(0.0),
        }
    }

    pub fn total_pv_power(&self) -> f64 {
        self.pv_l1_power + self.pv_l2_power
    }
}
