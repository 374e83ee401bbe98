use crate::charge_state::round_to;
use crate::meter_link::MeterReading;

/// Phase-1 voltage above which the grid counts as connected
pub const CONNECTED_VOLTAGE: f64 = 100.0;

/// Two-phase power flow derived from one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseFlow {
    pub power_l1: f64,
    pub power_l2: f64,
    pub current_l1: f64,
    pub current_l2: f64,
    pub voltage_l1: f64,
    pub voltage_l2: f64,
    pub frequency: f64,
    pub connected: bool,
}

impl PhaseFlow {
    /// Flow measured on two independent emeter channels
    pub fn from_readings(l1: &MeterReading, l2: &MeterReading, frequency: f64) -> Self {
        Self {
            power_l1: l1.power,
            power_l2: l2.power,
            current_l1: phase_current(l1.power, l1.voltage),
            current_l2: phase_current(l2.power, l2.voltage),
            voltage_l1: l1.voltage,
            voltage_l2: l2.voltage,
            frequency,
            connected: l1.voltage > CONNECTED_VOLTAGE,
        }
    }

    pub fn total_power(&self) -> f64 {
        self.power_l1 + self.power_l2
    }
}

/// Current in amps, zero when the phase has no voltage
pub fn phase_current(power: f64, voltage: f64) -> f64 {
    if voltage > 0.0 {
        round_to(power / voltage, 2)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn reading(voltage: f64, power: f64) -> MeterReading {
        MeterReading {
            voltage,
            power,
            reactive: 0.0,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn test_flow_from_readings() {
        let flow = PhaseFlow::from_readings(&reading(120.0, 600.0), &reading(121.0, -242.0), 60.0);
        assert_eq!(flow.total_power(), 358.0);
        assert_eq!(flow.current_l1, 5.0);
        assert_eq!(flow.current_l2, -2.0);
        assert_eq!(flow.frequency, 60.0);
        assert!(flow.connected);
    }

    #[test]
    fn test_zero_voltage_has_no_current() {
        let flow = PhaseFlow::from_readings(&reading(0.0, 600.0), &reading(0.0, 10.0), 60.0);
        assert_eq!(flow.current_l1, 0.0);
        assert_eq!(flow.current_l2, 0.0);
        assert!(!flow.connected);
    }

    #[test]
    fn test_connected_is_monotonic_in_l1_voltage() {
        for voltage in [0.0, 50.0, 99.9, CONNECTED_VOLTAGE] {
            let flow = PhaseFlow::from_readings(&reading(voltage, 0.0), &reading(240.0, 0.0), 60.0);
            assert!(!flow.connected, "{voltage}V should be disconnected");
        }
        for voltage in [100.1, 120.0, 240.0] {
            let flow = PhaseFlow::from_readings(&reading(voltage, 0.0), &reading(0.0, 0.0), 60.0);
            assert!(flow.connected, "{voltage}V should be connected");
        }
    }

    #[test]
    fn test_default_flow_is_zeroed() {
        let flow = PhaseFlow::default();
        assert_eq!(flow.total_power(), 0.0);
        assert!(!flow.connected);
    }
}
