use std::time::Instant;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Accumulates kWh from periodic power samples. Only positive flow counts.
#[derive(Debug, Clone, Default)]
pub struct EnergyCounter {
    kwh: f64,
    last_sample: Option<Instant>,
}

impl EnergyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the energy of `power_w` held since the previous sample and
    /// returns the running total in kWh
    pub fn add(&mut self, power_w: f64, now: Instant) -> f64 {
        if let Some(last) = self.last_sample {
            let hours = now.saturating_duration_since(last).as_secs_f64() / SECONDS_PER_HOUR;
            if power_w.is_finite() && power_w > 0.0 {
                self.kwh += power_w * hours / 1000.0;
            }
        }
        self.last_sample = Some(now);
        self.kwh
    }

    /// Forgets the previous sample so a gap is not integrated
    pub fn pause(&mut self) {
        self.last_sample = None;
    }

    pub fn kwh(&self) -> f64 {
        self.kwh
    }
}
