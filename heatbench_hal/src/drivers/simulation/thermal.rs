//! First-order heater thermal model.
//!
//! Per poll, an active heater adds up to `heating_rate` °C toward its
//! objective, and every heater loses `cooling_coefficient * (T - ambient)`.

/// Thermal state of one simulated heater.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaterModel {
    temperature: f64,
    ambient: f64,
    heating_rate: f64,
    cooling_coefficient: f64,
    objective: f64,
    active: bool,
}

impl HeaterModel {
    /// Create a heater at ambient temperature, inactive.
    pub fn new(ambient: f64, heating_rate: f64, cooling_coefficient: f64) -> Self {
        Self {
            temperature: ambient,
            ambient,
            heating_rate,
            cooling_coefficient,
            objective: 0.0,
            active: false,
        }
    }

    /// Current temperature [°C].
    #[inline]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Whether the heater is switched on.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Objective temperature (0 = none).
    #[inline]
    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Switch the heater on or off.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Set the objective temperature.
    pub fn set_objective(&mut self, objective: f64) {
        self.objective = objective;
    }

    /// Advance the model by one poll.
    pub fn step(&mut self) {
        if self.active {
            let headroom = (self.objective - self.temperature).max(0.0);
            self.temperature += self.heating_rate.min(headroom);
        }
        self.temperature -= self.cooling_coefficient * (self.temperature - self.ambient);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_heater_stays_at_ambient() {
        let mut h = HeaterModel::new(22.0, 0.5, 0.05);
        for _ in 0..100 {
            h.step();
        }
        assert!((h.temperature() - 22.0).abs() < 1e-9);
    }

    #[test]
    fn active_heater_settles_near_objective() {
        let mut h = HeaterModel::new(22.0, 0.5, 0.05);
        h.set_objective(31.0);
        h.set_active(true);
        for _ in 0..500 {
            h.step();
        }
        // Heats to 31.0, then loses 0.05 * (31 - 22) each poll.
        assert!((h.temperature() - 30.55).abs() < 0.01);
    }

    #[test]
    fn heater_cools_after_switch_off() {
        let mut h = HeaterModel::new(22.0, 0.5, 0.05);
        h.set_objective(31.0);
        h.set_active(true);
        for _ in 0..50 {
            h.step();
        }
        let hot = h.temperature();
        h.set_active(false);
        h.step();
        assert!(h.temperature() < hot);
    }
}
