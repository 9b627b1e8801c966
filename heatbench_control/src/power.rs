//! Power channel monitor with safety interlock.
//!
//! Owns the power-supply connection. Every sampled current is checked
//! against the software safety limit; a channel above it is switched off and
//! marked inactive before the reading can be used anywhere else.

use crate::shutdown::{ShutdownReport, ShutdownStep};
use heatbench_common::hal::driver::{DriverError, PowerSupply};
use heatbench_common::hal::types::{ChannelId, Reading};
use tracing::{debug, info, warn};

/// Setpoints and state of one supply channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Channel number.
    pub id: ChannelId,
    /// Voltage setpoint [V].
    pub voltage: f64,
    /// Current limit [A].
    pub current_limit: f64,
    /// Hardware OCP threshold [A].
    pub ocp: Option<f64>,
    /// Output state as last commanded.
    pub active: bool,
    /// Switched off by the safety check and not reactivated since.
    pub tripped: bool,
    /// The last safety cutoff command failed.
    pub cutoff_pending: bool,
}

/// Outcome of [`PowerChannelMonitor::enforce_safety`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyCheck {
    /// Current within the limit.
    Trusted,
    /// Over the limit on a live channel; it has just been switched off.
    Tripped,
    /// Over the limit on a channel that had already tripped.
    StillTripped,
}

impl SafetyCheck {
    /// Whether the sampled current may be used.
    pub fn is_trusted(self) -> bool {
        self == Self::Trusted
    }
}

/// Samples and safety-gates supply channels.
pub struct PowerChannelMonitor {
    psu: Box<dyn PowerSupply>,
    channels: Vec<Channel>,
    safety_limit: f64,
    trips: u64,
    released: bool,
}

impl PowerChannelMonitor {
    /// Take ownership of an open supply.
    pub fn new(psu: Box<dyn PowerSupply>, safety_limit: f64) -> Self {
        Self {
            psu,
            channels: Vec::new(),
            safety_limit,
            trips: 0,
            released: false,
        }
    }

    /// Write setpoints; enables OCP at `ocp` if given.
    pub fn configure(
        &mut self,
        channel: ChannelId,
        voltage: f64,
        current_limit: f64,
        ocp: Option<f64>,
    ) -> Result<(), DriverError> {
        self.psu.configure(channel, voltage, current_limit, ocp)?;
        match self.channels.iter_mut().find(|c| c.id == channel) {
            Some(c) => {
                c.voltage = voltage;
                c.current_limit = current_limit;
                c.ocp = ocp;
            }
            None => self.channels.push(Channel {
                id: channel,
                voltage,
                current_limit,
                ocp,
                active: false,
                tripped: false,
                cutoff_pending: false,
            }),
        }
        debug!("CH{channel} configured: {voltage}V, {current_limit}A, ocp={ocp:?}");
        Ok(())
    }

    /// Switch a configured channel on.
    pub fn activate(&mut self, channel: ChannelId) -> Result<(), DriverError> {
        let index = self.index_of(channel)?;
        self.psu.set_output(channel, true)?;
        self.channels[index].active = true;
        self.channels[index].tripped = false;
        info!("CH{channel} output ON");
        Ok(())
    }

    /// Switch a configured channel off. The channel is marked inactive even
    /// if the command fails.
    pub fn deactivate(&mut self, channel: ChannelId) -> Result<(), DriverError> {
        let index = self.index_of(channel)?;
        self.channels[index].active = false;
        self.psu.set_output(channel, false)?;
        info!("CH{channel} output OFF");
        Ok(())
    }

    /// Measure current and voltage of a channel.
    pub fn sample(&mut self, channel: ChannelId) -> Result<Reading, DriverError> {
        self.psu.measure(channel)
    }

    /// Check a sampled current against the safety limit.
    ///
    /// Above the limit (or for a non-finite reading) the channel is marked
    /// inactive and switched off. The trip is counted once per channel until
    /// it is activated again; later over-limit samples only resend the cutoff
    /// if the previous one failed. `Err` means the cutoff command itself
    /// failed and the reading must not be trusted either.
    pub fn enforce_safety(
        &mut self,
        channel: ChannelId,
        current: f64,
    ) -> Result<SafetyCheck, DriverError> {
        if current <= self.safety_limit {
            return Ok(SafetyCheck::Trusted);
        }
        let index = self.index_of(channel)?;
        let state = &self.channels[index];
        if state.tripped && !state.cutoff_pending {
            debug!("CH{channel} still above safety limit at {current}A, already off");
            return Ok(SafetyCheck::StillTripped);
        }
        let outcome = if state.tripped {
            SafetyCheck::StillTripped
        } else {
            self.trips += 1;
            warn!(
                channel,
                current,
                limit = self.safety_limit,
                "Current exceeds safety limit, switching CH{channel} off"
            );
            SafetyCheck::Tripped
        };

        self.channels[index].tripped = true;
        self.channels[index].cutoff_pending = true;
        self.deactivate(channel)?;
        self.channels[index].cutoff_pending = false;
        Ok(outcome)
    }

    /// Whether the channel output was last commanded on.
    pub fn is_active(&self, channel: ChannelId) -> bool {
        self.channels
            .iter()
            .any(|c| c.id == channel && c.active)
    }

    /// Configured channels in configuration order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Software safety limit [A].
    pub fn safety_limit(&self) -> f64 {
        self.safety_limit
    }

    /// Safety trips so far.
    pub fn trips(&self) -> u64 {
        self.trips
    }

    /// Whether [`release`](Self::release) already ran.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Switch every configured channel off, then close the supply.
    ///
    /// Each step is attempted even if an earlier one failed. Runs once;
    /// later calls do nothing.
    pub fn release(&mut self, report: &mut ShutdownReport) {
        if self.released {
            return;
        }
        self.released = true;

        let ids: Vec<ChannelId> = self.channels.iter().map(|c| c.id).collect();
        for channel in ids {
            let result = self.deactivate(channel);
            report.record(ShutdownStep::DeactivateChannel, format!("CH{channel}"), result);
        }
        let result = self.psu.close();
        if result.is_ok() {
            info!("Power supply '{}' closed", self.psu.name());
        }
        report.record(ShutdownStep::ClosePowerSupply, self.psu.name(), result);
    }

    fn index_of(&self, channel: ChannelId) -> Result<usize, DriverError> {
        self.channels
            .iter()
            .position(|c| c.id == channel)
            .ok_or_else(|| DriverError::ConfigError(format!("CH{channel} is not configured")))
    }
}

impl Drop for PowerChannelMonitor {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut report = ShutdownReport::default();
        self.release(&mut report);
        report.log();
    }
}

impl std::fmt::Debug for PowerChannelMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerChannelMonitor")
            .field("psu", &self.psu.name())
            .field("channels", &self.channels)
            .field("safety_limit", &self.safety_limit)
            .field("trips", &self.trips)
            .field("released", &self.released)
            .finish()
    }
}
