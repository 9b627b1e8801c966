//! Simulated multi-channel DC supply.
//!
//! Each enabled channel draws `idle_current` with a small deterministic
//! ripple. Hardware OCP is emulated: a channel whose current exceeds its OCP
//! threshold trips off. An overcurrent can be injected after a number of
//! samples to exercise the software safety limit.
//!
//! Driver options (`[power.driver_config]`):
//!
//! | key | default | meaning |
//! |---|---|---|
//! | `channels` | 3 | number of outputs, at most 16 |
//! | `idle_current` | 0.9 | current drawn by an enabled output [A] |
//! | `ripple` | 0.01 | ripple amplitude [A] |
//! | `overcurrent_after` | none | samples before the injected overcurrent |
//! | `overcurrent_value` | 1.3 | injected current [A] |

use heatbench_common::config::PowerConfig;
use heatbench_common::hal::driver::{DriverError, PowerSupply};
use heatbench_common::hal::types::{ChannelId, Reading};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const DEFAULT_CHANNELS: i64 = 3;
const MAX_CHANNELS: i64 = 16;
const DEFAULT_IDLE_CURRENT: f64 = 0.9;
const DEFAULT_RIPPLE: f64 = 0.01;
const DEFAULT_OVERCURRENT_VALUE: f64 = 1.3;

#[derive(Debug, Clone, Default)]
struct SimChannel {
    voltage: f64,
    current_limit: f64,
    ocp: Option<f64>,
    output: bool,
}

/// Simulated power supply implementing `PowerSupply`.
#[derive(Debug)]
pub struct SimulatedPowerSupply {
    channels: Vec<SimChannel>,
    idle_current: f64,
    ripple: f64,
    overcurrent_after: Option<u64>,
    overcurrent_value: f64,
    samples: u64,
    open: bool,
}

fn option_f64(
    options: &HashMap<String, toml::Value>,
    key: &str,
    default: f64,
) -> Result<f64, DriverError> {
    match options.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(v)) => Ok(*v),
        Some(toml::Value::Integer(v)) => Ok(*v as f64),
        Some(other) => Err(DriverError::ConfigError(format!(
            "simulation option '{key}' must be a number, got {other}"
        ))),
    }
}

fn option_int(
    options: &HashMap<String, toml::Value>,
    key: &str,
) -> Result<Option<i64>, DriverError> {
    match options.get(key) {
        None => Ok(None),
        Some(toml::Value::Integer(v)) if *v >= 0 => Ok(Some(*v)),
        Some(other) => Err(DriverError::ConfigError(format!(
            "simulation option '{key}' must be a non-negative integer, got {other}"
        ))),
    }
}

impl SimulatedPowerSupply {
    /// Create a supply with `channels` outputs and default behaviour.
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![SimChannel::default(); channels],
            idle_current: DEFAULT_IDLE_CURRENT,
            ripple: DEFAULT_RIPPLE,
            overcurrent_after: None,
            overcurrent_value: DEFAULT_OVERCURRENT_VALUE,
            samples: 0,
            open: true,
        }
    }

    /// Create a supply from `[power.driver_config]` options.
    pub fn from_config(config: &PowerConfig) -> Result<Self, DriverError> {
        let options = &config.driver_config;
        let channels = option_int(options, "channels")?.unwrap_or(DEFAULT_CHANNELS);
        if !(1..=MAX_CHANNELS).contains(&channels) {
            return Err(DriverError::ConfigError(format!(
                "simulation option 'channels' must be within 1..={MAX_CHANNELS}, got {channels}"
            )));
        }

        let mut supply = Self::new(channels as usize);
        supply.idle_current = option_f64(options, "idle_current", DEFAULT_IDLE_CURRENT)?;
        supply.ripple = option_f64(options, "ripple", DEFAULT_RIPPLE)?;
        supply.overcurrent_after = option_int(options, "overcurrent_after")?.map(|n| n as u64);
        supply.overcurrent_value =
            option_f64(options, "overcurrent_value", DEFAULT_OVERCURRENT_VALUE)?;

        info!(
            "Simulated power supply: {} channels, idle_current={:.3}A",
            channels, supply.idle_current
        );
        Ok(supply)
    }

    /// Inject an overcurrent after `samples` measurements.
    pub fn with_overcurrent_after(mut self, samples: u64, value: f64) -> Self {
        self.overcurrent_after = Some(samples);
        self.overcurrent_value = value;
        self
    }

    /// Whether a channel output is on.
    pub fn is_output_on(&self, channel: ChannelId) -> bool {
        self.channel_index(channel)
            .map(|i| self.channels[i].output)
            .unwrap_or(false)
    }

    fn channel_index(&self, channel: ChannelId) -> Option<usize> {
        let index = usize::from(channel).checked_sub(1)?;
        (index < self.channels.len()).then_some(index)
    }

    fn channel_mut(&mut self, channel: ChannelId) -> Result<&mut SimChannel, DriverError> {
        if !self.open {
            return Err(DriverError::Unavailable("simulated supply closed".to_string()));
        }
        let index = self.channel_index(channel).ok_or_else(|| {
            DriverError::ConfigError(format!("no channel {channel} on simulated supply"))
        })?;
        Ok(&mut self.channels[index])
    }
}

impl PowerSupply for SimulatedPowerSupply {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn configure(
        &mut self,
        channel: ChannelId,
        voltage: f64,
        current_limit: f64,
        ocp: Option<f64>,
    ) -> Result<(), DriverError> {
        let ch = self.channel_mut(channel)?;
        ch.voltage = voltage;
        ch.current_limit = current_limit;
        ch.ocp = ocp;
        debug!("sim CH{channel}: {voltage}V, {current_limit}A, ocp={ocp:?}");
        Ok(())
    }

    fn set_output(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError> {
        let ch = self.channel_mut(channel)?;
        ch.output = on;
        debug!("sim CH{channel} output {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    fn measure(&mut self, channel: ChannelId) -> Result<Reading, DriverError> {
        let samples = self.samples;
        let idle = self.idle_current;
        let ripple = self.ripple * (samples as f64 * 0.7).sin();
        let injected = self
            .overcurrent_after
            .filter(|&n| samples >= n)
            .map(|_| self.overcurrent_value);

        let ch = self.channel_mut(channel)?;
        if !ch.output {
            self.samples += 1;
            return Ok(Reading {
                current: 0.0,
                voltage: 0.0,
            });
        }

        // Constant-current limiting applies to the load model, not to a fault.
        let current = injected.unwrap_or_else(|| (idle + ripple).min(ch.current_limit));
        if let Some(ocp) = ch.ocp {
            if current > ocp {
                ch.output = false;
                warn!("sim CH{channel}: OCP tripped at {current:.3}A (threshold {ocp}A)");
                self.samples += 1;
                return Ok(Reading {
                    current: 0.0,
                    voltage: 0.0,
                });
            }
        }
        let voltage = ch.voltage - 0.01 * current;
        self.samples += 1;
        Ok(Reading { current, voltage })
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if !self.open {
            return Err(DriverError::Unavailable("simulated supply already closed".to_string()));
        }
        self.open = false;
        info!("Simulated power supply closed");
        Ok(())
    }
}
