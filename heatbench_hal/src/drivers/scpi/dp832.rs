//! Rigol DP832 / DP832A triple-output supply.

use super::ScpiTransport;
use heatbench_common::hal::driver::{DriverError, PowerSupply};
use heatbench_common::hal::types::{ChannelId, Reading};
use tracing::debug;

const CHANNELS: std::ops::RangeInclusive<ChannelId> = 1..=3;

/// DP832 driver over any SCPI transport.
#[derive(Debug)]
pub struct Dp832<T: ScpiTransport> {
    transport: T,
    identity: String,
}

impl<T: ScpiTransport> Dp832<T> {
    /// Identify the instrument on an open transport.
    pub fn open(mut transport: T) -> Result<Self, DriverError> {
        let identity = transport.query("*IDN?")?;
        if identity.is_empty() {
            return Err(DriverError::InvalidResponse("empty *IDN? answer".to_string()));
        }
        Ok(Self {
            transport,
            identity,
        })
    }

    /// `*IDN?` answer received on open.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn check_channel(channel: ChannelId) -> Result<(), DriverError> {
        if CHANNELS.contains(&channel) {
            Ok(())
        } else {
            Err(DriverError::ConfigError(format!("DP832 has no channel {channel}")))
        }
    }

    fn query_f64(&mut self, command: &str) -> Result<f64, DriverError> {
        let answer = self.transport.query(command)?;
        answer
            .parse::<f64>()
            .map_err(|_| DriverError::InvalidResponse(format!("{command} -> {answer:?}")))
    }
}

impl<T: ScpiTransport> PowerSupply for Dp832<T> {
    fn name(&self) -> &'static str {
        "dp832"
    }

    fn configure(
        &mut self,
        channel: ChannelId,
        voltage: f64,
        current_limit: f64,
        ocp: Option<f64>,
    ) -> Result<(), DriverError> {
        Self::check_channel(channel)?;
        self.transport.write_line(&format!("INST:NSEL {channel}"))?;
        self.transport.write_line(&format!("VOLT {voltage}"))?;
        self.transport.write_line(&format!("CURR {current_limit}"))?;
        if let Some(ocp) = ocp {
            self.transport.write_line(&format!("CURR:PROT {ocp}"))?;
            self.transport.write_line("CURR:PROT:STAT ON")?;
        }
        debug!("DP832 CH{channel}: {voltage}V {current_limit}A ocp={ocp:?}");
        Ok(())
    }

    fn set_output(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError> {
        Self::check_channel(channel)?;
        let state = if on { "ON" } else { "OFF" };
        self.transport.write_line(&format!("OUTP CH{channel},{state}"))
    }

    fn measure(&mut self, channel: ChannelId) -> Result<Reading, DriverError> {
        Self::check_channel(channel)?;
        let current = self.query_f64(&format!("MEAS:CURR? CH{channel}"))?;
        let voltage = self.query_f64(&format!("MEAS:VOLT? CH{channel}"))?;
        Ok(Reading { current, voltage })
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.transport.close()
    }
}
