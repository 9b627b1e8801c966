//! SCPI power-supply drivers.
//!
//! Instruments are reached through a line-oriented [`ScpiTransport`]. The
//! built-in transport is raw SCPI over TCP (LXI socket, port 5555).

mod dp832;

pub use dp832::Dp832;

use heatbench_common::config::PowerConfig;
use heatbench_common::consts::DEFAULT_SCPI_PORT;
use heatbench_common::hal::driver::{DriverError, PowerSupply};
use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_TIMEOUT_MS: i64 = 1000;

/// Answer to `*OPC?` once every earlier command has completed.
const OPC_ACK: &str = "1";

/// Line-oriented SCPI connection.
pub trait ScpiTransport: Send {
    /// Send one command without waiting for an answer.
    fn write_line(&mut self, command: &str) -> Result<(), DriverError>;

    /// Send one query and return the trimmed answer line.
    fn query(&mut self, command: &str) -> Result<String, DriverError>;

    /// Close the connection.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// Raw SCPI socket transport.
///
/// A query whose answer timed out leaves that answer in flight. Before the
/// next query the transport sends `*OPC?` and discards every line up to the
/// acknowledgement, so a late answer is never taken for the next one.
#[derive(Debug)]
pub struct TcpTransport {
    peer: SocketAddr,
    reader: Option<BufReader<TcpStream>>,
    /// Answers still owed for queries that timed out.
    unanswered: usize,
    /// `*OPC?` acknowledgements still owed.
    pending_acks: usize,
}

/// Resolve `host`, `host:port`, a bare IP (v4 or v6) or `[v6]:port`.
fn resolve_target(address: &str) -> Result<SocketAddr, DriverError> {
    if let Ok(peer) = address.parse::<SocketAddr>() {
        return Ok(peer);
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_SCPI_PORT));
    }
    let target = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_SCPI_PORT}")
    };
    target
        .to_socket_addrs()
        .map_err(|e| DriverError::NotFound(format!("{target}: {e}")))?
        .next()
        .ok_or_else(|| DriverError::NotFound(target.clone()))
}

impl TcpTransport {
    /// Connect to `address` (`host`, `host:port`, bare IP or `[v6]:port`).
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, DriverError> {
        let peer = resolve_target(address)?;

        let stream = TcpStream::connect_timeout(&peer, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        debug!("SCPI connected to {peer}");

        Ok(Self {
            peer,
            reader: Some(BufReader::new(stream)),
            unanswered: 0,
            pending_acks: 0,
        })
    }

    fn read_answer(&mut self) -> Result<String, DriverError> {
        let peer = self.peer;
        let mut line = String::new();
        let read = self.reader()?.read_line(&mut line)?;
        if read == 0 {
            return Err(DriverError::Unavailable(format!("{peer} closed the connection")));
        }
        Ok(line.trim().to_string())
    }

    /// Drain stale answers until every outstanding `*OPC?` is acknowledged.
    fn resync(&mut self) -> Result<(), DriverError> {
        warn!(
            "SCPI {}: discarding {} late answer(s) before the next query",
            self.peer, self.unanswered
        );
        self.write_line("*OPC?")?;
        self.pending_acks += 1;

        // One spare line for a fragment left over from a timed-out read.
        let budget = self.unanswered + self.pending_acks + 1;
        for _ in 0..budget {
            let line = self.read_answer()?;
            if line == OPC_ACK {
                self.pending_acks -= 1;
                if self.pending_acks == 0 {
                    self.unanswered = 0;
                    return Ok(());
                }
            } else {
                debug!("SCPI {}: dropped late answer {line:?}", self.peer);
            }
        }
        Err(DriverError::InvalidResponse(format!(
            "{}: no *OPC? acknowledgement after {budget} lines",
            self.peer
        )))
    }

    fn reader(&mut self) -> Result<&mut BufReader<TcpStream>, DriverError> {
        self.reader
            .as_mut()
            .ok_or_else(|| DriverError::Unavailable(format!("{} closed", self.peer)))
    }
}

impl ScpiTransport for TcpTransport {
    fn write_line(&mut self, command: &str) -> Result<(), DriverError> {
        let stream = self.reader()?.get_mut();
        stream.write_all(command.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    fn query(&mut self, command: &str) -> Result<String, DriverError> {
        if self.unanswered > 0 || self.pending_acks > 0 {
            self.resync()?;
        }
        self.write_line(command)?;
        match self.read_answer() {
            Err(DriverError::Timeout(e)) => {
                self.unanswered += 1;
                Err(DriverError::Timeout(e))
            }
            other => other,
        }
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| DriverError::Unavailable(format!("{} already closed", self.peer)))?;
        match reader.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already gone.
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn timeout_from(config: &PowerConfig) -> Result<Duration, DriverError> {
    let ms = match config.driver_config.get("timeout_ms") {
        None => DEFAULT_TIMEOUT_MS,
        Some(toml::Value::Integer(v)) if *v > 0 => *v,
        Some(other) => {
            return Err(DriverError::ConfigError(format!(
                "dp832 option 'timeout_ms' must be a positive integer, got {other}"
            )))
        }
    };
    Ok(Duration::from_millis(ms as u64))
}

/// Factory function to create a Rigol DP832 driver over TCP.
pub fn create_dp832(config: &PowerConfig) -> Result<Box<dyn PowerSupply>, DriverError> {
    let address = config
        .address
        .as_deref()
        .ok_or_else(|| DriverError::ConfigError("dp832 requires power.address".to_string()))?;
    let timeout = timeout_from(config)?;
    let transport = TcpTransport::connect(address, timeout)?;
    let psu = Dp832::open(transport)?;
    info!("Connected to {} at {address}", psu.identity());
    Ok(Box::new(psu))
}
