//! Telemetry sink implementations.
//!
//! - [`JsonLinesSink`] - appends one JSON point per line to a file
//! - [`LogSink`] - emits points through `tracing` (target `telemetry`)

use heatbench_common::config::SinkConfig;
use heatbench_common::hal::driver::{SinkError, TelemetrySink};
use heatbench_common::telemetry::TelemetryPoint;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only JSON Lines file sink.
///
/// Writes are unbuffered: a batch that fails leaves nothing behind to be
/// written again alongside its retry.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write = File> {
    path: PathBuf,
    writer: W,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending; parent directories are created.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Telemetry file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: file,
        })
    }
}

impl<W: Write> JsonLinesSink<W> {
    /// Sink over an already opened writer; `path` is informational.
    pub fn from_writer(path: &Path, writer: W) -> Self {
        Self {
            path: path.to_path_buf(),
            writer,
        }
    }

    /// Output file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        let mut batch = Vec::with_capacity(points.len() * 96);
        for point in points {
            serde_json::to_writer(&mut batch, point)
                .map_err(|e| SinkError::Serialize(e.to_string()))?;
            batch.push(b'\n');
        }
        self.writer.write_all(&batch)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Sink that logs every point at INFO.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        for point in points {
            info!(
                target: "telemetry",
                board_id = point.board_id(),
                measurement = point.measurement(),
                signal = %point.signal(),
                value = point.value(),
                time = %point.time().to_rfc3339(),
                "point"
            );
        }
        Ok(())
    }
}

/// Create the sink selected by `config`.
pub fn create_sink(config: &SinkConfig) -> Result<Box<dyn TelemetrySink>, SinkError> {
    match config {
        SinkConfig::Jsonl { path } => Ok(Box::new(JsonLinesSink::open(path)?)),
        SinkConfig::Log => Ok(Box::new(LogSink)),
    }
}
