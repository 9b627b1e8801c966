//! Per-board heater sequencing.
//!
//! ```text
//!   attach            settling exhausted         avg(i) >= target - hysteresis
//! Idle ──────► Settling ─────────────────► Warming(0) ──────────────────► Warming((i+1) mod n)
//!   ▲                                          │
//!   └──────────────── full_stop ───────────────┘
//! ```
//!
//! A transition releases the previous heater before arming the next one, so
//! at most one heater is on at any time. Once the previous heater is off the
//! state points at the next heater; arming is retried on following ticks
//! until it succeeds.

use heatbench_common::config::HeaterConfig;
use heatbench_common::hal::driver::{BoardError, BoardHandle};
use heatbench_common::hal::types::BoardLogLevel;
use tracing::{debug, info, warn};

/// Sequencer state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaterState {
    /// Not attached, or fully stopped.
    Idle,
    /// Ignoring the first ticks after attach.
    Settling {
        /// Ticks still to ignore.
        remaining: u32,
    },
    /// One heater is driven toward the target.
    Warming {
        /// Heater index.
        index: usize,
        /// Whether the heater was switched on successfully.
        armed: bool,
    },
}

/// What one [`HeaterSequencer::step`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Nothing to do.
    Idle,
    /// Tick ignored while settling.
    Settling {
        /// Ticks still to ignore.
        remaining: u32,
    },
    /// Heater switched on.
    Armed {
        /// Heater index.
        index: usize,
    },
    /// Active heater still below the advance threshold.
    Holding {
        /// Heater index.
        index: usize,
        /// Its average temperature [°C].
        temperature: f64,
    },
    /// Active heater reached the threshold and handed over.
    Advanced {
        /// Released heater.
        from: usize,
        /// Armed heater.
        to: usize,
    },
}

/// Heater state machine for one board. Owns the board handle.
pub struct HeaterSequencer {
    board: Box<dyn BoardHandle>,
    config: HeaterConfig,
    state: HeaterState,
    attached: bool,
    disconnected: bool,
}

impl HeaterSequencer {
    /// Wrap a board handle; nothing is sent to the board yet.
    pub fn new(board: Box<dyn BoardHandle>, config: HeaterConfig) -> Self {
        Self {
            board,
            config,
            state: HeaterState::Idle,
            attached: false,
            disconnected: false,
        }
    }

    /// Board identifier.
    pub fn board_id(&self) -> &str {
        self.board.board_id()
    }

    /// Current state.
    pub fn state(&self) -> HeaterState {
        self.state
    }

    /// Heater currently switched on, if any.
    pub fn active_heater(&self) -> Option<usize> {
        match self.state {
            HeaterState::Warming { index, armed: true } => Some(index),
            _ => None,
        }
    }

    /// Connect to the board, put all heaters off and start settling.
    pub fn attach(&mut self) -> Result<(), BoardError> {
        self.board.first_conn()?;
        self.attached = true;
        if self.board.heater_count() == 0 {
            return Err(BoardError::InvalidConfig(format!(
                "board {} reports no heaters",
                self.board_id()
            )));
        }
        self.board.prepare_heaters(false)?;
        self.state = HeaterState::Settling {
            remaining: self.config.settling_ticks,
        };
        info!(
            "Board {} attached: {} heaters, target {:.1}°C, advance at {:.1}°C",
            self.board_id(),
            self.board.heater_count(),
            self.config.target_temperature,
            self.config.advance_threshold()
        );
        Ok(())
    }

    /// Advance the board's sampling and refresh its temperature snapshot.
    pub fn poll(&mut self) -> Result<(), BoardError> {
        self.board.poll(false)
    }

    /// Run one tick of the state machine on the latest snapshot.
    pub fn step(&mut self) -> Result<StepOutcome, BoardError> {
        match self.state {
            HeaterState::Idle => Ok(StepOutcome::Idle),
            HeaterState::Settling { remaining } if remaining > 0 => {
                self.state = HeaterState::Settling {
                    remaining: remaining - 1,
                };
                Ok(StepOutcome::Settling {
                    remaining: remaining - 1,
                })
            }
            HeaterState::Settling { .. } => {
                self.state = HeaterState::Warming {
                    index: 0,
                    armed: false,
                };
                self.arm(0)?;
                Ok(StepOutcome::Armed { index: 0 })
            }
            HeaterState::Warming {
                index,
                armed: false,
            } => {
                self.arm(index)?;
                Ok(StepOutcome::Armed { index })
            }
            HeaterState::Warming { index, armed: true } => {
                let temperature = self
                    .board
                    .last_heater_temps()
                    .and_then(|s| s.avg_temp(index))
                    .ok_or(BoardError::MissingReading { heater: index })?;

                if temperature < self.config.advance_threshold() {
                    return Ok(StepOutcome::Holding { index, temperature });
                }

                let next = (index + 1) % self.board.heater_count();
                self.board.set_heater_active(index, false)?;
                self.state = HeaterState::Warming {
                    index: next,
                    armed: false,
                };
                info!(
                    "Board {}: heater {index} reached {temperature:.2}°C, advancing to heater {next}",
                    self.board_id()
                );
                self.board.set_heater_objective(index, 0.0)?;
                self.arm(next)?;
                Ok(StepOutcome::Advanced {
                    from: index,
                    to: next,
                })
            }
        }
    }

    /// Turn every heater off and go idle.
    pub fn full_stop(&mut self) -> Result<(), BoardError> {
        if !self.attached || self.disconnected {
            return Ok(());
        }
        self.board.heaters_deactivate_all()?;
        self.state = HeaterState::Idle;
        debug!("Board {}: all heaters off", self.board_id());
        Ok(())
    }

    /// Gracefully disconnect the board. Runs once.
    pub fn disconnect(&mut self, message: &str) -> Result<(), BoardError> {
        if !self.attached || self.disconnected {
            return Ok(());
        }
        self.disconnected = true;
        self.board.stop(message)?;
        info!("Board {} disconnected", self.board_id());
        Ok(())
    }

    /// Roll the board's log files on a new day.
    pub fn roll_logs(&mut self) -> Result<(), BoardError> {
        self.board.check_newday_and_roll_logfiles()
    }

    /// Write a line to the board's own log.
    pub fn log(&mut self, message: &str, level: BoardLogLevel) {
        self.board.log(message, level);
    }

    pub(crate) fn board_mut(&mut self) -> &mut dyn BoardHandle {
        self.board.as_mut()
    }

    fn arm(&mut self, index: usize) -> Result<(), BoardError> {
        self.board
            .set_heater_objective(index, self.config.target_temperature)?;
        self.board.set_heater_active(index, true)?;
        self.state = HeaterState::Warming { index, armed: true };
        debug!(
            "Board {}: heater {index} on, objective {:.1}°C",
            self.board_id(),
            self.config.target_temperature
        );
        Ok(())
    }
}

impl Drop for HeaterSequencer {
    fn drop(&mut self) {
        if !self.attached || self.disconnected {
            return;
        }
        if let Err(e) = self.full_stop() {
            warn!("Board {}: heater stop on drop failed: {e}", self.board_id());
        }
        if let Err(e) = self.disconnect("Stopping inspection.") {
            warn!("Board {}: disconnect on drop failed: {e}", self.board_id());
        }
    }
}

impl std::fmt::Debug for HeaterSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaterSequencer")
            .field("board", &self.board.board_id())
            .field("state", &self.state)
            .field("attached", &self.attached)
            .field("disconnected", &self.disconnected)
            .finish()
    }
}
