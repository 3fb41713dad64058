// SPDX-License-Identifier: GPL-3.0-only

//! Local sounders
//!
//! Two ways to make noise when the alarm fires: spawn a playback command, or
//! open a serial port whose DTR line drives an external siren. Activation is
//! idempotent; deactivation tears the noise down and is likewise safe to
//! repeat. The controller owns exactly one sounder at a time.

use crate::errors::{AppError, AppResult};
use std::process::{Child, Command};
use tracing::{debug, warn};

/// Alarm noise side effect consumed by the controller.
pub trait Sounder: Send {
    fn activate(&mut self) -> AppResult<()>;
    fn deactivate(&mut self) -> AppResult<()>;
}

/// Runs the configured shell playback command for the duration of the alarm.
pub struct AudioSounder {
    command: String,
    child: Option<Child>,
}

impl AudioSounder {
    pub fn new(command: String) -> Self {
        Self {
            command,
            child: None,
        }
    }
}

impl Sounder for AudioSounder {
    fn activate(&mut self) -> AppResult<()> {
        if self.child.is_some() {
            return Ok(());
        }
        debug!(command = %self.command, "Starting playback");
        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .spawn()
            .map_err(|e| AppError::Sounder(format!("Failed to spawn playback: {}", e)))?;
        self.child = Some(child);
        Ok(())
    }

    fn deactivate(&mut self) -> AppResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Err(e) = child.kill() {
            warn!(error = %e, "Failed to kill playback process");
        }
        child
            .wait()
            .map_err(|e| AppError::Sounder(format!("Failed to reap playback: {}", e)))?;
        Ok(())
    }
}

/// Drives a siren wired to a serial port's DTR line; opening the port
/// asserts DTR, closing releases it.
pub struct SerialSounder {
    port: String,
    handle: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialSounder {
    pub fn new(port: String) -> Self {
        Self { port, handle: None }
    }
}

impl Sounder for SerialSounder {
    fn activate(&mut self) -> AppResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let handle = serialport::new(&self.port, 9600)
            .open()
            .map_err(|e| AppError::Sounder(format!("Failed to open {}: {}", self.port, e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn deactivate(&mut self) -> AppResult<()> {
        self.handle = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_sounder_runs_and_stops() {
        let mut sounder = AudioSounder::new("sleep 60".to_string());
        sounder.activate().unwrap();
        assert!(sounder.child.is_some());
        // Second activation keeps the existing process
        sounder.activate().unwrap();
        sounder.deactivate().unwrap();
        assert!(sounder.child.is_none());
        // Deactivation is idempotent
        sounder.deactivate().unwrap();
    }
}
