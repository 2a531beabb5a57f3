use crate::config::{DoorSpec, DoorsConfig};
use crate::door::{DoorController, DoorStatus};
use crate::error::{Result, ZvezdaError};
use crate::gpio::GpioLine;

/// The fixed set of doors, keyed by id. Built once at startup.
#[derive(Debug)]
pub struct ActuationRegistry {
    // Configuration order is kept for listings; the set is small enough that
    // a linear scan beats hashing.
    doors: Vec<DoorController>,
}

impl ActuationRegistry {
    /// Build every configured door, creating its line through `line_factory`
    /// and initializing it once. Any failure aborts startup.
    pub fn from_config<F>(config: &DoorsConfig, mut line_factory: F) -> Result<Self>
    where
        F: FnMut(&DoorSpec) -> Box<dyn GpioLine>,
    {
        config.validate()?;
        let mut doors = Vec::with_capacity(config.doors.len());
        for spec in &config.doors {
            let mut line = line_factory(spec);
            line.initialize().map_err(|e| ZvezdaError::HardwareFault {
                door: spec.id.clone(),
                reason: format!("initialize {}: {e}", line.describe()),
            })?;
            tracing::info!(door = %spec.id, line = %line.describe(), "door line initialized");
            doors.push(DoorController::new(spec.id.clone(), line, config.timing)?);
        }
        Ok(Self { doors })
    }

    pub fn resolve(&self, door_id: &str) -> Result<&DoorController> {
        self.doors
            .iter()
            .find(|d| d.id() == door_id)
            .ok_or_else(|| ZvezdaError::UnknownDoor(door_id.to_string()))
    }

    pub fn statuses(&self) -> Vec<DoorStatus> {
        self.doors.iter().map(DoorController::status).collect()
    }

    /// Drive every line low and refuse further triggers. Keeps going past
    /// individual failures and reports the first one.
    pub fn release_all(&self) -> Result<()> {
        let mut first_error = None;
        for door in &self.doors {
            if let Err(e) = door.release() {
                tracing::error!(door = %door.id(), error = %e, "failed to release door");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(doors = self.doors.len(), "all door lines released");
                Ok(())
            }
        }
    }
}
