//! Per-door actuation state machine.
//!
//! ```text
//!            trigger (cooldown expired)
//!   Idle ───────────────────────────────▶ Actuating ── hold elapsed ──▶ Cooldown
//!    ▲                                                                    │
//!    └──────────────────────── cooldown window elapsed ───────────────────┘
//! ```
//!
//! A trigger that arrives before `last_triggered_at + cooldown` is rejected
//! with `TooEarly` in every state; nothing is queued. The check and the
//! transition to `Actuating` happen under the door's own mutex, so concurrent
//! callers on the same door cannot both win, while other doors never contend
//! on it.
//!
//! The hold runs in a spawned task that the caller awaits. Dropping the
//! caller does not cut the hold short: the line is released exactly `hold`
//! after it was raised.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::auth::Identity;
use crate::config::DoorTiming;
use crate::error::{Result, ZvezdaError};
use crate::gpio::{GpioLine, Level};

// ---------------------------------------------------------------------------
// DoorState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Idle,
    Actuating,
    Cooldown,
}

/// Snapshot of a door for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoorStatus {
    pub id: String,
    pub state: DoorState,
    pub cooldown_remaining_ms: u64,
}

/// Result of a completed actuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actuation {
    pub door: String,
    pub username: String,
    pub hold: Duration,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Window {
    last_triggered_at: Option<Instant>,
    actuating: bool,
    released: bool,
}

struct Shared {
    id: String,
    line: Mutex<Box<dyn GpioLine>>,
    window: Mutex<Window>,
}

impl Shared {
    // Neither mutex is held across an await or while calling user code that
    // can panic halfway through an update, so a poisoned guard is still valid.
    fn window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drive(&self, level: Level) -> Result<()> {
        let mut line = self.line.lock().unwrap_or_else(PoisonError::into_inner);
        line.set(level).map_err(|e| ZvezdaError::HardwareFault {
            door: self.id.clone(),
            reason: format!("drive {} {level}: {e}", line.describe()),
        })
    }

    /// Drive the line low, retrying once. Used on every path that must leave
    /// the relay de-energized.
    fn release_line(&self) -> Result<()> {
        match self.drive(Level::Low) {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(door = %self.id, error = %first, "release failed, retrying");
                self.drive(Level::Low)
            }
        }
    }

    async fn actuate(&self, hold: Duration) -> Result<()> {
        let _guard = ActuatingGuard(self);

        if let Err(e) = self.drive(Level::High) {
            tracing::error!(door = %self.id, error = %e, "failed to assert line");
            if let Err(release) = self.release_line() {
                tracing::error!(door = %self.id, error = %release, "failed to release line after fault");
            }
            return Err(e);
        }
        tracing::info!(door = %self.id, hold_ms = hold.as_millis() as u64, "line high");

        tokio::time::sleep(hold).await;

        let released = self.release_line();
        match &released {
            Ok(()) => tracing::info!(door = %self.id, "line low"),
            Err(e) => tracing::error!(door = %self.id, error = %e, "failed to release line"),
        }
        released
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let line = self.line.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = line.set_low() {
            tracing::error!(door = %self.id, error = %e, "failed to release line on drop");
        }
    }
}

/// Ends the `Actuating` state when the hold task finishes, including by panic.
struct ActuatingGuard<'a>(&'a Shared);

impl Drop for ActuatingGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let _ = self.0.release_line();
        }
        self.0.window().actuating = false;
    }
}

// ---------------------------------------------------------------------------
// DoorController
// ---------------------------------------------------------------------------

/// Authoritative state machine for one door; the only writer of its line.
pub struct DoorController {
    id: String,
    timing: DoorTiming,
    shared: Arc<Shared>,
}

impl DoorController {
    /// Build a controller around an already initialized line.
    pub fn new(id: impl Into<String>, line: Box<dyn GpioLine>, timing: DoorTiming) -> Result<Self> {
        timing.validate()?;
        let id = id.into();
        Ok(Self {
            shared: Arc::new(Shared {
                id: id.clone(),
                line: Mutex::new(line),
                window: Mutex::new(Window::default()),
            }),
            id,
            timing,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Open the door for `identity`.
    ///
    /// Resolves once the line has been released again, or immediately with
    /// `TooEarly` when the cooldown window is still open.
    pub async fn trigger(&self, identity: &Identity) -> Result<Actuation> {
        if let Err(e) = self.claim() {
            tracing::warn!(door = %self.id, user = %identity.username, error = %e, "trigger rejected");
            return Err(e);
        }
        tracing::info!(door = %self.id, user = %identity.username, "door opened");

        let shared = Arc::clone(&self.shared);
        let hold = self.timing.hold;
        let outcome = tokio::spawn(async move { shared.actuate(hold).await })
            .await
            .map_err(|e| ZvezdaError::HardwareFault {
                door: self.id.clone(),
                reason: format!("actuation task failed: {e}"),
            })?;
        outcome?;

        Ok(Actuation {
            door: self.id.clone(),
            username: identity.username.clone(),
            hold,
        })
    }

    /// Atomic check-and-transition into `Actuating`.
    fn claim(&self) -> Result<()> {
        let mut window = self.shared.window();
        if window.released {
            return Err(ZvezdaError::ShuttingDown(self.id.clone()));
        }
        let now = Instant::now();
        if let Some(last) = window.last_triggered_at {
            let ready_at = last + self.timing.cooldown;
            if now < ready_at || window.actuating {
                return Err(ZvezdaError::TooEarly {
                    door: self.id.clone(),
                    remaining: ready_at.saturating_duration_since(now),
                });
            }
        }
        window.last_triggered_at = Some(now);
        window.actuating = true;
        Ok(())
    }

    pub fn state(&self) -> DoorState {
        self.status().state
    }

    pub fn status(&self) -> DoorStatus {
        let window = self.shared.window();
        let now = Instant::now();
        let remaining = window
            .last_triggered_at
            .map(|last| (last + self.timing.cooldown).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        let state = if window.actuating {
            DoorState::Actuating
        } else if !remaining.is_zero() {
            DoorState::Cooldown
        } else {
            DoorState::Idle
        };
        DoorStatus {
            id: self.id.clone(),
            state,
            cooldown_remaining_ms: remaining.as_millis() as u64,
        }
    }

    /// Shutdown path: refuse further triggers and drive the line low now,
    /// even if a hold is still in flight.
    pub fn release(&self) -> Result<()> {
        let was_actuating = {
            let mut window = self.shared.window();
            window.released = true;
            window.actuating
        };
        if was_actuating {
            tracing::warn!(door = %self.id, "releasing line while actuating");
        }
        self.shared.release_line()
    }
}

impl std::fmt::Debug for DoorController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoorController")
            .field("id", &self.id)
            .field("timing", &self.timing)
            .finish_non_exhaustive()
    }
}
