use crate::error::{Result, ZvezdaError};
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_HOLD: Duration = Duration::from_secs(5);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Environment variable holding a comma-separated `id=pin` list.
pub const DOORS_ENV: &str = "ZVEZDA_DOORS";

/// Doors defined by the legacy per-door pin variables, used when no explicit
/// door list is configured.
pub const LEGACY_PIN_ENV: &[(&str, &str)] = &[
    ("innerdoor", "PIN_INNERDOOR"),
    ("outerdoor", "PIN_OUTERDOOR"),
];

// ---------------------------------------------------------------------------
// DoorTiming
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorTiming {
    /// How long the line stays asserted per actuation.
    pub hold: Duration,
    /// Minimum interval between the starts of two actuations.
    pub cooldown: Duration,
}

impl DoorTiming {
    pub fn new(hold: Duration, cooldown: Duration) -> Result<Self> {
        let timing = Self { hold, cooldown };
        timing.validate()?;
        Ok(timing)
    }

    /// A cooldown shorter than the hold would let a second actuation start
    /// while the first still drives the line.
    pub fn validate(&self) -> Result<()> {
        if self.hold.is_zero() {
            return Err(ZvezdaError::InvalidTiming(
                "hold duration must be greater than zero".into(),
            ));
        }
        if self.cooldown < self.hold {
            return Err(ZvezdaError::InvalidTiming(format!(
                "cooldown ({}ms) must not be shorter than hold ({}ms)",
                self.cooldown.as_millis(),
                self.hold.as_millis()
            )));
        }
        Ok(())
    }
}

impl Default for DoorTiming {
    fn default() -> Self {
        Self {
            hold: DEFAULT_HOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

// ---------------------------------------------------------------------------
// DoorSpec
// ---------------------------------------------------------------------------

/// One configured door: its id and the output line number it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorSpec {
    pub id: String,
    pub pin: u32,
}

impl std::str::FromStr for DoorSpec {
    type Err = ZvezdaError;

    /// Parse `id=pin`, e.g. `innerdoor=17`.
    fn from_str(s: &str) -> Result<Self> {
        let (id, pin) = s
            .split_once('=')
            .ok_or_else(|| ZvezdaError::InvalidConfig(format!("expected ID=PIN, got '{s}'")))?;
        let id = id.trim();
        validate_door_id(id)?;
        Ok(Self {
            id: id.to_string(),
            pin: parse_pin(id, pin)?,
        })
    }
}

fn parse_pin(id: &str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|_| {
        ZvezdaError::InvalidConfig(format!("door '{id}': invalid line number '{raw}'"))
    })
}

pub fn validate_door_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ZvezdaError::InvalidConfig(format!(
            "invalid door id '{id}': must be lowercase alphanumeric, '-' or '_'"
        )))
    }
}

// ---------------------------------------------------------------------------
// DoorsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorsConfig {
    pub doors: Vec<DoorSpec>,
    pub timing: DoorTiming,
}

impl DoorsConfig {
    pub fn new(doors: Vec<DoorSpec>, timing: DoorTiming) -> Result<Self> {
        let config = Self { doors, timing };
        config.validate()?;
        Ok(config)
    }

    /// Parse a comma-separated `id=pin` list.
    pub fn parse_list(list: &str) -> Result<Vec<DoorSpec>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Resolve doors from the environment through `lookup`.
    ///
    /// `ZVEZDA_DOORS` wins when it names at least one door. Otherwise every
    /// legacy `PIN_*` variable is required, matching the two-door deployments
    /// this grew out of.
    pub fn doors_from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Vec<DoorSpec>> {
        if let Some(list) = lookup(DOORS_ENV) {
            let doors = Self::parse_list(&list)?;
            if !doors.is_empty() {
                return Ok(doors);
            }
        }
        LEGACY_PIN_ENV
            .iter()
            .map(|(id, var)| {
                let raw = lookup(var).ok_or_else(|| {
                    ZvezdaError::InvalidConfig(format!("environment variable {var} is not set"))
                })?;
                Ok(DoorSpec {
                    id: (*id).to_string(),
                    pin: parse_pin(id, &raw)?,
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.timing.validate()?;
        if self.doors.is_empty() {
            return Err(ZvezdaError::InvalidConfig("no doors configured".into()));
        }
        let mut ids = HashSet::new();
        let mut pins = HashSet::new();
        for door in &self.doors {
            validate_door_id(&door.id)?;
            if !ids.insert(door.id.as_str()) {
                return Err(ZvezdaError::InvalidConfig(format!(
                    "door '{}' configured twice",
                    door.id
                )));
            }
            if !pins.insert(door.pin) {
                return Err(ZvezdaError::InvalidConfig(format!(
                    "line {} is assigned to more than one door",
                    door.pin
                )));
            }
        }
        Ok(())
    }
}
