//! Digital output lines that drive the door strike relays.
//!
//! A [`GpioLine`] is owned by exactly one `DoorController`; nothing else in
//! the process writes to it. Two backends ship with the crate:
//!
//! - [`SysfsLine`]: the Linux `/sys/class/gpio` interface.
//! - [`SimulatedLine`]: records level changes in memory. Used by tests and by
//!   `zvezda serve --simulate` on machines without relays.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GpioLine
// ---------------------------------------------------------------------------

/// A single digital output.
///
/// Implementations report failures as plain `io::Error`s; the owning
/// controller turns them into `HardwareFault`s tagged with the door id.
pub trait GpioLine: Send + 'static {
    /// Configure the line as an output driven low. Must be idempotent.
    fn initialize(&mut self) -> std::io::Result<()>;

    fn set_high(&mut self) -> std::io::Result<()>;

    fn set_low(&mut self) -> std::io::Result<()>;

    /// Human-readable label for logs, e.g. `gpio17`.
    fn describe(&self) -> String;

    fn set(&mut self, level: Level) -> std::io::Result<()> {
        match level {
            Level::High => self.set_high(),
            Level::Low => self.set_low(),
        }
    }
}

// ---------------------------------------------------------------------------
// SysfsLine
// ---------------------------------------------------------------------------

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// Output line driven through the kernel's sysfs GPIO interface.
///
/// sysfs numbers lines globally: the line number is the controller's base
/// plus the line's offset on it. Raspberry Pi kernels before 6.6 put the
/// header GPIOs at base 0, so BCM 17 is `gpio17`; newer kernels start the
/// controller at 512 or above (see `gpiochip*/base`).
pub struct SysfsLine {
    root: PathBuf,
    chip_base: u32,
    offset: u32,
}

impl SysfsLine {
    /// Line `offset` on the controller numbered from `chip_base`.
    pub fn on_chip(root: impl Into<PathBuf>, chip_base: u32, offset: u32) -> Self {
        Self {
            root: root.into(),
            chip_base,
            offset,
        }
    }

    fn number(&self) -> std::io::Result<u32> {
        self.chip_base.checked_add(self.offset).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "line {} on chip base {} is out of range",
                    self.offset, self.chip_base
                ),
            )
        })
    }

    fn line_dir(&self) -> std::io::Result<PathBuf> {
        Ok(self.root.join(format!("gpio{}", self.number()?)))
    }

    fn write_attr(&self, attr: &str, value: &str) -> std::io::Result<()> {
        write_sysfs(&self.line_dir()?.join(attr), value)
    }
}

fn write_sysfs(path: &Path, value: &str) -> std::io::Result<()> {
    std::fs::write(path, value).map_err(|e| {
        std::io::Error::new(e.kind(), format!("write {}: {e}", path.display()))
    })
}

impl GpioLine for SysfsLine {
    fn initialize(&mut self) -> std::io::Result<()> {
        if !self.line_dir()?.is_dir() {
            write_sysfs(&self.root.join("export"), &self.number()?.to_string())?;
        }
        // "low" switches the direction to output and drives it low atomically,
        // so the relay never sees a floating or high level during setup.
        self.write_attr("direction", "low")
    }

    fn set_high(&mut self) -> std::io::Result<()> {
        self.write_attr("value", "1")
    }

    fn set_low(&mut self) -> std::io::Result<()> {
        self.write_attr("value", "0")
    }

    fn describe(&self) -> String {
        match self.number() {
            Ok(n) => format!("gpio{n}"),
            Err(_) => format!("gpio{}+{}", self.chip_base, self.offset),
        }
    }
}

// ---------------------------------------------------------------------------
// SimulatedLine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEvent {
    pub at: Instant,
    pub level: Level,
}

#[derive(Debug, Default)]
struct ProbeState {
    initialized: usize,
    events: Vec<LineEvent>,
}

/// Read-only view of a [`SimulatedLine`], kept by whoever built the line.
#[derive(Debug, Clone, Default)]
pub struct LineProbe(Arc<Mutex<ProbeState>>);

impl LineProbe {
    fn with<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Every level change, in the order it was driven.
    pub fn events(&self) -> Vec<LineEvent> {
        self.with(|s| s.events.clone())
    }

    /// Current level; a line that was never driven reads low.
    pub fn level(&self) -> Level {
        self.with(|s| s.events.last().map_or(Level::Low, |e| e.level))
    }

    pub fn initialized(&self) -> usize {
        self.with(|s| s.initialized)
    }

    /// Number of times the line went from low to high.
    pub fn activations(&self) -> usize {
        self.with(|s| {
            s.events
                .iter()
                .filter(|e| e.level == Level::High)
                .count()
        })
    }
}

/// In-memory output line.
pub struct SimulatedLine {
    label: String,
    probe: LineProbe,
}

impl SimulatedLine {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            probe: LineProbe::default(),
        }
    }

    pub fn probe(&self) -> LineProbe {
        self.probe.clone()
    }

    fn record(&self, level: Level) {
        tracing::debug!(line = %self.label, %level, "simulated line driven");
        self.probe.with(|s| {
            s.events.push(LineEvent {
                at: Instant::now(),
                level,
            })
        });
    }
}

impl GpioLine for SimulatedLine {
    fn initialize(&mut self) -> std::io::Result<()> {
        self.probe.with(|s| s.initialized += 1);
        Ok(())
    }

    fn set_high(&mut self) -> std::io::Result<()> {
        self.record(Level::High);
        Ok(())
    }

    fn set_low(&mut self) -> std::io::Result<()> {
        self.record(Level::Low);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("simulated:{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_sysfs(pin: u32) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(format!("gpio{pin}"))).unwrap();
        dir
    }

    #[test]
    fn sysfs_initialize_skips_export_for_exported_line() {
        let dir = fake_sysfs(17);
        let mut line = SysfsLine::on_chip(dir.path(), 0, 17);
        line.initialize().unwrap();

        assert!(!dir.path().join("export").exists());
        let direction = std::fs::read_to_string(dir.path().join("gpio17/direction")).unwrap();
        assert_eq!(direction, "low");
    }

    #[test]
    fn sysfs_initialize_is_idempotent() {
        let dir = fake_sysfs(4);
        let mut line = SysfsLine::on_chip(dir.path(), 0, 4);
        line.initialize().unwrap();
        line.initialize().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gpio4/direction")).unwrap(),
            "low"
        );
    }

    #[test]
    fn sysfs_levels_write_value_attribute() {
        let dir = fake_sysfs(27);
        let mut line = SysfsLine::on_chip(dir.path(), 0, 27);
        let value = dir.path().join("gpio27/value");

        line.set_high().unwrap();
        assert_eq!(std::fs::read_to_string(&value).unwrap(), "1");
        line.set(Level::Low).unwrap();
        assert_eq!(std::fs::read_to_string(&value).unwrap(), "0");
    }

    #[test]
    fn sysfs_missing_line_after_export_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut line = SysfsLine::on_chip(dir.path(), 0, 22);
        // No kernel behind the fake tree: export is written but gpio22/ never appears.
        let err = line.initialize().unwrap_err();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("export")).unwrap(),
            "22"
        );
        assert!(err.to_string().contains("gpio22"), "error: {err}");
    }

    #[test]
    fn sysfs_describe_names_pin() {
        assert_eq!(SysfsLine::on_chip(DEFAULT_SYSFS_ROOT, 0, 5).describe(), "gpio5");
    }

    #[test]
    fn sysfs_chip_base_offsets_line_number() {
        let dir = TempDir::new().unwrap();
        let mut line = SysfsLine::on_chip(dir.path(), 512, 17);
        assert_eq!(line.describe(), "gpio529");

        // Export is requested under the global number, not the header number.
        assert!(line.initialize().is_err());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("export")).unwrap(),
            "529"
        );

        std::fs::create_dir_all(dir.path().join("gpio529")).unwrap();
        line.initialize().unwrap();
        line.set_high().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gpio529/value")).unwrap(),
            "1"
        );
        assert!(!dir.path().join("gpio17").exists());
    }

    #[test]
    fn sysfs_out_of_range_line_fails_to_initialize() {
        let dir = TempDir::new().unwrap();
        let mut line = SysfsLine::on_chip(dir.path(), u32::MAX, 1);
        let err = line.initialize().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(!dir.path().join("export").exists());
        assert!(line.describe().contains("+1"));
    }

    #[tokio::test]
    async fn simulated_line_records_levels() {
        let mut line = SimulatedLine::new("inner");
        let probe = line.probe();
        assert_eq!(probe.level(), Level::Low);

        line.initialize().unwrap();
        line.set_high().unwrap();
        assert_eq!(probe.level(), Level::High);
        line.set_low().unwrap();

        assert_eq!(probe.initialized(), 1);
        assert_eq!(probe.activations(), 1);
        let levels: Vec<Level> = probe.events().iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![Level::High, Level::Low]);
    }
}
