//! Rocket interface: a status output and the launch detection inputs

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use tracing::debug;

pub trait LaunchMonitor {
    /// Drive the status line, `true` meaning "recording"
    fn set_status(&mut self, status: bool) -> io::Result<()>;
    fn is_triggered(&mut self) -> io::Result<bool>;
}

const PIN_STATUS_PLUS: u32 = 6;
const PIN_IGNITION_PLUS: u32 = 26;
const PIN_LIFT_OFF_A: u32 = 19;
const PIN_LIFT_OFF_B: u32 = 13;

/// GPIO through sysfs. The pins have to be exported (with their directions) beforehand.
pub struct SysfsLaunchMonitor {
    root: PathBuf,
}

impl SysfsLaunchMonitor {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let mut monitor = Self { root: root.into() };
        monitor.set_status(false)?;
        monitor.write_pin(PIN_LIFT_OFF_B, true)?;
        debug!(root = %monitor.root.display(), "Launch monitor ready");
        Ok(monitor)
    }

    fn value_path(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}")).join("value")
    }

    fn read_pin(&self, pin: u32) -> io::Result<bool> {
        read_level(&self.value_path(pin))
    }

    fn write_pin(&self, pin: u32, high: bool) -> io::Result<()> {
        fs::write(self.value_path(pin), if high { "1" } else { "0" })
    }
}

fn read_level(path: &Path) -> io::Result<bool> {
    match fs::read_to_string(path)?.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected GPIO level {other:?} in {}", path.display()),
        )),
    }
}

impl LaunchMonitor for SysfsLaunchMonitor {
    fn set_status(&mut self, status: bool) -> io::Result<()> {
        // Active low
        self.write_pin(PIN_STATUS_PLUS, !status)
    }

    /// Lift-off loop opened, or ignition line raised
    fn is_triggered(&mut self) -> io::Result<bool> {
        Ok(!self.read_pin(PIN_LIFT_OFF_A)? || self.read_pin(PIN_IGNITION_PLUS)?)
    }
}

/// Reports a launch straight away, for bench runs without the rocket interface
#[derive(Debug, Default)]
pub struct Immediate;

impl LaunchMonitor for Immediate {
    fn set_status(&mut self, _status: bool) -> io::Result<()> {
        Ok(())
    }

    fn is_triggered(&mut self) -> io::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_gpio(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("sige_gpio_{name}_{}", std::process::id()));
        for pin in [
            PIN_STATUS_PLUS,
            PIN_IGNITION_PLUS,
            PIN_LIFT_OFF_A,
            PIN_LIFT_OFF_B,
        ] {
            let dir = root.join(format!("gpio{pin}"));
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("value"), "0\n").unwrap();
        }
        root
    }

    fn level(root: &Path, pin: u32) -> bool {
        read_level(&root.join(format!("gpio{pin}")).join("value")).unwrap()
    }

    #[test]
    fn test_sysfs_status_and_trigger() {
        let root = fake_gpio("trigger");
        let mut monitor = SysfsLaunchMonitor::new(&root).unwrap();
        // Not recording yet drives the status line high, and lift-off B is held high
        assert!(level(&root, PIN_STATUS_PLUS));
        assert!(level(&root, PIN_LIFT_OFF_B));
        monitor.set_status(true).unwrap();
        assert!(!level(&root, PIN_STATUS_PLUS));

        // Lift-off loop closed, no ignition
        fs::write(root.join("gpio19/value"), "1\n").unwrap();
        assert!(!monitor.is_triggered().unwrap());
        fs::write(root.join("gpio26/value"), "1\n").unwrap();
        assert!(monitor.is_triggered().unwrap());
        fs::write(root.join("gpio26/value"), "0\n").unwrap();
        fs::write(root.join("gpio19/value"), "0\n").unwrap();
        assert!(monitor.is_triggered().unwrap());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_garbage_level_is_an_error() {
        let root = fake_gpio("garbage");
        let mut monitor = SysfsLaunchMonitor::new(&root).unwrap();
        fs::write(root.join("gpio19/value"), "high").unwrap();
        assert!(monitor.is_triggered().is_err());
        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_immediate() {
        assert!(Immediate.is_triggered().unwrap());
    }
}
