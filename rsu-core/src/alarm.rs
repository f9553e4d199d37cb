/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Physical alarm indicator (roadside warning light).
//!
//! The alarm is owned by the accident state machine thread and written from
//! nowhere else.  [`SysfsGpioAlarm`] drives one GPIO line through the sysfs
//! GPIO interface; the chip may be named by kernel name (`gpiochip0`), by
//! label (`gpioa`) or by device path (`/dev/gpiochip0`).
//!
//! The sysfs class interface is deprecated upstream and stands in for the
//! GPIO character device (`/dev/gpiochipN` line requests, as libgpiod does
//! it).  Chip lookup already accepts the same name / label / path forms, so
//! a chardev backend only needs another [`AlarmOutput`] implementation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Default sysfs GPIO class directory.
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AlarmError {
    /// No GPIO chip matched the configured name, label or path.
    #[error("GPIO chip '{chip}' not found under {root}")]
    ChipNotFound { chip: String, root: String },

    #[error("GPIO I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> AlarmError + '_ {
    move |source| AlarmError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ── AlarmOutput ───────────────────────────────────────────────────────────────

/// On/off output driven by the accident state machine.
pub trait AlarmOutput: Send {
    fn set(&mut self, on: bool) -> Result<(), AlarmError>;

    /// Release the output.  Called once during pipeline shutdown.
    fn close(&mut self) {}
}

// ── SysfsGpioAlarm ────────────────────────────────────────────────────────────

/// One output line exported through `/sys/class/gpio`.
///
/// Stand-in for a character-device line request; see the module docs.
#[derive(Debug)]
pub struct SysfsGpioAlarm {
    root: PathBuf,
    gpio: u32,
    value_path: PathBuf,
}

impl SysfsGpioAlarm {
    /// Open `line` on `chip` under the default sysfs root.
    ///
    /// # Errors
    /// [`AlarmError::ChipNotFound`] if the chip cannot be resolved,
    /// [`AlarmError::Io`] if exporting or configuring the line fails.
    pub fn open(chip: &str, line: u32) -> Result<Self, AlarmError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), chip, line)
    }

    /// Same as [`open`](Self::open) with an explicit sysfs root.
    pub fn open_at(root: &Path, chip: &str, line: u32) -> Result<Self, AlarmError> {
        let chip_dir = resolve_chip(root, chip)?;
        let base_path = chip_dir.join("base");
        let base: u32 = fs::read_to_string(&base_path)
            .map_err(io_err(&base_path))?
            .trim()
            .parse()
            .map_err(|e| AlarmError::Io {
                path: base_path.display().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?;

        let gpio = base + line;
        let gpio_dir = root.join(format!("gpio{gpio}"));
        if !gpio_dir.exists() {
            let export = root.join("export");
            fs::write(&export, gpio.to_string()).map_err(io_err(&export))?;
        }

        let direction = gpio_dir.join("direction");
        fs::write(&direction, "out").map_err(io_err(&direction))?;

        let value_path = gpio_dir.join("value");
        fs::write(&value_path, "0").map_err(io_err(&value_path))?;

        info!(chip, line, gpio, "alarm output ready");
        Ok(Self {
            root: root.to_path_buf(),
            gpio,
            value_path,
        })
    }

    pub fn gpio(&self) -> u32 {
        self.gpio
    }
}

impl AlarmOutput for SysfsGpioAlarm {
    fn set(&mut self, on: bool) -> Result<(), AlarmError> {
        fs::write(&self.value_path, if on { "1" } else { "0" })
            .map_err(io_err(&self.value_path))?;
        info!(on, "alarm set");
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.set(false) {
            warn!(error = %e, "failed to clear alarm on close");
        }
        let unexport = self.root.join("unexport");
        if let Err(e) = fs::write(&unexport, self.gpio.to_string()) {
            debug!(error = %e, gpio = self.gpio, "unexport failed");
        }
    }
}

/// Find the sysfs directory of `chip`.
///
/// Tried in order: exact directory name, `label` file contents, and the
/// file name of a `/dev/...` path.
fn resolve_chip(root: &Path, chip: &str) -> Result<PathBuf, AlarmError> {
    let not_found = || AlarmError::ChipNotFound {
        chip: chip.to_string(),
        root: root.display().to_string(),
    };

    let by_name = root.join(chip);
    if !chip.contains('/') && by_name.join("base").is_file() {
        return Ok(by_name);
    }

    let entries = fs::read_dir(root).map_err(io_err(root))?;
    for entry in entries.flatten() {
        let dir = entry.path();
        let is_chip = dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("gpiochip"));
        if !is_chip {
            continue;
        }
        if let Ok(label) = fs::read_to_string(dir.join("label")) {
            if label.trim() == chip {
                return Ok(dir);
            }
        }
    }

    if chip.starts_with('/') {
        let name = Path::new(chip)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(not_found)?;
        let dir = root.join(name);
        if dir.join("base").is_file() {
            return Ok(dir);
        }
    }

    Err(not_found())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Fake sysfs tree: one chip `gpiochip32` labelled `gpioa`, base 32,
    /// with line 17 (gpio49) already exported.
    fn fake_sysfs() -> TempDir {
        let dir = TempDir::new().unwrap();
        let chip = dir.path().join("gpiochip32");
        fs::create_dir(&chip).unwrap();
        fs::write(chip.join("base"), "32\n").unwrap();
        fs::write(chip.join("label"), "gpioa\n").unwrap();
        fs::create_dir(dir.path().join("gpio49")).unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        dir
    }

    fn value(dir: &TempDir) -> String {
        fs::read_to_string(dir.path().join("gpio49/value")).unwrap()
    }

    #[test]
    fn open_by_label_configures_output_low() {
        let sys = fake_sysfs();
        let alarm = SysfsGpioAlarm::open_at(sys.path(), "gpioa", 17).unwrap();
        assert_eq!(alarm.gpio(), 49);
        assert_eq!(
            fs::read_to_string(sys.path().join("gpio49/direction")).unwrap(),
            "out"
        );
        assert_eq!(value(&sys), "0");
    }

    #[test]
    fn open_by_kernel_name_and_dev_path() {
        let sys = fake_sysfs();
        assert!(SysfsGpioAlarm::open_at(sys.path(), "gpiochip32", 17).is_ok());
        assert!(SysfsGpioAlarm::open_at(sys.path(), "/dev/gpiochip32", 17).is_ok());
    }

    #[test]
    fn set_writes_line_value() {
        let sys = fake_sysfs();
        let mut alarm = SysfsGpioAlarm::open_at(sys.path(), "gpioa", 17).unwrap();
        alarm.set(true).unwrap();
        assert_eq!(value(&sys), "1");
        alarm.set(false).unwrap();
        assert_eq!(value(&sys), "0");
    }

    #[test]
    fn close_drives_line_low() {
        let sys = fake_sysfs();
        let mut alarm = SysfsGpioAlarm::open_at(sys.path(), "gpioa", 17).unwrap();
        alarm.set(true).unwrap();
        alarm.close();
        assert_eq!(value(&sys), "0");
    }

    #[test]
    fn unknown_chip_is_reported() {
        let sys = fake_sysfs();
        let err = SysfsGpioAlarm::open_at(sys.path(), "gpioz", 17).unwrap_err();
        assert!(matches!(err, AlarmError::ChipNotFound { .. }));
    }
}
