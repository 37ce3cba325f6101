//! Experiment configuration, one TOML file per bench setup.
//!
//! ```toml
//! sample_name = "CA12X2"
//! description = "Cooldown with the sample in the cryostat"
//! area = 4.807e-2      # cm2
//! length = 2.376e-2    # cm
//! avg_measure = 5
//! delay = 0.1          # seconds between reads
//! limit = 10.0         # compliance: volts (current source) or amps (voltage source)
//! continuous_mode = false
//!
//! [source]
//! mode = "current"
//! samples = 100
//! flipped = true
//! shape = "ramp"
//! min = -1e-3
//! max = 1e-3
//!
//! [bus]
//! backend = "linux_gpib"
//! ```
//!
//! Setpoints in the run title (and so in the run directory) are printed in plain decimal
//! whatever the literal in this file: `min = -1e-3` gives `from -0.001 to 0.001A`.
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::types::SourceMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExperimentConfig {
    pub sample_name: String,
    #[serde(default)]
    pub description: String,
    pub area: f64,
    pub length: f64,
    pub avg_measure: usize,
    #[serde(default)]
    pub delay: f64,
    pub limit: f64,
    #[serde(default)]
    pub continuous_mode: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub source: SourceConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub instruments: InstrumentAddresses,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceConfig {
    pub mode: SourceMode,
    pub samples: usize,
    #[serde(default)]
    pub flipped: bool,
    #[serde(flatten)]
    pub shape: SourceShape,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SourceShape {
    Fixed { value: f64 },
    SquareWave { value: f64, period: u32 },
    Ramp { min: f64, max: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    LinuxGpib,
    Prologix,
    Simulation,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub backend: BusBackend,
    /// linux-gpib board index (`Gpib(0, addr)`)
    pub board: i32,
    /// Prologix adapter serial port
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::LinuxGpib,
            board: 0,
            port: "/dev/ttyUSB0".to_owned(),
            baud_rate: 115_200,
            timeout_ms: 3_000,
        }
    }
}

/// Primary GPIB addresses of the bench instruments.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InstrumentAddresses {
    /// Keithley 2000/2700 reading the DT-470 diode
    pub multimeter: u8,
    /// Keithley 2182A
    pub nanovoltmeter: u8,
    /// Keithley 6220
    pub current_source: u8,
    /// Keithley 2400
    pub source_meter: u8,
}

impl Default for InstrumentAddresses {
    fn default() -> Self {
        Self {
            multimeter: 16,
            nanovoltmeter: 7,
            current_source: 12,
            source_meter: 24,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ExperimentConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));
        if self.sample_name.trim().is_empty() {
            return invalid("sample_name must not be empty");
        }
        if !(self.area > 0.0 && self.area.is_finite() && self.length > 0.0 && self.length.is_finite()) {
            return invalid("area and length must be positive");
        }
        if self.avg_measure == 0 {
            return invalid("avg_measure must be at least 1");
        }
        // the engine sleeps `delay` after every read pair
        if Duration::try_from_secs_f64(self.delay).is_err() {
            return invalid("delay must be a finite number of seconds, not negative");
        }
        if !(self.limit > 0.0 && self.limit.is_finite()) {
            return invalid("limit must be positive");
        }
        if self.source.samples == 0 {
            return invalid("source.samples must be at least 1");
        }
        if let SourceShape::SquareWave { period: 0, .. } = self.source.shape {
            return invalid("square wave period must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
sample_name = "CA12X2"
area = 4.807e-2
length = 2.376e-2
avg_measure = 3
limit = 10.0

[source]
mode = "current"
samples = 50
shape = "ramp"
min = 0.0
max = 1e-3
"#;

    #[test]
    fn parses_with_defaults() {
        let cfg = ExperimentConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.source.mode, SourceMode::Current);
        assert_eq!(cfg.source.shape, SourceShape::Ramp { min: 0.0, max: 1e-3 });
        assert!(!cfg.source.flipped);
        assert!(!cfg.continuous_mode);
        assert_eq!(cfg.bus.backend, BusBackend::LinuxGpib);
        assert_eq!(cfg.instruments.source_meter, 24);
        assert_eq!(cfg.output_dir, PathBuf::from("."));
    }

    #[test]
    fn parses_square_wave_and_bus() {
        let text = MINIMAL.replace(
            "shape = \"ramp\"\nmin = 0.0\nmax = 1e-3",
            "shape = \"square_wave\"\nvalue = 2e-3\nperiod = 4\n\n[bus]\nbackend = \"simulation\"",
        );
        let cfg = ExperimentConfig::from_toml_str(&text).unwrap();
        assert_eq!(
            cfg.source.shape,
            SourceShape::SquareWave {
                value: 2e-3,
                period: 4
            }
        );
        assert_eq!(cfg.bus.backend, BusBackend::Simulation);
        assert_eq!(cfg.bus.timeout_ms, 3_000);
    }

    #[test]
    fn rejects_bad_geometry_and_window() {
        let text = MINIMAL.replace("area = 4.807e-2", "area = 0.0");
        assert!(matches!(
            ExperimentConfig::from_toml_str(&text),
            Err(ConfigError::Invalid(_))
        ));
        let text = MINIMAL.replace("avg_measure = 3", "avg_measure = 0");
        assert!(matches!(
            ExperimentConfig::from_toml_str(&text),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_toml_str("sample_name = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_delays_a_thread_cannot_sleep() {
        for delay in ["inf", "nan", "-0.5", "1e300"] {
            let text = MINIMAL.replace("limit = 10.0", &format!("limit = 10.0\ndelay = {delay}"));
            assert!(
                matches!(ExperimentConfig::from_toml_str(&text), Err(ConfigError::Invalid(_))),
                "delay = {delay} accepted"
            );
        }
        let text = MINIMAL.replace("limit = 10.0", "limit = 10.0\ndelay = 0.25");
        let cfg = ExperimentConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg.delay, 0.25);
    }
}
