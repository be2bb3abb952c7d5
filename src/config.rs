//! Bench configuration, loaded from TOML.
//!
//! Every section is optional; missing values fall back to the instruments and
//! addresses of the current-source bench.
//!
//! ```toml
//! output = "data/afg_dmm_idc.csv"
//!
//! [afg]
//! resource = "USB0::0x0699::0x0345::C021866::INSTR"
//!
//! [afg.pulse]
//! frequency_hz = 1000.0
//!
//! [dso]
//! resource = "TCPIP0::192.168.1.40::4000::SOCKET"
//! channels = [1, 2]
//!
//! [pwm]
//! port = "/dev/ttyUSB0"
//!
//! [sweep]
//! start = 10
//! end = 90
//! settle_ms = 1000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::afg::PulseSettings;
use crate::dso::MeasurementType;
use crate::error::Result;
use crate::pwm::PwmSettings;
use crate::sweep::SweepConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// CSV file to write; each procedure has its own default name.
    pub output: Option<PathBuf>,
    /// VISA/socket I/O timeout.
    pub io_timeout_ms: u64,
    pub afg: AfgSection,
    pub dmm: DmmSection,
    pub dso: DsoSection,
    pub pwm: PwmSettings,
    pub sweep: SweepOverrides,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            output: None,
            io_timeout_ms: 5000,
            afg: AfgSection::default(),
            dmm: DmmSection::default(),
            dso: DsoSection::default(),
            pwm: PwmSettings::default(),
            sweep: SweepOverrides::default(),
        }
    }
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AfgSection {
    pub resource: String,
    pub pulse: PulseSettings,
}

impl Default for AfgSection {
    fn default() -> Self {
        AfgSection {
            resource: "USB0::0x0699::0x0345::C021866::INSTR".to_string(),
            pulse: PulseSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DmmSection {
    pub resource: String,
    /// Overrides the procedure's integration time.
    pub nplc: Option<f64>,
}

impl Default for DmmSection {
    fn default() -> Self {
        DmmSection {
            resource: "USB0::0x2A8D::0x0301::MY57503989::INSTR".to_string(),
            nplc: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DsoSection {
    pub resource: String,
    pub channels: Vec<u8>,
    pub measurements: Vec<MeasurementType>,
    pub autoset: bool,
    /// Wait after autoset before the sweep starts.
    pub autoset_settle_ms: u64,
    /// Wait between selecting a measurement type and reading it.
    pub measurement_settle_ms: u64,
}

impl Default for DsoSection {
    fn default() -> Self {
        DsoSection {
            resource: "USB0::0x0699::0x0408::C024253::INSTR".to_string(),
            channels: vec![1],
            measurements: MeasurementType::ALL.to_vec(),
            autoset: true,
            autoset_settle_ms: 3000,
            measurement_settle_ms: 200,
        }
    }
}

/// Sweep values that replace a procedure's defaults when set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepOverrides {
    pub start: Option<u8>,
    pub end: Option<u8>,
    pub samples: Option<usize>,
    pub settle_ms: Option<u64>,
    pub sample_interval_ms: Option<u64>,
}

impl SweepOverrides {
    pub fn apply(&self, base: SweepConfig) -> SweepConfig {
        SweepConfig {
            start: self.start.unwrap_or(base.start),
            end: self.end.unwrap_or(base.end),
            samples: self.samples.unwrap_or(base.samples),
            settle: self.settle_ms.map(Duration::from_millis).unwrap_or(base.settle),
            sample_interval: self
                .sample_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.sample_interval),
        }
    }
}
