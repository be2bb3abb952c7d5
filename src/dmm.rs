//! Keysight 34465A digital multimeter.

use log::warn;

use crate::error::Result;
use crate::scpi::{ScpiInstrument, Stream};
use crate::sweep::Probe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmmFunction {
    VoltageDc,
    CurrentDc,
}

impl DmmFunction {
    fn configure_command(self) -> &'static str {
        match self {
            DmmFunction::VoltageDc => "CONF:VOLT:DC",
            DmmFunction::CurrentDc => "CONF:CURR:DC",
        }
    }

    fn subsystem(self) -> &'static str {
        match self {
            DmmFunction::VoltageDc => "VOLT:DC",
            DmmFunction::CurrentDc => "CURR:DC",
        }
    }

    /// CSV column and the factor applied to raw readings for it.
    fn column(self) -> (&'static str, f64) {
        match self {
            DmmFunction::VoltageDc => ("VDC_DMM(V)", 1.0),
            DmmFunction::CurrentDc => ("IDC_DMM(µA)", 1e6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DmmSettings {
    pub function: DmmFunction,
    /// Integration time in power-line cycles; instrument default when unset.
    pub nplc: Option<f64>,
}

pub struct Dmm<T> {
    scpi: ScpiInstrument<T>,
}

impl<T: Stream> Dmm<T> {
    pub fn new(scpi: ScpiInstrument<T>) -> Self {
        Dmm { scpi }
    }

    pub fn identify(&mut self) -> Result<String> {
        self.scpi.identify()
    }

    /// Reset and arm for single immediate-trigger readings.
    pub fn configure(&mut self, settings: &DmmSettings) -> Result<()> {
        self.scpi.write("*RST")?;
        self.scpi.write("SYST:BEEP:STAT OFF")?;
        self.scpi.write(settings.function.configure_command())?;
        if let Some(nplc) = settings.nplc {
            self.scpi
                .write(&format!("{}:NPLC {}", settings.function.subsystem(), nplc))?;
        }
        self.scpi.write("SAMP:COUN 1")?;
        self.scpi.write("INIT:CONT ON")?;
        self.scpi.write("TRIG:SOUR IMM")?;
        Ok(())
    }

    /// Take one reading in base units (volts or amps).
    pub fn read(&mut self) -> Result<f64> {
        self.scpi.query_f64("READ?")
    }
}

/// Reads one DMM value per sample. Failed readings are recorded as NaN.
pub struct DmmProbe<T> {
    dmm: Dmm<T>,
    function: DmmFunction,
}

impl<T: Stream> DmmProbe<T> {
    pub fn new(dmm: Dmm<T>, function: DmmFunction) -> Self {
        DmmProbe { dmm, function }
    }
}

impl<T: Stream> Probe for DmmProbe<T> {
    fn columns(&self) -> Vec<String> {
        vec![self.function.column().0.to_string()]
    }

    fn sample(&mut self) -> Result<Vec<f64>> {
        let (_, scale) = self.function.column();
        let value = match self.dmm.read() {
            Ok(value) => value * scale,
            Err(e) => {
                warn!("DMM reading failed: {}", e);
                f64::NAN
            }
        };
        Ok(vec![value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn current_setup_sequence() {
        let mock = MockTransport::new(|_| None);
        let log = mock.log();
        let mut dmm = Dmm::new(ScpiInstrument::new("DMM", mock));
        dmm.configure(&DmmSettings { function: DmmFunction::CurrentDc, nplc: None })
            .unwrap();
        assert_eq!(
            log.commands(),
            vec![
                "*RST",
                "SYST:BEEP:STAT OFF",
                "CONF:CURR:DC",
                "SAMP:COUN 1",
                "INIT:CONT ON",
                "TRIG:SOUR IMM",
            ]
        );
    }

    #[test]
    fn voltage_setup_with_nplc() {
        let mock = MockTransport::new(|_| None);
        let log = mock.log();
        let mut dmm = Dmm::new(ScpiInstrument::new("DMM", mock));
        dmm.configure(&DmmSettings { function: DmmFunction::VoltageDc, nplc: Some(1.0) })
            .unwrap();
        let commands = log.commands();
        assert_eq!(commands[2], "CONF:VOLT:DC");
        assert_eq!(commands[3], "VOLT:DC:NPLC 1");
    }

    #[test]
    fn current_probe_reports_microamps() {
        let mock = MockTransport::new(|cmd| (cmd == "READ?").then(|| "+2.50000000E-05".to_string()));
        let dmm = Dmm::new(ScpiInstrument::new("DMM", mock));
        let mut probe = DmmProbe::new(dmm, DmmFunction::CurrentDc);

        assert_eq!(probe.columns(), vec!["IDC_DMM(µA)"]);
        let value = probe.sample().unwrap()[0];
        assert!((value - 25.0).abs() < 1e-9);
    }

    #[test]
    fn failed_reading_becomes_nan() {
        let mut replies = vec!["garbage".to_string(), "1.5".to_string()].into_iter();
        let mock = MockTransport::new(move |_| replies.next());
        let dmm = Dmm::new(ScpiInstrument::new("DMM", mock));
        let mut probe = DmmProbe::new(dmm, DmmFunction::VoltageDc);

        assert_eq!(probe.columns(), vec!["VDC_DMM(V)"]);
        assert!(probe.sample().unwrap()[0].is_nan());
        assert_eq!(probe.sample().unwrap(), vec![1.5]);
        // nothing left to answer with: the read times out
        assert!(probe.sample().unwrap()[0].is_nan());
    }
}
