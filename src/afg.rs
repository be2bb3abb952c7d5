//! Tektronix AFG3252 arbitrary function generator, used as a pulse source.

use log::info;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::scpi::{ScpiInstrument, Stream};
use crate::sweep::DutySource;

/// Pulse output on channel 1.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PulseSettings {
    pub frequency_hz: f64,
    pub high_v: f64,
    pub low_v: f64,
    /// Hi-Z load instead of 50 ohm, so the programmed levels appear at an unterminated input.
    pub high_impedance: bool,
    /// Leading and trailing edge time in seconds; the instrument default when unset.
    pub edge_time_s: Option<f64>,
    /// Send `*RST` before configuring.
    pub reset: bool,
}

impl Default for PulseSettings {
    fn default() -> Self {
        PulseSettings {
            frequency_hz: 1000.0,
            high_v: 3.3,
            low_v: 0.0,
            high_impedance: true,
            edge_time_s: Some(5e-9),
            reset: true,
        }
    }
}

pub struct Afg<T> {
    scpi: ScpiInstrument<T>,
}

impl<T: Stream> Afg<T> {
    pub fn new(scpi: ScpiInstrument<T>) -> Self {
        Afg { scpi }
    }

    pub fn identify(&mut self) -> Result<String> {
        self.scpi.identify()
    }

    /// Set up a pulse train and enable the output.
    pub fn configure_pulse(&mut self, settings: &PulseSettings) -> Result<()> {
        if settings.high_v <= settings.low_v {
            return Err(Error::InvalidArgument(format!(
                "pulse high level {} V must be above low level {} V",
                settings.high_v, settings.low_v
            )));
        }
        if settings.reset {
            self.scpi.write("*RST")?;
        }
        self.scpi.write("SOURce1:FUNCtion PULSe")?;
        self.scpi.write(&format!("SOURce1:FREQuency {}", settings.frequency_hz))?;
        if settings.high_impedance {
            self.scpi.write("OUTPut1:IMPedance INF")?;
        } else {
            self.scpi.write("OUTPut1:IMPedance 50")?;
        }

        let amplitude = settings.high_v - settings.low_v;
        let offset = (settings.high_v + settings.low_v) / 2.0;
        self.scpi.write(&format!("SOURce1:VOLTage:AMPLitude {}", amplitude))?;
        self.scpi.write(&format!("SOURce1:VOLTage:OFFSet {}", offset))?;

        if let Some(edge) = settings.edge_time_s {
            self.scpi.write(&format!("SOURce1:PULSe:TRANsition:LEADing {:E}", edge))?;
            self.scpi.write(&format!("SOURce1:PULSe:TRANsition:TRAiling {:E}", edge))?;
        }

        self.set_output(true)?;
        info!(
            "{}: {} Hz pulse, {} V..{} V",
            self.scpi.name(),
            settings.frequency_hz,
            settings.low_v,
            settings.high_v
        );
        Ok(())
    }

    pub fn set_duty_cycle(&mut self, duty: u8) -> Result<()> {
        if duty > 100 {
            return Err(Error::InvalidArgument(format!("duty cycle {}% is above 100%", duty)));
        }
        self.scpi.write(&format!("SOURce1:PULSe:DCYCle {}", duty))
    }

    pub fn set_output(&mut self, on: bool) -> Result<()> {
        self.scpi.write(if on { "OUTPut1 ON" } else { "OUTPut1 OFF" })
    }
}

impl<T: Stream> DutySource for Afg<T> {
    fn set_duty_cycle(&mut self, duty: u8) -> Result<bool> {
        Afg::set_duty_cycle(self, duty)?;
        Ok(true)
    }

    fn shutdown(&mut self) -> Result<()> {
        self.set_output(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    #[test]
    fn pulse_setup_sequence() {
        let mock = MockTransport::new(|_| None);
        let log = mock.log();
        let mut afg = Afg::new(ScpiInstrument::new("AFG", mock));
        afg.configure_pulse(&PulseSettings::default()).unwrap();

        assert_eq!(
            log.commands(),
            vec![
                "*RST",
                "SOURce1:FUNCtion PULSe",
                "SOURce1:FREQuency 1000",
                "OUTPut1:IMPedance INF",
                "SOURce1:VOLTage:AMPLitude 3.3",
                "SOURce1:VOLTage:OFFSet 1.65",
                "SOURce1:PULSe:TRANsition:LEADing 5E-9",
                "SOURce1:PULSe:TRANsition:TRAiling 5E-9",
                "OUTPut1 ON",
            ]
        );
    }

    #[test]
    fn plain_pulse_without_reset_or_edges() {
        let mock = MockTransport::new(|_| None);
        let log = mock.log();
        let mut afg = Afg::new(ScpiInstrument::new("AFG", mock));
        let settings = PulseSettings {
            frequency_hz: 2500.0,
            high_v: 5.0,
            low_v: 1.0,
            high_impedance: false,
            edge_time_s: None,
            reset: false,
        };
        afg.configure_pulse(&settings).unwrap();

        assert_eq!(
            log.commands(),
            vec![
                "SOURce1:FUNCtion PULSe",
                "SOURce1:FREQuency 2500",
                "OUTPut1:IMPedance 50",
                "SOURce1:VOLTage:AMPLitude 4",
                "SOURce1:VOLTage:OFFSet 3",
                "OUTPut1 ON",
            ]
        );
    }

    #[test]
    fn inverted_levels_are_rejected() {
        let mock = MockTransport::new(|_| None);
        let log = mock.log();
        let mut afg = Afg::new(ScpiInstrument::new("AFG", mock));
        let settings = PulseSettings { high_v: 0.0, low_v: 3.3, ..Default::default() };
        assert!(afg.configure_pulse(&settings).is_err());
        assert!(log.commands().is_empty());
    }

    #[test]
    fn duty_source_sets_and_shuts_down() {
        let mock = MockTransport::new(|_| None);
        let log = mock.log();
        let mut afg = Afg::new(ScpiInstrument::new("AFG", mock));

        assert!(DutySource::set_duty_cycle(&mut afg, 42).unwrap());
        assert!(DutySource::set_duty_cycle(&mut afg, 101).is_err());
        afg.shutdown().unwrap();

        assert_eq!(log.commands(), vec!["SOURce1:PULSe:DCYCle 42", "OUTPut1 OFF"]);
    }
}
