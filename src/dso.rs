//! Tektronix MDO3104 oscilloscope, read through its immediate measurement slot.

use std::thread;
use std::time::Duration;

use log::warn;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::scpi::{ScpiInstrument, Stream};
use crate::sweep::Probe;

/// The scope reports 9.91E37 when a measurement cannot be taken.
const INVALID_READING: f64 = 9.9e37;

const CHANNELS: std::ops::RangeInclusive<u8> = 1..=4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Amplitude,
    Frequency,
    PositiveWidth,
    Period,
    DutyCycle,
}

impl MeasurementType {
    pub const ALL: [MeasurementType; 5] = [
        MeasurementType::Amplitude,
        MeasurementType::Frequency,
        MeasurementType::PositiveWidth,
        MeasurementType::Period,
        MeasurementType::DutyCycle,
    ];

    pub fn scpi(self) -> &'static str {
        match self {
            MeasurementType::Amplitude => "AMPl",
            MeasurementType::Frequency => "FREQ",
            MeasurementType::PositiveWidth => "PWI",
            MeasurementType::Period => "PER",
            MeasurementType::DutyCycle => "DUTY",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MeasurementType::Amplitude => "Amplitude (V)",
            MeasurementType::Frequency => "Frequency (Hz)",
            MeasurementType::PositiveWidth => "Positive Width (s)",
            MeasurementType::Period => "Period (s)",
            MeasurementType::DutyCycle => "Duty Cycle (%)",
        }
    }

    /// Column name suffix, prefixed with the channel in CSV output.
    pub fn column(self) -> &'static str {
        match self {
            MeasurementType::Amplitude => "Amplitude(V)",
            MeasurementType::Frequency => "Freq(Hz)",
            MeasurementType::PositiveWidth => "PosWidth(s)",
            MeasurementType::Period => "Period(s)",
            MeasurementType::DutyCycle => "DutyCycle(%)",
        }
    }
}

fn check_channel(channel: u8) -> Result<()> {
    if CHANNELS.contains(&channel) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "oscilloscope channel {} is not in {}..={}",
            channel,
            CHANNELS.start(),
            CHANNELS.end()
        )))
    }
}

pub struct Dso<T> {
    scpi: ScpiInstrument<T>,
}

impl<T: Stream> Dso<T> {
    pub fn new(scpi: ScpiInstrument<T>) -> Self {
        Dso { scpi }
    }

    pub fn identify(&mut self) -> Result<String> {
        self.scpi.identify()
    }

    pub fn enable_channel(&mut self, channel: u8) -> Result<()> {
        check_channel(channel)?;
        self.scpi.write(&format!("SELect:CH{} ON", channel))
    }

    /// Start an autoset. The scope needs a few seconds before it measures sensibly again.
    pub fn autoset(&mut self) -> Result<()> {
        self.scpi.write("AUTOSet EXECute")
    }

    /// Take one reading of each measurement type on `channel`, in order.
    ///
    /// `settle` is waited after selecting each type, before asking for its value.
    /// Readings that fail or come back as the scope's "no measurement" marker are NaN.
    pub fn measure(
        &mut self,
        channel: u8,
        types: &[MeasurementType],
        settle: Duration,
    ) -> Result<Vec<f64>> {
        check_channel(channel)?;
        self.scpi.write(&format!("MEASU:IMM:SOU1 CH{}", channel))?;

        let mut values = Vec::with_capacity(types.len());
        for ty in types {
            self.scpi.write(&format!("MEASU:IMM:TYPE {}", ty.scpi()))?;
            thread::sleep(settle);
            self.scpi.write("MEASU:IMM:VAL?")?;
            let value = match self.scpi.read_f64() {
                Ok(value) if value.abs() >= INVALID_READING => {
                    warn!("CH{} {}: no valid measurement", channel, ty.label());
                    f64::NAN
                }
                Ok(value) => value,
                Err(e) => {
                    warn!("CH{} {}: {}", channel, ty.label(), e);
                    f64::NAN
                }
            };
            values.push(value);
        }
        Ok(values)
    }
}

/// Samples every requested measurement on every requested channel.
pub struct DsoProbe<T> {
    dso: Dso<T>,
    channels: Vec<u8>,
    types: Vec<MeasurementType>,
    settle: Duration,
}

impl<T: Stream> DsoProbe<T> {
    pub fn new(
        dso: Dso<T>,
        channels: Vec<u8>,
        types: Vec<MeasurementType>,
        settle: Duration,
    ) -> Result<Self> {
        if channels.is_empty() || types.is_empty() {
            return Err(Error::InvalidArgument(
                "oscilloscope probe needs at least one channel and one measurement".to_string(),
            ));
        }
        for &channel in &channels {
            check_channel(channel)?;
        }
        Ok(DsoProbe { dso, channels, types, settle })
    }
}

impl<T: Stream> Probe for DsoProbe<T> {
    fn columns(&self) -> Vec<String> {
        self.channels
            .iter()
            .flat_map(|channel| {
                self.types
                    .iter()
                    .map(move |ty| format!("CH{}_{}", channel, ty.column()))
            })
            .collect()
    }

    fn sample(&mut self) -> Result<Vec<f64>> {
        let mut values = Vec::with_capacity(self.channels.len() * self.types.len());
        for &channel in &self.channels {
            values.extend(self.dso.measure(channel, &self.types, self.settle)?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    /// Answers each value query according to the last selected type.
    fn scope() -> MockTransport {
        let mut selected = String::new();
        MockTransport::new(move |cmd| {
            if let Some(ty) = cmd.strip_prefix("MEASU:IMM:TYPE ") {
                selected = ty.to_string();
                return None;
            }
            if cmd != "MEASU:IMM:VAL?" {
                return None;
            }
            let reply = match selected.as_str() {
                "AMPl" => "3.28",
                "FREQ" => "1.0E3",
                "PWI" => "2.5E-4",
                "PER" => "1.0E-3",
                "DUTY" => "9.91E37",
                _ => "",
            };
            Some(reply.to_string())
        })
    }

    #[test]
    fn measure_walks_types_in_order() {
        let mock = scope();
        let log = mock.log();
        let mut dso = Dso::new(ScpiInstrument::new("DSO", mock));
        let values = dso
            .measure(1, &MeasurementType::ALL, Duration::ZERO)
            .unwrap();

        assert_eq!(&values[..4], &[3.28, 1000.0, 2.5e-4, 1.0e-3]);
        assert!(values[4].is_nan());
        assert_eq!(
            log.commands(),
            vec![
                "MEASU:IMM:SOU1 CH1",
                "MEASU:IMM:TYPE AMPl",
                "MEASU:IMM:VAL?",
                "MEASU:IMM:TYPE FREQ",
                "MEASU:IMM:VAL?",
                "MEASU:IMM:TYPE PWI",
                "MEASU:IMM:VAL?",
                "MEASU:IMM:TYPE PER",
                "MEASU:IMM:VAL?",
                "MEASU:IMM:TYPE DUTY",
                "MEASU:IMM:VAL?",
            ]
        );
    }

    #[test]
    fn bad_channel_sends_nothing() {
        let mock = scope();
        let log = mock.log();
        let mut dso = Dso::new(ScpiInstrument::new("DSO", mock));
        assert!(dso.measure(5, &MeasurementType::ALL, Duration::ZERO).is_err());
        assert!(dso.enable_channel(0).is_err());
        assert!(log.commands().is_empty());
    }

    #[test]
    fn probe_covers_each_channel() {
        let mock = scope();
        let log = mock.log();
        let dso = Dso::new(ScpiInstrument::new("DSO", mock));
        let mut probe = DsoProbe::new(
            dso,
            vec![1, 2],
            vec![MeasurementType::Frequency, MeasurementType::Period],
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(
            probe.columns(),
            vec!["CH1_Freq(Hz)", "CH1_Period(s)", "CH2_Freq(Hz)", "CH2_Period(s)"]
        );
        assert_eq!(probe.sample().unwrap(), vec![1000.0, 1.0e-3, 1000.0, 1.0e-3]);
        assert_eq!(log.count("MEASU:IMM:SOU1 CH2"), 1);
    }

    #[test]
    fn probe_rejects_empty_selection() {
        let dso = Dso::new(ScpiInstrument::new("DSO", scope()));
        assert!(DsoProbe::new(dso, vec![], MeasurementType::ALL.to_vec(), Duration::ZERO).is_err());
    }
}
