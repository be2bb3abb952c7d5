//! The duty-cycle sweep loop shared by every procedure.

use std::thread;
use std::time::Duration;

use log::info;

use crate::error::{Error, Result};

/// Something that can be driven to a PWM duty cycle.
pub trait DutySource {
    /// Apply `duty` percent. Returns `false` when the setpoint should be
    /// skipped without measuring.
    fn set_duty_cycle(&mut self, duty: u8) -> Result<bool>;

    /// Leave the source in a safe state once the sweep is over.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Something that produces one reading per CSV column.
pub trait Probe {
    fn columns(&self) -> Vec<String>;

    fn sample(&mut self) -> Result<Vec<f64>>;
}

impl<S: DutySource + ?Sized> DutySource for Box<S> {
    fn set_duty_cycle(&mut self, duty: u8) -> Result<bool> {
        (**self).set_duty_cycle(duty)
    }

    fn shutdown(&mut self) -> Result<()> {
        (**self).shutdown()
    }
}

impl<P: Probe + ?Sized> Probe for Box<P> {
    fn columns(&self) -> Vec<String> {
        (**self).columns()
    }

    fn sample(&mut self) -> Result<Vec<f64>> {
        (**self).sample()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// First duty cycle, in percent.
    pub start: u8,
    /// Last duty cycle, inclusive.
    pub end: u8,
    pub samples: usize,
    /// Wait after changing the duty cycle, before the first sample.
    pub settle: Duration,
    /// Wait after each sample.
    pub sample_interval: Duration,
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.end > 100 {
            return Err(Error::InvalidArgument(format!(
                "duty cycle end {}% is above 100%",
                self.end
            )));
        }
        if self.start > self.end {
            return Err(Error::InvalidArgument(format!(
                "duty cycle start {}% is after end {}%",
                self.start, self.end
            )));
        }
        if self.samples == 0 {
            return Err(Error::InvalidArgument(
                "at least one sample per duty cycle is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn points(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

/// One row of results: the commanded duty cycle and the averaged readings.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPoint {
    pub duty: u8,
    pub values: Vec<f64>,
}

/// Column-wise mean of a set of samples. NaN readings propagate into the mean.
pub fn average(samples: &[Vec<f64>]) -> Vec<f64> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    let mut sums = vec![0.0; first.len()];
    for sample in samples {
        for (sum, value) in sums.iter_mut().zip(sample) {
            *sum += value;
        }
    }
    let count = samples.len() as f64;
    sums.into_iter().map(|sum| sum / count).collect()
}

/// Step `source` through the configured duty cycles, averaging `probe` at each.
///
/// Completed points are pushed onto `points` as they are taken, so on error the
/// caller still holds every row measured before the failure.
pub fn run_sweep<S, P>(
    source: &mut S,
    probe: &mut P,
    config: &SweepConfig,
    points: &mut Vec<SweepPoint>,
) -> Result<()>
where
    S: DutySource + ?Sized,
    P: Probe + ?Sized,
{
    config.validate()?;
    let columns = probe.columns();
    info!(
        "sweeping duty cycle {}%..={}% ({} points, {} samples each)",
        config.start,
        config.end,
        config.points(),
        config.samples
    );

    for duty in config.start..=config.end {
        info!("setting duty cycle to {}%", duty);
        if !source.set_duty_cycle(duty)? {
            continue;
        }
        thread::sleep(config.settle);

        let mut samples = Vec::with_capacity(config.samples);
        for _ in 0..config.samples {
            samples.push(probe.sample()?);
            thread::sleep(config.sample_interval);
        }

        let values = average(&samples);
        let summary = columns
            .iter()
            .zip(&values)
            .map(|(column, value)| format!("{} = {:.6}", column, value))
            .collect::<Vec<_>>()
            .join(", ");
        info!("  {}%: {}", duty, summary);

        points.push(SweepPoint { duty, values });
    }
    Ok(())
}
