//! Duty-cycle sweeps for characterizing a PWM-driven current source.
//!
//! A sweep steps a PWM source (a Tektronix AFG or a microcontroller on a
//! serial port) through a range of duty cycles, waits for the circuit to
//! settle, averages several readings from a Keysight DMM or a Tektronix
//! oscilloscope, and writes one CSV row per duty cycle.

pub mod afg;
pub mod config;
pub mod dmm;
pub mod dso;
pub mod error;
pub mod experiment;
pub mod mock;
pub mod pwm;
pub mod record;
pub mod scpi;
pub mod sweep;

pub use error::{Error, Result};
pub use experiment::{Procedure, RunOptions, RunReport};
pub use sweep::{DutySource, Probe, SweepConfig, SweepPoint};
