//! The bench procedures: which source drives which instrument, with what
//! defaults, and how a run is opened, swept and written out.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::ValueEnum;
use log::{info, warn};

use crate::afg::Afg;
use crate::config::{Settings, SweepOverrides};
use crate::dmm::{Dmm, DmmFunction, DmmProbe, DmmSettings};
use crate::dso::{Dso, DsoProbe};
use crate::error::Result;
use crate::pwm::PwmController;
use crate::record;
use crate::scpi::Session;
use crate::sweep::{self, DutySource, Probe, SweepConfig};

/// The bench measurements this tool knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Procedure {
    /// AFG pulse duty cycle vs. DC voltage on the DMM
    AfgDmmVdc,
    /// AFG pulse duty cycle vs. DC output current on the DMM, in µA
    AfgDmmIdc,
    /// AFG pulse duty cycle vs. pulse parameters measured on the DSO
    AfgDso,
    /// Microcontroller PWM duty cycle vs. DC voltage on the DMM
    PwmDmmVdc,
    /// Microcontroller PWM duty cycle vs. DC output current on the DMM, in µA
    PwmDmmIdc,
    /// Microcontroller PWM duty cycle vs. pulse parameters measured on the DSO
    PwmDso,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Afg,
    Pwm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Dmm(DmmFunction),
    Dso,
}

impl Procedure {
    pub fn source(self) -> SourceKind {
        match self {
            Procedure::AfgDmmVdc | Procedure::AfgDmmIdc | Procedure::AfgDso => SourceKind::Afg,
            Procedure::PwmDmmVdc | Procedure::PwmDmmIdc | Procedure::PwmDso => SourceKind::Pwm,
        }
    }

    pub fn probe(self) -> ProbeKind {
        match self {
            Procedure::AfgDmmVdc | Procedure::PwmDmmVdc => ProbeKind::Dmm(DmmFunction::VoltageDc),
            Procedure::AfgDmmIdc | Procedure::PwmDmmIdc => ProbeKind::Dmm(DmmFunction::CurrentDc),
            Procedure::AfgDso | Procedure::PwmDso => ProbeKind::Dso,
        }
    }

    pub fn default_sweep(self) -> SweepConfig {
        let (end, settle_ms, interval_ms) = match self {
            Procedure::AfgDmmVdc => (100, 3000, 100),
            Procedure::AfgDmmIdc => (99, 5000, 200),
            Procedure::AfgDso => (99, 2000, 500),
            Procedure::PwmDmmVdc => (100, 500, 100),
            Procedure::PwmDmmIdc => (99, 500, 10),
            Procedure::PwmDso => (100, 500, 200),
        };
        SweepConfig {
            start: 1,
            end,
            samples: 10,
            settle: Duration::from_millis(settle_ms),
            sample_interval: Duration::from_millis(interval_ms),
        }
    }

    /// Integration time used when the configuration does not set one.
    pub fn default_nplc(self) -> Option<f64> {
        match self {
            Procedure::AfgDmmVdc => Some(1.0),
            _ => None,
        }
    }

    pub fn default_output(self) -> &'static str {
        match self {
            Procedure::AfgDmmVdc => "afg_dmm_vdc.csv",
            Procedure::AfgDmmIdc => "afg_dmm_idc.csv",
            Procedure::AfgDso => "afg_dso_pwm.csv",
            Procedure::PwmDmmVdc => "pwm_dmm_vdc.csv",
            Procedure::PwmDmmIdc => "pwm_dmm_idc.csv",
            Procedure::PwmDso => "pwm_dso_pwm.csv",
        }
    }
}

/// Per-run choices made on the command line, taking precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub output: Option<PathBuf>,
    pub sweep: SweepOverrides,
    /// Ask the operator to press Enter once the PWM controller is ready.
    pub confirm: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub output: PathBuf,
    pub rows: usize,
}

/// Run `procedure` against real instruments.
pub fn run(procedure: Procedure, settings: &Settings, options: &RunOptions) -> Result<RunReport> {
    let sweep = options.sweep.apply(settings.sweep.apply(procedure.default_sweep()));
    sweep.validate()?;
    let output = options
        .output
        .clone()
        .or_else(|| settings.output.clone())
        .unwrap_or_else(|| PathBuf::from(procedure.default_output()));

    // instruments opened through the session must be dropped before it
    let mut session = Session::new(settings.io_timeout());
    let mut source = open_source(procedure, settings, options, &mut session)?;
    let mut probe = match open_probe(procedure, settings, &mut session) {
        Ok(probe) => probe,
        Err(e) => {
            if let Err(shutdown) = source.shutdown() {
                warn!("could not shut down source: {}", shutdown);
            }
            return Err(e);
        }
    };

    let rows = execute(&mut source, &mut probe, &sweep, &output)?;
    drop(probe);
    drop(source);
    info!("instruments closed");
    Ok(RunReport { output, rows })
}

/// Sweep, shut the source down, and write whatever was measured to `output`.
///
/// The CSV is written even when the sweep fails part way; the sweep error is
/// returned after that.
pub fn execute<S, P>(source: &mut S, probe: &mut P, sweep: &SweepConfig, output: &Path) -> Result<usize>
where
    S: DutySource + ?Sized,
    P: Probe + ?Sized,
{
    let columns = probe.columns();
    let mut points = Vec::with_capacity(sweep.points());
    let outcome = sweep::run_sweep(source, probe, sweep, &mut points);
    if let Err(e) = &outcome {
        warn!("sweep stopped after {} points: {}", points.len(), e);
    }
    if let Err(e) = source.shutdown() {
        warn!("could not shut down source: {}", e);
    }

    record::write_csv(output, &columns, &points)?;
    info!("wrote {} rows to {}", points.len(), output.display());
    outcome?;
    Ok(points.len())
}

fn open_source(
    procedure: Procedure,
    settings: &Settings,
    options: &RunOptions,
    session: &mut Session,
) -> Result<Box<dyn DutySource>> {
    match procedure.source() {
        SourceKind::Afg => {
            let mut afg = Afg::new(session.open("AFG", &settings.afg.resource)?);
            afg.identify()?;
            afg.configure_pulse(&settings.afg.pulse)?;
            Ok(Box::new(afg))
        }
        SourceKind::Pwm => {
            let pwm = PwmController::open(&settings.pwm)?;
            if options.confirm {
                wait_for_operator("Make sure the PWM controller is connected and ready, then press Enter")?;
            }
            Ok(Box::new(pwm))
        }
    }
}

fn open_probe(procedure: Procedure, settings: &Settings, session: &mut Session) -> Result<Box<dyn Probe>> {
    match procedure.probe() {
        ProbeKind::Dmm(function) => {
            let mut dmm = Dmm::new(session.open("DMM", &settings.dmm.resource)?);
            dmm.identify()?;
            dmm.configure(&DmmSettings {
                function,
                nplc: settings.dmm.nplc.or(procedure.default_nplc()),
            })?;
            Ok(Box::new(DmmProbe::new(dmm, function)))
        }
        ProbeKind::Dso => {
            let section = &settings.dso;
            let mut dso = Dso::new(session.open("DSO", &section.resource)?);
            dso.identify()?;
            for &channel in &section.channels {
                dso.enable_channel(channel)?;
            }
            if section.autoset {
                dso.autoset()?;
                thread::sleep(Duration::from_millis(section.autoset_settle_ms));
            }
            let probe = DsoProbe::new(
                dso,
                section.channels.clone(),
                section.measurements.clone(),
                Duration::from_millis(section.measurement_settle_ms),
            )?;
            Ok(Box::new(probe))
        }
    }
}

fn wait_for_operator(prompt: &str) -> Result<()> {
    print!("{}... ", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_defaults_match_bench_practice() {
        let afg_idc = Procedure::AfgDmmIdc.default_sweep();
        assert_eq!((afg_idc.start, afg_idc.end, afg_idc.samples), (1, 99, 10));
        assert_eq!(afg_idc.settle, Duration::from_secs(5));

        let pwm_vdc = Procedure::PwmDmmVdc.default_sweep();
        assert_eq!(pwm_vdc.end, 100);
        assert_eq!(pwm_vdc.settle, Duration::from_millis(500));

        for procedure in Procedure::value_variants() {
            assert!(procedure.default_sweep().validate().is_ok(), "{:?}", procedure);
        }
    }

    #[test]
    fn procedures_pair_sources_and_probes() {
        assert_eq!(Procedure::AfgDso.source(), SourceKind::Afg);
        assert_eq!(Procedure::AfgDso.probe(), ProbeKind::Dso);
        assert_eq!(Procedure::PwmDmmIdc.source(), SourceKind::Pwm);
        assert_eq!(
            Procedure::PwmDmmIdc.probe(),
            ProbeKind::Dmm(DmmFunction::CurrentDc)
        );
        assert_eq!(Procedure::AfgDmmVdc.default_nplc(), Some(1.0));
        assert_eq!(Procedure::PwmDmmVdc.default_nplc(), None);
    }

    #[test]
    fn cli_names_are_kebab_case() {
        let procedure = Procedure::from_str("pwm-dso", false).unwrap();
        assert_eq!(procedure, Procedure::PwmDso);
    }

    #[test]
    fn invalid_sweep_fails_before_touching_hardware() {
        let options = RunOptions {
            sweep: SweepOverrides { start: Some(80), end: Some(20), ..Default::default() },
            ..Default::default()
        };
        assert!(run(Procedure::AfgDmmVdc, &Settings::default(), &options).is_err());
    }
}
