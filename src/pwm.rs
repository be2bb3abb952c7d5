//! Microcontroller PWM generator on a serial port.
//!
//! The firmware takes a duty cycle in percent as a decimal line (`"40\n"`),
//! may print any number of status lines such as `PWM_SET: 40%`, and finishes
//! with `OK` once the new duty cycle is applied or `ERR` if it refused it.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Deserialize;
use serialport::{ClearBuffer, SerialPort};

use crate::error::{Error, Result};
use crate::scpi::{LineTransport, Stream};
use crate::sweep::DutySource;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PwmSettings {
    pub port: String,
    pub baud_rate: u32,
    /// Wait after opening the port; the board resets on connect.
    pub boot_delay_ms: u64,
    /// Timeout of a single serial read.
    pub read_timeout_ms: u64,
    /// How long to wait for `OK`/`ERR` after sending a duty cycle.
    pub ack_timeout_ms: u64,
}

impl Default for PwmSettings {
    fn default() -> Self {
        PwmSettings {
            port: "COM14".to_string(),
            baud_rate: 9600,
            boot_delay_ms: 3000,
            read_timeout_ms: 2000,
            ack_timeout_ms: 10_000,
        }
    }
}

/// Wait between reads while the port has nothing for us.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A port whose unread input can be thrown away.
pub trait DiscardInput {
    fn discard_input(&mut self) -> io::Result<()>;
}

impl DiscardInput for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Controller reply to a duty cycle command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Accepted,
    Rejected,
    TimedOut,
}

pub struct PwmController<T> {
    link: LineTransport<T>,
    ack_timeout: Duration,
}

impl PwmController<Box<dyn SerialPort>> {
    /// Open the serial port and let the board boot. Its boot chatter is dropped
    /// before the first setpoint is sent.
    pub fn open(settings: &PwmSettings) -> Result<Self> {
        info!("opening PWM controller on {} at {} baud", settings.port, settings.baud_rate);
        let port = serialport::new(settings.port.as_str(), settings.baud_rate)
            .timeout(Duration::from_millis(settings.read_timeout_ms))
            .open()?;
        thread::sleep(Duration::from_millis(settings.boot_delay_ms));
        Ok(PwmController::new(
            port,
            Duration::from_millis(settings.ack_timeout_ms),
        ))
    }
}

impl<T: Stream + DiscardInput> PwmController<T> {
    pub fn new(inner: T, ack_timeout: Duration) -> Self {
        PwmController {
            link: LineTransport::new(inner),
            ack_timeout,
        }
    }

    /// Send `duty` and wait for the controller to confirm or refuse it.
    ///
    /// Anything still unread from earlier setpoints is dropped first, so a late
    /// `OK` for a timed-out command cannot acknowledge this one.
    pub fn set_duty_cycle(&mut self, duty: u8) -> Result<Ack> {
        if duty > 100 {
            return Err(Error::InvalidArgument(format!("duty cycle {}% is above 100%", duty)));
        }
        self.link.discard_pending();
        self.link.get_mut().discard_input()?;
        debug!("PWM <- {}", duty);
        self.link.write_line(&duty.to_string())?;

        let deadline = Instant::now() + self.ack_timeout;
        loop {
            if Instant::now() >= deadline {
                return Ok(Ack::TimedOut);
            }
            let line = match self.link.read_line() {
                Ok(line) => line,
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if line.is_empty() {
                continue;
            }
            info!("PWM: {}", line);
            match line.as_str() {
                "OK" => return Ok(Ack::Accepted),
                "ERR" => return Ok(Ack::Rejected),
                _ => {}
            }
        }
    }
}

impl<T: Stream + DiscardInput> DutySource for PwmController<T> {
    fn set_duty_cycle(&mut self, duty: u8) -> Result<bool> {
        match PwmController::set_duty_cycle(self, duty) {
            Ok(Ack::Accepted) => Ok(true),
            Ok(Ack::Rejected) => {
                warn!("PWM controller rejected {}%, skipping", duty);
                Ok(false)
            }
            Ok(Ack::TimedOut) => {
                warn!("no acknowledgement for {}%, skipping", duty);
                Ok(false)
            }
            Err(e @ Error::InvalidArgument(_)) => Err(e),
            Err(e) => {
                warn!("PWM controller error at {}%: {}, skipping", duty, e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn controller<F>(responder: F) -> (PwmController<MockTransport>, crate::mock::CommandLog)
    where
        F: FnMut(&str) -> Option<String> + 'static,
    {
        let mock = MockTransport::new(responder);
        let log = mock.log();
        (PwmController::new(mock, Duration::from_millis(50)), log)
    }

    #[test]
    fn status_lines_before_ok_are_ignored() {
        let (mut pwm, log) =
            controller(|cmd| Some(format!("\r\nPWM_SET: {}%\r\nOK", cmd)));
        assert_eq!(pwm.set_duty_cycle(40).unwrap(), Ack::Accepted);
        assert_eq!(log.commands(), vec!["40"]);
    }

    #[test]
    fn err_is_rejection() {
        let (mut pwm, _) = controller(|_| Some("ERR".to_string()));
        assert_eq!(pwm.set_duty_cycle(7).unwrap(), Ack::Rejected);
        assert!(!DutySource::set_duty_cycle(&mut pwm, 7).unwrap());
    }

    #[test]
    fn silence_times_out() {
        let (mut pwm, _) = controller(|_| Some("PWM_SET: 9%".to_string()));
        assert_eq!(pwm.set_duty_cycle(9).unwrap(), Ack::TimedOut);
        assert!(!DutySource::set_duty_cycle(&mut pwm, 9).unwrap());
    }

    #[test]
    fn out_of_range_duty_is_an_error() {
        let (mut pwm, log) = controller(|_| Some("OK".to_string()));
        assert!(DutySource::set_duty_cycle(&mut pwm, 150).is_err());
        assert!(log.commands().is_empty());
    }

    #[test]
    fn replies_are_not_mixed_up_between_setpoints() {
        let (mut pwm, _) = controller(|cmd| match cmd {
            "1" => Some("OK".to_string()),
            _ => Some("ERR".to_string()),
        });
        assert!(DutySource::set_duty_cycle(&mut pwm, 1).unwrap());
        assert!(!DutySource::set_duty_cycle(&mut pwm, 2).unwrap());
    }

    #[test]
    fn late_ack_does_not_confirm_next_setpoint() {
        let mock = MockTransport::new(|_| None);
        let inbox = mock.inbox();
        let log = mock.log();
        let mut pwm = PwmController::new(mock, Duration::from_millis(50));

        assert_eq!(pwm.set_duty_cycle(5).unwrap(), Ack::TimedOut);
        inbox.push_line("PWM_SET: 5%\r\nOK\r");
        assert_eq!(pwm.set_duty_cycle(6).unwrap(), Ack::TimedOut);
        assert_eq!(log.commands(), vec!["5", "6"]);
    }

    #[test]
    fn late_refusal_does_not_reject_next_setpoint() {
        let mock = MockTransport::new(|cmd| (cmd == "8").then(|| "OK".to_string()));
        let inbox = mock.inbox();
        let mut pwm = PwmController::new(mock, Duration::from_millis(50));

        assert_eq!(pwm.set_duty_cycle(7).unwrap(), Ack::TimedOut);
        inbox.push_line("ERR");
        assert_eq!(pwm.set_duty_cycle(8).unwrap(), Ack::Accepted);
    }

    /// A port that has gone away: writes vanish, reads fail.
    struct Unplugged;

    impl io::Read for Unplugged {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"))
        }
    }

    impl io::Write for Unplugged {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl DiscardInput for Unplugged {
        fn discard_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_error_skips_setpoint() {
        let mut pwm = PwmController::new(Unplugged, Duration::from_millis(50));
        match pwm.set_duty_cycle(20) {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!DutySource::set_duty_cycle(&mut pwm, 20).unwrap());
    }
}
