//! SCPI sessions over VISA, raw TCP sockets, or anything else that reads and writes bytes.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};

#[cfg(feature = "visa")]
use std::ffi::CString;
#[cfg(feature = "visa")]
use visa_rs::prelude::*;

/// A byte channel to an instrument.
pub trait Stream: Read + Write {}

impl<T: Read + Write + ?Sized> Stream for T {}

/// Newline-terminated line I/O on top of a [`Stream`].
///
/// Bytes received past the first terminator are kept for the next call, so a
/// transport that hands back several lines in one read does not lose any.
pub struct LineTransport<T> {
    inner: T,
    pending: Vec<u8>,
}

impl<T: Stream> LineTransport<T> {
    pub fn new(inner: T) -> Self {
        LineTransport {
            inner,
            pending: Vec::new(),
        }
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let line = format!("{}\n", line);
        self.inner.write_all(line.as_bytes())?;
        self.inner.flush()
    }

    /// Read one line, trimmed of whitespace and the terminator.
    ///
    /// A zero-length read ends the message even without a terminator (VISA
    /// signals END this way). Read timeouts are passed through unchanged, with
    /// any partial line kept for the next call.
    pub fn read_line(&mut self) -> io::Result<String> {
        let mut chunk = [0u8; 1024];
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                return Ok(decode(&line));
            }
            match self.inner.read(&mut chunk) {
                Ok(0) if self.pending.is_empty() => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "instrument closed the connection",
                    ));
                }
                Ok(0) => {
                    let line = std::mem::take(&mut self.pending);
                    return Ok(decode(&line));
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Forget any partial or unread line received so far.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// An open SCPI instrument.
pub struct ScpiInstrument<T> {
    name: String,
    link: LineTransport<T>,
    last_command: String,
}

impl<T: Stream> ScpiInstrument<T> {
    pub fn new(name: impl Into<String>, inner: T) -> Self {
        ScpiInstrument {
            name: name.into(),
            link: LineTransport::new(inner),
            last_command: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn write(&mut self, command: &str) -> Result<()> {
        debug!("{} <- {}", self.name, command);
        self.link.write_line(command)?;
        self.last_command.clear();
        self.last_command.push_str(command);
        Ok(())
    }

    pub fn read(&mut self) -> Result<String> {
        let response = self.link.read_line()?;
        debug!("{} -> {}", self.name, response);
        Ok(response)
    }

    pub fn query(&mut self, command: &str) -> Result<String> {
        self.write(command)?;
        self.read()
    }

    /// Read a response and parse it as a number.
    pub fn read_f64(&mut self) -> Result<f64> {
        let response = self.read()?;
        self.parse_f64(response)
    }

    pub fn query_f64(&mut self, command: &str) -> Result<f64> {
        self.write(command)?;
        self.read_f64()
    }

    /// Query `*IDN?` and return the identification string.
    pub fn identify(&mut self) -> Result<String> {
        let idn = self.query("*IDN?")?;
        info!("{}: {}", self.name, idn);
        Ok(idn)
    }

    fn parse_f64(&self, response: String) -> Result<f64> {
        response.parse::<f64>().map_err(|_| Error::Parse {
            instrument: self.name.clone(),
            command: self.last_command.clone(),
            response,
        })
    }
}

/// Split a `TCPIP[n]::<host>::<port>::SOCKET` resource into host and port.
pub fn parse_socket_resource(resource: &str) -> Option<(String, u16)> {
    let parts: Vec<&str> = resource.split("::").collect();
    if parts.len() != 4 {
        return None;
    }
    let board = parts[0].to_ascii_uppercase();
    let board_index = board.strip_prefix("TCPIP")?;
    if !board_index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !parts[3].eq_ignore_ascii_case("SOCKET") || parts[1].is_empty() {
        return None;
    }
    let port = parts[2].parse::<u16>().ok()?;
    Some((parts[1].to_string(), port))
}

#[cfg(feature = "visa")]
struct VisaStream(Instrument);

#[cfg(feature = "visa")]
impl Read for VisaStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.0).read(buf)
    }
}

#[cfg(feature = "visa")]
impl Write for VisaStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Opens instrument resources.
///
/// The VISA resource manager is created on first use and must outlive every
/// instrument opened through it.
pub struct Session {
    timeout: Duration,
    #[cfg(feature = "visa")]
    rm: Option<DefaultRM>,
}

impl Session {
    pub fn new(timeout: Duration) -> Self {
        Session {
            timeout,
            #[cfg(feature = "visa")]
            rm: None,
        }
    }

    /// Open `resource` and wrap it as an SCPI instrument called `name`.
    pub fn open(&mut self, name: &str, resource: &str) -> Result<ScpiInstrument<Box<dyn Stream>>> {
        if let Some((host, port)) = parse_socket_resource(resource) {
            debug!("opening {} as TCP socket {}:{}", name, host, port);
            let stream = TcpStream::connect((host.as_str(), port))?;
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
            return Ok(ScpiInstrument::new(name, Box::new(stream) as Box<dyn Stream>));
        }
        self.open_visa(name, resource)
    }

    /// List the VISA resources matching `expr`, e.g. `?*INSTR`.
    #[cfg(feature = "visa")]
    pub fn list(&mut self, expr: &str) -> Result<Vec<String>> {
        let rm = self.resource_manager()?;
        let expr = CString::new(expr)?;
        let mut list = rm.find_res_list(&expr.into())?;
        let mut found = Vec::new();
        while let Some(resource) = list.find_next()? {
            found.push(resource.to_string());
        }
        Ok(found)
    }

    #[cfg(not(feature = "visa"))]
    pub fn list(&mut self, _expr: &str) -> Result<Vec<String>> {
        Err(visa_disabled())
    }

    #[cfg(feature = "visa")]
    fn open_visa(&mut self, name: &str, resource: &str) -> Result<ScpiInstrument<Box<dyn Stream>>> {
        debug!("opening {} as VISA resource {}", name, resource);
        let timeout = self.timeout;
        let rm = self.resource_manager()?;
        let resource = CString::new(resource)?;
        let instr = rm.open(&resource.into(), AccessMode::NO_LOCK, timeout)?;
        Ok(ScpiInstrument::new(name, Box::new(VisaStream(instr)) as Box<dyn Stream>))
    }

    #[cfg(not(feature = "visa"))]
    fn open_visa(&mut self, name: &str, resource: &str) -> Result<ScpiInstrument<Box<dyn Stream>>> {
        debug!("cannot open {} at {}", name, resource);
        Err(visa_disabled())
    }

    #[cfg(feature = "visa")]
    fn resource_manager(&mut self) -> Result<&DefaultRM> {
        if self.rm.is_none() {
            self.rm = Some(DefaultRM::new()?);
        }
        self.rm
            .as_ref()
            .ok_or_else(|| Error::Unsupported("VISA resource manager unavailable".to_string()))
    }
}

#[cfg(not(feature = "visa"))]
fn visa_disabled() -> Error {
    Error::Unsupported(
        "VISA support not compiled in; rebuild with `--features visa` or use a TCPIP::<host>::<port>::SOCKET resource"
            .to_string(),
    )
}
