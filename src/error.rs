//! Error type shared by the instrument drivers and the sweep procedures.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "visa")]
    #[error("VISA error: {0}")]
    Visa(#[from] visa_rs::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("{instrument}: could not parse response {response:?} to {command:?}")]
    Parse {
        instrument: String,
        command: String,
        response: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid resource string: {0}")]
    InvalidResource(String),

    #[error("{0}")]
    Unsupported(String),
}

impl From<std::ffi::NulError> for Error {
    fn from(error: std::ffi::NulError) -> Self {
        Error::InvalidResource(error.to_string())
    }
}
