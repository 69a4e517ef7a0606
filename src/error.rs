//! A dedicated error for everything that can go wrong: config parsing, wire
//! decoding, and upstream resolution.
use std::fmt;
use std::io;
use std::net::AddrParseError;

#[derive(Debug)]
pub enum Error {
    /// Config grammar problems: bad integer, bad IP, unknown method name.
    ConfigParse(String),
    /// Upstream unreachable, timed out, or returned a truncated reply.
    Resolve(String),
    /// Malformed request/response buffer. Never surfaced to callers as an
    /// error in the DNS service itself (treated as a silent nil
    /// return); kept as a variant so codec functions have something to
    /// propagate internally.
    WireFormat(String),
    /// File I/O failures at config/hosts load time.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigParse(s) => write!(f, "config parse error: {s}"),
            Error::Resolve(s) => write!(f, "resolve error: {s}"),
            Error::WireFormat(s) => write!(f, "wire format error: {s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn config<S: Into<String>>(s: S) -> Self {
        Error::ConfigParse(s.into())
    }

    pub fn resolve<S: Into<String>>(s: S) -> Self {
        Error::Resolve(s.into())
    }

    pub fn wire<S: Into<String>>(s: S) -> Self {
        Error::WireFormat(s.into())
    }
}

/// A specific custom `Result` for all functions in this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::ConfigParse(err.to_string())
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(err: std::num::ParseIntError) -> Self {
        Error::ConfigParse(err.to_string())
    }
}
