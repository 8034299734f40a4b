use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The frame checksum does not match the frame body.
    #[error("Checksum mismatch - calculated={calculated:04X} received={received:04X}")]
    ChecksumMismatch { calculated: u16, received: u16 },
    /// Hex text is malformed or the frame boundaries are inconsistent.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    /// The info payload cannot be described by the 12 bit length field.
    #[error("Info payload too large: {0} bytes (max 4095)")]
    PayloadTooLarge(usize),
    /// The analog payload ended before all declared fields were read.
    #[error("Truncated payload - required={needed} available={available}")]
    TruncatedPayload { needed: usize, available: usize },
    /// No response within the configured window.
    #[error("Transport timeout")]
    TransportTimeout,
    /// Underlying I/O failure.
    #[error("Transport error: {0}")]
    TransportError(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::TransportTimeout,
            _ => Error::TransportError(err),
        }
    }
}

#[cfg(feature = "tokio-serial-async")]
impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Error {
        Error::TransportTimeout
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeouts_become_transport_timeout() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "serial timeout").into();
        assert!(matches!(err, Error::TransportTimeout));
        let err: Error = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(err, Error::TransportTimeout));
    }

    #[test]
    fn other_io_errors_stay_transport_errors() {
        let err: Error = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, Error::TransportError(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }
}
