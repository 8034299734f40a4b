//! Byte-stream transports a [`PaceBMS`](crate::client::PaceBMS) session talks through.
//!
//! The protocol only needs two operations from a connection: write a frame
//! and read one `\r` terminated line back. [`LineTransport`] provides both on
//! top of any blocking `Read + Write` stream, e.g. a serial port or a TCP
//! connection to a serial bridge.

use crate::protocol::END_OF_FRAME;
use serde::Deserialize;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Connection the codec reads from and writes to.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Blocks until a line terminated by `\r` arrives, the terminator included.
    /// Fails with [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`]
    /// when the configured timeout expires.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;

    /// Drops input that has been received but not consumed yet.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Sets how long [`Transport::read_line`] may wait for a complete line.
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        (**self).read_line()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }
}

/// Controls a [`LineTransport`] needs from the stream underneath.
pub trait StreamControl: Read + Write {
    /// Limits how long the next read may block.
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Reads and drops everything that already arrived, without blocking.
    /// Returns the number of bytes dropped.
    fn drain_input(&mut self) -> io::Result<usize>;
}

impl StreamControl for TcpStream {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        TcpStream::set_read_timeout(self, Some(timeout))
    }

    fn drain_input(&mut self) -> io::Result<usize> {
        self.set_nonblocking(true)?;
        let mut drained = 0;
        let mut buf = [0u8; 64];
        let result = loop {
            match self.read(&mut buf) {
                // end of stream is reported by the next read_line
                Ok(0) => break Ok(drained),
                Ok(received) => drained += received,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(drained),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        self.set_nonblocking(false)?;
        result
    }
}

#[cfg(feature = "serialport")]
impl StreamControl for Box<dyn serialport::SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout).map_err(io::Error::from)
    }

    fn drain_input(&mut self) -> io::Result<usize> {
        let mut drained = 0;
        loop {
            let pending = self.bytes_to_read().map_err(io::Error::from)?;
            if pending == 0 {
                return Ok(drained);
            }
            log::trace!("Got {pending} pending bytes");
            let mut buf = [0u8; 64];
            drained += self.read(&mut buf)?;
        }
    }
}

/// Where the BMS is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Target {
    Serial {
        device: String,
        #[serde(default = "Target::default_baud_rate")]
        baud_rate: u32,
    },
    Tcp {
        address: String,
    },
}

impl Target {
    fn default_baud_rate() -> u32 {
        DEFAULT_BAUD_RATE
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Target::Serial { device, baud_rate } => {
                write!(f, "serial port '{device}' ({baud_rate} baud)")
            }
            Target::Tcp { address } => write!(f, "tcp://{address}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub target: Target,
    /// Bounds connecting, every write, and the wait for a complete response line.
    pub timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(target: Target, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

/// Opens the transport described by `config`.
pub fn open(config: &ConnectionConfig) -> io::Result<Box<dyn Transport + Send>> {
    log::debug!("Opening {} with timeout {:?}", config.target, config.timeout);
    match &config.target {
        #[cfg(feature = "serialport")]
        Target::Serial { device, baud_rate } => Ok(Box::new(LineTransport::open_serial(
            device,
            *baud_rate,
            config.timeout,
        )?)),
        #[cfg(not(feature = "serialport"))]
        Target::Serial { device, .. } => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot open '{device}', serial port support is not enabled"),
        )),
        Target::Tcp { address } => Ok(Box::new(LineTransport::connect_tcp(
            address,
            config.timeout,
        )?)),
    }
}

/// Line oriented [`Transport`] over a blocking stream. A line that is not
/// complete within the timeout fails with [`io::ErrorKind::TimedOut`], no
/// matter how the bytes trickle in.
pub struct LineTransport<S: StreamControl> {
    stream: BufReader<S>,
    timeout: Duration,
}

impl<S: StreamControl> LineTransport<S> {
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

impl LineTransport<TcpStream> {
    pub fn connect_tcp(address: &str, timeout: Duration) -> io::Result<Self> {
        let socket_address = address.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{address}' does not resolve to a socket address"),
            )
        })?;
        let stream = TcpStream::connect_timeout(&socket_address, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        log::debug!("Connected to {socket_address}");
        Ok(Self::new(stream, timeout))
    }
}

#[cfg(feature = "serialport")]
impl LineTransport<Box<dyn serialport::SerialPort>> {
    pub fn open_serial(device: &str, baud_rate: u32, timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(device, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()?;
        log::debug!("Opened serial port '{device}'");
        Ok(Self::new(port, timeout))
    }
}

impl<S: StreamControl> Transport for LineTransport<S> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.get_mut().write_all(bytes)
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut line = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no complete line within {:?}", self.timeout),
                ));
            }
            self.stream.get_mut().set_read_timeout(remaining)?;

            let available = match self.stream.fill_buf() {
                Ok(available) => available,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if available.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {} bytes of a line", line.len()),
                ));
            }
            let (used, complete) = match available.iter().position(|&b| b == END_OF_FRAME) {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            line.extend_from_slice(&available[..used]);
            self.stream.consume(used);
            if complete {
                return Ok(line);
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let buffered = self.stream.buffer().len();
        self.stream.consume(buffered);
        let drained = buffered + self.stream.get_mut().drain_input()?;
        if drained > 0 {
            log::trace!("Discarded {drained} pending bytes");
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        log::trace!("set timeout to {timeout:?}");
        self.timeout = timeout;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::StreamControl;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// In-memory stream: reads are served from scripted chunks, a `None`
    /// chunk behaves like an expired read timeout. `pending` holds bytes
    /// that already arrived, they are read first unless drained.
    #[derive(Debug, Default)]
    pub struct MockStream {
        pub pending: Vec<u8>,
        pub chunks: VecDeque<Option<Vec<u8>>>,
        pub written: Vec<u8>,
        pub read_timeouts: Vec<Duration>,
    }

    impl MockStream {
        pub fn with_chunks(chunks: Vec<Option<&str>>) -> Self {
            Self {
                chunks: chunks
                    .into_iter()
                    .map(|c| c.map(|text| text.as_bytes().to_vec()))
                    .collect(),
                ..Default::default()
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.drain(..n);
                return Ok(n);
            }
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(None) => Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out")),
                Some(Some(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Some(chunk.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl StreamControl for MockStream {
        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.read_timeouts.push(timeout);
            Ok(())
        }

        fn drain_input(&mut self) -> io::Result<usize> {
            Ok(std::mem::take(&mut self.pending).len())
        }
    }
}
