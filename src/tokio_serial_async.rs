//! Provides an asynchronous client for interacting with a PACE BMS (Battery Management System)
//! using Tokio, either over a serial port (`tokio-serial`) or over TCP to a serial bridge.
//!
//! This module is suitable for applications built on the Tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use pacebms_lib::tokio_serial_async::PaceBMS;
//! use pacebms_lib::Error;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut bms = PaceBMS::open_serial("/dev/ttyUSB0", 9600, Duration::from_secs(2))?;
//!
//!     let values = bms.get_analog_values(0x01).await?;
//!     println!("Analog values: {:?}", values);
//!
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::protocol::*;
use std::io;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf,
};
use tokio::net::TcpStream;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// The main struct for interacting asynchronously with a PACE BMS using Tokio.
///
/// Every method takes `&mut self`, so a session never has more than one
/// request in flight. A request whose response does not arrive within the
/// I/O timeout fails with [`Error::TransportTimeout`] and is abandoned.
#[derive(Debug)]
pub struct PaceBMS<S> {
    stream: BufReader<S>,
    io_timeout: Duration, // Timeout for individual I/O operations
    version: u8,
}

impl PaceBMS<SerialStream> {
    /// Opens `device` with 8N1 framing and no flow control.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pacebms_lib::tokio_serial_async::PaceBMS;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     match PaceBMS::open_serial("/dev/ttyUSB0", 9600, Duration::from_secs(2)) {
    ///         Ok(mut bms) => {
    ///             if let Ok(values) = bms.get_analog_values(0x01).await {
    ///                 println!("Voltage: {:.3}V", values.voltage);
    ///             }
    ///         }
    ///         Err(err) => eprintln!("Failed to connect to BMS: {err}"),
    ///     }
    /// }
    /// ```
    pub fn open_serial(device: &str, baud_rate: u32, io_timeout: Duration) -> Result<Self> {
        let serial = tokio_serial::new(device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;
        Ok(Self::new(serial, io_timeout))
    }
}

impl PaceBMS<TcpStream> {
    /// Connects to a TCP-to-serial bridge at `address` (`host:port`).
    pub async fn connect_tcp(address: &str, io_timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(io_timeout, TcpStream::connect(address)).await??;
        stream.set_nodelay(true)?;
        log::debug!("Connected to {address}");
        Ok(Self::new(stream, io_timeout))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PaceBMS<S> {
    pub fn new(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            io_timeout,
            version: PACE_VERSION,
        }
    }

    /// Sets the timeout for individual I/O operations (read/write).
    pub fn set_timeout(&mut self, timeout: Duration) {
        log::trace!("set timeout to {timeout:?}");
        self.io_timeout = timeout;
    }

    /// Sets the protocol version byte sent with every command.
    pub fn set_version(&mut self, version: u8) {
        log::trace!("set protocol version to {version:02X}");
        self.version = version;
    }

    /// Drops everything already received, buffered or still in the stream,
    /// without waiting for more.
    async fn discard_input(&mut self) -> Result<()> {
        let buffered = self.stream.buffer().len();
        Pin::new(&mut self.stream).consume(buffered);

        let stream = self.stream.get_mut();
        let mut chunk = [0u8; 64];
        let drained = std::future::poll_fn(|cx| {
            let mut drained = 0;
            loop {
                let mut buf = ReadBuf::new(&mut chunk);
                match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
                    // end of stream is reported by the next read
                    Poll::Ready(Ok(())) if buf.filled().is_empty() => {
                        return Poll::Ready(Ok(drained))
                    }
                    Poll::Ready(Ok(())) => drained += buf.filled().len(),
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Pending => return Poll::Ready(Ok(drained)),
                }
            }
        })
        .await?;

        let discarded = buffered + drained;
        if discarded > 0 {
            log::trace!("discard {discarded} pending bytes");
        }
        Ok(())
    }

    async fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        // a late reply to an abandoned request must not answer this one
        self.discard_input().await?;

        log::trace!("write bytes: {:?}", String::from_utf8_lossy(tx_buffer));
        tokio::time::timeout(self.io_timeout, self.stream.get_mut().write_all(tx_buffer))
            .await??;
        Ok(())
    }

    async fn receive_line(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = Vec::new();
        tokio::time::timeout(
            self.io_timeout,
            self.stream.read_until(END_OF_FRAME, &mut rx_buffer),
        )
        .await??;
        if rx_buffer.last() != Some(&END_OF_FRAME) {
            return Err(Error::TransportError(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed after {} bytes of a line", rx_buffer.len()),
            )));
        }
        skip_to_start_of_frame(&mut rx_buffer);
        log::trace!("receive_line: {:?}", String::from_utf8_lossy(&rx_buffer));
        Ok(rx_buffer)
    }

    /// Asynchronously reads cell voltages, temperatures, current, voltage,
    /// capacities and cycle count of the battery module at `address`.
    pub async fn get_analog_values(&mut self, address: u8) -> Result<AnalogValues> {
        log::trace!("get analog values of module {address:02X}");
        self.send_bytes(&AnalogValues::request(self.version, address)?)
            .await?;
        AnalogValues::decode_reply(&self.receive_line().await?, address)
    }
}
