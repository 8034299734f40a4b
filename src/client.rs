//! Synchronous client for PACE BMS communication.
//!
//! A session owns its [`Transport`] exclusively and keeps exactly one request
//! in flight: every call writes one command and blocks for one response line.
//! Callers sharing a battery bus have to serialize their requests themselves.
//!
//! # Example
//!
//! ```no_run
//! use pacebms_lib::client::PaceBMS;
//! use pacebms_lib::transport::{ConnectionConfig, Target};
//! use std::time::Duration;
//!
//! let config = ConnectionConfig::new(
//!     Target::Tcp { address: "192.168.1.10:5000".into() },
//!     Duration::from_secs(2),
//! );
//! let mut bms = PaceBMS::open(&config)?;
//! let values = bms.get_analog_values(0x01)?;
//! println!("Cell voltages: {:?}", values.cell_voltages);
//! # Ok::<(), pacebms_lib::Error>(())
//! ```

use crate::error::Result;
use crate::protocol::*;
use crate::transport::{self, ConnectionConfig, Transport};
use std::time::Duration;

pub struct PaceBMS<T: Transport> {
    transport: T,
    version: u8,
}

impl PaceBMS<Box<dyn Transport + Send>> {
    /// Opens the connection described by `config`.
    pub fn open(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self::new(transport::open(config)?))
    }
}

impl<T: Transport> PaceBMS<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            version: PACE_VERSION,
        }
    }

    /// Sets how long a request waits for its complete response line.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.transport.set_timeout(timeout)?;
        Ok(())
    }

    /// Sets the protocol version byte sent with every command.
    pub fn set_version(&mut self, version: u8) {
        log::trace!("set protocol version to {version:02X}");
        self.version = version;
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        // a late reply to an abandoned request must not answer this one
        self.transport.discard_input()?;
        log::trace!("write bytes: {:?}", String::from_utf8_lossy(tx_buffer));
        self.transport.write(tx_buffer)?;
        Ok(())
    }

    fn receive_line(&mut self) -> Result<Vec<u8>> {
        let mut rx_buffer = self.transport.read_line()?;
        skip_to_start_of_frame(&mut rx_buffer);
        log::trace!("receive_line: {:?}", String::from_utf8_lossy(&rx_buffer));
        Ok(rx_buffer)
    }

    /// Reads cell voltages, temperatures, current, voltage, capacities and
    /// cycle count of the battery module at `address`.
    pub fn get_analog_values(&mut self, address: u8) -> Result<AnalogValues> {
        log::trace!("get analog values of module {address:02X}");
        self.send_bytes(&AnalogValues::request(self.version, address)?)?;
        AnalogValues::decode_reply(&self.receive_line()?, address)
    }
}
