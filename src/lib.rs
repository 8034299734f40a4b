#![cfg_attr(docsrs, feature(doc_cfg))]
//! # pacebms_lib
//!
//! This crate provides a library for talking to PACE (and Pylontech compatible)
//! BMS (Battery Management System) devices over RS-232 or a TCP-to-serial bridge.
//!
//! The protocol is an ASCII framed request/response protocol:
//!
//! ```text
//! ~ VER ADR CID1 CID2 LENGTH INFO CHKSUM \r
//! ```
//!
//! Every field is rendered as uppercase hex digits, `LENGTH` carries its own
//! check nibble and `CHKSUM` protects everything between `~` and itself.
//! The [`protocol`] module implements the codec and the decoder of the
//! "analog values" telemetry; [`client`] runs the blocking request/response
//! exchange over a [`transport::Transport`].
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `pacebms` command-line tool and pulls in `serialport`.
//!
//! ### Client Features
//! - `serialport`: Enables serial port transports for the **synchronous** client using the `serialport` crate.
//!   TCP transports are always available.
//! - `tokio-serial-async`: Enables the **asynchronous** client using `tokio` and `tokio-serial`.

/// Contains error types for the library.
mod error;
/// Defines the communication protocol for PACE BMS.
pub mod protocol;
/// Connections the client talks through.
pub mod transport;

pub use error::{Error, Result};

/// Synchronous client for PACE BMS communication.
pub mod client;

/// Asynchronous client for PACE BMS communication.
#[cfg_attr(docsrs, doc(cfg(feature = "tokio-serial-async")))]
#[cfg(feature = "tokio-serial-async")]
pub mod tokio_serial_async;
