use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Protocol version byte spoken by PACE BMS firmware.
pub const PACE_VERSION: u8 = 0x25;
/// Command class identifier of every battery command.
pub const CID1: u8 = 0x46;

pub const START_OF_FRAME: u8 = b'~';
pub const END_OF_FRAME: u8 = b'\r';

/// Largest info payload the 12 bit length field can describe.
pub const MAX_INFO_LENGTH: usize = 0x0FFF;

// '~' + 4 checksum digits + '\r'
const FRAME_OVERHEAD: usize = 6;
const CHECKSUM_TEXT_LENGTH: usize = 4;
// VER ADR CID1 CID2 as 2 digits each, LENGTH as 4 digits
const HEADER_TEXT_LENGTH: usize = 12;

const KELVIN_OFFSET_DECI: f64 = 2730.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    GetAnalogValues = 0x42,
}

/// Return code carried in the CID2 field of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Normal,
    VersionError,
    ChecksumError,
    LengthChecksumError,
    InvalidCid2,
    CommandFormatError,
    InvalidData,
    AddressError,
    CommunicationError,
    Unknown(u8),
}

impl From<u8> for ResponseCode {
    fn from(rtn: u8) -> Self {
        match rtn {
            0x00 => ResponseCode::Normal,
            0x01 => ResponseCode::VersionError,
            0x02 => ResponseCode::ChecksumError,
            0x03 => ResponseCode::LengthChecksumError,
            0x04 => ResponseCode::InvalidCid2,
            0x05 => ResponseCode::CommandFormatError,
            0x06 => ResponseCode::InvalidData,
            0x90 => ResponseCode::AddressError,
            0x91 => ResponseCode::CommunicationError,
            other => ResponseCode::Unknown(other),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseCode::Normal => write!(f, "Normal"),
            ResponseCode::VersionError => write!(f, "Protocol version error"),
            ResponseCode::ChecksumError => write!(f, "Frame checksum error"),
            ResponseCode::LengthChecksumError => write!(f, "Length checksum error"),
            ResponseCode::InvalidCid2 => write!(f, "Invalid CID2"),
            ResponseCode::CommandFormatError => write!(f, "Command format error"),
            ResponseCode::InvalidData => write!(f, "Invalid data"),
            ResponseCode::AddressError => write!(f, "Address error"),
            ResponseCode::CommunicationError => write!(f, "Internal communication error"),
            ResponseCode::Unknown(rtn) => write!(f, "Unknown return code {rtn:02X}"),
        }
    }
}

/// Frame checksum: two's complement of the byte sum, modulo 0x10000.
pub fn compute_checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)));
    ((!sum) as u16).wrapping_add(1)
}

pub fn verify_checksum(bytes: &[u8], claimed: u16) -> bool {
    compute_checksum(bytes) == claimed
}

fn length_check_nibble(length: u16) -> u16 {
    let sum = (length & 0xF) + ((length >> 4) & 0xF) + ((length >> 8) & 0xF);
    (15 - (sum % 16) + 1) % 16
}

/// Builds the self-checking length field: the low 12 bits carry the length,
/// the high nibble a check value derived from the three length nibbles.
pub fn encode_length(info: &[u8]) -> Result<u16> {
    let length = info.len();
    if length > MAX_INFO_LENGTH {
        log::warn!("Info payload too large - length={length} max={MAX_INFO_LENGTH}");
        return Err(Error::PayloadTooLarge(length));
    }
    if length == 0 {
        return Ok(0);
    }
    let length = length as u16;
    Ok((length_check_nibble(length) << 12) | length)
}

/// Receiver side of [`encode_length`]: checks a transmitted length field
/// against the number of info characters actually received.
pub fn verify_length(info_length: u16, info_text_length: usize) -> bool {
    let length = info_length & 0x0FFF;
    if usize::from(length) != info_text_length {
        return false;
    }
    if length == 0 {
        return info_length == 0;
    }
    info_length >> 12 == length_check_nibble(length)
}

/// Assembles `~VERADRCID1CID2LENGTH<info>CHKSUM\r`.
///
/// `info` is appended as-is and is expected to be ASCII already (by protocol
/// convention hex digits).
pub fn encode_command(version: u8, address: u8, command_id: u8, info: &[u8]) -> Result<Vec<u8>> {
    let info_length = encode_length(info)?;
    let mut body = format!("{version:02X}{address:02X}{CID1:02X}{command_id:02X}{info_length:04X}")
        .into_bytes();
    body.extend_from_slice(info);
    let checksum = compute_checksum(&body);

    let mut frame = Vec::with_capacity(body.len() + FRAME_OVERHEAD);
    frame.push(START_OF_FRAME);
    frame.extend_from_slice(&body);
    frame.extend_from_slice(format!("{checksum:04X}").as_bytes());
    frame.push(END_OF_FRAME);
    log::trace!("Encoded frame: {:?}", String::from_utf8_lossy(&frame));
    Ok(frame)
}

fn malformed(what: &str, err: hex::FromHexError) -> Error {
    log::warn!("Malformed frame - {what}: {err}");
    Error::MalformedFrame(format!("{what}: {err}"))
}

/// Validates delimiters and checksum of a raw response line and returns the
/// frame body between `~` and the checksum.
pub fn decode_outer_frame(raw_line: &[u8]) -> Result<&[u8]> {
    if raw_line.len() < FRAME_OVERHEAD {
        log::warn!("Frame too short - length={} raw={raw_line:02X?}", raw_line.len());
        return Err(Error::MalformedFrame(format!(
            "frame too short ({} bytes)",
            raw_line.len()
        )));
    }
    if raw_line[0] != START_OF_FRAME || raw_line[raw_line.len() - 1] != END_OF_FRAME {
        log::warn!("Missing frame delimiters - raw={raw_line:02X?}");
        return Err(Error::MalformedFrame("missing frame delimiters".into()));
    }

    let checksum_start = raw_line.len() - 1 - CHECKSUM_TEXT_LENGTH;
    let body = &raw_line[1..checksum_start];
    let mut checksum = [0u8; 2];
    hex::decode_to_slice(&raw_line[checksum_start..raw_line.len() - 1], &mut checksum)
        .map_err(|err| malformed("checksum", err))?;
    let received = u16::from_be_bytes(checksum);

    let calculated = compute_checksum(body);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} frame={:?}",
            String::from_utf8_lossy(raw_line)
        );
        return Err(Error::ChecksumMismatch {
            calculated,
            received,
        });
    }
    Ok(body)
}

/// Drops line noise received ahead of the start of frame marker.
pub(crate) fn skip_to_start_of_frame(line: &mut Vec<u8>) {
    if let Some(start) = line.iter().position(|b| *b == START_OF_FRAME) {
        if start > 0 {
            log::debug!(
                "Discarding {start} bytes ahead of start of frame: {:02X?}",
                &line[..start]
            );
            line.drain(..start);
        }
    }
}

/// One decoded frame. For responses `cid2` carries the return code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub version: u8,
    pub address: u8,
    pub cid1: u8,
    pub cid2: u8,
    pub info_length: u16,
    pub info: Vec<u8>,
}

impl Frame {
    /// Splits a verified frame body into its fields, turning every pair of
    /// hex digits (info included) back into one byte.
    pub fn parse_fields(body: &[u8]) -> Result<Self> {
        if body.len() < HEADER_TEXT_LENGTH {
            log::warn!("Frame body too short - length={}", body.len());
            return Err(Error::MalformedFrame(format!(
                "frame body too short ({} bytes)",
                body.len()
            )));
        }
        let mut header = [0u8; HEADER_TEXT_LENGTH / 2];
        hex::decode_to_slice(&body[..HEADER_TEXT_LENGTH], &mut header)
            .map_err(|err| malformed("header", err))?;
        let info_text = &body[HEADER_TEXT_LENGTH..];
        let info = hex::decode(info_text).map_err(|err| malformed("info", err))?;

        let info_length = u16::from_be_bytes([header[4], header[5]]);
        if !verify_length(info_length, info_text.len()) {
            log::warn!(
                "Length field does not match info - length={info_length:04X} received={}",
                info_text.len()
            );
        }

        Ok(Self {
            version: header[0],
            address: header[1],
            cid1: header[2],
            cid2: header[3],
            info_length,
            info,
        })
    }

    pub fn decode(raw_line: &[u8]) -> Result<Self> {
        Self::parse_fields(decode_outer_frame(raw_line)?)
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from(self.cid2)
    }
}

struct PayloadReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    fn take(&mut self, size: usize) -> Result<&'a [u8]> {
        let end = self.position + size;
        if end > self.buffer.len() {
            log::warn!(
                "Payload truncated - required={end} received={} payload={:02X?}",
                self.buffer.len(),
                self.buffer
            );
            return Err(Error::TruncatedPayload {
                needed: end,
                available: self.buffer.len(),
            });
        }
        let bytes = &self.buffer[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn i16(&mut self) -> Result<i16> {
        let bytes = self.take(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn skip(&mut self, size: usize) -> Result<()> {
        self.take(size).map(|_| ())
    }
}

fn thousandths(raw: f64) -> f64 {
    raw / 1000.0
}

fn hundredths(raw: f64) -> f64 {
    raw / 100.0
}

fn decikelvin_to_celsius(raw: i16) -> f64 {
    (f64::from(raw) - KELVIN_OFFSET_DECI) / 10.0
}

/// Telemetry snapshot returned by the analog values command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalogValues {
    pub address: u8,
    pub number_of_cells: u8,
    pub cell_voltages: Vec<f64>,
    pub number_of_temperatures: u8,
    pub temperatures: Vec<f64>,
    pub current: f64, // negative=discharging, positive=charging
    pub voltage: f64,
    pub remaining_capacity: f64,
    pub total_capacity: f64,
    pub cycle_number: u16,
    pub design_capacity: f64,
}

impl AnalogValues {
    /// Request frame; the info field is the module address as two hex digits.
    pub fn request(version: u8, address: u8) -> Result<Vec<u8>> {
        let info = format!("{address:02X}");
        encode_command(
            version,
            address,
            Command::GetAnalogValues as u8,
            info.as_bytes(),
        )
    }

    /// Decodes a complete response line.
    pub fn decode(raw_line: &[u8]) -> Result<Self> {
        Self::from_frame(&Frame::decode(raw_line)?)
    }

    /// Decodes the response to a request sent to the module at `address`.
    /// A response from any other module is a [`Error::MalformedFrame`].
    pub fn decode_reply(raw_line: &[u8], address: u8) -> Result<Self> {
        let frame = Frame::decode(raw_line)?;
        if frame.address != address {
            log::warn!(
                "Expected response from module {address:02X}, got {:02X}",
                frame.address
            );
            return Err(Error::MalformedFrame(format!(
                "response from module {:02X} to a request for module {address:02X}",
                frame.address
            )));
        }
        Self::from_frame(&frame)
    }

    fn from_frame(frame: &Frame) -> Result<Self> {
        let response_code = frame.response_code();
        if response_code != ResponseCode::Normal {
            log::warn!(
                "BMS at address {:02X} answered with '{response_code}'",
                frame.address
            );
        }
        Self::from_info(&frame.info)
    }

    /// Decodes the info field of a response, whose first byte is a data flag.
    pub fn from_info(info: &[u8]) -> Result<Self> {
        match info.split_first() {
            Some((flag, payload)) => {
                log::trace!("Info flag={flag:02X}");
                Self::decode_payload(payload)
            }
            None => {
                log::warn!("Empty info field");
                Err(Error::TruncatedPayload {
                    needed: 1,
                    available: 0,
                })
            }
        }
    }

    pub fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);

        let address = reader.u8()?;
        let number_of_cells = reader.u8()?;
        let mut cell_voltages = Vec::with_capacity(usize::from(number_of_cells));
        for n_cell in 1..=number_of_cells {
            let volt = thousandths(f64::from(reader.i16()?));
            log::trace!("Cell #{n_cell} volt={volt}");
            cell_voltages.push(volt);
        }

        let number_of_temperatures = reader.u8()?;
        let mut temperatures = Vec::with_capacity(usize::from(number_of_temperatures));
        for n_sensor in 1..=number_of_temperatures {
            let temperature = decikelvin_to_celsius(reader.i16()?);
            log::trace!("Sensor #{n_sensor} °C={temperature}");
            temperatures.push(temperature);
        }

        let current = hundredths(f64::from(reader.i16()?));
        let voltage = thousandths(f64::from(reader.u16()?));
        let remaining_capacity = hundredths(f64::from(reader.u16()?));
        reader.skip(1)?;
        let total_capacity = hundredths(f64::from(reader.u16()?));
        let cycle_number = reader.u16()?;
        let design_capacity = hundredths(f64::from(reader.u16()?));

        Ok(Self {
            address,
            number_of_cells,
            cell_voltages,
            number_of_temperatures,
            temperatures,
            current,
            voltage,
            remaining_capacity,
            total_capacity,
            cycle_number,
            design_capacity,
        })
    }
}
