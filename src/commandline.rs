use clap::{Args, Parser, Subcommand};
use clap_num::maybe_hex;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use pacebms_lib::transport::DEFAULT_BAUD_RATE;
use std::time::Duration;

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum OutputFormat {
    Debug,
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show cell voltages, temperatures, current, voltage, capacities and cycle count
    Analog {
        /// Address of the battery module (e.g., 1 or 0x01)
        #[arg(value_parser = maybe_hex::<u8>)]
        address: u8,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Debug)]
        format: OutputFormat,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
#[group(required = true, multiple = false)]
pub struct ConnectionArgs {
    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long)]
    pub device: Option<String>,

    /// Address of a TCP-to-serial bridge (e.g., 192.168.1.10:5000)
    #[arg(long)]
    pub tcp: Option<String>,

    /// YAML file describing the connection
    #[arg(long)]
    pub config: Option<String>,
}

const fn about_text() -> &'static str {
    "pace bms command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Baud rate of the serial port
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    /// Timeout for I/O operations (e.g., "500ms", "2s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "2s")]
    pub timeout: Duration,

    /// Protocol version byte (e.g., 0x25 for PACE, 0x20 for Pylontech)
    #[arg(long, value_parser = maybe_hex::<u8>, default_value = "0x25")]
    pub protocol_version: u8,

    #[command(subcommand)]
    pub command: CliCommands,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parse_tcp_analog() {
        let args = CliArgs::try_parse_from([
            "pacebms",
            "--tcp",
            "192.168.1.10:5000",
            "--timeout",
            "500ms",
            "analog",
            "0x02",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.connection.tcp.as_deref(), Some("192.168.1.10:5000"));
        assert_eq!(args.timeout, Duration::from_millis(500));
        assert_eq!(args.protocol_version, 0x25);
        assert_eq!(
            args.command,
            CliCommands::Analog {
                address: 2,
                format: OutputFormat::Json
            }
        );
    }

    #[test]
    fn connection_is_required() {
        assert!(CliArgs::try_parse_from(["pacebms", "analog", "1"]).is_err());
    }

    #[test]
    fn connections_are_exclusive() {
        assert!(CliArgs::try_parse_from([
            "pacebms",
            "--device",
            "/dev/ttyUSB0",
            "--tcp",
            "localhost:5000",
            "analog",
            "1"
        ])
        .is_err());
    }
}
