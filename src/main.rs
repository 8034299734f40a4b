mod commandline;
mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use commandline::{CliArgs, CliCommands, OutputFormat};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pacebms_lib::client::PaceBMS;
use pacebms_lib::transport::{ConnectionConfig, Target};
use std::{ops::Deref, panic};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn connection_config(args: &CliArgs) -> Result<ConnectionConfig> {
    let connection = &args.connection;
    if let Some(config_file) = &connection.config {
        let config = config::Config::load(config_file)?;
        return Ok(config.into_connection_config(args.timeout));
    }
    let target = match (&connection.device, &connection.tcp) {
        (Some(device), _) => Target::Serial {
            device: device.clone(),
            baud_rate: args.baud_rate,
        },
        (None, Some(address)) => Target::Tcp {
            address: address.clone(),
        },
        (None, None) => bail!("No connection given, use --device, --tcp or --config"),
    };
    Ok(ConnectionConfig::new(target, args.timeout))
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let connection = connection_config(&args)?;
    let mut bms = PaceBMS::open(&connection)
        .with_context(|| format!("Cannot open {}", connection.target))?;
    bms.set_version(args.protocol_version);

    match args.command {
        CliCommands::Analog { address, format } => {
            let values = bms
                .get_analog_values(address)
                .with_context(|| format!("Cannot get analog values of module {address}"))?;
            match format {
                OutputFormat::Debug => println!("Analog values: {values:?}"),
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string(&values).with_context(|| "Cannot render JSON")?
                ),
            }
        }
    }

    Ok(())
}
