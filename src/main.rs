//! CLI Entry Point for resistes-daq
//!
//! Provides command-line interface for:
//! - Running an acquisition and writing records as CSV
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Stream one sample per second from a serial device into a file:
//! ```bash
//! resistes-daq startacquisition serial:/dev/ttyUSB0:19200 --output acq.csv --stdoutdisplay
//! ```
//!
//! Manual mode, one measurement per Enter key, against the simulated device:
//! ```bash
//! resistes-daq startacquisition mock: --integration-nb 0
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use resistes_daq::adapters::open_channel;
use resistes_daq::config::Settings;
use resistes_daq::data::CsvWriter;
use resistes_daq::hardware::ValueCodec;
use resistes_daq::logging;
use resistes_daq::session::{stop_pair, AcquisitionSession, SessionOptions};
use resistes_daq::trigger::{NeverTrigger, StdinTrigger, TriggerSource};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "resistes-daq", version)]
#[command(about = "Acquisition tool for the electro-static resistivimeter", long_about = None)]
struct Cli {
    /// Configuration file (default: config/resistes.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log protocol frames
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the device and record its measurements
    #[command(name = "startacquisition")]
    StartAcquisition(AcquisitionArgs),

    /// Print the effective configuration as TOML
    #[command(name = "showconfig")]
    ShowConfig,
}

#[derive(clap::Args)]
struct AcquisitionArgs {
    /// Device URL: serial:<port>[:<baud>[:<framing>]], tcp:<host>:<port> or mock:
    url: Option<String>,

    /// Read timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Injection voltage, V
    #[arg(long)]
    voltage: Option<f64>,

    /// Injection frequency
    #[arg(long)]
    frequency: Option<f64>,

    /// Impulsions per measurement
    #[arg(long, visible_alias = "impuls_nb")]
    impuls_nb: Option<u32>,

    /// Channels per measure frame
    #[arg(long, visible_alias = "channels_nb")]
    channels_nb: Option<u32>,

    /// Values per second, 0 for one measurement per Enter key
    #[arg(long, visible_alias = "integration_nb")]
    integration_nb: Option<u32>,

    /// CSV output file (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,

    /// CSV delimiter
    #[arg(long)]
    delim: Option<String>,

    /// Also print records on stdout when writing to a file
    #[arg(long)]
    stdoutdisplay: bool,

    /// Prepend the reception date to each record
    #[arg(long)]
    datetimedisplay: bool,

    /// Stop after this many records
    #[arg(long)]
    max_records: Option<u64>,
}

impl AcquisitionArgs {
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(url) = &self.url {
            settings.connection.url = Some(url.clone());
        }
        if let Some(secs) = self.timeout {
            settings.connection.timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid timeout {}", secs))?;
        }
        let acq = &mut settings.acquisition;
        if let Some(v) = self.voltage {
            acq.voltage = v;
        }
        if let Some(f) = self.frequency {
            acq.frequency = f;
        }
        if let Some(n) = self.impuls_nb {
            acq.impuls_nb = n;
        }
        if let Some(n) = self.channels_nb {
            acq.channels_nb = n;
        }
        if let Some(n) = self.integration_nb {
            acq.integration_nb = n;
        }
        let out = &mut settings.output;
        if let Some(path) = &self.output {
            out.path = Some(path.clone());
        }
        if let Some(delim) = &self.delim {
            out.delimiter = delim.clone();
        }
        out.stdout_display |= self.stdoutdisplay;
        out.datetime |= self.datetimedisplay;
        Ok(())
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_required(path),
        None => Settings::load(),
    }
    .context("Failed to load configuration")?;
    if cli.debug {
        settings.application.log_level = "debug".to_string();
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli)?;

    match &cli.command {
        Commands::ShowConfig => {
            settings.validate().context("Invalid configuration")?;
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Commands::StartAcquisition(args) => {
            args.apply(&mut settings)?;
            settings.validate().context("Invalid configuration")?;
            logging::init_from_settings(&settings)?;
            start_acquisition(settings, args.max_records).await
        }
    }
}

async fn start_acquisition(settings: Settings, max_records: Option<u64>) -> Result<()> {
    let url = settings
        .connection
        .url
        .clone()
        .context("No device URL given on the command line or in the configuration")?;

    let codec = ValueCodec::new(settings.device);
    let config = settings
        .acquisition
        .validate(&codec)
        .context("Invalid acquisition parameters")?;

    let mut writer = CsvWriter::create(
        settings.output.path.as_deref(),
        &settings.csv_options()?,
        usize::from(config.channels_nb()),
    )
    .context("Failed to open output")?;

    let channel = open_channel(&url, settings.connection.timeout)
        .await
        .with_context(|| format!("Failed to open {}", url))?;
    let mut options = SessionOptions::from_settings(&settings);
    options.max_records = max_records;
    let mut session =
        AcquisitionSession::new(channel, settings.acquisition.clone(), options).with_codec(codec);

    let (stop, mut signal) = stop_pair();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, stopping acquisition");
                stop.stop();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    let mut trigger: Box<dyn TriggerSource> = if config.is_manual() {
        eprintln!("Manual mode: press Enter to request a measurement, Ctrl-D to finish.");
        Box::new(StdinTrigger::new())
    } else {
        Box::new(NeverTrigger)
    };

    let summary = session
        .run(&mut writer, trigger.as_mut(), &mut signal)
        .await
        .with_context(|| format!("Acquisition on {} failed", url))?;
    info!(
        state = %summary.state,
        records = summary.records,
        missed = summary.missed,
        malformed = summary.malformed,
        "Acquisition finished"
    );
    Ok(())
}
