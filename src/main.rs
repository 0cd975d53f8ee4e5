//! CLI Entry Point for smu_daq
//!
//! Provides command-line interface for:
//! - Checking that the instrument answers (`identify`)
//! - Applying the configured source, sense and trigger settings and reading them back
//! - Running a continuous acquisition until Ctrl-C, then writing the dataset to CSV
//! - Printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! smu_daq --config config/smu.toml identify
//! smu_daq acquire --output data/run.csv
//! smu_daq --simulate acquire --no-display
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smu_daq::acquisition::{AcquisitionLoop, LiveDisplay, RunOutcome, TracingDisplay};
use smu_daq::adapters::{ByteChannel, SerialChannel, SimulatedKeithley};
use smu_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use smu_daq::data::CsvWriter;
use smu_daq::instrument::Keithley2400;
use smu_daq::logging;
use smu_daq::scpi::ScpiSession;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "smu_daq")]
#[command(about = "Source-measure unit control and acquisition over serial SCPI", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Talk to an in-process simulated instrument instead of the serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query the instrument identity
    Identify,

    /// Apply source, sense and trigger settings and print the read-backs
    Configure,

    /// Acquire until Ctrl-C or an error, then write the dataset
    Acquire {
        /// CSV destination (defaults to a timestamped file in the storage directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Do not log every reading
        #[arg(long)]
        no_display: bool,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    logging::init_from_settings(&settings)?;
    settings.validate()?;

    if let Commands::ShowConfig = cli.command {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    if cli.simulate {
        info!("using simulated instrument");
        run(cli.command, &settings, SimulatedKeithley::new())
    } else {
        let channel = SerialChannel::open(&settings.serial)
            .with_context(|| format!("opening {}", settings.serial.port))?;
        run(cli.command, &settings, channel)
    }
}

fn run<C: ByteChannel>(command: Commands, settings: &Settings, channel: C) -> Result<()> {
    let session = ScpiSession::from_settings(channel, &settings.protocol);
    let mut smu = Keithley2400::new(session);

    let result = match command {
        Commands::Identify => identify(&mut smu),
        Commands::Configure => configure(&mut smu, settings),
        Commands::Acquire { output, no_display } => acquire(
            &mut smu,
            settings,
            output,
            settings.acquisition.live_display && !no_display,
        ),
        Commands::ShowConfig => Ok(()),
    };

    smu.close();
    result
}

fn identify<C: ByteChannel>(smu: &mut Keithley2400<C>) -> Result<()> {
    let (open, identity) = smu.identify()?;
    println!("open:     {}", open);
    println!("identity: {}", identity);
    Ok(())
}

fn configure<C: ByteChannel>(smu: &mut Keithley2400<C>, settings: &Settings) -> Result<()> {
    apply_settings(smu, settings)?;

    let source = smu.read_source()?;
    println!("source: {}", source.as_array().join(", "));
    let sense = smu.read_sense()?;
    println!(
        "sense:  {}, {}, {}, tripped={}",
        sense.function, sense.range, sense.compliance, sense.tripped
    );
    Ok(())
}

fn acquire<C: ByteChannel>(
    smu: &mut Keithley2400<C>,
    settings: &Settings,
    output: Option<PathBuf>,
    live_display: bool,
) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    apply_settings(smu, settings)?;
    smu.set_output(true)?;

    let mut acquisition = AcquisitionLoop::from_settings(&settings.acquisition, &settings.trigger);
    let mut tracing_display = TracingDisplay;
    let display: Option<&mut dyn LiveDisplay> = if live_display {
        Some(&mut tracing_display as &mut dyn LiveDisplay)
    } else {
        None
    };
    println!("Acquiring, press Ctrl-C to stop");
    let run = acquisition.run(smu.session_mut(), display, &stop);

    if let Err(e) = smu.set_output(false) {
        warn!(error = %e, "could not switch output off");
    }

    let writer = match output {
        Some(path) => CsvWriter::new(path),
        None => CsvWriter::from_settings(&settings.storage)?,
    };
    let written = writer.write(acquisition.shape(), &run.records)?;
    println!(
        "{} records from {} iterations written to {}",
        written,
        run.iterations,
        writer.path().display()
    );

    match run.outcome {
        RunOutcome::Stopped => Ok(()),
        RunOutcome::Failed(err) => Err(err).context("acquisition ended early"),
    }
}

fn apply_settings<C: ByteChannel>(smu: &mut Keithley2400<C>, settings: &Settings) -> Result<()> {
    smu.configure(
        &settings.source,
        &settings.sense,
        &settings.trigger,
        settings.acquisition.shape,
    )?;
    Ok(())
}
