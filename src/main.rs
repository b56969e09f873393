//! CLI Entry Point for spectro_daq
//!
//! Runs acquisitions on the simulated backend:
//! - `acquire`: configure and run one session, optionally save it as CSV
//! - `axis`: print the wavelength of every detector column
//!
//! # Usage
//!
//! ```bash
//! spectro_daq acquire --mode acc-multi-scan --scans 3 --accumulate 4 --save
//! spectro_daq axis --grating 1 --center 650
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use spectro_daq::acquisition::{AcquisitionActor, AcquisitionMode, ModuleLock};
use spectro_daq::config::{MockConfig, Settings};
use spectro_daq::data::save_acquired_data;
use spectro_daq::hardware::capabilities::{Detector, Spectrometer};
use spectro_daq::hardware::mock::{MockDetector, MockSpectrometer};
use spectro_daq::logging;
use spectro_daq::messages::AcquisitionEvent;
use spectro_daq::spectrum::SpectrumController;

#[derive(Parser)]
#[command(name = "spectro_daq")]
#[command(about = "Spectrometer acquisition with cosmic-ray rejection", long_about = None)]
struct Cli {
    /// Settings file (defaults to config/spectro_daq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one acquisition session
    Acquire {
        /// Acquisition mode, e.g. single-scan or acc-multi-scan
        #[arg(long)]
        mode: Option<AcquisitionMode>,

        /// Number of scans in multi modes
        #[arg(long)]
        scans: Option<u32>,

        /// Frames per accumulation group
        #[arg(long)]
        accumulate: Option<u32>,

        /// Exposure time in seconds
        #[arg(long)]
        exposure: Option<f64>,

        /// Save the acquired data as CSV
        #[arg(long)]
        save: bool,

        /// Output directory (overrides storage.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the wavelength axis
    Axis {
        /// Grating index
        #[arg(long)]
        grating: Option<usize>,

        /// Center wavelength in nanometres
        #[arg(long)]
        center: Option<f64>,
    },
}

struct AcquireArgs {
    mode: Option<AcquisitionMode>,
    scans: Option<u32>,
    accumulate: Option<u32>,
    exposure: Option<f64>,
    save: bool,
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    settings.validate()?;
    logging::init_from_config(&settings)?;

    match cli.command {
        Commands::Acquire {
            mode,
            scans,
            accumulate,
            exposure,
            save,
            output,
        } => {
            let args = AcquireArgs {
                mode,
                scans,
                accumulate,
                exposure,
                save,
                output,
            };
            acquire(&settings, args).await
        }
        Commands::Axis { grating, center } => print_axis(&settings, grating, center).await,
    }
}

fn mock_detector(config: &MockConfig) -> Arc<dyn Detector> {
    Arc::new(
        MockDetector::new(config.width, config.height)
            .with_polls_until_ready(config.polls_until_ready)
            .with_cosmic_probability(config.cosmic_probability),
    )
}

async fn acquire(settings: &Settings, args: AcquireArgs) -> Result<()> {
    let lock = ModuleLock::new();
    let detector = mock_detector(&settings.mock);
    let spectrometer: Arc<dyn Spectrometer> = Arc::new(MockSpectrometer::new());
    let controller = SpectrumController::new(detector.clone(), spectrometer, lock.clone());
    let (handle, task) = AcquisitionActor::spawn(detector, lock, settings);

    let mut parameters = settings.acquisition.defaults;
    if let Some(mode) = args.mode {
        parameters.mode = mode;
    }
    if let Some(scans) = args.scans {
        parameters.number_of_scans = scans;
    }
    if let Some(accumulate) = args.accumulate {
        parameters.number_accumulated_scans = accumulate;
    }
    if let Some(exposure) = args.exposure {
        parameters.exposure_time = exposure;
    }
    handle.configure(parameters).await?;

    let mut events = handle.subscribe();
    handle.start_acquisition().await?;
    if parameters.mode == AcquisitionMode::LiveScan {
        println!("Live acquisition running, press Ctrl-C to stop");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    report(&event);
                    if event.is_terminal() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} acquisition events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping acquisition");
                handle.stop_acquisition().await?;
            }
        }
    }

    let frames = handle.get_acquired_data().await?;
    println!("Acquired {} frame(s)", frames.len());

    if args.save && !frames.is_empty() {
        let metadata = controller.metadata(&parameters).await?;
        let axis = controller.wavelength_spectrum().await?;
        let wavelengths = frames
            .first()
            .filter(|f| f.width == axis.len())
            .map(|_| axis.as_slice());
        let dir = args
            .output
            .unwrap_or_else(|| settings.storage.output_dir.clone());
        let path = save_acquired_data(dir, &frames, &metadata, wavelengths)?;
        println!("Saved to {}", path.display());
    }

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

fn report(event: &AcquisitionEvent) {
    match event {
        AcquisitionEvent::Started {
            mode,
            total_collections,
            ..
        } => println!("Started {mode} ({total_collections} exposures)"),
        AcquisitionEvent::FrameCollected {
            index, remaining, ..
        } => println!("  frame {index} read out, {remaining} left"),
        AcquisitionEvent::AccumulationFiltered {
            group, rejected, ..
        } => println!("  group {group} filtered, {rejected} value(s) rejected"),
        AcquisitionEvent::LiveFrame { frame, .. } => {
            let peak = frame.data.iter().copied().fold(f64::NAN, f64::max);
            println!("  live frame, peak {peak:.1}");
        }
        AcquisitionEvent::Completed { frames, .. } => println!("Completed with {frames} frame(s)"),
        AcquisitionEvent::Stopped { .. } => println!("Stopped"),
        AcquisitionEvent::Failed { error, .. } => println!("Failed: {error}"),
    }
}

async fn print_axis(
    settings: &Settings,
    grating: Option<usize>,
    center: Option<f64>,
) -> Result<()> {
    let controller = SpectrumController::new(
        mock_detector(&settings.mock),
        Arc::new(MockSpectrometer::new()),
        ModuleLock::new(),
    );
    if let Some(index) = grating {
        controller.set_grating_index(index).await?;
    }
    if let Some(nm) = center {
        controller.set_center_wavelength(nm * 1e-9).await?;
    }

    let axis = controller.wavelength_spectrum().await?;
    println!("pixel\twavelength_nm");
    for (pixel, wavelength) in axis.iter().enumerate() {
        println!("{pixel}\t{:.4}", wavelength * 1e9);
    }
    Ok(())
}
