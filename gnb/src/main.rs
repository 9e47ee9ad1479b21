//! Albor Space 5G GNodeB Main Application
//!
//! Runs the upper PHY against a simulated radio timeline and a protocol stub.

mod config;
mod lower_phy;
mod processors;
mod protocol;

use anyhow::{Context, Result};
use clap::Parser;
use common::types::Rnti;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::GnbConfig;
use layers::phy::{PhyTimingAdapter, UpperPhy};
use lower_phy::SimulatedLowerPhy;
use processors::{PowerSlotProcessor, ZcPrachDetector};
use protocol::{ProtocolStub, ProtocolStubConfig};

/// Simulated UE decoded by the stand-in PUSCH processor
const SIMULATED_UE_RNTI: Rnti = Rnti(0x4601);
const SIMULATED_UE_HARQ_PROCESSES: u8 = 8;
const SIMULATED_UE_MIN_SINR_DB: f32 = 3.0;

/// Albor Space 5G GNodeB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gnb.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides the file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Slot duration multiplier, overrides the file
    #[arg(long)]
    slot_time_scale: Option<f64>,

    /// Seconds between statistics reports
    #[arg(long, default_value = "5")]
    stats_interval_secs: u64,
}

fn load_config(args: &Args) -> Result<GnbConfig> {
    let mut config = if Path::new(&args.config).exists() {
        GnbConfig::from_yaml_file(&args.config)?
    } else {
        GnbConfig::default()
    };
    if let Some(scale) = args.slot_time_scale {
        config.radio.slot_time_scale = scale;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(args: &Args, config: &GnbConfig) {
    let directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.filter_directive());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}

/// Log any panic and abort the process
///
/// Wiring errors panic on worker and radio threads. Left alone, only that
/// thread would die and the rest of the PHY would keep running without it.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!("{}", panic_info);
        default_hook(panic_info);
        std::process::abort();
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&args, &config);
    install_panic_hook();

    info!("Starting Albor Space 5G GNodeB");
    if !Path::new(&args.config).exists() {
        warn!("Configuration file {} not found, using defaults", args.config);
    } else {
        info!("Configuration file: {}", args.config);
    }

    let scs = config.scs()?;
    info!("Cell configuration:");
    info!("  Subcarrier spacing: {} kHz", scs.to_khz());
    info!("  Bandwidth: {} PRBs", config.cell_cfg.nof_prbs);
    info!("  Sectors: {}", config.cell_cfg.nof_sectors);
    info!("  PRACH: {:?} every {} slots", config.cell_cfg.prach.format, config.cell_cfg.prach.period_slots);

    // Lower PHY first so its adapters exist before anything binds to them
    let lower = Arc::new(SimulatedLowerPhy::new(config.lower_phy_config()?));

    let detector = Arc::new(ZcPrachDetector::new(
        config.cell_cfg.prach.root_sequence_index,
        config.cell_cfg.prach.detection_threshold,
    ));
    let slot_processor = Arc::new(PowerSlotProcessor::new(
        SIMULATED_UE_RNTI,
        SIMULATED_UE_HARQ_PROCESSES,
        SIMULATED_UE_MIN_SINR_DB,
    ));
    let upper = Arc::new(
        UpperPhy::new(config.upper_phy_config()?, detector, slot_processor)
            .context("Failed to create the upper PHY")?,
    );

    // Lower to upper
    let timing_adapter = Arc::new(PhyTimingAdapter::default());
    timing_adapter.connect(upper.timing_handler());
    lower.timing().subscribe(timing_adapter);
    lower.rx_adapter().connect(upper.rx_symbol_handler());
    lower.error_adapter().connect(upper.error_handler());
    lower.connect_downlink_grids(upper.dl_grid_pool().clone());

    // Upper to lower
    upper.connect_request_handler(lower.clone());

    // Upper to protocol
    let protocol = Arc::new(ProtocolStub::new(
        ProtocolStubConfig {
            scs,
            nof_sectors: config.cell_cfg.nof_sectors,
            nof_tx_ports: config.cell_cfg.nof_tx_ports,
            prach_format: config.cell_cfg.prach.format,
            prach_period_slots: config.cell_cfg.prach.period_slots,
            prach_rb_offset: config.cell_cfg.prach.prach_frequency_start,
        },
        Arc::downgrade(&upper),
    ));
    upper.set_timing_notifier(protocol.clone());
    upper.set_rx_results_notifier(protocol.clone());
    upper.set_error_notifier(protocol.clone());

    lower.start()?;
    info!("GNodeB initialized successfully");

    let stats_handle = {
        let lower = lower.clone();
        let upper = upper.clone();
        let protocol = protocol.clone();
        let period = Duration::from_secs(args.stats_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let radio = lower.stats();
                let phy = upper.stats();
                let mac = protocol.stats();

                info!("PHY Statistics:");
                info!(
                    "  Slots: {}, late slots: {}, TX grids: {}, rejected requests: {}",
                    radio.slots, radio.late_slots, radio.tx_grids, radio.rejected_requests
                );
                info!(
                    "  UL captures: {}, PRACH captures: {}, injected preambles: {}",
                    radio.ul_captures, radio.prach_captures, radio.injected_preambles
                );
                info!(
                    "  Late grids: {}, late PRACH: {}, PRACH overflows: {}, dropped captures: {}",
                    phy.late_resource_grids, phy.late_prach_requests, phy.prach_overflows, phy.dropped_rx_captures
                );
                info!(
                    "  Softbuffers reserved: {}, pending tasks: {}",
                    phy.reserved_softbuffers, phy.pending_tasks
                );
                info!(
                    "  MAC slots: {}, PRACH windows: {}, preambles: {}, PUSCH ok/ko: {}/{}, PUCCH: {}, errors: {}",
                    mac.slots, mac.prach_windows, mac.preambles, mac.pusch_crc_ok, mac.pusch_crc_ko, mac.pucch, mac.errors
                );
            }
        })
    };

    let run_limit = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = run_limit => {
            info!("Run duration elapsed");
        }
    }

    info!("Shutting down GNodeB");
    stats_handle.abort();

    let shutdown = {
        let lower = lower.clone();
        let upper = upper.clone();
        tokio::task::spawn_blocking(move || {
            lower.stop();
            upper.stop();
        })
    };
    if tokio::time::timeout(Duration::from_secs(5), shutdown).await.is_err() {
        error!("Timed out stopping the PHY");
    }

    info!("GNodeB shutdown complete");
    Ok(())
}
