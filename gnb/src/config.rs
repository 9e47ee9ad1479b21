//! YAML Configuration Structures
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable single-sector cell.

use anyhow::{anyhow, bail, Context};
use common::executors::{RealTimePriority, TaskWorkerPoolConfig};
use crate::lower_phy::LowerPhyConfig;
use common::types::{CyclicPrefix, SubcarrierSpacing};
use interfaces::PrachFormat;
use layers::phy::{PrachBufferPoolConfig, ResourceGridPoolConfig, SoftbufferPoolConfig, UpperPhyConfig};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GnbConfig {
    /// Cell configuration
    #[serde(default)]
    pub cell_cfg: CellConfig,
    /// Upper PHY resources
    #[serde(default)]
    pub upper_phy: UpperPhySection,
    /// Simulated radio
    #[serde(default)]
    pub radio: RadioConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Common subcarrier spacing in kHz
    #[serde(default = "default_common_scs")]
    pub common_scs: u32,
    /// Cyclic prefix
    #[serde(default)]
    pub cyclic_prefix: CyclicPrefix,
    /// Number of sectors
    #[serde(default = "default_one")]
    pub nof_sectors: usize,
    /// Downlink antenna ports per sector
    #[serde(default = "default_one")]
    pub nof_tx_ports: usize,
    /// Uplink receive ports per sector
    #[serde(default = "default_one")]
    pub nof_rx_ports: usize,
    /// Carrier bandwidth in resource blocks
    #[serde(default = "default_nof_prbs")]
    pub nof_prbs: usize,
    /// PRACH configuration
    #[serde(default)]
    pub prach: PrachConfig,
}

fn default_common_scs() -> u32 {
    30
}

fn default_one() -> usize {
    1
}

fn default_nof_prbs() -> usize {
    51 // 20 MHz at 30 kHz
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            common_scs: default_common_scs(),
            cyclic_prefix: CyclicPrefix::Normal,
            nof_sectors: default_one(),
            nof_tx_ports: default_one(),
            nof_rx_ports: default_one(),
            nof_prbs: default_nof_prbs(),
            prach: PrachConfig::default(),
        }
    }
}

/// PRACH occasion configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrachConfig {
    /// Preamble format
    #[serde(default = "default_prach_format")]
    pub format: PrachFormat,
    /// Slots between PRACH occasions
    #[serde(default = "default_prach_period")]
    pub period_slots: u32,
    /// Frequency offset of the occasion in resource blocks
    #[serde(default)]
    pub prach_frequency_start: u32,
    /// Logical root sequence index
    #[serde(default = "default_root_sequence_index")]
    pub root_sequence_index: u16,
    /// Normalised correlation threshold for preamble detection
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f32,
}

fn default_prach_format() -> PrachFormat {
    PrachFormat::FormatB4
}

fn default_prach_period() -> u32 {
    20
}

fn default_root_sequence_index() -> u16 {
    1
}

fn default_detection_threshold() -> f32 {
    0.3
}

impl Default for PrachConfig {
    fn default() -> Self {
        Self {
            format: default_prach_format(),
            period_slots: default_prach_period(),
            prach_frequency_start: 0,
            root_sequence_index: default_root_sequence_index(),
            detection_threshold: default_detection_threshold(),
        }
    }
}

/// Upper PHY resource dimensioning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpperPhySection {
    /// Slots kept in the downlink grid ring
    #[serde(default = "default_grid_pool_depth")]
    pub dl_grid_pool_depth: usize,
    /// Slots kept in the uplink grid ring
    #[serde(default = "default_grid_pool_depth")]
    pub ul_grid_pool_depth: usize,
    /// Count grid requests that reach past the ring depth
    #[serde(default)]
    pub check_grid_reuse: bool,
    /// Maximum number of PRACH windows in flight
    #[serde(default = "default_max_prach_requests")]
    pub max_prach_requests: usize,
    /// HARQ softbuffers
    #[serde(default)]
    pub softbuffers: SoftbufferPoolConfig,
    /// Uplink processing threads
    #[serde(default = "default_nof_ul_workers")]
    pub nof_ul_workers: usize,
    /// Uplink task queue size
    #[serde(default = "default_ul_queue_size")]
    pub ul_queue_size: usize,
    /// SCHED_FIFO priority of the uplink threads
    #[serde(default)]
    pub ul_priority: Option<u8>,
    /// Finish uplink processing on the radio thread
    #[serde(default)]
    pub blocking_processing: bool,
}

fn default_grid_pool_depth() -> usize {
    8
}

fn default_max_prach_requests() -> usize {
    4
}

fn default_nof_ul_workers() -> usize {
    2
}

fn default_ul_queue_size() -> usize {
    64
}

impl Default for UpperPhySection {
    fn default() -> Self {
        Self {
            dl_grid_pool_depth: default_grid_pool_depth(),
            ul_grid_pool_depth: default_grid_pool_depth(),
            check_grid_reuse: false,
            max_prach_requests: default_max_prach_requests(),
            softbuffers: SoftbufferPoolConfig::default(),
            nof_ul_workers: default_nof_ul_workers(),
            ul_queue_size: default_ul_queue_size(),
            ul_priority: None,
            blocking_processing: false,
        }
    }
}

/// Simulated radio timeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RadioConfig {
    /// Slot duration multiplier, 1.0 runs in real time
    #[serde(default = "default_slot_time_scale")]
    pub slot_time_scale: f64,
    /// Capture requests buffered between two slots
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
    /// Probability of a synthetic preamble in each PRACH window
    #[serde(default = "default_preamble_probability")]
    pub preamble_probability: f64,
    /// Uplink noise amplitude
    #[serde(default = "default_noise_amplitude")]
    pub noise_amplitude: f32,
    /// SCHED_FIFO priority of the radio thread
    #[serde(default)]
    pub priority: Option<u8>,
}

fn default_slot_time_scale() -> f64 {
    1.0
}

fn default_max_pending_requests() -> usize {
    64
}

fn default_preamble_probability() -> f64 {
    0.5
}

fn default_noise_amplitude() -> f32 {
    0.05
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            slot_time_scale: default_slot_time_scale(),
            max_pending_requests: default_max_pending_requests(),
            preamble_probability: default_preamble_probability(),
            noise_amplitude: default_noise_amplitude(),
            priority: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// PHY layer log level
    #[serde(default = "default_log_level")]
    pub phy_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            phy_level: default_log_level(),
        }
    }
}

impl LogConfig {
    /// Filter directive for `EnvFilter`
    pub fn filter_directive(&self) -> String {
        format!("{},layers={},gnb={}", self.all_level, self.phy_level, self.phy_level)
    }
}

impl GnbConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: GnbConfig = serde_yaml::from_str(contents).context("Invalid YAML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Common subcarrier spacing
    pub fn scs(&self) -> anyhow::Result<SubcarrierSpacing> {
        SubcarrierSpacing::from_u32(self.cell_cfg.common_scs)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", self.cell_cfg.common_scs))
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> anyhow::Result<()> {
        self.scs()?;

        let cell = &self.cell_cfg;
        if cell.nof_sectors == 0 || cell.nof_tx_ports == 0 || cell.nof_rx_ports == 0 {
            bail!("Sectors and antenna ports must not be zero");
        }
        if cell.nof_prbs == 0 || cell.nof_prbs > 275 {
            bail!("Invalid bandwidth of {} resource blocks", cell.nof_prbs);
        }
        if cell.prach.period_slots == 0 {
            bail!("PRACH period must not be zero");
        }

        let phy = &self.upper_phy;
        if phy.dl_grid_pool_depth < 2 || phy.ul_grid_pool_depth < 2 {
            bail!("Resource grid pools need at least two slots");
        }
        if phy.max_prach_requests == 0 {
            bail!("At least one PRACH request must be allowed");
        }
        for priority in [phy.ul_priority, self.radio.priority].into_iter().flatten() {
            if !(1..=99).contains(&priority) {
                bail!("Real-time priority {} out of range 1-99", priority);
            }
        }

        let radio = &self.radio;
        if radio.slot_time_scale <= 0.0 {
            bail!("Slot time scale must be positive");
        }
        if !(0.0..=1.0).contains(&radio.preamble_probability) {
            bail!("Preamble probability {} out of range 0-1", radio.preamble_probability);
        }
        Ok(())
    }

    /// Dimension the upper PHY for this cell
    pub fn upper_phy_config(&self) -> anyhow::Result<UpperPhyConfig> {
        self.validate()?;
        let cell = &self.cell_cfg;
        let phy = &self.upper_phy;
        let nof_symbols = cell.cyclic_prefix.symbols_per_slot();
        let nof_subcarriers = cell.nof_prbs * 12;

        let mut worker_pool = TaskWorkerPoolConfig::new("up_phy_ul", phy.nof_ul_workers, phy.ul_queue_size);
        if let Some(priority) = phy.ul_priority {
            worker_pool = worker_pool.with_priority(RealTimePriority(priority));
        }

        Ok(UpperPhyConfig {
            dl_grid_pool: ResourceGridPoolConfig {
                nof_slots_in_pool: phy.dl_grid_pool_depth,
                nof_sectors: cell.nof_sectors,
                nof_antenna_ports: cell.nof_tx_ports,
                nof_symbols,
                nof_subcarriers,
                check_reuse: phy.check_grid_reuse,
            },
            ul_grid_pool: ResourceGridPoolConfig {
                nof_slots_in_pool: phy.ul_grid_pool_depth,
                nof_sectors: cell.nof_sectors,
                nof_antenna_ports: cell.nof_rx_ports,
                nof_symbols,
                nof_subcarriers,
                check_reuse: phy.check_grid_reuse,
            },
            prach_pool: PrachBufferPoolConfig::for_format(cell.prach.format, phy.max_prach_requests),
            softbuffer_pool: phy.softbuffers.clone(),
            worker_pool,
            nof_symbols_per_slot: nof_symbols,
            blocking_processing: phy.blocking_processing,
        })
    }

    /// Dimension the simulated radio for this cell
    pub fn lower_phy_config(&self) -> anyhow::Result<LowerPhyConfig> {
        let scs = self.scs()?;
        let cell = &self.cell_cfg;
        Ok(LowerPhyConfig {
            scs,
            nof_sectors: cell.nof_sectors,
            nof_tx_ports: cell.nof_tx_ports,
            nof_symbols: cell.cyclic_prefix.symbols_per_slot(),
            nof_subcarriers: cell.nof_prbs * 12,
            slot_time_scale: self.radio.slot_time_scale,
            max_pending_requests: self.radio.max_pending_requests,
            preamble_probability: self.radio.preamble_probability,
            prach_root_sequence_index: cell.prach.root_sequence_index,
            noise_amplitude: self.radio.noise_amplitude,
            priority: self.radio.priority.map(RealTimePriority),
        })
    }
}
