//! Configuration management for the hwfand daemon.
//!
//! Handles loading, parsing, and validation of the YAML configuration file
//! that defines the hwmon groups, duty bounds, and control-loop tuning.
//! Configuration is read once at process start; there is no reload.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Main configuration structure for the hwfand daemon.
///
/// Every section is optional in the file; missing values fall back to the
/// defaults shown below.
///
/// # Example
///
/// ```yaml
/// version: 1
/// groups:
///   fan: "pwmfan"
///   pwm_channel: 1
///   cpu: "cpu_thermal"
///   storage: ["nvme", "drivetemp"]
/// control:
///   min_duty: 76
///   max_duty: 255
///   interval: 5
///   hysteresis_margin: 2
///   min_dwell: 10
///   max_step: 12
///   ema_numerator: 3
///   ema_denominator: 4
///   safe_duty: 153
/// tiers:
///   breakpoints: [40, 50, 60, 70]
///   duties: [110, 150, 200]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Directory holding the hardware-monitor entries.
    #[serde(default = "defaults::hwmon_root")]
    pub hwmon_root: PathBuf,

    /// Advisory lock file guarding the actuator.
    #[serde(default = "defaults::lock_path")]
    pub lock_path: PathBuf,

    /// Where the running daemon publishes its status snapshot.
    #[serde(default = "defaults::status_path")]
    pub status_path: PathBuf,

    #[serde(default)]
    pub groups: GroupsCfg,

    #[serde(default)]
    pub control: ControlCfg,

    #[serde(default)]
    pub tiers: TiersCfg,
}

/// Names of the hwmon groups the daemon reads and drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupsCfg {
    /// Mandatory fan-controller group (duty control, speed readback, temperatures).
    #[serde(default = "defaults::fan_group")]
    pub fan: String,

    /// Index N of the `pwmN` / `fanN_input` endpoints inside the fan group.
    #[serde(default = "defaults::pwm_channel")]
    pub pwm_channel: u8,

    /// Optional CPU package group.
    #[serde(default = "defaults::cpu_group")]
    pub cpu: Option<String>,

    /// Storage-device group names; every hwmon entry carrying one of them is read.
    #[serde(default = "defaults::storage_groups")]
    pub storage: Vec<String>,
}

/// Control-loop tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCfg {
    #[serde(default = "defaults::min_duty")]
    pub min_duty: u8,

    #[serde(default = "defaults::max_duty")]
    pub max_duty: u8,

    /// Cycle period in seconds.
    #[serde(default = "defaults::interval")]
    pub interval: u64,

    /// Degrees Celsius of slack around a tier boundary.
    #[serde(default = "defaults::hysteresis_margin")]
    pub hysteresis_margin: u32,

    /// Minimum seconds between two applied duty changes.
    #[serde(default = "defaults::min_dwell")]
    pub min_dwell: u64,

    /// Largest duty delta applied in one cycle.
    #[serde(default = "defaults::max_step")]
    pub max_step: u8,

    #[serde(default = "defaults::ema_numerator")]
    pub ema_numerator: u32,

    #[serde(default = "defaults::ema_denominator")]
    pub ema_denominator: u32,

    /// Duty pinned by `safe-duty` before the driver is removed.
    #[serde(default = "defaults::safe_duty")]
    pub safe_duty: u8,
}

/// Tier breakpoints in whole degrees Celsius and the duties between them.
///
/// Below `breakpoints[0]` the fan runs at `min_duty`, at or above the last
/// breakpoint at `max_duty`; `duties[i]` covers `breakpoints[i]..breakpoints[i + 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiersCfg {
    #[serde(default = "defaults::breakpoints")]
    pub breakpoints: [u32; 4],

    #[serde(default = "defaults::duties")]
    pub duties: [u8; 3],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            hwmon_root: defaults::hwmon_root(),
            lock_path: defaults::lock_path(),
            status_path: defaults::status_path(),
            groups: GroupsCfg::default(),
            control: ControlCfg::default(),
            tiers: TiersCfg::default(),
        }
    }
}

impl Default for GroupsCfg {
    fn default() -> Self {
        Self {
            fan: defaults::fan_group(),
            pwm_channel: defaults::pwm_channel(),
            cpu: defaults::cpu_group(),
            storage: defaults::storage_groups(),
        }
    }
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            min_duty: defaults::min_duty(),
            max_duty: defaults::max_duty(),
            interval: defaults::interval(),
            hysteresis_margin: defaults::hysteresis_margin(),
            min_dwell: defaults::min_dwell(),
            max_step: defaults::max_step(),
            ema_numerator: defaults::ema_numerator(),
            ema_denominator: defaults::ema_denominator(),
            safe_duty: defaults::safe_duty(),
        }
    }
}

impl Default for TiersCfg {
    fn default() -> Self {
        Self {
            breakpoints: defaults::breakpoints(),
            duties: defaults::duties(),
        }
    }
}

impl ControlCfg {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_secs(self.min_dwell)
    }

    /// Safe-shutdown duty clamped into the configured bounds.
    pub fn clamped_safe_duty(&self) -> u8 {
        self.safe_duty.clamp(self.min_duty, self.max_duty)
    }
}

impl Config {
    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. HWFAND_CONFIG environment variable
    /// 3. /etc/hwfand/config.yml
    ///
    /// Falls back to built-in defaults when no file exists. An explicitly
    /// requested file that cannot be read is an error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(config_path) = path.or_else(locate_config) else {
            info!("No configuration file found, using built-in defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        };

        info!("Loading config from: {}", config_path.display());
        Self::load_from_path(&config_path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid configuration in: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).context("Failed to parse YAML")?;

        if config.version != 1 {
            anyhow::bail!("Unsupported config version {}", config.version);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for consistency.
    ///
    /// # Example
    ///
    /// ```
    /// use hwfand::config::Config;
    ///
    /// let config = Config::default();
    /// config.validate()?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn validate(&self) -> Result<()> {
        let c = &self.control;

        if c.min_duty > c.max_duty {
            anyhow::bail!(
                "min_duty ({}) must not exceed max_duty ({})",
                c.min_duty,
                c.max_duty
            );
        }
        if c.interval == 0 {
            anyhow::bail!("interval must be at least 1 second");
        }
        if c.max_step == 0 {
            anyhow::bail!("max_step must be at least 1");
        }
        if c.ema_denominator == 0 {
            anyhow::bail!("ema_denominator must be at least 1");
        }
        if c.ema_numerator > c.ema_denominator {
            anyhow::bail!(
                "ema_numerator ({}) must not exceed ema_denominator ({})",
                c.ema_numerator,
                c.ema_denominator
            );
        }

        if !self.tiers.breakpoints.windows(2).all(|w| w[0] < w[1]) {
            anyhow::bail!(
                "tier breakpoints {:?} must be strictly increasing",
                self.tiers.breakpoints
            );
        }
        if !self.tiers.duties.windows(2).all(|w| w[0] <= w[1]) {
            anyhow::bail!(
                "tier duties {:?} must be non-decreasing",
                self.tiers.duties
            );
        }
        let [lowest, _, highest] = self.tiers.duties;
        if lowest < c.min_duty || highest > c.max_duty {
            anyhow::bail!(
                "tier duties {:?} must lie within [{}, {}]",
                self.tiers.duties,
                c.min_duty,
                c.max_duty
            );
        }
        let span = self.tiers.breakpoints[3] - self.tiers.breakpoints[0];
        if c.hysteresis_margin > span {
            anyhow::bail!(
                "hysteresis_margin ({}) must not exceed the breakpoint span ({span})",
                c.hysteresis_margin
            );
        }

        if self.groups.fan.trim().is_empty() {
            anyhow::bail!("fan group name cannot be empty");
        }
        if self.groups.pwm_channel == 0 {
            anyhow::bail!("pwm_channel is 1-based");
        }

        Ok(())
    }
}

fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("HWFAND_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let etc = Path::new("/etc/hwfand/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}

mod defaults {
    use std::path::PathBuf;

    pub fn hwmon_root() -> PathBuf {
        PathBuf::from("/sys/class/hwmon")
    }

    pub fn lock_path() -> PathBuf {
        PathBuf::from("/run/hwfand.lock")
    }

    pub fn status_path() -> PathBuf {
        PathBuf::from("/run/hwfand/status.json")
    }

    pub fn fan_group() -> String {
        "pwmfan".to_string()
    }

    pub fn pwm_channel() -> u8 {
        1
    }

    pub fn cpu_group() -> Option<String> {
        Some("cpu_thermal".to_string())
    }

    pub fn storage_groups() -> Vec<String> {
        vec!["nvme".to_string(), "drivetemp".to_string()]
    }

    pub fn min_duty() -> u8 {
        76
    }

    pub fn max_duty() -> u8 {
        255
    }

    pub fn interval() -> u64 {
        5
    }

    pub fn hysteresis_margin() -> u32 {
        2
    }

    pub fn min_dwell() -> u64 {
        10
    }

    pub fn max_step() -> u8 {
        12
    }

    pub fn ema_numerator() -> u32 {
        3
    }

    pub fn ema_denominator() -> u32 {
        4
    }

    pub fn safe_duty() -> u8 {
        153
    }

    pub fn breakpoints() -> [u32; 4] {
        [40, 50, 60, 70]
    }

    pub fn duties() -> [u8; 3] {
        [110, 150, 200]
    }
}
