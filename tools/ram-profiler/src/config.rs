//! Run configuration
//!
//! Run parameters come from the command line. Settings that describe the
//! toolchain and the board rather than a single run (CLI binary, build
//! properties, baud rate, delays) live in an optional TOML profile:
//!
//! ```toml
//! [toolchain]
//! cli = "arduino-cli"
//! build_properties = ["spresense.menu.UploadSpeed=1152000"]
//! quiet = true
//! manual_bootloader = true
//!
//! [serial]
//! baud_rate = 115200
//! token_len = 2
//!
//! [timing]
//! bootloader_delay_ms = 2000
//! settle_delay_ms = 2000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use serde::Deserialize;

use crate::error::{ProfilerError, Result};
use crate::search::SearchRange;

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MIN: u64 = 1;
pub const DEFAULT_MAX: u64 = 1 << 24;

/// Command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ram-profiler")]
#[command(author)]
#[command(version)]
#[command(about = "Evaluate RAM usage of Arduino sketches", long_about = None)]
pub struct Args {
    /// Input .ino file for the sketch (must contain `$alloc_size`)
    pub sketch_file: PathBuf,

    /// FQBN of the target board
    pub fqbn: String,

    /// Serial port of the target board
    pub sketch_port: String,

    /// Max seconds to wait for the sketch to report
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Min available memory on the target board
    #[arg(long, default_value_t = DEFAULT_MIN)]
    pub min: u64,

    /// Max available memory on the target board
    #[arg(long, default_value_t = DEFAULT_MAX)]
    pub max: u64,

    /// TOML profile with toolchain, serial and timing settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// `env_logger` filter matching the requested verbosity
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// `[toolchain]` profile section
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Toolchain executable
    pub cli: String,
    /// `--build-property` values passed to every compile
    pub build_properties: Vec<String>,
    /// Pass `--quiet` to the compiler
    pub quiet: bool,
    /// Prompt the operator to enable the bootloader before each upload
    pub manual_bootloader: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cli: "arduino-cli".to_string(),
            build_properties: vec!["spresense.menu.UploadSpeed=1152000".to_string()],
            quiet: true,
            manual_bootloader: true,
        }
    }
}

/// `[serial]` profile section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Bytes of the device's self-report
    pub token_len: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            token_len: 2,
        }
    }
}

/// `[timing]` profile section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Pause for the operator to enable the bootloader
    pub bootloader_delay_ms: u64,
    /// Pause after flashing so the sketch can boot
    pub settle_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            bootloader_delay_ms: 2000,
            settle_delay_ms: 2000,
        }
    }
}

impl TimingConfig {
    pub fn bootloader_delay(&self) -> Duration {
        Duration::from_millis(self.bootloader_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Contents of a TOML profile; every section is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub toolchain: ToolchainConfig,
    pub serial: SerialConfig,
    pub timing: TimingConfig,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ProfilerError::io(path, e))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(text).map_err(|e| ProfilerError::Config {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;

        if profile.serial.token_len == 0 {
            return Err(ProfilerError::Config {
                path: path.to_path_buf(),
                message: "serial.token_len must be at least 1".to_string(),
            });
        }
        Ok(profile)
    }
}

/// Everything a run needs, resolved from [`Args`] and the optional profile
#[derive(Debug, Clone)]
pub struct Settings {
    pub sketch_file: PathBuf,
    pub fqbn: String,
    pub port: String,
    pub timeout: Duration,
    pub range: SearchRange,
    pub toolchain: ToolchainConfig,
    pub serial: SerialConfig,
    pub timing: TimingConfig,
}

impl Settings {
    pub fn from_args(args: &Args) -> Result<Self> {
        let profile = match &args.config {
            Some(path) => {
                log::debug!("Loading profile {}", path.display());
                Profile::load(path)?
            }
            None => Profile::default(),
        };
        Self::new(args, profile)
    }

    /// # Errors
    /// `InvalidTimeout` for a zero timeout (the serial read would never
    /// wait) and `InvalidRange` for bad memory bounds.
    pub fn new(args: &Args, profile: Profile) -> Result<Self> {
        if args.timeout == 0 {
            return Err(ProfilerError::InvalidTimeout { secs: args.timeout });
        }

        Ok(Self {
            sketch_file: args.sketch_file.clone(),
            fqbn: args.fqbn.clone(),
            port: args.sketch_port.clone(),
            timeout: Duration::from_secs(args.timeout),
            range: SearchRange::new(args.min, args.max)?,
            toolchain: profile.toolchain,
            serial: profile.serial,
            timing: profile.timing,
        })
    }
}
