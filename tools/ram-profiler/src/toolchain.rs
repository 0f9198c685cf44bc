//! External build and flash toolchain
//!
//! Both steps shell out to `arduino-cli`. A non-zero exit status is a broken
//! environment, not information about the device's memory, so it is reported
//! as [`ProfilerError::Toolchain`] and ends the run.

use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::ToolchainConfig;
use crate::error::{ProfilerError, Result};

/// Toolchain step, for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Build,
    Upload,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Build => f.write_str("build"),
            Step::Upload => f.write_str("upload"),
        }
    }
}

/// Compile and flash a sketch directory onto the target
pub trait Toolchain {
    /// Compile the sketch in `sketch_dir`
    fn build(&mut self, sketch_dir: &Path) -> Result<()>;

    /// Flash the compiled sketch in `sketch_dir` onto the target
    fn upload(&mut self, sketch_dir: &Path) -> Result<()>;

    /// Whether the operator has to put the board into its bootloader by hand
    /// before [`Toolchain::upload`]
    fn needs_manual_bootloader(&self) -> bool {
        true
    }
}

/// `arduino-cli` driver for one board on one port
#[derive(Debug, Clone)]
pub struct ArduinoCli {
    config: ToolchainConfig,
    fqbn: String,
    port: String,
}

impl ArduinoCli {
    pub fn new(config: ToolchainConfig, fqbn: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            config,
            fqbn: fqbn.into(),
            port: port.into(),
        }
    }

    /// `arduino-cli compile <dir> --fqbn <fqbn> [--build-property <p>]... [--quiet]`
    pub fn compile_command(&self, sketch_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.cli);
        cmd.arg("compile").arg(sketch_dir).args(["--fqbn", self.fqbn.as_str()]);
        for property in &self.config.build_properties {
            cmd.args(["--build-property", property.as_str()]);
        }
        if self.config.quiet {
            cmd.arg("--quiet");
        }
        cmd
    }

    /// `arduino-cli upload <dir> --fqbn <fqbn> --port <port>`
    pub fn upload_command(&self, sketch_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.cli);
        cmd.arg("upload")
            .arg(sketch_dir)
            .args(["--fqbn", self.fqbn.as_str()])
            .args(["--port", self.port.as_str()]);
        cmd
    }

    fn run(&self, step: Step, mut cmd: Command) -> Result<()> {
        log::debug!("Running {:?}", cmd);

        let status = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| ProfilerError::Spawn {
                program: self.config.cli.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ProfilerError::Toolchain {
                step,
                program: self.config.cli.clone(),
                status,
            });
        }
        Ok(())
    }
}

impl Toolchain for ArduinoCli {
    fn build(&mut self, sketch_dir: &Path) -> Result<()> {
        let cmd = self.compile_command(sketch_dir);
        self.run(Step::Build, cmd)
    }

    fn upload(&mut self, sketch_dir: &Path) -> Result<()> {
        let cmd = self.upload_command(sketch_dir);
        self.run(Step::Upload, cmd)
    }

    fn needs_manual_bootloader(&self) -> bool {
        self.config.manual_bootloader
    }
}
