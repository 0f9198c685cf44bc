//! Console output for an interactive profiling run

use std::fmt;
use std::io::{self, Write};

use colored::Colorize;

use crate::config::Settings;
use crate::search::{Bounds, Phase, SearchObserver};
use crate::template::SketchTemplate;

const VERSION_LINE: &str = "RAM profiler v0.1";

/// Parameters echoed at the top of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHeader {
    pub sketch_name: String,
    pub fqbn: String,
    pub port: String,
    pub timeout_secs: u64,
    pub min: u64,
    pub max: u64,
}

impl RunHeader {
    pub fn new(settings: &Settings, template: &SketchTemplate) -> Self {
        Self {
            sketch_name: template.sketch_name(),
            fqbn: settings.fqbn.clone(),
            port: settings.port.clone(),
            timeout_secs: settings.timeout.as_secs(),
            min: settings.range.min(),
            max: settings.range.max(),
        }
    }
}

impl fmt::Display for RunHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = [
            VERSION_LINE.to_string(),
            format!("Evaluating RAM usage of sketch {}", self.sketch_name),
            format!("Board: {} on port {}", self.fqbn, self.port),
            format!(
                "Timeout: {}, Memory bounds: ({}, {})",
                self.timeout_secs, self.min, self.max
            ),
        ];
        let rule = "-".repeat(lines.iter().map(|l| l.chars().count()).max().unwrap_or(0));

        writeln!(f, "{}", rule)?;
        for line in &lines {
            writeln!(f, "{}", line)?;
        }
        write!(f, "{}", rule)
    }
}

/// Final result line
pub fn result_line(available: u64) -> String {
    format!("Exactly {} bytes is left over", available)
}

/// [`SearchObserver`] that narrates the run on a terminal
pub struct ConsoleReporter<W: Write = io::Stdout> {
    out: W,
}

impl ConsoleReporter {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn header(&mut self, header: &RunHeader) {
        self.line(format_args!("{}\n", header));
    }

    pub fn finished(&mut self, available: u64) {
        self.line(format_args!("{} {}", "✅".green(), result_line(available).bold()));
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        // Console failures are logged, never fatal
        if let Err(e) = writeln!(self.out, "{}", args) {
            log::warn!("Console write failed: {}", e);
        }
    }
}

impl<W: Write> SearchObserver for ConsoleReporter<W> {
    fn phase_started(&mut self, phase: Phase) {
        match phase {
            Phase::PreCheck => self.line(format_args!("{} Running pre sanity check...", "🔍".green())),
            Phase::Search => self.line(format_args!("{} Beginning binary search...", "🔨".green())),
            Phase::PostCheck => self.line(format_args!("{} Running post sanity check...", "🔍".green())),
        }
    }

    fn phase_finished(&mut self, phase: Phase) {
        match phase {
            Phase::PreCheck | Phase::PostCheck => {
                self.line(format_args!("Sanity check finished, continuing...\n"))
            }
            Phase::Search => {}
        }
    }

    fn search_planned(&mut self, expected_probes: u32) {
        self.line(format_args!("Will take at most {} uploads\n", expected_probes));
    }

    fn bounds(&mut self, bounds: Bounds) {
        self.line(format_args!("Current bounds: ({}, {})", bounds.lo, bounds.hi));
    }

    fn probed(&mut self, candidate: u64, succeeded: bool) {
        let verdict = if succeeded {
            "fits".green()
        } else {
            "does not fit".red()
        };
        self.line(format_args!("  {} bytes {}\n", candidate, verdict));
    }

    fn awaiting_bootloader(&mut self) {
        self.line(format_args!("{} Please enable bootloader...", "⏳".yellow()));
    }

    fn device_reported(&mut self, token: &[u8]) {
        let token = format!("{:?}", String::from_utf8_lossy(token));
        self.line(format_args!("  Device says: {}", token.cyan()));
    }
}
