//! ram-profiler - evaluate RAM usage of Arduino sketches
//!
//! Usage:
//!   ram-profiler path/to/probe/probe.ino SPRESENSE:spresense:spresense /dev/ttyUSB0 \
//!     [--timeout 10] [--min 1] [--max 16777216] [--config profiles/spresense.toml]

use anyhow::{Context, Result};
use clap::Parser;

use ram_profiler::report::{ConsoleReporter, RunHeader};
use ram_profiler::{profile, ArduinoCli, Args, SerialTransport, Settings, SketchTemplate};

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter())).init();

    let settings = Settings::from_args(&args).context("Invalid configuration")?;
    let template = SketchTemplate::load(&settings.sketch_file).context("Cannot use sketch template")?;

    let mut reporter = ConsoleReporter::stdout();
    reporter.header(&RunHeader::new(&settings, &template));

    let toolchain = ArduinoCli::new(settings.toolchain.clone(), &settings.fqbn, &settings.port);
    let transport = SerialTransport::new(&settings.port, settings.serial, settings.timeout);

    let available = profile(
        &template,
        settings.range,
        settings.timing,
        toolchain,
        transport,
        &mut reporter,
    )
    .context("Profiling aborted")?;

    reporter.finished(available);
    Ok(())
}
