//! RAM profiler - measure the heap left over on a microcontroller
//!
//! # Purpose
//! Finds the largest `malloc` a sketch can still make on real hardware. A
//! probe sketch allocates `$alloc_size` bytes and writes a token over serial
//! if that worked; the profiler binary-searches the size by rebuilding and
//! reflashing the sketch for every candidate.
//!
//! # Architecture
//! - [`trial::TrialRunner`]: one compile, flash, observe cycle per candidate
//! - [`search::SearchController`]: sanity checks around a binary search,
//!   generic over any [`search::Probe`]
//! - [`toolchain`] / [`transport`]: the `arduino-cli` and serial seams
//! - [`template`]: the sketch file, restored on every exit path
//!
//! # Testing Strategy
//! - Unit tests: search against closure oracles, template parsing, token reads
//! - Integration tests: whole runs against a simulated board (`tests/`)

pub mod config;
pub mod error;
pub mod report;
pub mod search;
pub mod template;
pub mod toolchain;
pub mod transport;
pub mod trial;

pub use config::{Args, Profile, SerialConfig, Settings, TimingConfig, ToolchainConfig};
pub use error::{ProfilerError, Result};
pub use search::{Bounds, NullObserver, Phase, Probe, SearchController, SearchObserver, SearchRange};
pub use template::{SketchTemplate, TemplateGuard};
pub use toolchain::{ArduinoCli, Step, Toolchain};
pub use transport::{Observation, SerialTransport, Transport};
pub use trial::TrialRunner;

/// Run a full profiling session against `template`
///
/// Pre-check, binary search and post-check, with every probe going through
/// `toolchain` and `transport`. The sketch file is restored afterwards,
/// whether the session succeeded or not.
///
/// # Returns
/// The largest allocation size, in bytes, that the device survived
pub fn profile<T, S, O>(
    template: &SketchTemplate,
    range: SearchRange,
    timing: TimingConfig,
    toolchain: T,
    transport: S,
    observer: O,
) -> Result<u64>
where
    T: Toolchain,
    S: Transport,
    O: SearchObserver,
{
    let guard = template.guard();

    let runner = TrialRunner::new(template, toolchain, transport, timing);
    let available = SearchController::with_observer(runner, observer).run(range)?;

    guard.finish()?;
    Ok(available)
}
