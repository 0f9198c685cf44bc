//! Trial runner: one compile, flash and observe cycle per candidate size
//!
//! Each call to [`TrialRunner::probe`] is an independent round trip through
//! the external toolchain and the device:
//!
//! 1. render the candidate into the sketch file
//! 2. build (fatal on failure)
//! 3. prompt for the bootloader, pause, flash (fatal on failure)
//! 4. let the sketch boot
//! 5. observe the serial report
//! 6. classify: a non-empty token means the allocation succeeded
//!
//! Step 6 deliberately folds "the device said no" and "we never heard back"
//! into the same `false`.

use std::thread;
use std::time::Duration;

use crate::config::TimingConfig;
use crate::error::Result;
use crate::search::{Probe, SearchObserver};
use crate::template::SketchTemplate;
use crate::toolchain::Toolchain;
use crate::transport::{Observation, Transport};

/// Drives a [`Toolchain`] and a [`Transport`] for one sketch template
pub struct TrialRunner<'a, T, S> {
    template: &'a SketchTemplate,
    toolchain: T,
    transport: S,
    bootloader_delay: Duration,
    settle_delay: Duration,
}

impl<'a, T: Toolchain, S: Transport> TrialRunner<'a, T, S> {
    pub fn new(template: &'a SketchTemplate, toolchain: T, transport: S, timing: TimingConfig) -> Self {
        Self {
            template,
            toolchain,
            transport,
            bootloader_delay: timing.bootloader_delay(),
            settle_delay: timing.settle_delay(),
        }
    }

    /// Run one trial and return whether the device reported success
    ///
    /// The bootloader prompt and the device's token go to `observer`.
    ///
    /// # Errors
    /// Only template I/O and toolchain failures; device silence is `Ok(false)`.
    pub fn run_trial(&mut self, alloc_size: u64, observer: &mut dyn SearchObserver) -> Result<bool> {
        log::debug!("Trial: {} bytes", alloc_size);

        self.template.write(alloc_size)?;
        let sketch_dir = self.template.sketch_dir();

        self.toolchain.build(sketch_dir)?;

        if self.toolchain.needs_manual_bootloader() {
            observer.awaiting_bootloader();
        }
        pause(self.bootloader_delay);
        self.toolchain.upload(sketch_dir)?;

        pause(self.settle_delay);
        let observation = self.transport.observe();

        match &observation {
            Observation::Token(bytes) => {
                log::debug!("Device reported {:?}", String::from_utf8_lossy(bytes));
                observer.device_reported(bytes);
            }
            Observation::Silent => log::debug!("No report from device"),
        }

        Ok(observation.succeeded())
    }
}

impl<T: Toolchain, S: Transport> Probe for TrialRunner<'_, T, S> {
    fn probe(&mut self, alloc_size: u64, observer: &mut dyn SearchObserver) -> Result<bool> {
        self.run_trial(alloc_size, observer)
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}
