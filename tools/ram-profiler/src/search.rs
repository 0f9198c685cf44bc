//! Search controller
//!
//! Finds the largest allocation size the device still survives, using a
//! [`Probe`] as the oracle. The search is only meaningful if the oracle is
//! monotone over the range (true up to some boundary, false above it), so it
//! is bracketed by two sanity checks:
//!
//! - before: `min` must succeed and `max` must fail
//! - after: the result must succeed and `result + 1` must fail
//!
//! A violated check is fatal. There is no retry and no partial result.

use std::fmt;

use crate::error::{ProfilerError, Result};

/// Oracle answering "does an allocation of `size` bytes succeed?"
///
/// `observer` receives the per-trial events (bootloader prompt, device
/// report); plain closures ignore it.
pub trait Probe {
    fn probe(&mut self, size: u64, observer: &mut dyn SearchObserver) -> Result<bool>;
}

impl<F> Probe for F
where
    F: FnMut(u64) -> Result<bool>,
{
    fn probe(&mut self, size: u64, _observer: &mut dyn SearchObserver) -> Result<bool> {
        self(size)
    }
}

/// Stage of a profiling run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreCheck,
    Search,
    PostCheck,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreCheck => f.write_str("pre-search"),
            Phase::Search => f.write_str("search"),
            Phase::PostCheck => f.write_str("post-search"),
        }
    }
}

/// Declared memory bounds: `min` is expected to fit, `max` is not
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchRange {
    min: u64,
    max: u64,
}

impl SearchRange {
    /// # Errors
    /// `InvalidRange` unless `0 < min < max`
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min == 0 || min >= max {
            return Err(ProfilerError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// Upper bound on search-phase probes: `ceil(log2(max - min))`
    pub fn expected_probes(&self) -> u32 {
        let width = self.max - self.min;
        u64::BITS - (width - 1).leading_zeros()
    }
}

/// Closed interval `[lo, hi]` still containing the boundary
///
/// `lo` is known to succeed, `hi + 1` is known to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub lo: u64,
    pub hi: u64,
}

impl Bounds {
    fn initial(range: SearchRange) -> Self {
        Self {
            lo: range.min,
            hi: range.max - 1,
        }
    }

    pub fn is_converged(&self) -> bool {
        self.lo == self.hi
    }

    /// Upper middle `ceil((lo + hi) / 2)`, always `> lo` while unconverged
    pub fn candidate(&self) -> u64 {
        self.lo + (self.hi - self.lo + 1) / 2
    }

    fn narrow(&mut self, candidate: u64, succeeded: bool) {
        if succeeded {
            self.lo = candidate;
        } else {
            self.hi = candidate - 1;
        }
    }
}

/// Progress callbacks; every method defaults to a no-op
pub trait SearchObserver {
    fn phase_started(&mut self, _phase: Phase) {}

    fn phase_finished(&mut self, _phase: Phase) {}

    /// Called once before the first search probe
    fn search_planned(&mut self, _expected_probes: u32) {}

    /// Called before each search probe
    fn bounds(&mut self, _bounds: Bounds) {}

    /// Called after each search probe
    fn probed(&mut self, _candidate: u64, _succeeded: bool) {}

    /// The operator has to put the board into its bootloader now
    fn awaiting_bootloader(&mut self) {}

    /// The device sent `token` after booting
    fn device_reported(&mut self, _token: &[u8]) {}
}

impl<O: SearchObserver + ?Sized> SearchObserver for &mut O {
    fn phase_started(&mut self, phase: Phase) {
        (**self).phase_started(phase)
    }

    fn phase_finished(&mut self, phase: Phase) {
        (**self).phase_finished(phase)
    }

    fn search_planned(&mut self, expected_probes: u32) {
        (**self).search_planned(expected_probes)
    }

    fn bounds(&mut self, bounds: Bounds) {
        (**self).bounds(bounds)
    }

    fn probed(&mut self, candidate: u64, succeeded: bool) {
        (**self).probed(candidate, succeeded)
    }

    fn awaiting_bootloader(&mut self) {
        (**self).awaiting_bootloader()
    }

    fn device_reported(&mut self, token: &[u8]) {
        (**self).device_reported(token)
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SearchObserver for NullObserver {}

/// Runs the sanity checks and the binary search against one oracle
pub struct SearchController<P, O = NullObserver> {
    probe: P,
    observer: O,
}

impl<P: Probe> SearchController<P> {
    pub fn new(probe: P) -> Self {
        Self::with_observer(probe, NullObserver)
    }
}

impl<P: Probe, O: SearchObserver> SearchController<P, O> {
    pub fn with_observer(probe: P, observer: O) -> Self {
        Self { probe, observer }
    }

    pub fn into_parts(self) -> (P, O) {
        (self.probe, self.observer)
    }

    /// Pre-check, search and post-check; returns the largest size that fits
    pub fn run(&mut self, range: SearchRange) -> Result<u64> {
        self.pre_sanity_check(range)?;
        let available = self.binary_search(range)?;
        self.post_sanity_check(available)?;
        Ok(available)
    }

    /// `min` must succeed and `max` must fail
    pub fn pre_sanity_check(&mut self, range: SearchRange) -> Result<()> {
        self.observer.phase_started(Phase::PreCheck);
        self.expect(Phase::PreCheck, range.min, true)?;
        self.expect(Phase::PreCheck, range.max, false)?;
        self.observer.phase_finished(Phase::PreCheck);
        Ok(())
    }

    /// Largest size in `[min, max - 1]` the oracle accepts
    ///
    /// Assumes `min` succeeds and `max` fails; [`Self::pre_sanity_check`]
    /// establishes that.
    pub fn binary_search(&mut self, range: SearchRange) -> Result<u64> {
        self.observer.phase_started(Phase::Search);
        self.observer.search_planned(range.expected_probes());

        let mut bounds = Bounds::initial(range);
        while !bounds.is_converged() {
            self.observer.bounds(bounds);

            let candidate = bounds.candidate();
            let succeeded = self.probe.probe(candidate, &mut self.observer)?;
            log::debug!(
                "Probe {} bytes: {}",
                candidate,
                if succeeded { "ok" } else { "failed" }
            );
            self.observer.probed(candidate, succeeded);

            bounds.narrow(candidate, succeeded);
            debug_assert!(bounds.lo <= bounds.hi);
        }

        self.observer.phase_finished(Phase::Search);
        Ok(bounds.lo)
    }

    /// `available` must succeed and `available + 1` must fail
    pub fn post_sanity_check(&mut self, available: u64) -> Result<()> {
        self.observer.phase_started(Phase::PostCheck);
        self.expect(Phase::PostCheck, available, true)?;
        self.expect(Phase::PostCheck, available + 1, false)?;
        self.observer.phase_finished(Phase::PostCheck);
        Ok(())
    }

    fn expect(&mut self, phase: Phase, size: u64, expected: bool) -> Result<()> {
        let succeeded = self.probe.probe(size, &mut self.observer)?;
        if succeeded != expected {
            log::error!(
                "{} sanity check: {} bytes {}",
                phase,
                size,
                if succeeded { "unexpectedly fit" } else { "unexpectedly failed" }
            );
            return Err(ProfilerError::SanityCheck {
                phase,
                size,
                expected,
            });
        }
        Ok(())
    }
}
