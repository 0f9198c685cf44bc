//! Error taxonomy for a profiling run
//!
//! Every variant is fatal: the run stops at the first error and no partial
//! result is reported. A device that stays silent is *not* an error, it is an
//! ordinary "allocation did not succeed" answer (see [`crate::trial`]).

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use crate::search::Phase;
use crate::toolchain::Step;

/// Errors that abort a profiling run
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("Template {path:?} has no `$alloc_size` placeholder")]
    MissingPlaceholder { path: PathBuf },

    #[error("Template {path:?} has {count} `$alloc_size` placeholders, expected exactly one")]
    AmbiguousPlaceholder { path: PathBuf, count: usize },

    #[error("Invalid memory bounds ({min}, {max}): need 0 < min < max")]
    InvalidRange { min: u64, max: u64 },

    #[error("Invalid serial timeout of {secs}s: need at least 1 second")]
    InvalidTimeout { secs: u64 },

    #[error("{step} step failed: `{program}` exited with {status}")]
    Toolchain {
        step: Step,
        program: String,
        status: ExitStatus,
    },

    #[error("Failed to launch `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} sanity check failed: probing {size} bytes should have {}", verdict(.expected))]
    SanityCheck { phase: Phase, size: u64, expected: bool },

    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile {path:?}: {message}")]
    Config { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, ProfilerError>;

fn verdict(expected: &bool) -> &'static str {
    if *expected {
        "succeeded"
    } else {
        "failed"
    }
}

impl ProfilerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
