//! End-to-end profiling sessions against a simulated board
//!
//! The simulated toolchain "compiles" by reading the rendered sketch back from
//! disk, so these tests exercise the real template rendering, the trial
//! sequence, the search and the template restoration together.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::rc::Rc;

use ram_profiler::report::ConsoleReporter;
use ram_profiler::{
    profile, NullObserver, Observation, Phase, ProfilerError, Result, SearchRange, SketchTemplate, Step,
    TimingConfig, Toolchain, Transport,
};

const SKETCH: &str = "\
#include <Arduino.h>

void setup() {
  Serial.begin(115200);
  void *block = malloc($alloc_size);
  if (block != NULL) {
    Serial.write(\"ok\");
  }
}

void loop() {}
";

#[derive(Default)]
struct Board {
    /// Largest allocation the simulated heap can satisfy
    capacity: u64,
    compiled: Option<u64>,
    flashed: Option<u64>,
    builds: usize,
    uploads: usize,
    /// Fail the build with this 1-based index
    fail_build: Option<usize>,
}

type SharedBoard = Rc<RefCell<Board>>;

struct SimToolchain {
    board: SharedBoard,
    sketch_file: PathBuf,
}

impl Toolchain for SimToolchain {
    fn build(&mut self, sketch_dir: &Path) -> Result<()> {
        assert_eq!(Some(sketch_dir), self.sketch_file.parent());
        let source = fs::read_to_string(&self.sketch_file).unwrap();

        let mut board = self.board.borrow_mut();
        board.builds += 1;
        if board.fail_build == Some(board.builds) {
            return Err(ProfilerError::Toolchain {
                step: Step::Build,
                program: "arduino-cli".to_string(),
                status: failed_status(),
            });
        }
        board.compiled = Some(parse_alloc_size(&source));
        Ok(())
    }

    fn upload(&mut self, _sketch_dir: &Path) -> Result<()> {
        let mut board = self.board.borrow_mut();
        board.uploads += 1;
        board.flashed = board.compiled;
        Ok(())
    }

    fn needs_manual_bootloader(&self) -> bool {
        false
    }
}

struct SimSerial {
    board: SharedBoard,
}

impl Transport for SimSerial {
    fn observe(&mut self) -> Observation {
        let board = self.board.borrow();
        match board.flashed {
            Some(size) if size <= board.capacity => Observation::Token(b"ok".to_vec()),
            _ => Observation::Silent,
        }
    }
}

fn parse_alloc_size(source: &str) -> u64 {
    let start = source.find("malloc(").expect("rendered sketch calls malloc") + "malloc(".len();
    let end = start + source[start..].find(')').unwrap();
    source[start..end].parse().expect("placeholder was substituted")
}

#[cfg(unix)]
fn failed_status() -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(2 << 8)
}

#[cfg(windows)]
fn failed_status() -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(2)
}

fn no_delays() -> TimingConfig {
    TimingConfig {
        bootloader_delay_ms: 0,
        settle_delay_ms: 0,
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    sketch_file: PathBuf,
    board: SharedBoard,
}

impl Fixture {
    fn new(board: Board) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sketch_dir = dir.path().join("probe");
        fs::create_dir(&sketch_dir).unwrap();
        let sketch_file = sketch_dir.join("probe.ino");
        fs::write(&sketch_file, SKETCH).unwrap();

        Self {
            _dir: dir,
            sketch_file,
            board: Rc::new(RefCell::new(board)),
        }
    }

    fn run(&self, min: u64, max: u64) -> Result<u64> {
        self.run_with(min, max, NullObserver)
    }

    fn run_with<O: ram_profiler::SearchObserver>(&self, min: u64, max: u64, observer: O) -> Result<u64> {
        let template = SketchTemplate::load(&self.sketch_file)?;
        let toolchain = SimToolchain {
            board: self.board.clone(),
            sketch_file: self.sketch_file.clone(),
        };
        let transport = SimSerial {
            board: self.board.clone(),
        };
        profile(
            &template,
            SearchRange::new(min, max)?,
            no_delays(),
            toolchain,
            transport,
            observer,
        )
    }

    fn sketch_text(&self) -> String {
        fs::read_to_string(&self.sketch_file).unwrap()
    }

    fn uploads(&self) -> usize {
        self.board.borrow().uploads
    }
}

#[test]
fn test_finds_boundary_and_restores_template() {
    let fixture = Fixture::new(Board {
        capacity: 10,
        ..Board::default()
    });

    assert_eq!(fixture.run(1, 16).unwrap(), 10);

    // 2 pre-check + at most 4 search + 2 post-check uploads
    assert!(fixture.uploads() <= 8, "{} uploads", fixture.uploads());
    assert_eq!(fixture.sketch_text(), SKETCH);
}

#[test]
fn test_single_step_range_needs_no_search_probes() {
    let fixture = Fixture::new(Board {
        capacity: 1,
        ..Board::default()
    });

    assert_eq!(fixture.run(1, 2).unwrap(), 1);
    assert_eq!(fixture.uploads(), 4);
    assert_eq!(fixture.sketch_text(), SKETCH);
}

#[test]
fn test_default_range() {
    let fixture = Fixture::new(Board {
        capacity: 123_456,
        ..Board::default()
    });

    assert_eq!(fixture.run(1, 1 << 24).unwrap(), 123_456);
    assert!(fixture.uploads() <= 2 + 24 + 2);
}

#[test]
fn test_unallocatable_min_aborts_before_searching() {
    let fixture = Fixture::new(Board {
        capacity: 512,
        ..Board::default()
    });

    let err = fixture.run(1024, 4096).unwrap_err();
    assert!(matches!(
        err,
        ProfilerError::SanityCheck { phase: Phase::PreCheck, size: 1024, expected: true }
    ));
    assert_eq!(fixture.uploads(), 1);
    assert_eq!(fixture.sketch_text(), SKETCH);
}

#[test]
fn test_allocatable_max_aborts_before_searching() {
    let fixture = Fixture::new(Board {
        capacity: 1 << 20,
        ..Board::default()
    });

    let err = fixture.run(1, 4096).unwrap_err();
    assert!(matches!(
        err,
        ProfilerError::SanityCheck { phase: Phase::PreCheck, size: 4096, expected: false }
    ));
    assert_eq!(fixture.uploads(), 2);
    assert_eq!(fixture.sketch_text(), SKETCH);
}

#[test]
fn test_build_failure_aborts_run_and_restores_template() {
    let fixture = Fixture::new(Board {
        capacity: 10,
        fail_build: Some(4),
        ..Board::default()
    });

    let err = fixture.run(1, 16).unwrap_err();
    assert!(matches!(err, ProfilerError::Toolchain { step: Step::Build, .. }));
    // the failed build is not retried or treated as "does not fit"
    assert_eq!(fixture.board.borrow().builds, 4);
    assert_eq!(fixture.uploads(), 3);
    assert_eq!(fixture.sketch_text(), SKETCH);
}

#[test]
fn test_template_without_placeholder_is_rejected_before_flashing() {
    let fixture = Fixture::new(Board::default());
    fs::write(&fixture.sketch_file, "void setup() { malloc(64); }\n").unwrap();

    let err = fixture.run(1, 16).unwrap_err();
    assert!(matches!(err, ProfilerError::MissingPlaceholder { .. }));
    assert_eq!(fixture.uploads(), 0);
}

#[test]
fn test_console_progress() {
    let fixture = Fixture::new(Board {
        capacity: 10,
        ..Board::default()
    });

    let mut reporter = ConsoleReporter::new(Vec::new());
    let available = fixture.run_with(1, 16, &mut reporter).unwrap();
    reporter.finished(available);

    let out = String::from_utf8(reporter.into_inner()).unwrap();
    assert!(out.contains("Running pre sanity check..."));
    assert!(out.contains("Will take at most 4 uploads"));
    assert!(out.contains("Current bounds: (1, 15)"));
    assert!(out.contains("Device says:"));
    assert!(!out.contains("Please enable bootloader..."));
    assert!(out.contains("Running post sanity check..."));
    assert!(out.contains("Exactly 10 bytes is left over"));
}
