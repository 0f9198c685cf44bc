//! Sketch template handling
//!
//! The device program is an Arduino sketch containing exactly one
//! `$alloc_size` placeholder (`${alloc_size}` is accepted too). Before each
//! trial the placeholder is replaced with the candidate size and the result is
//! written over the sketch file, because that is where the toolchain compiles
//! from. The original text is kept in memory and written back when the run
//! ends, through [`TemplateGuard`] so that aborted runs restore it as well.
//!
//! `$$` is an escaped dollar sign and renders as a single `$`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProfilerError, Result};

/// Placeholder name inside the sketch
pub const PLACEHOLDER: &str = "alloc_size";

/// One piece of the parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder,
}

/// A sketch file with a single allocation-size placeholder
#[derive(Debug)]
pub struct SketchTemplate {
    path: PathBuf,
    original: String,
    segments: Vec<Segment>,
}

impl SketchTemplate {
    /// Read and validate the template at `path`
    ///
    /// # Errors
    /// - `Io` if the file cannot be read
    /// - `MissingPlaceholder` / `AmbiguousPlaceholder` unless the file holds
    ///   exactly one placeholder
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let original = fs::read_to_string(path).map_err(|e| ProfilerError::io(path, e))?;
        Self::from_source(path, original)
    }

    /// Validate `source` as the template text of the sketch at `path`
    pub fn from_source(path: impl Into<PathBuf>, source: String) -> Result<Self> {
        let path = path.into();
        let segments = parse(&source);

        match segments.iter().filter(|s| **s == Segment::Placeholder).count() {
            0 => return Err(ProfilerError::MissingPlaceholder { path }),
            1 => {}
            count => return Err(ProfilerError::AmbiguousPlaceholder { path, count }),
        }

        log::debug!("Loaded sketch template {} ({} bytes)", path.display(), source.len());
        log::trace!("Original template text:\n{}", source);

        Ok(Self {
            path,
            original: source,
            segments,
        })
    }

    /// Path of the sketch file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the toolchain is pointed at
    pub fn sketch_dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    /// File name shown in the run header
    pub fn sketch_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Unsubstituted template text
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Sketch source with `alloc_size` substituted
    pub fn render(&self, alloc_size: u64) -> String {
        let value = alloc_size.to_string();
        let mut out = String::with_capacity(self.original.len() + value.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder => out.push_str(&value),
            }
        }
        out
    }

    /// Render `alloc_size` and write it over the sketch file
    pub fn write(&self, alloc_size: u64) -> Result<()> {
        fs::write(&self.path, self.render(alloc_size)).map_err(|e| ProfilerError::io(&self.path, e))
    }

    /// Put the original template text back on disk
    pub fn restore(&self) -> Result<()> {
        fs::write(&self.path, &self.original).map_err(|e| ProfilerError::io(&self.path, e))
    }

    /// Restore the sketch file when the returned guard goes out of scope
    pub fn guard(&self) -> TemplateGuard<'_> {
        TemplateGuard {
            template: self,
            restored: false,
        }
    }
}

/// Restores a [`SketchTemplate`] on drop
///
/// Use [`TemplateGuard::finish`] on the success path to see restore errors;
/// the drop path can only log them.
///
/// Restoration covers error returns and panics (unwinding runs `Drop`). A
/// process killed by a signal, such as Ctrl-C during a run, never drops the
/// guard: the sketch is left holding the last candidate size and has to be
/// reverted by hand. Run with `-vv` to have the original text logged when
/// the template is loaded.
#[must_use = "the template is restored when the guard is dropped"]
pub struct TemplateGuard<'a> {
    template: &'a SketchTemplate,
    restored: bool,
}

impl TemplateGuard<'_> {
    /// Restore now and report the outcome
    pub fn finish(mut self) -> Result<()> {
        self.restored = true;
        self.template.restore()
    }
}

impl Drop for TemplateGuard<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        match self.template.restore() {
            Ok(()) => log::info!("Restored sketch template {}", self.template.path().display()),
            Err(e) => log::error!("Could not restore sketch template: {}", e),
        }
    }
}

fn parse(source: &str) -> Vec<Segment> {
    let braced = format!("{{{}}}", PLACEHOLDER);
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = source;

    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            text.push('$');
            rest = tail;
            continue;
        }

        let placeholder_len = if after.starts_with(braced.as_str()) {
            Some(braced.len())
        } else if after.starts_with(PLACEHOLDER) && !continues_identifier(&after[PLACEHOLDER.len()..]) {
            Some(PLACEHOLDER.len())
        } else {
            None
        };

        match placeholder_len {
            Some(len) => {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                segments.push(Segment::Placeholder);
                rest = &after[len..];
            }
            None => {
                text.push('$');
                rest = after;
            }
        }
    }

    text.push_str(rest);
    if !text.is_empty() {
        segments.push(Segment::Text(text));
    }
    segments
}

fn continues_identifier(s: &str) -> bool {
    s.chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKETCH: &str = "#include <stdlib.h>\n\
        void setup() {\n  Serial.begin(115200);\n  void *p = malloc($alloc_size);\n\
        if (p) Serial.write(\"ok\");\n}\nvoid loop() {}\n";

    fn template(source: &str) -> Result<SketchTemplate> {
        SketchTemplate::from_source("sketch/sketch.ino", source.to_string())
    }

    #[test]
    fn test_render_substitutes_size() {
        let t = template(SKETCH).unwrap();
        let rendered = t.render(4096);
        assert!(rendered.contains("malloc(4096);"));
        assert!(!rendered.contains('$'));
    }

    #[test]
    fn test_braced_placeholder() {
        let t = template("char buf[${alloc_size}];").unwrap();
        assert_eq!(t.render(12), "char buf[12];");
    }

    #[test]
    fn test_missing_placeholder_rejected() {
        let err = template("void setup() { malloc(10); }").unwrap_err();
        assert!(matches!(err, ProfilerError::MissingPlaceholder { .. }));
    }

    #[test]
    fn test_longer_identifier_is_not_a_placeholder() {
        let err = template("int x = $alloc_size_max;").unwrap_err();
        assert!(matches!(err, ProfilerError::MissingPlaceholder { .. }));
    }

    #[test]
    fn test_two_placeholders_rejected() {
        let err = template("malloc($alloc_size); free(${alloc_size});").unwrap_err();
        assert!(matches!(
            err,
            ProfilerError::AmbiguousPlaceholder { count: 2, .. }
        ));
    }

    #[test]
    fn test_escaped_dollar() {
        let t = template("// costs $$5\nmalloc($alloc_size); // $$alloc_size").unwrap();
        assert_eq!(t.render(7), "// costs $5\nmalloc(7); // $alloc_size");
        // the original text is kept verbatim for restoration
        assert!(t.original().contains("$$5"));
    }

    #[test]
    fn test_sketch_dir_and_name() {
        let t = template(SKETCH).unwrap();
        assert_eq!(t.sketch_dir(), Path::new("sketch"));
        assert_eq!(t.sketch_name(), "sketch.ino");

        let bare = SketchTemplate::from_source("sketch.ino", SKETCH.to_string()).unwrap();
        assert_eq!(bare.sketch_dir(), Path::new("."));
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.ino");
        fs::write(&path, SKETCH).unwrap();

        let t = SketchTemplate::load(&path).unwrap();
        {
            let _guard = t.guard();
            t.write(123).unwrap();
            assert!(fs::read_to_string(&path).unwrap().contains("malloc(123);"));
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), SKETCH);
    }

    #[test]
    fn test_guard_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.ino");
        fs::write(&path, SKETCH).unwrap();

        let t = SketchTemplate::load(&path).unwrap();
        let guard = t.guard();
        t.write(1).unwrap();
        guard.finish().unwrap();
        assert_eq!(fs::read(&path).unwrap(), SKETCH.as_bytes());
    }

    #[test]
    fn test_shipped_heap_probe() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("sketches/heap_probe/heap_probe.ino");
        let t = SketchTemplate::load(&path).unwrap();
        let rendered = t.render(2048);
        assert!(rendered.contains("ALLOC_SIZE = 2048;"));

        // The token is repeated from loop(): a single write during setup()
        // happens before the host opens the port and clears its input.
        let (setup, loop_body) = rendered.split_once("void loop()").unwrap();
        assert!(loop_body.contains("Serial.write(\"ok\")"));
        assert!(!setup.contains("Serial.write("));
    }

    #[test]
    fn test_guard_restores_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.ino");
        fs::write(&path, SKETCH).unwrap();
        let t = SketchTemplate::load(&path).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = t.guard();
            t.write(99).unwrap();
            panic!("trial blew up");
        }));

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), SKETCH);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SketchTemplate::load(dir.path().join("absent.ino")).unwrap_err();
        assert!(matches!(err, ProfilerError::Io { .. }));
    }
}
