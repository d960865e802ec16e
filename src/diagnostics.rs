//! Error reporting contract (spec §6, §7).
//!
//! The resolver and folder never panic and never return early on their own:
//! every fallible step reports through an `IErrorReporter` and keeps going,
//! so a single compilation pass surfaces as many diagnostics as possible.
//! The driver (`session.rs`) is the only place that turns "error count is
//! nonzero" into an early exit between phases.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::{self, termcolor::Buffer, Config};
use std::fmt;

/// A position in shader source, as supplied by the (out-of-scope) parser.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Location {
    pub file: u32,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const UNKNOWN: Location = Location { file: 0, line: 0, column: 0 };
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub location: Location,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {kind}: {}", self.location, self.message)
    }
}

/// The reporter contract every resolver/folder operation takes.
///
/// Implementations must preserve call ordering and must not throw/panic;
/// the core assumes diagnostics appear in the order they were reported.
pub trait IErrorReporter {
    fn report(&mut self, diagnostic: Diagnostic);

    fn report_error(&mut self, location: Location, message: impl Into<String>) {
        self.report(Diagnostic {
            location,
            severity: Severity::Error,
            message: message.into(),
        });
    }

    fn report_warning(&mut self, location: Location, message: impl Into<String>) {
        self.report(Diagnostic {
            location,
            severity: Severity::Warning,
            message: message.into(),
        });
    }

    fn error_count(&self) -> usize;
}

/// The default reporter: collects diagnostics in order, and can render
/// itself through `codespan-reporting` the way `ashley::glsl` does.
#[derive(Default)]
pub struct CollectingReporter {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Renders every collected diagnostic as `file:line: error: message`
    /// into a plain string buffer, using a single-source-file codespan
    /// `Files` view (source text is not tracked by the core; the file id is
    /// rendered verbatim).
    pub fn render(&self, source_name: &str, source: &str) -> String {
        let mut files = SimpleFiles::new();
        let file_id = files.add(source_name, source);
        let mut buffer = Buffer::no_color();
        let config = Config::default();
        for diag in &self.diagnostics {
            let severity = match diag.severity {
                Severity::Warning => codespan_reporting::diagnostic::Severity::Warning,
                Severity::Error => codespan_reporting::diagnostic::Severity::Error,
            };
            let cs_diag = CsDiagnostic::new(severity)
                .with_message(diag.message.clone())
                .with_labels(vec![Label::primary(file_id, 0..0)
                    .with_message(format!("at {}", diag.location))]);
            let _ = term::emit(&mut buffer, &config, &files, &cs_diag);
        }
        String::from_utf8_lossy(buffer.as_slice()).into_owned()
    }
}

impl IErrorReporter for CollectingReporter {
    fn report(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Error {
            self.errors += 1;
        }
        self.diagnostics.push(diagnostic);
    }

    fn error_count(&self) -> usize {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_errors() {
        let mut r = CollectingReporter::new();
        r.report_warning(Location::UNKNOWN, "careful");
        r.report_error(Location::UNKNOWN, "boom");
        assert_eq!(r.error_count(), 1);
        assert_eq!(r.diagnostics().len(), 2);
    }

    #[test]
    fn display_matches_file_line_message_shape() {
        let d = Diagnostic {
            location: Location { file: 0, line: 12, column: 4 },
            severity: Severity::Error,
            message: "Unknown reference 'foo'".into(),
        };
        assert_eq!(format!("{d}"), "12:4: error: Unknown reference 'foo'");
    }
}
