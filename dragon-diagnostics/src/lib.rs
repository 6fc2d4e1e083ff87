//! Shared source-position and diagnostic-rendering types used by every
//! pass of the compiler.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open column range `[start, end)` on a single source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub start_col: usize,
    pub end_col: usize,
}

impl Span {
    pub fn new(line: usize, start_col: usize, end_col: usize) -> Self {
        Span { line, start_col, end_col }
    }

    pub fn point(line: usize, col: usize) -> Self {
        Span { line, start_col: col, end_col: col + 1 }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.line, self.start_col, self.end_col)
    }
}

/// A single compiler diagnostic: a message anchored at a [`Span`].
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub span: Span,
    pub message: String,
}

impl Diagnostic {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Diagnostic { span, message: message.into() }
    }

    /// Render this diagnostic the way the reference compiler does: four
    /// lines — the file path, the offending (left-stripped) source line,
    /// a row of carets under the offending span, then the message.
    pub fn finish(&self, path: &str, source: &str) -> String {
        let line_text = source.lines().nth(self.span.line.saturating_sub(1)).unwrap_or("");
        let offender = line_text.trim_start();
        let cut_len = line_text.len().saturating_sub(offender.len());

        let caret_start = self.span.start_col.saturating_sub(cut_len);
        let caret_len = self
            .span
            .end_col
            .saturating_sub(self.span.start_col)
            .max(1);

        let line_digits = format!("{}", self.span.line).len();

        let mut out = String::new();
        out.push_str(&format!("File: {path}\n"));
        out.push_str(&format!("    {} | {}\n", self.span.line, offender));
        out.push_str(&format!(
            "    {}{}\n",
            " ".repeat(caret_start + 3 + line_digits),
            "^".repeat(caret_len).red()
        ));
        out.push_str(&format!("Error: {}", self.message));
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

/// Implemented by every pass's error enum so the CLI can render any of
/// them uniformly without knowing which pass produced it.
pub trait IntoDiagnostic {
    fn into_diagnostic(self) -> Diagnostic;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_strips_leading_whitespace_and_aligns_carets() {
        let source = "class A {\n    method f() -> int { retun 1; }\n}\n";
        let diag = Diagnostic::new(Span::new(2, 24, 29), "unknown keyword 'retun'");
        let rendered = diag.finish("test.drgn", source);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "File: test.drgn");
        assert_eq!(lines[1], "    2 | method f() -> int { retun 1; }");
        assert_eq!(lines[2], "                            ^^^^^");
        assert!(lines[3].starts_with("Error: "));
    }

    #[test]
    fn point_span_has_width_one() {
        let s = Span::point(1, 4);
        assert_eq!(s.end_col - s.start_col, 1);
    }
}
