// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the tagsmith compiler.
//!
//! This module defines [`TemplateError`], the structured error value delivered
//! to `error` listeners, plus [`HelperError`] and [`FetchError`] for the
//! extension points that user code implements.
//!
//! # Error Categories
//!
//! - **Syntax errors**: a tag no rule matches, or an unterminated delimiter
//! - **Build errors**: the lowered program cannot be materialized
//! - **Runtime errors**: a fragment failed while rendering
//! - **Transport errors**: fetching an included template failed
//! - **Missing templates**: an include names a template nobody can provide
//! - **Dependency errors**: includes form a cycle
//!
//! # Source Context
//!
//! Located errors carry a [`SourceContext`], a window of lines centred on the
//! failing line that renders as a numbered snippet.

use std::fmt;
use thiserror::Error;

/// Number of lines shown on each side of the failing line.
pub const CONTEXT_RADIUS: usize = 3;

/// A window of source lines centred on an error location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    /// The lines inside the window, paired with their 1-indexed line number.
    pub lines: Vec<(usize, String)>,
    /// The line the window is centred on (1-indexed).
    pub focus: usize,
}

impl SourceContext {
    /// Captures `radius` lines before and after `line` from `source`.
    pub fn window(source: &str, line: usize, radius: usize) -> Self {
        let all: Vec<&str> = source.lines().collect();
        let first = line.saturating_sub(radius).max(1);
        let last = (line + radius).min(all.len());

        let lines = (first..=last)
            .filter_map(|n| all.get(n - 1).map(|l| (n, l.to_string())))
            .collect();

        Self { lines, focus: line }
    }

    /// Captures the default window around `line`.
    pub fn around(source: &str, line: usize) -> Self {
        Self::window(source, line, CONTEXT_RADIUS)
    }

    /// Formats the window with line numbers and a marker on the focus line.
    ///
    /// ```text
    ///    1 | <ul>
    /// >  2 |   {{each items as item}}
    ///    3 | </ul>
    /// ```
    pub fn format_snippet(&self) -> String {
        let mut result = String::new();
        for (number, text) in &self.lines {
            let marker = if *number == self.focus { '>' } else { ' ' };
            result.push_str(&format!("{} {:3} | {}\n", marker, number, text));
        }
        result
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_snippet())
    }
}

/// Structured failure reported by the compiler.
///
/// Public entry points never return these across the boundary as panics or
/// `Err` values for rendering; they are delivered to the registered `error`
/// listeners and the operation falls back to a safe default.
#[derive(Error, Debug, Clone)]
pub enum TemplateError {
    /// A tag no rule matches, an unterminated delimiter, or a runaway rewrite.
    #[error("Syntax error: {message} at line {line}\n{source_context}")]
    Syntax {
        /// Description of the problem.
        message: String,
        /// Line in the raw template (1-indexed).
        line: usize,
        /// Raw template lines around `line`.
        source_context: SourceContext,
    },

    /// The lowered program could not be turned into a renderer.
    #[error("Build error: {message}\n{program}")]
    Build {
        /// Description of the problem.
        message: String,
        /// Listing of the offending program.
        program: String,
    },

    /// A fragment failed while rendering.
    #[error("Runtime error: {message} at line {line}\n{source_context}\n{program_context}")]
    Runtime {
        /// Description of the problem.
        message: String,
        /// Last line marker reached in the template (1-indexed).
        line: usize,
        /// Template lines around `line`.
        source_context: SourceContext,
        /// Program listing lines around the failing instruction.
        program_context: SourceContext,
        /// The data the renderer was called with, as JSON.
        arguments: String,
    },

    /// Fetching a template source failed.
    #[error("Transport error fetching '{name}': {status}")]
    Transport {
        /// The template name that was requested.
        name: String,
        /// Transport-specific status description.
        status: String,
    },

    /// A referenced template is neither cached, inline nor fetchable.
    #[error("Missing template: '{name}'")]
    MissingTemplate {
        /// The template name that was requested.
        name: String,
    },

    /// Include dependencies cannot be ordered.
    #[error("Dependency error: {message}")]
    Dependency {
        /// Description of the problem.
        message: String,
        /// Names involved in the failure.
        names: Vec<String>,
    },

    /// A syntax rule could not be registered.
    #[error("Invalid syntax rule '{name}': {message}")]
    InvalidRule {
        /// The rule name.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// Configuration could not be read or applied.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TemplateError {
    /// Short machine-friendly category name.
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateError::Syntax { .. } => "syntax",
            TemplateError::Build { .. } => "build",
            TemplateError::Runtime { .. } => "runtime",
            TemplateError::Transport { .. } => "transport",
            TemplateError::MissingTemplate { .. } => "missing-template",
            TemplateError::Dependency { .. } => "dependency",
            TemplateError::InvalidRule { .. } => "invalid-rule",
            TemplateError::Config(_) => "config",
        }
    }

    /// The template line the error is attributed to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            TemplateError::Syntax { line, .. } | TemplateError::Runtime { line, .. } => Some(*line),
            _ => None,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, source: &str, line: usize) -> Self {
        TemplateError::Syntax {
            message: message.into(),
            line,
            source_context: SourceContext::around(source, line),
        }
    }
}

/// Failure raised by a helper or block helper.
#[derive(Error, Debug, Clone)]
pub enum HelperError {
    /// The helper itself rejected its input.
    #[error("{0}")]
    Failed(String),

    /// Rendering the block body failed; carries the original location.
    #[error("{}", .0.message)]
    Body(Box<RenderFault>),
}

impl HelperError {
    /// Convenience constructor for [`HelperError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        HelperError::Failed(message.into())
    }
}

/// Location-tagged failure raised inside the interpreter.
#[derive(Debug, Clone)]
pub struct RenderFault {
    /// Description of the problem.
    pub message: String,
    /// Template line marker at the time of failure.
    pub line: usize,
    /// Index of the failing instruction in the program listing.
    pub instruction: usize,
}

/// Failure returned by a [`SourceFetcher`](crate::resolver::SourceFetcher).
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// No source exists under the requested name.
    #[error("not found")]
    NotFound,

    /// The transport failed with the given status.
    #[error("{0}")]
    Status(String),
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound,
            _ => FetchError::Status(err.to_string()),
        }
    }
}

/// Convenience type alias for Results with [`TemplateError`].
pub type Result<T> = std::result::Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_clamped_to_source() {
        let ctx = SourceContext::window("a\nb\nc", 1, 3);
        assert_eq!(ctx.lines.len(), 3);
        assert_eq!(ctx.lines[0], (1, "a".to_string()));

        let ctx = SourceContext::window("a\nb\nc\nd\ne\nf\ng\nh\ni", 5, 2);
        let numbers: Vec<usize> = ctx.lines.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_snippet_marks_focus_line() {
        let snippet = SourceContext::around("one\ntwo\nthree", 2).format_snippet();
        assert!(snippet.contains(">   2 | two"), "got: {}", snippet);
        assert!(snippet.contains("    1 | one"));
    }

    #[test]
    fn test_syntax_error_display_includes_line() {
        let err = TemplateError::syntax("no rule matches '{{x}}'", "{{x}}", 1);
        let text = err.to_string();
        assert!(text.contains("line 1"));
        assert_eq!(err.kind(), "syntax");
        assert_eq!(err.line(), Some(1));
    }
}
