// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

// TemplateError carries source windows and listings for listeners
#![allow(clippy::result_large_err)]

//! # tagsmith
//!
//! Extensible tag-template compiler for Rust, with Lua expressions.
//!
//! Templates are plain text with `{{ ... }}` tags. A registry of syntax rules
//! rewrites every tag into a small canonical shell language, which is lowered
//! into a program of text, echo and control-flow instructions and finally
//! built into a reusable [`Renderer`].
//!
//! ## Features
//!
//! - Extensible syntax: register, batch-register and remove tag rules
//! - Helpers, pipes and block helpers
//! - HTML auto-escaping, whitespace compression, strict and lenient modes
//! - Compilation cache keyed by template name
//! - Asynchronous include resolution with cycle detection
//! - Error listeners instead of panics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tagsmith::{Compiler, Data, Options};
//! use serde_json::json;
//!
//! let compiler = Compiler::default();
//! let html = compiler.render(
//!     "{{if user}}Hello {{= user.name}}{{/if}}",
//!     &Data::from(json!({ "user": { "name": "Ada" } })),
//!     &Options::new(),
//! );
//! assert_eq!(html, "Hello Ada");
//! ```
//!
//! ## Standard Tags
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | `{{= expr}}` / `{{!# expr}}` | escaped echo |
//! | `{{# expr}}` | raw echo |
//! | `{{= value \| helper, arg}}` | pipe through a helper |
//! | `{{if c}}` `{{else if c}}` `{{else}}` `{{/if}}` | conditionals |
//! | `{{each list as value, key}}` `{{/each}}` | iteration |
//! | `{{set x = expr}}` | assignment |
//! | `{{lua stmt}}` | raw statement |
//! | `{{include "name", data}}` | include another template |
//! | `{{-- note --}}` | removed |

/// Error types and reporting.
pub mod error;
/// Tagged value model for template data.
pub mod data;
/// Compiler settings and per-call options.
pub mod settings;
/// Reserved names and free identifier scanning.
pub mod identifiers;
/// Syntax rules and the rule registry.
pub mod syntax;
/// Fixpoint normalization into the canonical shell.
pub mod normalize;
/// Lowered program representation.
pub mod program;
/// Shell lowering.
pub mod lower;
/// Conversion between data values and Lua values.
pub mod bridge;
/// Error listeners.
pub mod events;
/// Render building and execution.
pub mod renderer;
/// Compilation cache.
pub mod cache;
/// Standard helper set.
pub mod helpers;
/// Template sources (fetchers and fragments).
pub mod resolver;
/// Include discovery and fan-in ordering.
pub mod dependencies;
/// The compiler.
pub mod compiler;

pub use cache::{MemoryCache, NoOpCache, RendererCache};
pub use compiler::Compiler;
pub use data::{Data, Helper};
pub use dependencies::{scan_includes, DependencyGraph, DependencyRecord, FanIn};
pub use error::{FetchError, HelperError, RenderFault, Result, SourceContext, TemplateError};
pub use events::{EventKind, ListenerId, Reporter};
pub use helpers::standard_helpers;
pub use lower::{lower, NameTables};
pub use normalize::{normalize, Normalized};
pub use program::{Binding, Instruction, Program};
pub use renderer::{build, escape_html, try_build, BlockContext, BlockHelper, IncludeLookup, Renderer, Scope};
pub use resolver::{FragmentSource, MemorySources, SourceFetcher};
pub use settings::{Mode, Options, Settings};
pub use syntax::{Grammar, Rewrite, SyntaxRule};

#[cfg(feature = "filesystem")]
pub use resolver::FileSystemFetcher;
