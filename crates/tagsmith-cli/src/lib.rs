// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

//! tagsmith CLI library.
//!
//! This crate provides the command-line interface for the tagsmith template
//! compiler.
//!
//! # Usage
//!
//! This crate is primarily used through the `tagsmith` binary:
//!
//! ```bash
//! tagsmith render index --json '{"title": "Home"}'   # Render one template
//! tagsmith check                                     # Compile every template
//! ```
//!
//! # Configuration
//!
//! Projects are configured via `tagsmith.toml` at the project root.

/// CLI commands (render, check).
pub mod commands;
/// Project configuration from `tagsmith.toml`.
pub mod config;
