// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! CLI command implementations.
//!
//! - `render`: Render one template by name, resolving its includes
//! - `check`: Compile every template in the template directory and report errors

use crate::config::Config;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tagsmith::{Compiler, EventKind, FileSystemFetcher, Mode, TemplateError};

/// Check command.
pub mod check;
/// Render command.
pub mod render;

/// Errors collected from a compiler's `error` listener.
pub type Collected = Arc<Mutex<Vec<TemplateError>>>;

/// Creates a compiler configured from `config`, fetching templates below
/// `project_dir`, and a sink that collects every reported error.
pub fn compiler_for(config: &Config, project_dir: &Path) -> (Compiler, Collected) {
    let root = config.templates_root(project_dir);
    let fetcher = FileSystemFetcher::new(root).with_extension(&config.templates.extension);
    let mut settings = config.compiler.clone();
    // Commands print collected errors themselves
    settings.mode = Mode::Unit;
    let compiler = Compiler::default()
        .with_standard_helpers()
        .with_settings(settings)
        .with_fetcher(fetcher);

    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    compiler.on(EventKind::Error, move |err| {
        sink.lock().unwrap_or_else(|e| e.into_inner()).push(err.clone());
    });
    (compiler, collected)
}

/// Takes the errors collected so far.
pub fn drain(collected: &Collected) -> Vec<TemplateError> {
    std::mem::take(&mut *collected.lock().unwrap_or_else(|e| e.into_inner()))
}
