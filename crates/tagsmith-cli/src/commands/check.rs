// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Check command for validating every template without rendering it.

use super::{compiler_for, drain};
use crate::config::Config;
use console::style;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tagsmith::{Options, TemplateError};

/// Outcome of checking a template directory.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// Number of templates compiled.
    pub checked: usize,
    /// Templates that reported errors, by name.
    pub failures: Vec<(String, Vec<TemplateError>)>,
}

impl CheckReport {
    /// Returns `true` when no template reported an error.
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the check command in the current directory.
pub async fn run() -> anyhow::Result<()> {
    let project_dir = std::env::current_dir()?;
    let config = Config::load_from(&project_dir)?;
    let started = Instant::now();

    println!(
        "{} {}",
        style("Checking templates in:").cyan(),
        config.templates.dir
    );
    let report = check_templates(&config, &project_dir)?;

    for (name, errors) in &report.failures {
        println!("  {} {}", style("✗").red().bold(), name);
        for err in errors {
            println!("{}", indent(&err.to_string()));
        }
    }

    if !report.is_ok() {
        anyhow::bail!(
            "{} of {} template(s) failed",
            report.failures.len(),
            report.checked
        );
    }

    println!(
        "{} {} template(s) in {:.2?}",
        style("✓ Checked").green().bold(),
        report.checked,
        started.elapsed()
    );
    Ok(())
}

/// Compiles every template below the configured directory.
///
/// Includes are not resolved; each template is checked on its own.
pub fn check_templates(config: &Config, project_dir: &Path) -> anyhow::Result<CheckReport> {
    let root = config.templates_root(project_dir);
    if !root.is_dir() {
        anyhow::bail!("template directory {} does not exist", root.display());
    }

    let (compiler, collected) = compiler_for(config, project_dir);
    let mut report = CheckReport::default();

    for path in collect_templates(&root, &config.templates.extension)? {
        let name = template_name(&root, &path);
        let source = fs::read_to_string(&path)?;
        tracing::debug!("checking '{}'", name);

        compiler.compile(&source, &Options::new().cache(false));
        report.checked += 1;

        let errors = drain(&collected);
        if !errors.is_empty() {
            report.failures.push((name, errors));
        }
    }
    Ok(report)
}

/// Files below `dir` with `extension`, sorted.
fn collect_templates(dir: &Path, extension: &str) -> anyhow::Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*.{}", dir.display(), extension);
    let mut found: Vec<PathBuf> = glob::glob(&pattern)?
        .flatten()
        .filter(|path| path.is_file())
        .collect();
    found.sort();
    Ok(found)
}

/// The name a template is included by: its path below `root`, without extension.
fn template_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("      {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_name() {
        let root = Path::new("/site/templates");
        assert_eq!(template_name(root, Path::new("/site/templates/partials/nav.html")), "partials/nav");
        assert_eq!(template_name(root, Path::new("/site/templates/index.html")), "index");
    }

    #[test]
    fn test_collect_templates_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/deep.html"), "").unwrap();
        fs::write(dir.path().join("top.html"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let found = collect_templates(dir.path(), "html").unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a/b/deep.html"), dir.path().join("top.html")]
        );
    }
}
