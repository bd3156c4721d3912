// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Render command for producing the output of one template.

use super::{compiler_for, drain};
use crate::config::Config;
use anyhow::Context;
use console::style;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tagsmith::{Data, Options};

/// Runs the render command in the current directory.
///
/// Data comes from a JSON file (`data_file`) or an inline JSON string; the
/// output goes to `output` or stdout.
pub async fn run(
    name: &str,
    data_file: Option<&Path>,
    json: Option<&str>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let project_dir = std::env::current_dir()?;
    let config = Config::load_from(&project_dir)?;
    let data = load_data(data_file, json)?;

    let html = render_template(&config, &project_dir, name, &data).await?;

    match output {
        Some(path) => {
            fs::write(path, &html).with_context(|| format!("cannot write {}", path.display()))?;
            println!("{} {}", style("Rendered").green().bold(), path.display());
        }
        None => print!("{}", html),
    }
    Ok(())
}

/// Renders `name` from the configured template directory.
///
/// Every error the compiler reports is printed and turns the whole render
/// into a failure, even when some output was produced.
pub async fn render_template(
    config: &Config,
    project_dir: &Path,
    name: &str,
    data: &Data,
) -> anyhow::Result<String> {
    let (compiler, collected) = compiler_for(config, project_dir);
    let started = Instant::now();

    let html = compiler.render_by_name(name, data, &Options::new()).await;

    let errors = drain(&collected);
    if !errors.is_empty() {
        for err in &errors {
            eprintln!("{} {}", style("error:").red().bold(), err);
        }
        anyhow::bail!("rendering '{}' failed with {} error(s)", name, errors.len());
    }

    tracing::info!("rendered '{}' in {:?}", name, started.elapsed());
    Ok(html)
}

/// Reads render data from a JSON file or an inline JSON string.
pub fn load_data(file: Option<&Path>, inline: Option<&str>) -> anyhow::Result<Data> {
    let text = match (file, inline) {
        (Some(_), Some(_)) => anyhow::bail!("use either --data or --json, not both"),
        (Some(path), None) => fs::read_to_string(path)
            .with_context(|| format!("cannot read data file {}", path.display()))?,
        (None, Some(json)) => json.to_string(),
        (None, None) => return Ok(Data::Null),
    };
    let value: serde_json::Value = serde_json::from_str(&text).context("data is not valid JSON")?;
    Ok(Data::from(value))
}
