// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! tagsmith project configuration.
//!
//! Configuration is loaded from `tagsmith.toml` at the project root.
//!
//! # Example Configuration
//!
//! ```toml
//! [templates]
//! dir = "templates"
//! extension = "html"
//!
//! [compiler]
//! strict = true
//! compress = false
//! open_tag = "{{"
//! close_tag = "}}"
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tagsmith::Settings;

/// Name of the configuration file.
pub const CONFIG_FILE: &str = "tagsmith.toml";

/// Main configuration structure loaded from `tagsmith.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Where templates live.
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Compiler defaults.
    #[serde(default)]
    pub compiler: Settings,
}

/// Template directory configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct TemplatesConfig {
    /// Template root directory (default: "templates").
    #[serde(default = "default_templates_dir")]
    pub dir: String,
    /// Extension appended to template names (default: "html").
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_templates_dir() -> String {
    "templates".to_string()
}

fn default_extension() -> String {
    "html".to_string()
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
            extension: default_extension(),
        }
    }
}

impl Config {
    /// Loads configuration from `tagsmith.toml` in the current directory.
    ///
    /// If no configuration file exists, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Loads configuration from `tagsmith.toml` in `project_dir`.
    pub fn load_from(project_dir: &Path) -> anyhow::Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            tracing::debug!("no {} in {}, using defaults", CONFIG_FILE, project_dir.display());
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", config_path.display(), e))?;
        Ok(config)
    }

    /// The template root, relative to `project_dir`.
    pub fn templates_root(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.templates.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.templates.dir, "templates");
        assert_eq!(config.templates.extension, "html");
        assert!(config.compiler.strict);
    }

    #[test]
    fn test_load_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[templates]\ndir = \"views\"\n\n[compiler]\nstrict = false\nopen_tag = \"[[\"\nclose_tag = \"]]\"\n",
        )
        .unwrap();

        let config = Config::load_from(dir.path()).unwrap();
        assert_eq!(config.templates.dir, "views");
        assert_eq!(config.templates.extension, "html");
        assert!(!config.compiler.strict);
        assert_eq!(config.compiler.open_tag, "[[");
        assert_eq!(config.templates_root(dir.path()), dir.path().join("views"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[compiler]\nstrict = \"yes\"\n").unwrap();
        assert!(Config::load_from(dir.path()).is_err());
    }
}
