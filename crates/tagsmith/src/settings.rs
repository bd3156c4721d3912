// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Compiler settings.
//!
//! [`Settings`] holds the instance defaults of a [`Compiler`](crate::Compiler).
//! They can be loaded from TOML, changed key by key through
//! [`Settings::set`], and overridden for a single call with [`Options`]
//! without mutating the defaults.
//!
//! # Example Configuration
//!
//! ```toml
//! mode = "produce"
//! strict = true
//! compress = true
//! escape = true
//! open_tag = "{{"
//! close_tag = "}}"
//! depends = ["$site"]
//! ```

use crate::data::Data;
use crate::error::{Result, TemplateError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Environment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Tests: listeners still fire but nothing is echoed to the log.
    Unit,
    /// Development.
    #[default]
    Develop,
    /// Production.
    Produce,
}

impl Mode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "unit" => Some(Mode::Unit),
            "develop" => Some(Mode::Develop),
            "produce" => Some(Mode::Produce),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Mode::Unit => "unit",
            Mode::Develop => "develop",
            Mode::Produce => "produce",
        }
    }
}

/// Compiler settings, immutable for the duration of one compile call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Environment mode.
    pub mode: Mode,
    /// Skip the syntax normalizer; the template is already canonical.
    pub no_syntax: bool,
    /// Unmatched tags and stray delimiters fail the whole template.
    pub strict: bool,
    /// Collapse whitespace and drop HTML comments in literal text.
    pub compress: bool,
    /// Escape bare helper calls by default.
    pub escape: bool,
    /// Opening tag delimiter.
    pub open_tag: String,
    /// Closing tag delimiter.
    pub close_tag: String,
    /// Extra renderer parameter names; `$name` binds from [`Settings::values`].
    pub depends: Vec<String>,
    /// Store named renderers in the compilation cache.
    pub cache: bool,
    /// Replace an existing cache entry instead of returning it.
    #[serde(rename = "override")]
    pub override_cache: bool,
    /// Values addressed by `$`-prefixed names.
    #[serde(skip)]
    pub values: BTreeMap<String, Data>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: Mode::Develop,
            no_syntax: false,
            strict: true,
            compress: false,
            escape: true,
            open_tag: "{{".to_string(),
            close_tag: "}}".to_string(),
            depends: Vec::new(),
            cache: true,
            override_cache: false,
            values: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Parses settings from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| TemplateError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TemplateError::Config(format!("cannot read '{}': {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.open_tag.is_empty() || self.close_tag.is_empty() {
            return Err(TemplateError::Config("tag delimiters must not be empty".to_string()));
        }
        if self.open_tag == self.close_tag {
            return Err(TemplateError::Config(
                "open and close delimiters must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets one setting by key.
    ///
    /// Keys starting with `$` store a value that `depends` entries can bind.
    /// A rejected value leaves every setting as it was.
    pub fn set(&mut self, key: &str, value: Data) -> Result<()> {
        if key.starts_with('$') {
            self.values.insert(key.to_string(), value);
            return Ok(());
        }

        let mut next = self.clone();
        next.assign(key, value)?;
        next.validate()?;
        *self = next;
        Ok(())
    }

    fn assign(&mut self, key: &str, value: Data) -> Result<()> {
        let expect_bool = |value: &Data| match value {
            Data::Bool(b) => Ok(*b),
            other => Err(TemplateError::Config(format!(
                "'{}' expects a boolean, got {:?}",
                key, other
            ))),
        };
        let expect_str = |value: &Data| match value {
            Data::String(s) if !s.is_empty() => Ok(s.clone()),
            other => Err(TemplateError::Config(format!(
                "'{}' expects a non-empty string, got {:?}",
                key, other
            ))),
        };

        match key {
            "mode" => {
                let text = expect_str(&value)?;
                self.mode = Mode::parse(&text)
                    .ok_or_else(|| TemplateError::Config(format!("unknown mode '{}'", text)))?;
            }
            "no_syntax" => self.no_syntax = expect_bool(&value)?,
            "strict" => self.strict = expect_bool(&value)?,
            "compress" => self.compress = expect_bool(&value)?,
            "escape" => self.escape = expect_bool(&value)?,
            "cache" => self.cache = expect_bool(&value)?,
            "override" => self.override_cache = expect_bool(&value)?,
            "open_tag" => self.open_tag = expect_str(&value)?,
            "close_tag" => self.close_tag = expect_str(&value)?,
            "depends" => match value {
                Data::List(items) => {
                    self.depends = items.iter().map(Data::to_text).collect();
                }
                other => {
                    return Err(TemplateError::Config(format!(
                        "'depends' expects a list of names, got {:?}",
                        other
                    )))
                }
            },
            _ => return Err(TemplateError::Config(format!("unknown setting '{}'", key))),
        }
        Ok(())
    }

    /// Reads one setting by key.
    pub fn get(&self, key: &str) -> Option<Data> {
        if key.starts_with('$') {
            return self.values.get(key).cloned();
        }
        Some(match key {
            "mode" => Data::from(self.mode.as_str()),
            "no_syntax" => Data::Bool(self.no_syntax),
            "strict" => Data::Bool(self.strict),
            "compress" => Data::Bool(self.compress),
            "escape" => Data::Bool(self.escape),
            "cache" => Data::Bool(self.cache),
            "override" => Data::Bool(self.override_cache),
            "open_tag" => Data::from(self.open_tag.as_str()),
            "close_tag" => Data::from(self.close_tag.as_str()),
            "depends" => Data::from(self.depends.clone()),
            _ => return None,
        })
    }

    /// Returns a copy with `options` applied on top.
    pub fn merged(&self, options: &Options) -> Settings {
        let mut settings = self.clone();
        if let Some(mode) = options.mode {
            settings.mode = mode;
        }
        if let Some(v) = options.no_syntax {
            settings.no_syntax = v;
        }
        if let Some(v) = options.strict {
            settings.strict = v;
        }
        if let Some(v) = options.compress {
            settings.compress = v;
        }
        if let Some(v) = options.escape {
            settings.escape = v;
        }
        if let Some(v) = options.cache {
            settings.cache = v;
        }
        if let Some(v) = options.override_cache {
            settings.override_cache = v;
        }
        if let Some(ref depends) = options.depends {
            settings.depends = depends.clone();
        }
        settings
    }
}

/// Per-call overrides and the optional cache name.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Cache name for the compiled renderer.
    pub name: Option<String>,
    /// Overrides [`Settings::mode`].
    pub mode: Option<Mode>,
    /// Overrides [`Settings::no_syntax`].
    pub no_syntax: Option<bool>,
    /// Overrides [`Settings::strict`].
    pub strict: Option<bool>,
    /// Overrides [`Settings::compress`].
    pub compress: Option<bool>,
    /// Overrides [`Settings::escape`].
    pub escape: Option<bool>,
    /// Overrides [`Settings::cache`].
    pub cache: Option<bool>,
    /// Overrides [`Settings::override_cache`].
    pub override_cache: Option<bool>,
    /// Overrides [`Settings::depends`].
    pub depends: Option<Vec<String>>,
}

impl Options {
    /// Empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides that cache the result under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the environment mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Skips the syntax normalizer.
    pub fn no_syntax(mut self, value: bool) -> Self {
        self.no_syntax = Some(value);
        self
    }

    /// Sets strict normalization.
    pub fn strict(mut self, value: bool) -> Self {
        self.strict = Some(value);
        self
    }

    /// Sets literal compression.
    pub fn compress(mut self, value: bool) -> Self {
        self.compress = Some(value);
        self
    }

    /// Sets the default escape policy for bare calls.
    pub fn escape(mut self, value: bool) -> Self {
        self.escape = Some(value);
        self
    }

    /// Enables or disables caching.
    pub fn cache(mut self, value: bool) -> Self {
        self.cache = Some(value);
        self
    }

    /// Replaces an existing cache entry.
    pub fn override_cache(mut self, value: bool) -> Self {
        self.override_cache = Some(value);
        self
    }

    /// Sets the extra renderer parameter names.
    pub fn depends<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert!(settings.strict);
        assert!(settings.escape);
        assert_eq!(settings.open_tag, "{{");
        assert_eq!(settings.close_tag, "}}");
        assert_eq!(settings.mode, Mode::Develop);
    }

    #[test]
    fn test_from_toml_keeps_missing_defaults() {
        let settings = Settings::from_toml_str(
            r#"
mode = "produce"
compress = true
override = true
depends = ["$site", "extra"]
"#,
        )
        .unwrap();
        assert_eq!(settings.mode, Mode::Produce);
        assert!(settings.compress);
        assert!(settings.override_cache);
        assert!(settings.strict);
        assert_eq!(settings.depends, vec!["$site", "extra"]);
    }

    #[test]
    fn test_from_toml_rejects_equal_delimiters() {
        let result = Settings::from_toml_str("open_tag = \"%%\"\nclose_tag = \"%%\"");
        assert!(matches!(result, Err(TemplateError::Config(_))));
    }

    #[test]
    fn test_set_and_get() {
        let mut settings = Settings::default();
        settings.set("strict", Data::Bool(false)).unwrap();
        settings.set("open_tag", Data::from("${")).unwrap();
        settings.set("$site", Data::from("example.org")).unwrap();

        assert_eq!(settings.get("strict"), Some(Data::Bool(false)));
        assert_eq!(settings.get("open_tag"), Some(Data::from("${")));
        assert_eq!(settings.get("$site"), Some(Data::from("example.org")));
        assert_eq!(settings.get("nope"), None);

        assert!(settings.set("strict", Data::from("yes")).is_err());
        assert!(settings.set("nope", Data::Null).is_err());
    }

    #[test]
    fn test_rejected_set_keeps_previous_values() {
        let mut settings = Settings::default();
        assert!(matches!(
            settings.set("close_tag", Data::from("{{")),
            Err(TemplateError::Config(_))
        ));
        assert_eq!(settings.get("close_tag"), Some(Data::from("}}")));

        settings.set("open_tag", Data::from("<%")).unwrap();
        assert!(settings.set("open_tag", Data::from("}}")).is_err());
        assert_eq!(settings.get("open_tag"), Some(Data::from("<%")));
        assert_eq!(settings.get("close_tag"), Some(Data::from("}}")));
    }

    #[test]
    fn test_merge_does_not_touch_defaults() {
        let defaults = Settings::default();
        let merged = defaults.merged(&Options::new().strict(false).escape(false));
        assert!(!merged.strict);
        assert!(!merged.escape);
        assert!(defaults.strict);
        assert!(defaults.escape);
    }
}
