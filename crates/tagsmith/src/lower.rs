// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Shell lowering.
//!
//! Converts a canonical template (literal text and `<% ... %>` fences) into a
//! [`Program`]. Literal segments become [`Instruction::Append`]; each fence is
//! classified by its leading sigil or keyword, and every free identifier it
//! reads is declared as a block helper, a helper or a data variable.

use crate::identifiers::{free_identifiers, is_host_global};
use crate::normalize::unescape_fences;
use crate::program::{Binding, BlockKind, Declaration, EchoMode, Instruction, Program};
use crate::settings::Settings;
use crate::syntax::{FENCE_CLOSE, FENCE_OPEN};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

lazy_static! {
    static ref HTML_COMMENT: Regex = Regex::new(r"<!--[\s\S]*?-->").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref BARE_CALL: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.:]*\s*\([\s\S]*\)$").unwrap();
    static ref EACH: Regex = Regex::new(
        r"^each\s+([\s\S]+?)\s+as\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s*,\s*([A-Za-z_][A-Za-z0-9_]*))?$"
    )
    .unwrap();
    static ref BLOCK: Regex = Regex::new(r"^block\s+([A-Za-z_][A-Za-z0-9_]*)\s*([\s\S]*)$").unwrap();
}

/// The helper and block-helper names known when lowering.
#[derive(Debug, Clone, Default)]
pub struct NameTables {
    /// Registered helper names.
    pub helpers: BTreeSet<String>,
    /// Registered block-helper names.
    pub blocks: BTreeSet<String>,
}

/// Lowers a canonical template into a program.
pub fn lower(canonical: &str, tables: &NameTables, settings: &Settings) -> Program {
    let mut lowering = Lowering::new(tables, settings);

    let mut parts = canonical.split(FENCE_OPEN);
    if let Some(first) = parts.next() {
        lowering.literal(first);
    }
    for part in parts {
        match part.split_once(FENCE_CLOSE) {
            Some((code, text)) => {
                lowering.code(code);
                lowering.literal(text);
            }
            None => {
                let mut text = FENCE_OPEN.to_string();
                text.push_str(part);
                lowering.literal(&text);
            }
        }
    }

    lowering.finish()
}

/// Dependency names with their `$` prefix removed.
pub fn dependency_names(settings: &Settings) -> Vec<String> {
    settings
        .depends
        .iter()
        .map(|d| d.trim_start_matches('$').to_string())
        .filter(|d| !d.is_empty())
        .collect()
}

struct Lowering<'a> {
    tables: &'a NameTables,
    settings: &'a Settings,
    dependencies: Vec<String>,
    instructions: Vec<Instruction>,
    blocks: Vec<String>,
    helpers: Vec<String>,
    variables: Vec<String>,
    line: usize,
}

impl<'a> Lowering<'a> {
    fn new(tables: &'a NameTables, settings: &'a Settings) -> Self {
        Self {
            tables,
            settings,
            dependencies: dependency_names(settings),
            instructions: Vec::new(),
            blocks: Vec::new(),
            helpers: Vec::new(),
            variables: Vec::new(),
            line: 1,
        }
    }

    fn literal(&mut self, segment: &str) {
        if segment.is_empty() {
            return;
        }
        let newlines = segment.matches('\n').count();
        let text = unescape_fences(segment);

        let text = if self.settings.compress {
            let without_comments = HTML_COMMENT.replace_all(&text, "");
            if without_comments.trim().is_empty() && !without_comments.contains('\n') {
                // Indentation between tags stays as written
                without_comments.into_owned()
            } else {
                WHITESPACE.replace_all(&without_comments, " ").into_owned()
            }
        } else {
            text
        };

        self.line += newlines;
        if !text.is_empty() {
            match self.instructions.last_mut() {
                Some(Instruction::Append(prev)) => prev.push_str(&text),
                _ => self.instructions.push(Instruction::Append(text)),
            }
        }
    }

    fn code(&mut self, segment: &str) {
        let line = self.line;
        self.line += segment.matches('\n').count();

        let code = unescape_fences(segment);
        let code = code.trim();
        if code.is_empty() {
            return;
        }

        let instruction = self.classify(code, line);
        self.instructions.push(instruction);
    }

    fn classify(&mut self, code: &str, line: usize) -> Instruction {
        if let Some(expr) = code.strip_prefix("!#") {
            return self.echo(expr, EchoMode::Escape, line);
        }
        if let Some(expr) = code.strip_prefix('=') {
            return self.echo(expr, EchoMode::Escape, line);
        }
        if let Some(expr) = code.strip_prefix('#') {
            return self.echo(expr, EchoMode::Raw, line);
        }

        if let Some(cond) = keyword_rest(code, "if") {
            self.declare(cond);
            return Instruction::Enter {
                kind: BlockKind::If(cond.to_string()),
                line,
            };
        }
        if let Some(cond) = keyword_rest(code, "elseif") {
            self.declare(cond);
            return Instruction::Branch {
                cond: Some(cond.to_string()),
                line,
            };
        }
        if code == "else" {
            return Instruction::Branch { cond: None, line };
        }

        if let Some(caps) = EACH.captures(code) {
            let source = caps[1].trim().to_string();
            self.declare(&source);
            return Instruction::Enter {
                kind: BlockKind::Each {
                    source,
                    value: caps[2].to_string(),
                    key: caps.get(3).map(|m| m.as_str().to_string()),
                },
                line,
            };
        }

        if let Some(caps) = BLOCK.captures(code) {
            let name = caps[1].to_string();
            let args = caps[2].trim().to_string();
            push_unique(&mut self.blocks, &name);
            self.declare(&args);
            return Instruction::Enter {
                kind: BlockKind::Helper { name, args },
                line,
            };
        }

        if let Some(tag) = code.strip_prefix('/') {
            let tag = tag.trim();
            if !tag.is_empty() && tag.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Instruction::Exit {
                    tag: tag.to_string(),
                    line,
                };
            }
        }

        if BARE_CALL.is_match(code) {
            let mode = if self.settings.escape { EchoMode::Escape } else { EchoMode::Raw };
            return self.echo(code, mode, line);
        }

        self.declare(code);
        Instruction::Exec {
            code: code.to_string(),
            line,
        }
    }

    fn echo(&mut self, expr: &str, mode: EchoMode, line: usize) -> Instruction {
        let expr = expr.trim();
        self.declare(expr);
        Instruction::Echo {
            expr: expr.to_string(),
            mode,
            line,
        }
    }

    /// Sorts the free identifiers of `code` into the declaration tables.
    fn declare(&mut self, code: &str) {
        for name in free_identifiers(code) {
            if is_host_global(&name) || self.dependencies.contains(&name) {
                continue;
            }
            if self.tables.helpers.contains(&name) {
                push_unique(&mut self.helpers, &name);
            } else if self.tables.blocks.contains(&name) {
                push_unique(&mut self.blocks, &name);
            } else {
                push_unique(&mut self.variables, &name);
            }
        }
    }

    fn finish(self) -> Program {
        let mut declarations = Vec::new();
        let layers = [
            (self.blocks, Binding::BlockHelper),
            (self.helpers, Binding::Helper),
            (self.variables, Binding::Variable),
            (self.dependencies, Binding::Dependency),
        ];
        for (names, binding) in layers {
            declarations.extend(names.into_iter().map(|name| Declaration { name, binding }));
        }

        Program {
            declarations,
            instructions: self.instructions,
            lines: self.line,
        }
    }
}

fn keyword_rest<'c>(code: &'c str, keyword: &str) -> Option<&'c str> {
    let rest = code.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) && !rest.trim().is_empty() {
        Some(rest.trim())
    } else {
        None
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}
