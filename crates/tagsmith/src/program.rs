// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Lowered programs.
//!
//! A [`Program`] is the output of shell lowering: a declaration block followed
//! by a flat instruction sequence. Blocks are delimited by [`Instruction::Enter`]
//! and [`Instruction::Exit`]; the render builder checks that they pair up.
//!
//! The [`Display`](std::fmt::Display) form is a numbered listing, one
//! declaration or instruction per line, used in build and runtime errors.

use std::fmt;

/// Where a declared name is bound from at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// The block-helper table.
    BlockHelper,
    /// The helper table.
    Helper,
    /// The data argument.
    Variable,
    /// A `depends` parameter.
    Dependency,
}

impl Binding {
    fn label(&self) -> &'static str {
        match self {
            Binding::BlockHelper => "block",
            Binding::Helper => "helper",
            Binding::Variable => "var",
            Binding::Dependency => "depend",
        }
    }
}

/// One entry of the declaration block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// The bound name.
    pub name: String,
    /// Its source.
    pub binding: Binding,
}

/// How an echoed value is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    /// HTML-escaped.
    Escape,
    /// Verbatim.
    Raw,
}

/// The kind of block an [`Instruction::Enter`] opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    /// Conditional; the expression is the first branch condition.
    If(String),
    /// Iteration over a list or map.
    Each {
        /// The iterated expression.
        source: String,
        /// Name bound to each element.
        value: String,
        /// Name bound to the index or key.
        key: Option<String>,
    },
    /// A block-helper call.
    Helper {
        /// The block helper name.
        name: String,
        /// Argument expression list (may be empty).
        args: String,
    },
}

impl BlockKind {
    /// The tag an [`Instruction::Exit`] must carry to close this block.
    pub fn closing_tag(&self) -> &str {
        match self {
            BlockKind::If(_) => "if",
            BlockKind::Each { .. } => "each",
            BlockKind::Helper { name, .. } => name,
        }
    }
}

/// One step of a lowered program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Append literal text.
    Append(String),
    /// Evaluate an expression and append its text.
    Echo {
        /// Lua expression.
        expr: String,
        /// Escape policy.
        mode: EchoMode,
        /// Template line marker.
        line: usize,
    },
    /// Evaluate a statement without output.
    Exec {
        /// Lua statement(s).
        code: String,
        /// Template line marker.
        line: usize,
    },
    /// Open a block.
    Enter {
        /// The block kind.
        kind: BlockKind,
        /// Template line marker.
        line: usize,
    },
    /// Switch to the next branch of the innermost `if`; `None` is `else`.
    Branch {
        /// Branch condition.
        cond: Option<String>,
        /// Template line marker.
        line: usize,
    },
    /// Close the innermost block.
    Exit {
        /// `if`, `each` or the block helper name.
        tag: String,
        /// Template line marker.
        line: usize,
    },
}

impl Instruction {
    /// The line marker set before this instruction runs.
    pub fn line(&self) -> Option<usize> {
        match self {
            Instruction::Append(_) => None,
            Instruction::Echo { line, .. }
            | Instruction::Exec { line, .. }
            | Instruction::Enter { line, .. }
            | Instruction::Branch { line, .. }
            | Instruction::Exit { line, .. } => Some(*line),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Append(text) => write!(f, "append {:?}", text),
            Instruction::Echo { expr, mode, line } => {
                let op = match mode {
                    EchoMode::Escape => "echo",
                    EchoMode::Raw => "echo-raw",
                };
                write!(f, "@{} {} {}", line, op, expr)
            }
            Instruction::Exec { code, line } => write!(f, "@{} exec {}", line, code),
            Instruction::Enter { kind, line } => match kind {
                BlockKind::If(cond) => write!(f, "@{} if {}", line, cond),
                BlockKind::Each { source, value, key } => match key {
                    Some(key) => write!(f, "@{} each {} as {}, {}", line, source, value, key),
                    None => write!(f, "@{} each {} as {}", line, source, value),
                },
                BlockKind::Helper { name, args } => write!(f, "@{} block {} {}", line, name, args),
            },
            Instruction::Branch { cond, line } => match cond {
                Some(cond) => write!(f, "@{} elseif {}", line, cond),
                None => write!(f, "@{} else", line),
            },
            Instruction::Exit { tag, line } => write!(f, "@{} end {}", line, tag),
        }
    }
}

/// A lowered template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Bindings, block helpers first, then helpers, then variables, then dependencies.
    pub declarations: Vec<Declaration>,
    /// Body instructions.
    pub instructions: Vec<Instruction>,
    /// Final value of the line counter.
    pub lines: usize,
}

impl Program {
    /// Names bound from `binding`, in declaration order.
    pub fn names(&self, binding: Binding) -> impl Iterator<Item = &str> {
        self.declarations
            .iter()
            .filter(move |d| d.binding == binding)
            .map(|d| d.name.as_str())
    }

    /// Listing line (1-indexed) of instruction `index`.
    pub fn listing_line(&self, index: usize) -> usize {
        self.declarations.len() + index + 1
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.declarations {
            writeln!(f, "{} {}", decl.binding.label(), decl.name)?;
        }
        for instruction in &self.instructions {
            writeln!(f, "{}", instruction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_has_one_line_per_entry() {
        let program = Program {
            declarations: vec![Declaration {
                name: "name".to_string(),
                binding: Binding::Variable,
            }],
            instructions: vec![
                Instruction::Append("Hi\n".to_string()),
                Instruction::Echo {
                    expr: "name".to_string(),
                    mode: EchoMode::Escape,
                    line: 2,
                },
            ],
            lines: 2,
        };
        let listing = program.to_string();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines, vec!["var name", "append \"Hi\\n\"", "@2 echo name"]);
        assert_eq!(program.listing_line(1), 3);
        assert_eq!(program.names(Binding::Variable).collect::<Vec<_>>(), vec!["name"]);
    }
}
