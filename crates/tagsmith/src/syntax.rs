// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Syntax rules and grammars.
//!
//! A [`Grammar`] is an ordered table of [`SyntaxRule`]s. Each rule matches the
//! text of one isolated tag (the part between the open and close delimiters)
//! and rewrites it into canonical fence code. Grammars are plain values: every
//! [`Compiler`](crate::Compiler) owns its own copy, so registering a rule on one
//! compiler never affects another.
//!
//! # Standard grammar
//!
//! | tag                              | canonical code            |
//! |----------------------------------|---------------------------|
//! | `{{-- note --}}`                 | *(removed)*               |
//! | `{{= v \| h, a}}`                | `=h(v, a)`                |
//! | `{{= expr}}` `{{# expr}}` `{{!# expr}}` | `=expr` `#expr` `!#expr` |
//! | `{{if c}}` `{{else if c}}` `{{else}}` `{{/if}}` | `if c` `elseif c` `else` `/if` |
//! | `{{each list as v, k}}` `{{/each}}` | `each list as v, k` `/each` |
//! | `{{include "name", data}}`       | `#__include("name", data)` |
//! | `{{set x = expr}}`               | `x = expr`                |
//! | `{{lua stmt}}`                   | `stmt`                    |
//! | `{{helper(args)}}`               | `helper(args)`            |

use crate::error::{Result, TemplateError};
use regex::{Captures, Regex};
use std::fmt;
use std::sync::Arc;

/// Canonical fence opening marker.
pub const FENCE_OPEN: &str = "<%";
/// Canonical fence closing marker.
pub const FENCE_CLOSE: &str = "%>";

/// Function form of a rewrite.
pub type RewriteFn = Arc<dyn Fn(&Captures) -> String + Send + Sync>;

/// How a matched tag is rewritten.
#[derive(Clone)]
pub enum Rewrite {
    /// A replacement template; `$1`, `${name}` refer to capture groups.
    Template(String),
    /// A function of the captures.
    Transform(RewriteFn),
}

impl Rewrite {
    /// Wraps a closure as a rewrite.
    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&Captures) -> String + Send + Sync + 'static,
    {
        Rewrite::Transform(Arc::new(f))
    }

    fn apply(&self, caps: &Captures) -> String {
        match self {
            Rewrite::Template(template) => {
                let mut out = String::new();
                caps.expand(template, &mut out);
                out
            }
            Rewrite::Transform(f) => f(caps),
        }
    }
}

impl From<&str> for Rewrite {
    fn from(template: &str) -> Self {
        Rewrite::Template(template.to_string())
    }
}

impl From<String> for Rewrite {
    fn from(template: String) -> Self {
        Rewrite::Template(template)
    }
}

impl fmt::Debug for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rewrite::Template(t) => write!(f, "Template({:?})", t),
            Rewrite::Transform(_) => write!(f, "Transform"),
        }
    }
}

/// One entry of a grammar.
#[derive(Debug, Clone)]
pub struct SyntaxRule {
    /// Unique rule name.
    pub name: String,
    /// Registration group; batch registrations share one group.
    pub group: String,
    /// The pattern as registered.
    pub pattern: String,
    matcher: Regex,
    /// Rewrite applied to a match.
    pub rewrite: Rewrite,
    /// Re-apply to the result until nothing changes.
    pub repeat: bool,
}

impl SyntaxRule {
    /// Compiles a rule. The pattern is anchored to the whole tag text.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        rewrite: impl Into<Rewrite>,
        repeat: bool,
    ) -> Result<Self> {
        let name = name.into();
        let matcher = Regex::new(&format!(r"^\s*(?:{})\s*$", pattern)).map_err(|e| {
            TemplateError::InvalidRule {
                name: name.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(Self {
            group: name.clone(),
            name,
            pattern: pattern.to_string(),
            matcher,
            rewrite: rewrite.into(),
            repeat,
        })
    }

    /// Rewrites `tag` when the rule matches it.
    pub fn apply(&self, tag: &str) -> Option<String> {
        self.matcher.captures(tag).map(|caps| self.rewrite.apply(&caps))
    }
}

/// Upper bound on rewrite steps for a single tag.
pub const MAX_REWRITE_STEPS: usize = 64;

/// Outcome of rewriting a single tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagRewrite {
    /// The tag became this canonical code (possibly empty).
    Code(String),
    /// No rule matched.
    Unmatched,
    /// A repeating rule did not reach a fixpoint.
    Diverged(String),
}

/// An ordered table of syntax rules.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    rules: Vec<SyntaxRule>,
}

impl Grammar {
    /// A grammar without rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard tag grammar.
    pub fn standard() -> Self {
        let mut grammar = Self::empty();
        for rule in standard_rules() {
            grammar.insert(rule);
        }
        grammar
    }

    /// Registers a rule, replacing any rule with the same name in place.
    pub fn register(
        &mut self,
        name: &str,
        pattern: &str,
        rewrite: impl Into<Rewrite>,
        repeat: bool,
    ) -> Result<()> {
        let rule = SyntaxRule::new(name, pattern, rewrite, repeat)?;
        self.insert(rule);
        Ok(())
    }

    /// Registers several pattern/rewrite pairs under one group name.
    ///
    /// The rules are named `group`, `group#1`, `group#2`, ... and are all
    /// removed by `unregister(group)`.
    pub fn register_many<I, R>(&mut self, group: &str, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, R)>,
        R: Into<Rewrite>,
    {
        let mut compiled = Vec::new();
        for (i, (pattern, rewrite)) in rules.into_iter().enumerate() {
            let name = if i == 0 { group.to_string() } else { format!("{}#{}", group, i) };
            let mut rule = SyntaxRule::new(name, &pattern, rewrite, false)?;
            rule.group = group.to_string();
            compiled.push(rule);
        }
        self.unregister(group);
        for rule in compiled {
            self.insert(rule);
        }
        Ok(())
    }

    /// Removes the rule (or batch group) with this name. Returns whether anything was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.name != name && rule.group != name);
        self.rules.len() != before
    }

    /// Returns true when a rule or group with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.rules.iter().any(|rule| rule.name == name || rule.group == name)
    }

    /// The rules in match order.
    pub fn rules(&self) -> &[SyntaxRule] {
        &self.rules
    }

    pub(crate) fn insert(&mut self, rule: SyntaxRule) {
        match self.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    /// Rewrites one isolated tag.
    ///
    /// The first matching rule is applied; when it is a `repeat` rule, the
    /// result is matched again until no rule changes it.
    pub fn rewrite_tag(&self, tag: &str) -> TagRewrite {
        let mut current = tag.trim().to_string();
        let mut matched = false;

        for _ in 0..MAX_REWRITE_STEPS {
            let step = self
                .rules
                .iter()
                .find_map(|rule| rule.apply(&current).map(|out| (rule, out)));

            let Some((rule, rewritten)) = step else {
                return if matched { TagRewrite::Code(current) } else { TagRewrite::Unmatched };
            };

            matched = true;
            let rewritten = rewritten.trim().to_string();
            let changed = rewritten != current;
            current = rewritten;
            if !changed || !rule.repeat {
                return TagRewrite::Code(current);
            }
        }

        TagRewrite::Diverged(current)
    }
}

/// Rules installed for a block helper `name`.
pub(crate) fn block_rules(name: &str) -> Result<[SyntaxRule; 2]> {
    let escaped = regex::escape(name);
    let open = SyntaxRule::new(
        format!("{}open", name),
        &format!(r"{}(?:\s+([\s\S]*))?", escaped),
        {
            let name = name.to_string();
            Rewrite::transform(move |caps| match caps.get(1) {
                Some(args) if !args.as_str().trim().is_empty() => {
                    format!("block {} {}", name, args.as_str().trim())
                }
                _ => format!("block {}", name),
            })
        },
        false,
    )?;
    let close = SyntaxRule::new(
        format!("{}close", name),
        &format!(r"/{}", escaped),
        format!("/{}", name),
        false,
    )?;
    Ok([open, close])
}

fn pipe_rewrite(caps: &Captures) -> String {
    let sigil = &caps[1];
    let value = caps[2].trim();
    let helper = &caps[3];
    let rest = caps.get(5).map(|m| m.as_str()).unwrap_or("");
    match caps.get(4).map(|m| m.as_str().trim()) {
        Some(args) if !args.is_empty() => format!("{}{}({}, {}){}", sigil, helper, value, args, rest),
        _ => format!("{}{}({}){}", sigil, helper, value, rest),
    }
}

fn each_rewrite(caps: &Captures) -> String {
    match caps.get(3) {
        Some(key) => format!("each {} as {}, {}", caps[1].trim(), &caps[2], key.as_str()),
        None => format!("each {} as {}", caps[1].trim(), &caps[2]),
    }
}

fn include_rewrite(caps: &Captures) -> String {
    match caps.get(2).map(|m| m.as_str().trim()) {
        Some(data) if !data.is_empty() => format!("#__include(\"{}\", {})", &caps[1], data),
        _ => format!("#__include(\"{}\")", &caps[1]),
    }
}

fn standard_rules() -> Vec<SyntaxRule> {
    let table: Vec<(&str, &str, Rewrite, bool)> = vec![
        ("comment", r"--[\s\S]*--", Rewrite::from(""), false),
        (
            "pipe",
            // `|` inside a quoted string belongs to the value
            r#"(=|#|!#)\s*((?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|[^|"'])+?)\s*\|\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:,\s*((?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|[^|"'])*?))?\s*(\|[\s\S]*)?"#,
            Rewrite::transform(pipe_rewrite),
            true,
        ),
        ("escaped", r"!#\s*([\s\S]+)", Rewrite::from("!#$1"), false),
        ("echo", r"=\s*([\s\S]+)", Rewrite::from("=$1"), false),
        ("raw", r"#\s*([\s\S]+)", Rewrite::from("#$1"), false),
        ("elseif", r"else\s*if\s+([\s\S]+)", Rewrite::from("elseif $1"), false),
        ("else", r"else", Rewrite::from("else"), false),
        ("if", r"if\s+([\s\S]+)", Rewrite::from("if $1"), false),
        ("endif", r"/if", Rewrite::from("/if"), false),
        (
            "each",
            r"each\s+([\s\S]+?)\s+as\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s*,\s*([A-Za-z_][A-Za-z0-9_]*))?",
            Rewrite::transform(each_rewrite),
            false,
        ),
        ("endeach", r"/each", Rewrite::from("/each"), false),
        (
            "include",
            r#"include\s+["']([^"']+)["']\s*(?:,\s*([\s\S]+))?"#,
            Rewrite::transform(include_rewrite),
            false,
        ),
        (
            "set",
            r"set\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([\s\S]+)",
            Rewrite::from("$1 = $2"),
            false,
        ),
        ("lua", r"lua\s+([\s\S]+)", Rewrite::from("$1"), false),
        (
            "call",
            r"([A-Za-z_][A-Za-z0-9_.:]*\s*\([\s\S]*\))",
            Rewrite::from("$1"),
            false,
        ),
    ];

    table
        .into_iter()
        .filter_map(|(name, pattern, rewrite, repeat)| {
            SyntaxRule::new(name, pattern, rewrite, repeat)
                .map_err(|e| tracing::error!("standard rule failed to compile: {}", e))
                .ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(grammar: &Grammar, tag: &str) -> String {
        match grammar.rewrite_tag(tag) {
            TagRewrite::Code(code) => code,
            other => panic!("expected code for {:?}, got {:?}", tag, other),
        }
    }

    #[test]
    fn test_standard_tags() {
        let g = Grammar::standard();
        assert_eq!(code(&g, "= name"), "=name");
        assert_eq!(code(&g, "# html"), "#html");
        assert_eq!(code(&g, "!# text"), "!#text");
        assert_eq!(code(&g, "if a > 1"), "if a > 1");
        assert_eq!(code(&g, "else if b"), "elseif b");
        assert_eq!(code(&g, "else"), "else");
        assert_eq!(code(&g, "/if"), "/if");
        assert_eq!(code(&g, "each list as value, index"), "each list as value, index");
        assert_eq!(code(&g, "each list as value"), "each list as value");
        assert_eq!(code(&g, "/each"), "/each");
        assert_eq!(code(&g, "include \"footer\""), "#__include(\"footer\")");
        assert_eq!(code(&g, "include 'row', item"), "#__include(\"row\", item)");
        assert_eq!(code(&g, "set total = a + b"), "total = a + b");
        assert_eq!(code(&g, "lua n = n + 1"), "n = n + 1");
        assert_eq!(code(&g, "upper(name)"), "upper(name)");
        assert_eq!(code(&g, "-- a note --"), "");
    }

    #[test]
    fn test_pipe_chain_reaches_fixpoint() {
        let g = Grammar::standard();
        assert_eq!(code(&g, "= name | upper"), "=upper(name)");
        assert_eq!(code(&g, "= name | trim | upper"), "=upper(trim(name))");
        assert_eq!(code(&g, "# v | join, \", \""), "#join(v, \", \")");
    }

    #[test]
    fn test_pipe_skips_bars_in_strings() {
        let g = Grammar::standard();
        assert_eq!(code(&g, "= \"a|b\" | upper"), "=upper(\"a|b\")");
        assert_eq!(code(&g, "= 'x|y' | lower"), "=lower('x|y')");
        assert_eq!(code(&g, "= \"q\\\"|\" | upper"), "=upper(\"q\\\"|\")");
        assert_eq!(code(&g, "= v | join, \"|\" | upper"), "=upper(join(v, \"|\"))");
    }

    #[test]
    fn test_rewriting_canonical_code_is_idempotent() {
        let g = Grammar::standard();
        for tag in ["= a | h1, 2 | h2", "each xs as x", "include \"p\"", "if x"] {
            let once = code(&g, tag);
            assert_eq!(code(&g, &once), once, "not idempotent for {:?}", tag);
        }
    }

    #[test]
    fn test_unknown_tag_is_unmatched() {
        let g = Grammar::standard();
        assert_eq!(g.rewrite_tag("unknownTag x"), TagRewrite::Unmatched);
    }

    #[test]
    fn test_non_repeat_rule_applies_once() {
        let mut g = Grammar::empty();
        g.register("grow", r"x+", "${0}x", false).unwrap();
        assert_eq!(g.rewrite_tag("x"), TagRewrite::Code("xx".to_string()));
    }

    #[test]
    fn test_runaway_repeat_rule_is_cut_off() {
        let mut g = Grammar::empty();
        g.register("grow", r"x+", "${0}x", true).unwrap();
        assert!(matches!(g.rewrite_tag("x"), TagRewrite::Diverged(_)));
    }

    #[test]
    fn test_register_replaces_and_unregister_removes() {
        let mut g = Grammar::standard();
        let count = g.rules().len();
        g.register("echo", r"=\s*([\s\S]+)", "=($1)", false).unwrap();
        assert_eq!(g.rules().len(), count);
        assert_eq!(code(&g, "= a"), "=(a)");

        assert!(g.unregister("echo"));
        assert!(!g.contains("echo"));
        assert!(!g.unregister("echo"));
    }

    #[test]
    fn test_register_many_shares_a_group() {
        let mut g = Grammar::empty();
        g.register_many(
            "shout",
            vec![
                (r"!!\s*(\w+)".to_string(), Rewrite::from("=upper($1)")),
                (r"\?\?\s*(\w+)".to_string(), Rewrite::from("=lower($1)")),
            ],
        )
        .unwrap();
        assert_eq!(code(&g, "!! a"), "=upper(a)");
        assert_eq!(code(&g, "?? a"), "=lower(a)");
        assert!(g.unregister("shout"));
        assert!(g.rules().is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut g = Grammar::empty();
        let err = g.register("bad", r"(", "x", false).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidRule { .. }));
    }

    #[test]
    fn test_block_rules() {
        let [open, close] = block_rules("card").unwrap();
        assert_eq!(open.apply("card title, 2").unwrap(), "block card title, 2");
        assert_eq!(open.apply("card").unwrap(), "block card");
        assert_eq!(close.apply("/card").unwrap(), "/card");
        assert!(open.apply("cards").is_none());
    }
}
