// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Include discovery and fan-in ordering.
//!
//! The resolver first discovers every template a compile tree needs, then
//! compiles them children-first: a template becomes compilable once its
//! pending count (children not yet ready) reaches zero. Templates left over
//! when nothing more becomes compilable sit on an include cycle.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

lazy_static! {
    static ref INCLUDE_CALL: Regex = Regex::new(r#"__include\(\s*"([^"]+)""#).unwrap();
}

/// Include targets of a canonical template, de-duplicated, in first-seen order.
pub fn scan_includes(canonical: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in INCLUDE_CALL.captures_iter(canonical) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// A discovered template waiting to be compiled.
#[derive(Debug, Clone)]
pub struct DependencyRecord {
    /// The raw source, as located.
    pub source: String,
    /// The normalized source.
    pub canonical: String,
    /// Include targets.
    pub children: Vec<String>,
}

/// Result of [`DependencyGraph::fan_in`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanIn {
    /// Templates compiled, in compile order.
    pub compiled: Vec<String>,
    /// Templates that failed or had a failed child.
    pub failed: Vec<String>,
    /// Templates on, or depending on, an include cycle.
    pub cyclic: Vec<String>,
}

/// Templates discovered for one compile tree.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    records: BTreeMap<String, DependencyRecord>,
    ready: BTreeSet<String>,
    failed: BTreeSet<String>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template that still has to be compiled.
    pub fn insert(&mut self, name: &str, record: DependencyRecord) {
        self.records.insert(name.to_string(), record);
    }

    /// Marks `name` as already available, e.g. cached.
    pub fn mark_ready(&mut self, name: &str) {
        self.ready.insert(name.to_string());
    }

    /// Marks `name` as unavailable.
    pub fn mark_failed(&mut self, name: &str) {
        self.failed.insert(name.to_string());
    }

    /// Returns `true` if `name` was discovered or marked.
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name) || self.ready.contains(name) || self.failed.contains(name)
    }

    /// Compiles every record, children before parents.
    ///
    /// `compile` returns `false` when a template fails; templates including
    /// a failed one are not compiled at all.
    pub fn fan_in<F>(self, mut compile: F) -> FanIn
    where
        F: FnMut(&str, &DependencyRecord) -> bool,
    {
        let DependencyGraph {
            records,
            ready,
            mut failed,
        } = self;

        // Children nobody discovered count as failed
        for record in records.values() {
            for child in &record.children {
                if !records.contains_key(child) && !ready.contains(child) {
                    failed.insert(child.clone());
                }
            }
        }

        let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, record) in &records {
            let waiting: Vec<&str> = record
                .children
                .iter()
                .map(String::as_str)
                .filter(|c| !ready.contains(*c))
                .collect();
            for child in &waiting {
                dependents.entry(*child).or_default().push(name.as_str());
            }
            pending.insert(name.as_str(), waiting.len());
        }

        let mut queue: VecDeque<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut outcome = FanIn::default();
        let already_failed: Vec<String> = failed.iter().cloned().collect();
        for name in &already_failed {
            release(name, &dependents, &mut pending, &mut queue);
        }

        let mut done: BTreeSet<&str> = BTreeSet::new();
        while let Some(name) = queue.pop_front() {
            let record = &records[name];
            let ok = !record.children.iter().any(|c| failed.contains(c)) && compile(name, record);
            if ok {
                outcome.compiled.push(name.to_string());
            } else {
                failed.insert(name.to_string());
                outcome.failed.push(name.to_string());
            }
            done.insert(name);
            release(name, &dependents, &mut pending, &mut queue);
        }

        outcome.cyclic = records
            .keys()
            .filter(|name| !done.contains(name.as_str()))
            .cloned()
            .collect();
        outcome
    }
}

/// Decrements the pending count of everything waiting on `name`.
fn release<'a>(
    name: &str,
    dependents: &BTreeMap<&'a str, Vec<&'a str>>,
    pending: &mut BTreeMap<&'a str, usize>,
    queue: &mut VecDeque<&'a str>,
) {
    for parent in dependents.get(name).into_iter().flatten() {
        if let Some(count) = pending.get_mut(parent) {
            *count -= 1;
            if *count == 0 {
                queue.push_back(*parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(children: &[&str]) -> DependencyRecord {
        DependencyRecord {
            source: String::new(),
            canonical: String::new(),
            children: children.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_scan_includes() {
        let code = r#"<%#__include("nav")%><%#__include( "row", item)%><%#__include("nav")%>"#;
        assert_eq!(scan_includes(code), vec!["nav".to_string(), "row".to_string()]);
        assert!(scan_includes("<%=include%>").is_empty());
    }

    #[test]
    fn test_children_compile_first() {
        let mut graph = DependencyGraph::new();
        graph.insert("page", record(&["layout", "nav", "cached"]));
        graph.insert("layout", record(&["nav"]));
        graph.insert("nav", record(&[]));
        graph.mark_ready("cached");

        let outcome = graph.fan_in(|_, _| true);
        assert_eq!(outcome.compiled, vec!["nav", "layout", "page"]);
        assert!(outcome.failed.is_empty());
        assert!(outcome.cyclic.is_empty());
    }

    #[test]
    fn test_failure_spreads_to_dependents() {
        let mut graph = DependencyGraph::new();
        graph.insert("page", record(&["nav", "footer"]));
        graph.insert("nav", record(&["missing"]));
        graph.insert("footer", record(&[]));
        graph.mark_failed("missing");

        let mut seen = Vec::new();
        let outcome = graph.fan_in(|name, _| {
            seen.push(name.to_string());
            true
        });
        assert_eq!(seen, vec!["footer"]);
        assert_eq!(outcome.failed, vec!["nav", "page"]);
    }

    #[test]
    fn test_compile_failure_spreads_to_dependents() {
        let mut graph = DependencyGraph::new();
        graph.insert("page", record(&["bad"]));
        graph.insert("bad", record(&[]));

        let outcome = graph.fan_in(|name, _| name != "bad");
        assert!(outcome.compiled.is_empty());
        assert_eq!(outcome.failed, vec!["bad", "page"]);
    }

    #[test]
    fn test_cycles_are_left_over() {
        let mut graph = DependencyGraph::new();
        graph.insert("root", record(&["a", "leaf"]));
        graph.insert("a", record(&["b"]));
        graph.insert("b", record(&["a"]));
        graph.insert("leaf", record(&[]));

        let outcome = graph.fan_in(|_, _| true);
        assert_eq!(outcome.compiled, vec!["leaf"]);
        assert_eq!(outcome.cyclic, vec!["a", "b", "root"]);
    }

    #[test]
    fn test_undiscovered_children_fail() {
        let mut graph = DependencyGraph::new();
        graph.insert("page", record(&["ghost"]));
        let outcome = graph.fan_in(|_, _| true);
        assert_eq!(outcome.failed, vec!["page"]);
    }
}
