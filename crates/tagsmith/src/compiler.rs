// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The tagsmith compiler.
//!
//! [`Compiler`] ties the pipeline together: syntax normalization, shell
//! lowering, render building and the compilation cache, plus the
//! asynchronous include resolver for templates addressed by name.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tagsmith::{Compiler, Data, Options};
//! use serde_json::json;
//!
//! let compiler = Compiler::default().with_standard_helpers();
//! let html = compiler.render(
//!     "<h1>{{= title | upper}}</h1>",
//!     &Data::from(json!({ "title": "hello" })),
//!     &Options::new(),
//! );
//! assert_eq!(html, "<h1>HELLO</h1>");
//! ```
//!
//! # Resolution
//!
//! [`Compiler::compile_by_name`] locates a template through the fragment
//! source first and the fetcher second, normalizes it, scans it for
//! `include` targets and resolves those the same way, fetching siblings
//! concurrently. Once every target is ready the templates are compiled
//! children-first and cached.
//!
//! # Failures
//!
//! Nothing here panics or returns an error for a bad template. Failures are
//! delivered to the listeners registered with [`Compiler::on`], and the
//! operation falls back to a no-op renderer, `""` or `None`.

use crate::cache::{MemoryCache, RendererCache};
use crate::data::{Data, Helper};
use crate::dependencies::{scan_includes, DependencyGraph, DependencyRecord};
use crate::error::{FetchError, HelperError, Result, TemplateError};
use crate::events::{EventKind, ListenerId, Reporter};
use crate::helpers::standard_helpers;
use crate::identifiers::is_reserved;
use crate::lower::{lower, NameTables};
use crate::normalize::normalize;
use crate::renderer::{try_build, BlockContext, BlockHelper, IncludeLookup, Renderer, Scope};
use crate::resolver::{FragmentSource, SourceFetcher};
use crate::settings::{Options, Settings};
use crate::syntax::{block_rules, Grammar, Rewrite};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use mlua::Lua;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Template compiler.
///
/// Each instance owns its grammar, helper tables, settings, cache, listeners
/// and Lua state; instances never share mutable state. Compiled renderers
/// keep a snapshot of the tables they were built with, so registering or
/// removing helpers later does not affect them.
///
/// # Examples
///
/// ```rust,ignore
/// use tagsmith::{Compiler, MemorySources, Options};
///
/// let sources = MemorySources::new();
/// sources.add_template("page", "<main>{{include \"nav\"}}</main>");
/// sources.add_template("nav", "<nav></nav>");
///
/// let compiler = Compiler::default().with_fetcher(sources);
/// let page = compiler.compile_by_name("page", &Options::new()).await;
/// ```
pub struct Compiler {
    grammar: Grammar,
    settings: Settings,
    helpers: Arc<BTreeMap<String, Helper>>,
    blocks: Arc<BTreeMap<String, BlockHelper>>,
    cache: Arc<dyn RendererCache>,
    reporter: Reporter,
    lua: Arc<Lua>,
    fetcher: Option<Arc<dyn SourceFetcher>>,
    fragments: Option<Arc<dyn FragmentSource>>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(Grammar::standard())
    }
}

impl fmt::Debug for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compiler")
            .field("rules", &self.grammar.rules().len())
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("blocks", &self.blocks.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Bookkeeping for one compile-by-name tree.
#[derive(Default)]
struct Discovery {
    claimed: Mutex<HashSet<String>>,
    graph: Mutex<DependencyGraph>,
}

impl Discovery {
    /// Claims `name` for this tree; `false` if it is already in flight.
    fn claim(&self, name: &str) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string())
    }

    fn update<R>(&self, f: impl FnOnce(&mut DependencyGraph) -> R) -> R {
        f(&mut self.graph.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn into_graph(self) -> DependencyGraph {
        self.graph.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl Compiler {
    /// Creates a compiler with `grammar`, default settings and a memory cache.
    pub fn new(grammar: Grammar) -> Self {
        Self {
            grammar,
            settings: Settings::default(),
            helpers: Arc::new(BTreeMap::new()),
            blocks: Arc::new(BTreeMap::new()),
            cache: Arc::new(MemoryCache::new()),
            reporter: Reporter::new(),
            lua: Arc::new(Lua::new()),
            fetcher: None,
            fragments: None,
        }
    }

    /// Replaces the instance settings.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the compilation cache.
    pub fn with_cache<C: RendererCache + 'static>(mut self, cache: C) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    /// Sets the transport used for templates that are not inline fragments.
    pub fn with_fetcher<F: SourceFetcher + 'static>(mut self, fetcher: F) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Sets the inline fragment lookup.
    pub fn with_fragments<F: FragmentSource + 'static>(mut self, fragments: F) -> Self {
        self.fragments = Some(Arc::new(fragments));
        self
    }

    /// Registers the helpers from [`standard_helpers`].
    pub fn with_standard_helpers(mut self) -> Self {
        let helpers = Arc::make_mut(&mut self.helpers);
        for (name, helper) in standard_helpers() {
            helpers.insert(name.to_string(), helper);
        }
        self
    }

    // ---- configuration ----

    /// Sets one instance setting. Keys starting with `$` store values for
    /// `$`-prefixed `depends` entries.
    pub fn config(&mut self, key: &str, value: impl Into<Data>) -> Result<()> {
        self.settings.set(key, value.into())
    }

    /// Reads one instance setting.
    pub fn config_value(&self, key: &str) -> Option<Data> {
        self.settings.get(key)
    }

    /// The instance settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The grammar in use.
    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Registers a helper callable from template expressions.
    pub fn helper<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&[Data]) -> std::result::Result<Data, HelperError> + Send + Sync + 'static,
    {
        check_name(name)?;
        Arc::make_mut(&mut self.helpers).insert(name.to_string(), Arc::new(f));
        Ok(())
    }

    /// Returns the helper registered as `name`.
    pub fn get_helper(&self, name: &str) -> Option<Helper> {
        self.helpers.get(name).cloned()
    }

    /// Removes a helper. Returns `false` if it was not registered.
    pub fn unhelper(&mut self, name: &str) -> bool {
        Arc::make_mut(&mut self.helpers).remove(name).is_some()
    }

    /// Registers a block helper together with its `name` / `/name` tags.
    pub fn block<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&[Data], &mut BlockContext<'_>) -> std::result::Result<(), HelperError> + Send + Sync + 'static,
    {
        check_name(name)?;
        let [open, close] = block_rules(name)?;
        self.grammar.insert(open);
        self.grammar.insert(close);
        Arc::make_mut(&mut self.blocks).insert(name.to_string(), Arc::new(f));
        Ok(())
    }

    /// Removes a block helper and its tags. Returns `false` if it was not registered.
    pub fn unblock(&mut self, name: &str) -> bool {
        self.grammar.unregister(&format!("{}open", name));
        self.grammar.unregister(&format!("{}close", name));
        Arc::make_mut(&mut self.blocks).remove(name).is_some()
    }

    /// Registers a syntax rule; see [`Grammar::register`].
    pub fn register_syntax(
        &mut self,
        name: &str,
        pattern: &str,
        rewrite: impl Into<Rewrite>,
        repeat: bool,
    ) -> Result<()> {
        self.grammar.register(name, pattern, rewrite, repeat)
    }

    /// Registers a batch of syntax rules; see [`Grammar::register_many`].
    pub fn register_syntax_many<I, R>(&mut self, group: &str, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, R)>,
        R: Into<Rewrite>,
    {
        self.grammar.register_many(group, rules)
    }

    /// Removes a syntax rule or rule group.
    pub fn unregister_syntax(&mut self, name: &str) -> bool {
        self.grammar.unregister(name)
    }

    // ---- listeners ----

    /// Adds an event listener.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&TemplateError) + Send + Sync + 'static,
    {
        self.reporter.on(kind, handler)
    }

    /// Removes an event listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.reporter.off(id)
    }

    /// The listener registry.
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    // ---- cache ----

    /// Drops the renderer cached under `name`.
    pub fn invalidate(&self, name: &str) -> bool {
        self.cache.remove(name)
    }

    /// Drops every cached renderer.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Returns `true` if a renderer is cached under `name`.
    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    // ---- compiling ----

    /// Compiles `source`.
    ///
    /// With [`Options::named`], a renderer already cached under that name is
    /// returned as is (the source is not looked at) unless `override_cache`
    /// is set; otherwise the new renderer is cached under the name.
    pub fn compile(&self, source: &str, options: &Options) -> Renderer {
        let settings = self.settings.merged(options);
        let name = options.name.as_deref();

        if let Some(cached) = name.and_then(|name| self.cached(name, &settings)) {
            tracing::debug!("cache hit for '{}'", name.unwrap_or_default());
            return cached;
        }

        let built = self
            .canonical(source, &settings)
            .and_then(|canonical| self.build_canonical(name, source, &canonical, &settings, None));
        match built {
            Ok(renderer) => {
                if let Some(name) = name {
                    self.store(name, &renderer, &settings);
                }
                renderer
            }
            Err(err) => {
                self.reporter.emit(&err, settings.mode);
                Renderer::noop()
            }
        }
    }

    /// Compiles and renders `source` in one step.
    pub fn render(&self, source: &str, data: &Data, options: &Options) -> String {
        self.compile(source, options).render(data)
    }

    /// Like [`Compiler::render`], passing positional `depends` values.
    pub fn render_with(&self, source: &str, data: &Data, args: &[Data], options: &Options) -> String {
        self.compile(source, options).render_with(data, args)
    }

    /// Locates, resolves and compiles the template `name` and everything it includes.
    ///
    /// Returns `None` when the template or any template it includes could
    /// not be located or compiled; the failures have been reported.
    pub async fn compile_by_name(&self, name: &str, options: &Options) -> Option<Renderer> {
        let settings = self.settings.merged(options);
        if let Some(cached) = self.cached(name, &settings) {
            return Some(cached);
        }

        let source = match self.locate(name).await {
            Ok(source) => source,
            Err(err) => {
                self.reporter.emit(&err, settings.mode);
                return None;
            }
        };

        let discovery = Discovery::default();
        discovery.claim(name);
        self.discover(name.to_string(), source, &settings, &discovery).await;

        let mut resolved: BTreeMap<String, Renderer> = BTreeMap::new();
        let outcome = discovery.into_graph().fan_in(|template, record| {
            let snapshot = Arc::new(resolved.clone());
            let built = self.build_canonical(
                Some(template),
                &record.source,
                &record.canonical,
                &settings,
                Some(snapshot),
            );
            match built {
                Ok(renderer) => {
                    self.store(template, &renderer, &settings);
                    resolved.insert(template.to_string(), renderer);
                    true
                }
                Err(err) => {
                    self.reporter.emit(&err, settings.mode);
                    false
                }
            }
        });

        tracing::debug!(
            "resolved '{}': compiled {:?}, failed {:?}",
            name,
            outcome.compiled,
            outcome.failed
        );
        if !outcome.cyclic.is_empty() {
            let err = TemplateError::Dependency {
                message: format!("circular include among {}", outcome.cyclic.join(", ")),
                names: outcome.cyclic,
            };
            self.reporter.emit(&err, settings.mode);
        }

        resolved.remove(name)
    }

    /// [`Compiler::compile_by_name`], then `callback` once the renderer is ready.
    ///
    /// The callback is not invoked when resolution fails.
    pub async fn compile_by_name_then<F>(&self, name: &str, options: &Options, callback: F) -> Option<Renderer>
    where
        F: FnOnce(&Renderer),
    {
        let renderer = self.compile_by_name(name, options).await?;
        callback(&renderer);
        Some(renderer)
    }

    /// Resolves, compiles and renders the template `name`; `""` on failure.
    pub async fn render_by_name(&self, name: &str, data: &Data, options: &Options) -> String {
        match self.compile_by_name(name, options).await {
            Some(renderer) => renderer.render(data),
            None => String::new(),
        }
    }

    /// [`Compiler::render_by_name`], then `callback` with the output.
    ///
    /// The callback is not invoked when resolution fails.
    pub async fn render_by_name_then<F>(&self, name: &str, data: &Data, options: &Options, callback: F) -> String
    where
        F: FnOnce(&str),
    {
        let Some(renderer) = self.compile_by_name(name, options).await else {
            return String::new();
        };
        let out = renderer.render(data);
        callback(&out);
        out
    }

    // ---- pipeline ----

    fn cached(&self, name: &str, settings: &Settings) -> Option<Renderer> {
        if settings.cache && !settings.override_cache {
            self.cache.get(name)
        } else {
            None
        }
    }

    fn store(&self, name: &str, renderer: &Renderer, settings: &Settings) {
        if settings.cache {
            self.cache.set(name, renderer.clone());
        }
    }

    /// Normalizes `source`, reporting what lenient mode skipped over.
    fn canonical(&self, source: &str, settings: &Settings) -> Result<String> {
        if settings.no_syntax {
            return Ok(source.to_string());
        }
        let normalized = normalize(source, &self.grammar, settings)?;
        for diagnostic in &normalized.diagnostics {
            self.reporter.emit(diagnostic, settings.mode);
        }
        Ok(normalized.code)
    }

    fn build_canonical(
        &self,
        name: Option<&str>,
        source: &str,
        canonical: &str,
        settings: &Settings,
        resolved: Option<Arc<BTreeMap<String, Renderer>>>,
    ) -> Result<Renderer> {
        let tables = NameTables {
            helpers: self.helpers.keys().cloned().collect(),
            blocks: self.blocks.keys().cloned().collect(),
        };
        let program = lower(canonical, &tables, settings);
        tracing::debug!(
            "lowered {:?}: {} declarations, {} instructions",
            name,
            program.declarations.len(),
            program.instructions.len()
        );

        let scope = Scope {
            name: name.map(str::to_string),
            source: source.to_string(),
            lua: self.lua.clone(),
            helpers: self.helpers.clone(),
            blocks: self.blocks.clone(),
            values: settings.values.clone(),
            includes: Some(self.include_lookup(resolved)),
            reporter: self.reporter.clone(),
            mode: settings.mode,
        };
        try_build(&program, &scope, &settings.depends)
    }

    /// Include targets resolve against the renderers compiled in the same
    /// resolution first, then against the cache.
    fn include_lookup(&self, resolved: Option<Arc<BTreeMap<String, Renderer>>>) -> IncludeLookup {
        // Renderers live in the cache, so they must not keep it alive
        let cache = Arc::downgrade(&self.cache);
        Arc::new(move |name: &str| {
            resolved
                .as_ref()
                .and_then(|resolved| resolved.get(name).cloned())
                .or_else(|| cache.upgrade().and_then(|cache| cache.get(name)))
        })
    }

    async fn locate(&self, name: &str) -> Result<String> {
        if let Some(source) = self.fragments.as_ref().and_then(|f| f.find(name)) {
            tracing::debug!("'{}' found as inline fragment", name);
            return Ok(source);
        }
        let Some(fetcher) = &self.fetcher else {
            return Err(TemplateError::MissingTemplate {
                name: name.to_string(),
            });
        };
        tracing::debug!("fetching '{}'", name);
        fetcher.fetch(name).await.map_err(|err| match err {
            FetchError::NotFound => TemplateError::MissingTemplate {
                name: name.to_string(),
            },
            FetchError::Status(status) => TemplateError::Transport {
                name: name.to_string(),
                status,
            },
        })
    }

    fn discover<'a>(
        &'a self,
        name: String,
        source: String,
        settings: &'a Settings,
        discovery: &'a Discovery,
    ) -> BoxFuture<'a, ()> {
        async move {
            let canonical = match self.canonical(&source, settings) {
                Ok(canonical) => canonical,
                Err(err) => {
                    self.reporter.emit(&err, settings.mode);
                    discovery.update(|graph| graph.mark_failed(&name));
                    return;
                }
            };

            let children = scan_includes(&canonical);
            let mut pending = Vec::new();
            for child in &children {
                if settings.cache && self.cache.contains_key(child) {
                    discovery.update(|graph| graph.mark_ready(child));
                } else if discovery.claim(child) {
                    pending.push(self.resolve_child(child.clone(), settings, discovery));
                }
            }
            tracing::debug!("'{}' includes {:?}", name, children);

            discovery.update(|graph| {
                graph.insert(
                    &name,
                    DependencyRecord {
                        source,
                        canonical,
                        children,
                    },
                )
            });
            join_all(pending).await;
        }
        .boxed()
    }

    fn resolve_child<'a>(
        &'a self,
        name: String,
        settings: &'a Settings,
        discovery: &'a Discovery,
    ) -> BoxFuture<'a, ()> {
        async move {
            match self.locate(&name).await {
                Ok(source) => self.discover(name, source, settings, discovery).await,
                Err(err) => {
                    self.reporter.emit(&err, settings.mode);
                    discovery.update(|graph| graph.mark_failed(&name));
                }
            }
        }
        .boxed()
    }
}

/// Helper and block names must be plain identifiers outside the reserved set.
fn check_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid || is_reserved(name) {
        return Err(TemplateError::Config(format!(
            "'{}' cannot be used as a helper name",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Mode;

    fn quiet() -> Compiler {
        let mut compiler = Compiler::default();
        compiler.config("mode", "unit").unwrap();
        compiler
    }

    #[test]
    fn test_config_round_trip() {
        let mut compiler = quiet();
        compiler.config("compress", true).unwrap();
        compiler.config("$site", "Docs").unwrap();
        assert_eq!(compiler.config_value("compress"), Some(Data::Bool(true)));
        assert_eq!(compiler.config_value("$site"), Some(Data::from("Docs")));
        assert_eq!(compiler.settings().mode, Mode::Unit);
        assert!(compiler.config("strict", "yes").is_err());
        assert!(compiler.config("no_such_key", true).is_err());
    }

    #[test]
    fn test_rejected_config_keeps_working_delimiters() {
        let mut compiler = quiet();
        assert!(compiler.config("close_tag", "{{").is_err());
        assert_eq!(compiler.config_value("close_tag"), Some(Data::from("}}")));
        assert_eq!(compiler.render("{{= \"ok\"}}", &Data::Null, &Options::new()), "ok");
    }

    #[test]
    fn test_helper_names_are_checked() {
        let mut compiler = quiet();
        assert!(compiler.helper("shout", |_| Ok(Data::Null)).is_ok());
        assert!(compiler.helper("end", |_| Ok(Data::Null)).is_err());
        assert!(compiler.helper("__include", |_| Ok(Data::Null)).is_err());
        assert!(compiler.helper("two words", |_| Ok(Data::Null)).is_err());
        assert!(compiler.get_helper("shout").is_some());
        assert!(compiler.unhelper("shout"));
        assert!(!compiler.unhelper("shout"));
    }

    #[test]
    fn test_block_installs_and_removes_its_rules() {
        let mut compiler = quiet();
        compiler.block("card", |_, ctx| {
            let body = ctx.body()?;
            ctx.append(&body);
            Ok(())
        })
        .unwrap();
        assert!(compiler.grammar().contains("cardopen"));
        assert!(compiler.grammar().contains("cardclose"));

        assert!(compiler.unblock("card"));
        assert!(!compiler.grammar().contains("cardopen"));
        assert!(!compiler.grammar().contains("cardclose"));
        assert!(!compiler.unblock("card"));
    }

    #[test]
    fn test_renderers_keep_their_snapshot() {
        let mut compiler = quiet();
        compiler.helper("greet", |_| Ok(Data::from("hi"))).unwrap();
        let before = compiler.compile("{{greet()}}", &Options::new());

        compiler.helper("greet", |_| Ok(Data::from("hello"))).unwrap();
        let after = compiler.compile("{{greet()}}", &Options::new());

        assert_eq!(before.render(&Data::Null), "hi");
        assert_eq!(after.render(&Data::Null), "hello");
    }
}
