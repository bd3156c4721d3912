// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Render building and execution.
//!
//! [`build`] turns a lowered [`Program`] into a [`Renderer`]. The flat
//! instruction sequence is folded into a tree of nodes, checking that every
//! `Enter` has its matching `Exit`, and each Lua fragment is compiled once into
//! a function of `_ENV`. Rendering walks the tree against a fresh environment
//! table holding the declared bindings.
//!
//! # Failure Handling
//!
//! - A program that cannot be built is reported as [`TemplateError::Build`]
//!   and replaced by a no-op renderer.
//! - A fragment that fails while rendering is reported as
//!   [`TemplateError::Runtime`] and the render returns `""`.

use crate::bridge::{data_to_lua, is_truthy, key_text, helper_to_lua, list_len, lua_text, lua_to_data};
use crate::data::{Data, Helper};
use crate::error::{HelperError, RenderFault, Result, SourceContext, TemplateError};
use crate::events::Reporter;
use crate::program::{Binding, BlockKind, EchoMode, Instruction, Program};
use crate::settings::Mode;
use lazy_static::lazy_static;
use mlua::{Function, Lua, MultiValue, Table, Value};
use regex::Regex;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref CHUNK_POSITION: Regex = Regex::new(r"^fragment:\d+:\s*").unwrap();
}

/// Chunk name given to every compiled fragment.
const CHUNK_NAME: &str = "=fragment";

/// Nested includes deeper than this fail instead of overflowing the stack.
pub const MAX_INCLUDE_DEPTH: usize = 64;

thread_local! {
    static INCLUDE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A block helper.
///
/// Receives the evaluated arguments of the opening tag and a [`BlockContext`]
/// through which it renders the body and appends output.
pub type BlockHelper =
    Arc<dyn Fn(&[Data], &mut BlockContext<'_>) -> std::result::Result<(), HelperError> + Send + Sync>;

/// Looks up the renderer of an included template by name.
pub type IncludeLookup = Arc<dyn Fn(&str) -> Option<Renderer> + Send + Sync>;

/// Everything a renderer is bound to besides its program.
#[derive(Clone)]
pub struct Scope {
    /// Template name, when compiled by name.
    pub name: Option<String>,
    /// The raw template source, for error windows.
    pub source: String,
    /// The Lua state fragments are compiled into.
    pub lua: Arc<Lua>,
    /// Helper table snapshot.
    pub helpers: Arc<BTreeMap<String, Helper>>,
    /// Block-helper table snapshot.
    pub blocks: Arc<BTreeMap<String, BlockHelper>>,
    /// Settings values that `$`-prefixed dependencies bind from, keyed with the `$`.
    pub values: BTreeMap<String, Data>,
    /// Resolves `__include` targets.
    pub includes: Option<IncludeLookup>,
    /// Where failures are reported.
    pub reporter: Reporter,
    /// Environment mode at build time.
    pub mode: Mode,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("helpers", &self.helpers.keys().collect::<Vec<_>>())
            .field("blocks", &self.blocks.keys().collect::<Vec<_>>())
            .field("mode", &self.mode)
            .finish()
    }
}

/// Builds a renderer, reporting failures and substituting a no-op renderer.
pub fn build(program: &Program, scope: &Scope, depends: &[String]) -> Renderer {
    match try_build(program, scope, depends) {
        Ok(renderer) => renderer,
        Err(err) => {
            scope.reporter.emit(&err, scope.mode);
            Renderer::noop()
        }
    }
}

/// Builds a renderer, returning the build error instead of reporting it.
pub fn try_build(program: &Program, scope: &Scope, depends: &[String]) -> Result<Renderer> {
    let listing = program.to_string();
    let lua = scope.lua.as_ref();
    let fail = |message: String| TemplateError::Build {
        message,
        program: listing.clone(),
    };

    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Open> = Vec::new();

    for (index, instruction) in program.instructions.iter().enumerate() {
        let at = Step {
            line: instruction.line().unwrap_or(0),
            index,
        };
        let node = match instruction {
            Instruction::Append(text) => Node::Text(text.clone()),
            Instruction::Echo { expr, mode, line } => Node::Echo {
                at,
                chunk: compile_fragment(lua, expr, Shape::Expression, *line).map_err(&fail)?,
                escape: *mode == EchoMode::Escape,
            },
            Instruction::Exec { code, line } => Node::Exec {
                at,
                chunk: compile_fragment(lua, code, Shape::Statement, *line).map_err(&fail)?,
            },
            Instruction::Enter { kind, line } => {
                let kind = match kind {
                    BlockKind::If(cond) => OpenKind::If {
                        branches: Vec::new(),
                        cond: Some(compile_fragment(lua, cond, Shape::Expression, *line).map_err(&fail)?),
                        else_seen: false,
                    },
                    BlockKind::Each { source, value, key } => OpenKind::Each {
                        source: compile_fragment(lua, source, Shape::Expression, *line).map_err(&fail)?,
                        value: value.clone(),
                        key: key.clone(),
                    },
                    BlockKind::Helper { name, args } => OpenKind::Block {
                        name: name.clone(),
                        args: if args.is_empty() {
                            None
                        } else {
                            Some(compile_fragment(lua, args, Shape::Arguments, *line).map_err(&fail)?)
                        },
                    },
                };
                stack.push(Open {
                    kind,
                    at,
                    body: Vec::new(),
                });
                continue;
            }
            Instruction::Branch { cond, line } => {
                let Some(open) = stack.last_mut() else {
                    return Err(fail(format!("line {}: branch outside of an if block", line)));
                };
                let enclosing = open.kind.closing_tag().to_string();
                let OpenKind::If { branches, cond: current, else_seen } = &mut open.kind else {
                    return Err(fail(format!(
                        "line {}: branch inside '{}' block opened at line {}",
                        line, enclosing, open.at.line
                    )));
                };
                if *else_seen {
                    return Err(fail(format!("line {}: branch after else", line)));
                }
                branches.push(Branch {
                    at: open.at,
                    cond: current.take(),
                    body: std::mem::take(&mut open.body),
                });
                *current = match cond {
                    Some(cond) => Some(compile_fragment(lua, cond, Shape::Expression, *line).map_err(&fail)?),
                    None => {
                        *else_seen = true;
                        None
                    }
                };
                open.at = at;
                continue;
            }
            Instruction::Exit { tag, line } => {
                let Some(open) = stack.pop() else {
                    return Err(fail(format!("line {}: '/{}' without an open block", line, tag)));
                };
                if open.kind.closing_tag() != tag {
                    return Err(fail(format!(
                        "line {}: '/{}' does not close '{}' opened at line {}",
                        line,
                        tag,
                        open.kind.closing_tag(),
                        open.at.line
                    )));
                }
                open.close()
            }
        };

        match stack.last_mut() {
            Some(open) => open.body.push(node),
            None => root.push(node),
        }
    }

    if let Some(open) = stack.last() {
        return Err(fail(format!(
            "'{}' block opened at line {} is never closed",
            open.kind.closing_tag(),
            open.at.line
        )));
    }

    let mut helpers = Vec::new();
    for name in program.names(Binding::Helper) {
        if let Some(helper) = scope.helpers.get(name) {
            let function = helper_to_lua(lua, helper.clone())
                .map_err(|e| fail(format!("cannot bind helper '{}': {}", name, lua_message(&e))))?;
            helpers.push((name.to_string(), function));
        }
    }

    let dependencies = depends
        .iter()
        .filter_map(|entry| {
            let name = entry.trim_start_matches('$');
            if name.is_empty() {
                return None;
            }
            let preset = if entry.starts_with('$') {
                scope.values.get(entry.as_str()).cloned()
            } else {
                None
            };
            Some((name.to_string(), preset))
        })
        .collect();

    tracing::debug!(
        "built renderer {:?}: {} instructions, {} declarations",
        scope.name,
        program.instructions.len(),
        program.declarations.len()
    );

    Ok(Renderer {
        inner: Some(Arc::new(RendererInner {
            name: scope.name.clone(),
            source: scope.source.clone(),
            listing,
            declarations: program.declarations.len(),
            nodes: root,
            lua: scope.lua.clone(),
            helpers,
            blocks: scope.blocks.clone(),
            variables: program.names(Binding::Variable).map(str::to_string).collect(),
            dependencies,
            includes: scope.includes.clone(),
            reporter: scope.reporter.clone(),
            mode: scope.mode,
        })),
    })
}

/// Escapes the five HTML-special characters as named entities.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Message text of a Lua error without chunk position noise.
pub(crate) fn lua_message(err: &mlua::Error) -> String {
    let message = match err {
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => return lua_message(cause),
        other => other.to_string(),
    };
    CHUNK_POSITION.replace(&message, "").into_owned()
}

#[derive(Clone, Copy)]
enum Shape {
    Expression,
    Statement,
    Arguments,
}

fn compile_fragment(lua: &Lua, code: &str, shape: Shape, line: usize) -> std::result::Result<Function, String> {
    let chunk = match shape {
        Shape::Expression => format!("return function(_ENV) return (\n{}\n) end", code),
        Shape::Statement => format!("return function(_ENV)\n{}\nend", code),
        Shape::Arguments => format!("return function(_ENV) return \n{}\nend", code),
    };
    lua.load(chunk)
        .set_name(CHUNK_NAME)
        .eval::<Function>()
        .map_err(|e| format!("line {}: cannot compile '{}': {}", line, code, lua_message(&e)))
}

#[derive(Debug, Clone, Copy)]
struct Step {
    line: usize,
    index: usize,
}

enum Node {
    Text(String),
    Echo {
        at: Step,
        chunk: Function,
        escape: bool,
    },
    Exec {
        at: Step,
        chunk: Function,
    },
    If {
        branches: Vec<Branch>,
    },
    Each {
        at: Step,
        source: Function,
        value: String,
        key: Option<String>,
        body: Vec<Node>,
    },
    Block {
        at: Step,
        name: String,
        args: Option<Function>,
        body: Vec<Node>,
    },
}

struct Branch {
    at: Step,
    cond: Option<Function>,
    body: Vec<Node>,
}

struct Open {
    kind: OpenKind,
    at: Step,
    body: Vec<Node>,
}

enum OpenKind {
    If {
        branches: Vec<Branch>,
        cond: Option<Function>,
        else_seen: bool,
    },
    Each {
        source: Function,
        value: String,
        key: Option<String>,
    },
    Block {
        name: String,
        args: Option<Function>,
    },
}

impl OpenKind {
    fn closing_tag(&self) -> &str {
        match self {
            OpenKind::If { .. } => "if",
            OpenKind::Each { .. } => "each",
            OpenKind::Block { name, .. } => name,
        }
    }
}

impl Open {
    fn close(self) -> Node {
        match self.kind {
            OpenKind::If { mut branches, cond, .. } => {
                branches.push(Branch {
                    at: self.at,
                    cond,
                    body: self.body,
                });
                Node::If { branches }
            }
            OpenKind::Each { source, value, key } => Node::Each {
                at: self.at,
                source,
                value,
                key,
                body: self.body,
            },
            OpenKind::Block { name, args } => Node::Block {
                at: self.at,
                name,
                args,
                body: self.body,
            },
        }
    }
}

struct RendererInner {
    name: Option<String>,
    source: String,
    listing: String,
    declarations: usize,
    nodes: Vec<Node>,
    lua: Arc<Lua>,
    helpers: Vec<(String, Function)>,
    blocks: Arc<BTreeMap<String, BlockHelper>>,
    variables: Vec<String>,
    dependencies: Vec<(String, Option<Data>)>,
    includes: Option<IncludeLookup>,
    reporter: Reporter,
    mode: Mode,
}

/// A compiled template.
///
/// Cheap to clone; clones share the compiled program. Rendering never
/// panics and never returns an error: failures go to the error listeners and
/// the render yields `""`.
#[derive(Clone)]
pub struct Renderer {
    inner: Option<Arc<RendererInner>>,
}

impl Renderer {
    /// A renderer that always returns the empty string.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Returns `true` for the no-op renderer substituted after a failure.
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// The template name, if compiled by name.
    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().and_then(|i| i.name.as_deref())
    }

    /// Numbered listing of the lowered program.
    pub fn listing(&self) -> &str {
        self.inner.as_ref().map(|i| i.listing.as_str()).unwrap_or("")
    }

    /// Renders with `data`.
    pub fn render(&self, data: &Data) -> String {
        self.render_with(data, &[])
    }

    /// Renders with `data` followed by positional `depends` values.
    pub fn render_with(&self, data: &Data, args: &[Data]) -> String {
        let Some(inner) = &self.inner else {
            return String::new();
        };
        match inner.run(data, args) {
            Ok(out) => out,
            Err(fault) => {
                let err = inner.runtime_error(fault, data, args);
                inner.reporter.emit(&err, inner.mode);
                String::new()
            }
        }
    }

    /// Renders, returning the runtime error instead of reporting it.
    pub(crate) fn try_render_with(&self, data: &Data, args: &[Data]) -> Result<String> {
        let Some(inner) = &self.inner else {
            return Ok(String::new());
        };
        inner.run(data, args).map_err(|fault| inner.runtime_error(fault, data, args))
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Renderer")
                .field("name", &inner.name)
                .field("nodes", &inner.nodes.len())
                .finish(),
            None => f.write_str("Renderer(noop)"),
        }
    }
}

impl RendererInner {
    fn run(&self, data: &Data, args: &[Data]) -> std::result::Result<String, RenderFault> {
        let env = self.environment(data, args).map_err(|e| RenderFault {
            message: lua_message(&e),
            line: 1,
            instruction: 0,
        })?;
        let run = Run { inner: self, env };
        let mut out = String::new();
        run.exec(&self.nodes, &mut out)?;
        Ok(out)
    }

    fn environment(&self, data: &Data, args: &[Data]) -> mlua::Result<Table> {
        let lua = self.lua.as_ref();
        let globals = lua.globals();
        let env = lua.create_table()?;
        let meta = lua.create_table()?;
        meta.raw_set("__index", globals.clone())?;
        let setmetatable: Function = globals.get("setmetatable")?;
        let _: () = setmetatable.call((env.clone(), meta))?;

        for (name, function) in &self.helpers {
            env.raw_set(name.as_str(), function.clone())?;
        }
        for name in &self.variables {
            if let Some(value) = data.get(name) {
                env.raw_set(name.as_str(), data_to_lua(lua, value)?)?;
            }
        }
        for (i, (name, preset)) in self.dependencies.iter().enumerate() {
            if let Some(value) = args.get(i).or(preset.as_ref()) {
                env.raw_set(name.as_str(), data_to_lua(lua, value)?)?;
            }
        }
        env.raw_set("__data", data_to_lua(lua, data)?)?;
        if let Some(includes) = &self.includes {
            env.raw_set("__include", self.include_function(includes.clone(), data.clone())?)?;
        }
        Ok(env)
    }

    fn include_function(&self, includes: IncludeLookup, data: Data) -> mlua::Result<Function> {
        let reporter = self.reporter.clone();
        let mode = self.mode;
        self.lua
            .create_function(move |_, (name, value): (String, Option<Value>)| {
                let data = match &value {
                    Some(value) => lua_to_data(value),
                    None => data.clone(),
                };
                let Some(renderer) = includes(&name) else {
                    reporter.emit(&TemplateError::MissingTemplate { name }, mode);
                    return Ok(String::new());
                };

                let depth = INCLUDE_DEPTH.with(Cell::get);
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(mlua::Error::runtime(format!(
                        "includes nested deeper than {} levels at '{}'",
                        MAX_INCLUDE_DEPTH, name
                    )));
                }
                INCLUDE_DEPTH.with(|d| d.set(depth + 1));
                let out = renderer.render(&data);
                INCLUDE_DEPTH.with(|d| d.set(depth));
                Ok(out)
            })
    }

    fn runtime_error(&self, fault: RenderFault, data: &Data, args: &[Data]) -> TemplateError {
        let mut arguments = vec![data.clone()];
        arguments.extend(args.iter().cloned());
        TemplateError::Runtime {
            message: fault.message,
            line: fault.line,
            source_context: SourceContext::around(&self.source, fault.line),
            program_context: SourceContext::around(
                &self.listing,
                self.declarations + fault.instruction + 1,
            ),
            arguments: serde_json::to_string(&arguments).unwrap_or_default(),
        }
    }
}

/// One render in progress.
struct Run<'r> {
    inner: &'r RendererInner,
    env: Table,
}

type Outcome<T> = std::result::Result<T, RenderFault>;

impl<'r> Run<'r> {
    fn fault(&self, message: impl Into<String>, at: Step) -> RenderFault {
        RenderFault {
            message: message.into(),
            line: at.line,
            instruction: at.index,
        }
    }

    fn lua_fault(&self, err: mlua::Error, at: Step) -> RenderFault {
        self.fault(lua_message(&err), at)
    }

    fn exec(&self, nodes: &[Node], out: &mut String) -> Outcome<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Echo { at, chunk, escape } => {
                    let value: Value = chunk.call(self.env.clone()).map_err(|e| self.lua_fault(e, *at))?;
                    let text = lua_text(&value);
                    if *escape {
                        out.push_str(&escape_html(&text));
                    } else {
                        out.push_str(&text);
                    }
                }
                Node::Exec { at, chunk } => {
                    let _: () = chunk.call(self.env.clone()).map_err(|e| self.lua_fault(e, *at))?;
                }
                Node::If { branches } => {
                    for branch in branches {
                        let taken = match &branch.cond {
                            Some(cond) => {
                                let value: Value =
                                    cond.call(self.env.clone()).map_err(|e| self.lua_fault(e, branch.at))?;
                                is_truthy(&value)
                            }
                            None => true,
                        };
                        if taken {
                            self.exec(&branch.body, out)?;
                            break;
                        }
                    }
                }
                Node::Each {
                    at,
                    source,
                    value,
                    key,
                    body,
                } => self.each(*at, source, value, key.as_deref(), body, out)?,
                Node::Block { at, name, args, body } => self.block(*at, name, args.as_ref(), body, out)?,
            }
        }
        Ok(())
    }

    fn each(
        &self,
        at: Step,
        source: &Function,
        value: &str,
        key: Option<&str>,
        body: &[Node],
        out: &mut String,
    ) -> Outcome<()> {
        let lua_err = |e: mlua::Error| self.lua_fault(e, at);
        let collection: Value = source.call(self.env.clone()).map_err(lua_err)?;

        let entries: Vec<(Value, Value)> = match collection {
            Value::Nil => Vec::new(),
            Value::Table(table) => {
                let len = list_len(&table);
                if len > 0 {
                    let mut entries = Vec::with_capacity(len);
                    for i in 1..=len {
                        let item: Value = table.raw_get(i).map_err(lua_err)?;
                        entries.push((Value::Integer(i as i64 - 1), item));
                    }
                    entries
                } else {
                    let mut entries: Vec<(Value, Value)> = table
                        .pairs::<Value, Value>()
                        .collect::<mlua::Result<_>>()
                        .map_err(lua_err)?;
                    entries.sort_by_key(|(k, _)| key_text(k).unwrap_or_default());
                    entries
                }
            }
            other => {
                return Err(self.fault(format!("cannot iterate over a {} value", other.type_name()), at));
            }
        };

        let saved_value: Value = self.env.raw_get(value).map_err(lua_err)?;
        let saved_key: Option<Value> = match key {
            Some(key) => Some(self.env.raw_get(key).map_err(lua_err)?),
            None => None,
        };

        for (index, item) in entries {
            self.env.raw_set(value, item).map_err(lua_err)?;
            if let Some(key) = key {
                self.env.raw_set(key, index).map_err(lua_err)?;
            }
            self.exec(body, out)?;
        }

        self.env.raw_set(value, saved_value).map_err(lua_err)?;
        if let (Some(key), Some(saved)) = (key, saved_key) {
            self.env.raw_set(key, saved).map_err(lua_err)?;
        }
        Ok(())
    }

    fn block(&self, at: Step, name: &str, args: Option<&Function>, body: &[Node], out: &mut String) -> Outcome<()> {
        let Some(helper) = self.inner.blocks.get(name).cloned() else {
            return Err(self.fault(format!("unknown block helper '{}'", name), at));
        };
        let args: Vec<Data> = match args {
            Some(args) => {
                let values: MultiValue = args.call(self.env.clone()).map_err(|e| self.lua_fault(e, at))?;
                values.iter().map(lua_to_data).collect()
            }
            None => Vec::new(),
        };

        let mut context = BlockContext {
            run: self,
            body,
            out: String::new(),
        };
        match helper(&args, &mut context) {
            Ok(()) => {
                out.push_str(&context.out);
                Ok(())
            }
            Err(HelperError::Body(fault)) => Err(*fault),
            Err(HelperError::Failed(message)) => {
                Err(self.fault(format!("block helper '{}' failed: {}", name, message), at))
            }
        }
    }
}

/// What a block helper sees while it runs.
///
/// Output appended here replaces the block in the rendered text. The body can
/// be rendered any number of times, for example once per item with
/// [`BlockContext::set`] binding the current item first.
pub struct BlockContext<'a> {
    run: &'a Run<'a>,
    body: &'a [Node],
    out: String,
}

impl<'a> BlockContext<'a> {
    /// Appends text to the block output.
    pub fn append(&mut self, text: &str) {
        self.out.push_str(text);
    }

    /// Output appended so far.
    pub fn output(&self) -> &str {
        &self.out
    }

    /// Renders the block body with the current bindings.
    ///
    /// A failure inside the body keeps its own location; return it from the
    /// helper unchanged to have it reported there.
    pub fn body(&self) -> std::result::Result<String, HelperError> {
        let mut out = String::new();
        self.run
            .exec(self.body, &mut out)
            .map_err(|fault| HelperError::Body(Box::new(fault)))?;
        Ok(out)
    }

    /// Binds `name` for the rest of the render.
    pub fn set(&mut self, name: &str, value: Data) -> std::result::Result<(), HelperError> {
        let lua = self.run.inner.lua.as_ref();
        let value = data_to_lua(lua, &value).map_err(|e| HelperError::failed(lua_message(&e)))?;
        self.run
            .env
            .raw_set(name, value)
            .map_err(|e| HelperError::failed(lua_message(&e)))
    }

    /// Current value of `name`, falling back to Lua globals.
    pub fn get(&self, name: &str) -> Data {
        let value: mlua::Result<Value> = self.run.env.get(name);
        value.map(|v| lua_to_data(&v)).unwrap_or_default()
    }
}
