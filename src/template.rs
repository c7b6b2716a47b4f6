//! Template handles, lookup semantics, and partial resolution.
//!
//! A `Template` owns a compiled code array and exposes the shared entry
//! points: forward rendering, identity-mode rendering, and the top-level
//! inverse pass. The free functions are the semantic queries the opcodes
//! make against a scope: the three section-iteration derivations and
//! formatted value emission.

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::Result;

use crate::code::{Code, RenderMode};
use crate::encode::encode;
use crate::error::RenderError;
use crate::scope::{Scope, Value};
use crate::unexecute::truncate;
use crate::writer::FutureWriter;

/// Compiled template handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    codes: Vec<Code>,
}

impl Template {
    pub fn new(name: impl Into<String>, codes: Vec<Code>) -> Self {
        Self {
            name: name.into(),
            codes,
        }
    }

    /// The name this template resolves under (also its diagnostic file).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compiled code array.
    pub fn compiled(&self) -> &[Code] {
        &self.codes
    }

    /// Executes every code against `mode` into `writer` without flushing.
    pub fn execute(
        &self,
        writer: &mut FutureWriter,
        mode: RenderMode<'_>,
    ) -> std::result::Result<(), RenderError> {
        for code in &self.codes {
            code.execute(writer, mode)?;
        }
        Ok(())
    }

    /// Renders against `scope` into a `String`.
    pub fn render(&self, scope: &Scope) -> Result<String> {
        let mut writer = FutureWriter::new();
        self.execute(&mut writer, RenderMode::Scoped(scope))?;
        Ok(writer.into_string()?)
    }

    /// Renders against `scope`, streaming into an I/O sink.
    pub fn render_to(&self, scope: &Scope, sink: &mut dyn std::io::Write) -> Result<()> {
        let mut writer = FutureWriter::new();
        self.execute(&mut writer, RenderMode::Scoped(scope))?;
        writer.flush_to(sink)?;
        Ok(())
    }

    /// Reproduces the template's own source form.
    pub fn identity(&self) -> Result<String> {
        let mut writer = FutureWriter::new();
        self.execute(&mut writer, RenderMode::Identity)?;
        Ok(writer.into_string()?)
    }

    /// Top-level inverse pass: reconstructs a scope from rendered `text`.
    /// `None` means the text cannot be aligned with this template; the
    /// caller decides whether that is an error.
    pub fn unexecute(&self, text: &str) -> Option<Scope> {
        let mut scope = Scope::new();
        let mut position = 0;
        for (index, code) in self.codes.iter().enumerate() {
            let lookahead = truncate(&self.codes, index + 1, &[]);
            code.unexecute(&mut scope, text, &mut position, &lookahead)?;
        }
        Some(scope)
    }
}

/// Resolves a partial/extension name to a compiled template. `Partial` and
/// `Extend` codes resolve eagerly through this at construction.
pub trait PartialResolver {
    fn resolve(&self, name: &str) -> Option<Rc<Template>>;
}

/// In-memory name-to-template registry.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Rc<Template>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template under its own name, returning the shared handle.
    pub fn insert(&mut self, template: Template) -> Rc<Template> {
        let handle = Rc::new(template);
        self.templates
            .insert(handle.name().to_string(), Rc::clone(&handle));
        handle
    }

    pub fn get(&self, name: &str) -> Option<Rc<Template>> {
        self.templates.get(name).cloned()
    }
}

impl PartialResolver for TemplateRegistry {
    fn resolve(&self, name: &str) -> Option<Rc<Template>> {
        self.get(name)
    }
}

/// `{{#name}}`: the sequence of sub-scopes the section iterates. A list
/// iterates per element with the enclosing scope as lookup parent; a nested
/// scope iterates once; any other truthy value iterates once over the
/// enclosing scope itself; null/falsy/missing iterate zero times.
pub fn iterable(scope: &Scope, name: &str) -> Vec<Scope> {
    match scope.lookup(name) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::List(items)) => {
            let parent = Rc::new(scope.clone());
            items
                .into_iter()
                .map(|item| item.with_parent(Rc::clone(&parent)))
                .collect()
        }
        Some(Value::Scope(nested)) => vec![nested.with_parent(Rc::new(scope.clone()))],
        Some(other) => {
            if other.is_truthy() {
                vec![scope.clone()]
            } else {
                Vec::new()
            }
        }
    }
}

/// `{{?name}}`: once-through when the binding is truthy, with the sub-scope
/// derived the same way `iterable` derives it.
pub fn if_iterable(scope: &Scope, name: &str) -> Vec<Scope> {
    let mut scopes = iterable(scope, name);
    scopes.truncate(1);
    scopes
}

/// `{{^name}}`: once-through when the binding is falsy, empty, or absent.
pub fn inverted(scope: &Scope, name: &str) -> Vec<Scope> {
    match scope.lookup(name) {
        Some(value) if value.is_truthy() => Vec::new(),
        _ => vec![scope.clone()],
    }
}

/// Formatted value emission for `{{name}}`; a missing lookup renders empty.
pub fn write_value(writer: &mut FutureWriter, scope: &Scope, name: &str, encoded: bool) {
    let Some(value) = scope.lookup(name) else {
        return;
    };
    let output = value.to_output();
    if output.is_empty() {
        return;
    }
    if encoded {
        writer.write(&encode(&output));
    } else {
        writer.write(&output);
    }
}
