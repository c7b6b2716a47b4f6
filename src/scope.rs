//! Data contexts consumed and produced by the interpreters.
//!
//! A `Scope` is a nested key/value mapping with an optional parent chain:
//! section iteration pushes child scopes whose lookups fall back to the
//! enclosing scope. Forward execution only reads scopes; the inverse
//! interpreter builds them back up through the same dotted-name store that
//! lookups descend.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A single template data value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    Scope(Scope),
    List(Vec<Scope>),
    Lambda(Lambda),
    Null,
}

impl Value {
    /// Text emitted when the value is written through a `{{name}}` tag.
    /// Null and structural values render empty.
    pub fn to_output(&self) -> String {
        match self {
            Value::String(text) => text.clone(),
            Value::Number(number) => format_number(*number),
            Value::Bool(flag) => flag.to_string(),
            Value::Scope(_) | Value::List(_) | Value::Lambda(_) | Value::Null => String::new(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::String(text) => !text.is_empty(),
            Value::Number(number) => *number != 0.0,
            Value::Bool(flag) => *flag,
            Value::Scope(_) | Value::Lambda(_) => true,
            Value::List(items) => !items.is_empty(),
            Value::Null => false,
        }
    }
}

fn format_number(number: f64) -> String {
    if number.is_finite() && number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<f64> for Value {
    fn from(number: f64) -> Self {
        Value::Number(number)
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

impl From<Scope> for Value {
    fn from(scope: Scope) -> Self {
        Value::Scope(scope)
    }
}

impl From<Vec<Scope>> for Value {
    fn from(items: Vec<Scope>) -> Self {
        Value::List(items)
    }
}

impl From<Lambda> for Value {
    fn from(lambda: Lambda) -> Self {
        Value::Lambda(lambda)
    }
}

/// A string-to-string callable bound into a scope for `{{_name}}` sections.
#[derive(Clone)]
pub struct Lambda {
    inner: Rc<LambdaInner>,
}

enum LambdaInner {
    Direct(Box<dyn Fn(&str) -> String>),
    /// Body-text to extracted-output mapping synthesized by the inverse
    /// interpreter so a forward re-render reproduces the source text.
    Recovered(RefCell<BTreeMap<String, String>>),
}

impl Lambda {
    pub fn new(apply: impl Fn(&str) -> String + 'static) -> Self {
        Self {
            inner: Rc::new(LambdaInner::Direct(Box::new(apply))),
        }
    }

    pub(crate) fn recovered() -> Self {
        Self {
            inner: Rc::new(LambdaInner::Recovered(RefCell::new(BTreeMap::new()))),
        }
    }

    pub fn apply(&self, input: &str) -> String {
        match &*self.inner {
            LambdaInner::Direct(apply) => apply(input),
            LambdaInner::Recovered(mappings) => {
                mappings.borrow().get(input).cloned().unwrap_or_default()
            }
        }
    }

    /// Records a body-to-output mapping on a recovered callable. Direct
    /// callables are left untouched.
    pub(crate) fn record(&self, body: String, output: String) {
        if let LambdaInner::Recovered(mappings) = &*self.inner {
            mappings.borrow_mut().insert(body, output);
        }
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            LambdaInner::Direct(_) => f.write_str("Lambda(direct)"),
            LambdaInner::Recovered(mappings) => {
                write!(f, "Lambda(recovered, {} mappings)", mappings.borrow().len())
            }
        }
    }
}

impl PartialEq for Lambda {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Nested key/value data context with an optional parent for lookups.
/// Child scopes shadow parents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    values: BTreeMap<String, Value>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_parent(mut self, parent: Rc<Scope>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Resolves a possibly dotted `name`: the first segment against this
    /// scope and its parent chain, each further segment as a plain map read
    /// on the resolved value treated as a scope. Missing intermediate
    /// levels yield `None`.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut segments = name.split('.');
        let mut current = self.lookup_chain(segments.next()?)?;
        for segment in segments {
            let Value::Scope(nested) = current else {
                return None;
            };
            current = nested.values.get(segment).cloned()?;
        }
        Some(current)
    }

    fn lookup_chain(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.values.get(key) {
            return Some(value.clone());
        }
        self.parent.as_deref()?.lookup_chain(key)
    }

    /// Stores `value` at a possibly dotted `name`, walking/creating
    /// intermediate scopes (`a.b.c` descends through `a`, then `a.b`).
    pub fn set(&mut self, name: &str, value: Value) {
        match name.split_once('.') {
            None => {
                self.values.insert(name.to_string(), value);
            }
            Some((head, rest)) => {
                let slot = self
                    .values
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Scope(Scope::new()));
                if !matches!(slot, Value::Scope(_)) {
                    *slot = Value::Scope(Scope::new());
                }
                if let Value::Scope(nested) = slot {
                    nested.set(rest, value);
                }
            }
        }
    }

    /// Direct single-key read, no dotted descent and no parent fallback.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Moves every binding of `other` into this scope, overwriting clashes.
    pub(crate) fn merge(&mut self, other: Scope) {
        for (key, value) in other.values {
            self.values.insert(key, value);
        }
    }
}
