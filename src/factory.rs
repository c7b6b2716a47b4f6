//! Constructor surface consumed by the parser, one entry per opcode
//! variant, plus the template-inheritance rewrite performed when an
//! `Extend` code is built.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::code::{Code, EofCode, ExtendCode, PartialCode, SectionCode, ValueCode, WriteCode};
use crate::error::CompileError;
use crate::template::PartialResolver;

/// Builds codes for one template compilation. Captures the diagnostic file
/// name stamped into every section; `debug` additionally enforces override
/// exhaustiveness on extends.
pub struct CodeFactory<'a> {
    resolver: &'a dyn PartialResolver,
    file: String,
    debug: bool,
}

impl<'a> CodeFactory<'a> {
    pub fn new(resolver: &'a dyn PartialResolver, file: impl Into<String>) -> Self {
        Self {
            resolver,
            file: file.into(),
            debug: false,
        }
    }

    /// Enables construction-time rejection of overrides that match no named
    /// section in the parent template.
    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    pub fn write(&self, text: impl Into<String>, line: u32) -> Code {
        Code::Write(WriteCode {
            text: text.into(),
            line,
        })
    }

    pub fn value(&self, name: impl Into<String>, encoded: bool, line: u32) -> Code {
        Code::Value(ValueCode {
            name: name.into(),
            encoded,
            line,
        })
    }

    pub fn iterable(&self, name: impl Into<String>, children: Vec<Code>, line: u32) -> Code {
        Code::Iterable(self.section(name, children, line))
    }

    pub fn if_iterable(&self, name: impl Into<String>, children: Vec<Code>, line: u32) -> Code {
        Code::IfIterable(self.section(name, children, line))
    }

    pub fn inverted(&self, name: impl Into<String>, children: Vec<Code>, line: u32) -> Code {
        Code::Inverted(self.section(name, children, line))
    }

    pub fn function(&self, name: impl Into<String>, children: Vec<Code>, line: u32) -> Code {
        Code::Function(self.section(name, children, line))
    }

    pub fn name(&self, name: impl Into<String>, children: Vec<Code>, line: u32) -> Code {
        Code::Name(self.section(name, children, line))
    }

    pub fn eof(&self, line: u32) -> Code {
        Code::Eof(EofCode { line })
    }

    /// `{{>name}}`: resolves the referent eagerly; an unresolvable name is
    /// a construction-time error.
    pub fn partial(&self, name: impl Into<String>, line: u32) -> Result<Code, CompileError> {
        let name = name.into();
        let template = self.resolve(&name, line)?;
        Ok(Code::Partial(PartialCode {
            name,
            template,
            file: self.file.clone(),
            line,
        }))
    }

    /// `{{<name}}…{{/name}}`: collects `Name` children as overrides
    /// (literal text between them is ignored, anything else is an error),
    /// resolves the parent template, and rewrites a copy of the parent's
    /// compiled array with the overrides substituted at any depth.
    pub fn extend(
        &self,
        name: impl Into<String>,
        children: Vec<Code>,
        line: u32,
    ) -> Result<Code, CompileError> {
        let name = name.into();
        let mut overrides: HashMap<String, SectionCode> = HashMap::new();
        for child in &children {
            match child {
                Code::Name(section) => {
                    overrides.insert(section.name.clone(), section.clone());
                }
                Code::Write(_) => {}
                _ => {
                    return Err(CompileError::IllegalExtendChild {
                        name,
                        file: self.file.clone(),
                        line,
                    });
                }
            }
        }

        let parent = self.resolve(&name, line)?;
        let mut codes = parent.compiled().to_vec();
        let mut matched = HashSet::new();
        replace_named_sections(&mut codes, &overrides, &mut matched);

        if self.debug {
            let mut unmatched: Vec<String> = overrides
                .keys()
                .filter(|key| !matched.contains(key.as_str()))
                .cloned()
                .collect();
            if !unmatched.is_empty() {
                unmatched.sort();
                return Err(CompileError::UnusedOverrides {
                    keys: unmatched,
                    file: self.file.clone(),
                    line,
                });
            }
        }

        Ok(Code::Extend(ExtendCode {
            name,
            codes,
            file: self.file.clone(),
            line,
        }))
    }

    fn resolve(
        &self,
        name: &str,
        line: u32,
    ) -> Result<Rc<crate::template::Template>, CompileError> {
        self.resolver
            .resolve(name)
            .ok_or_else(|| CompileError::PartialNotFound {
                name: name.to_string(),
                file: self.file.clone(),
                line,
            })
    }

    fn section(&self, name: impl Into<String>, children: Vec<Code>, line: u32) -> SectionCode {
        SectionCode {
            name: name.into(),
            children: Rc::new(children),
            file: self.file.clone(),
            line,
        }
    }
}

/// Walks the copied parent array, substituting matching `Name` slots and
/// descending into the children of everything else. Copy-on-write on the
/// shared child arrays keeps the parent template's own codes untouched.
fn replace_named_sections(
    codes: &mut [Code],
    overrides: &HashMap<String, SectionCode>,
    matched: &mut HashSet<String>,
) {
    for slot in codes.iter_mut() {
        match slot {
            Code::Name(section) => {
                if let Some(replacement) = overrides.get(&section.name) {
                    matched.insert(section.name.clone());
                    *slot = Code::Name(replacement.clone());
                } else {
                    let children = Rc::make_mut(&mut section.children);
                    replace_named_sections(children, overrides, matched);
                }
            }
            Code::Iterable(section)
            | Code::IfIterable(section)
            | Code::Inverted(section)
            | Code::Function(section) => {
                let children = Rc::make_mut(&mut section.children);
                replace_named_sections(children, overrides, matched);
            }
            Code::Extend(extend) => {
                replace_named_sections(&mut extend.codes, overrides, matched);
            }
            Code::Write(_) | Code::Value(_) | Code::Partial(_) | Code::Eof(_) => {}
        }
    }
}
