//! Compiled template opcodes and the forward interpreter.
//!
//! Each variant carries the diagnostic line captured at construction and
//! implements the forward-facing operations: `execute` renders against a
//! scope through a `FutureWriter`, `identity` reproduces the template's own
//! source form. The inverse interpreter lives in `unexecute`.

use std::rc::Rc;

use crate::error::RenderError;
use crate::scope::{Scope, Value};
use crate::template::{self, Template};
use crate::writer::FutureWriter;

/// Rendering mode threaded through `execute`: evaluate against a scope, or
/// emit the template's own source form for introspection.
#[derive(Debug, Clone, Copy)]
pub enum RenderMode<'a> {
    Scoped(&'a Scope),
    Identity,
}

/// Compiled template opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    Write(WriteCode),
    Value(ValueCode),
    Iterable(SectionCode),
    IfIterable(SectionCode),
    Inverted(SectionCode),
    Function(SectionCode),
    Name(SectionCode),
    Partial(PartialCode),
    Extend(ExtendCode),
    Eof(EofCode),
}

/// Literal text run between tags.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCode {
    pub(crate) text: String,
    pub(crate) line: u32,
}

/// `{{name}}` / `{{{name}}}` value emission; `encoded` controls escaping.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueCode {
    pub(crate) name: String,
    pub(crate) encoded: bool,
    pub(crate) line: u32,
}

/// Shared payload of the section variants; each section owns its child
/// codes exclusively. Children sit behind `Rc` so deferred section
/// computations can share them with the enqueueing writer and so the
/// inheritance rewrite can copy-on-write nested slots without touching the
/// parent template's array.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionCode {
    pub(crate) name: String,
    pub(crate) children: Rc<Vec<Code>>,
    pub(crate) file: String,
    pub(crate) line: u32,
}

/// `{{>name}}` inclusion; the referent is resolved at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCode {
    pub(crate) name: String,
    pub(crate) template: Rc<Template>,
    pub(crate) file: String,
    pub(crate) line: u32,
}

/// `{{<name}}…{{/name}}` inheritance, holding the rewritten copy of the
/// parent's compiled code array (built in `factory`).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendCode {
    pub(crate) name: String,
    pub(crate) codes: Vec<Code>,
    pub(crate) file: String,
    pub(crate) line: u32,
}

/// End-of-template marker; a no-op forward, the terminal anchor in reverse.
#[derive(Debug, Clone, PartialEq)]
pub struct EofCode {
    pub(crate) line: u32,
}

impl Code {
    /// Renders this opcode into `writer`. Identity mode short-circuits to
    /// `identity` for every variant.
    pub fn execute(&self, writer: &mut FutureWriter, mode: RenderMode<'_>) -> Result<(), RenderError> {
        let RenderMode::Scoped(scope) = mode else {
            return self.identity(writer);
        };
        match self {
            Code::Write(code) => {
                writer.write(&code.text);
                Ok(())
            }
            Code::Value(code) => {
                template::write_value(writer, scope, &code.name, code.encoded);
                Ok(())
            }
            Code::Iterable(section) => {
                section.execute_scopes(writer, template::iterable(scope, &section.name));
                Ok(())
            }
            Code::IfIterable(section) => {
                section.execute_scopes(writer, template::if_iterable(scope, &section.name));
                Ok(())
            }
            Code::Inverted(section) => {
                section.execute_scopes(writer, template::inverted(scope, &section.name));
                Ok(())
            }
            Code::Function(section) => section.execute_function(writer, scope),
            Code::Name(section) => {
                section.execute_scopes(writer, vec![scope.clone()]);
                Ok(())
            }
            Code::Partial(code) => {
                code.execute_scoped(writer, scope);
                Ok(())
            }
            Code::Extend(code) => code.execute_scoped(writer, scope),
            Code::Eof(_) => Ok(()),
        }
    }

    /// Emits this opcode's original template text.
    pub fn identity(&self, writer: &mut FutureWriter) -> Result<(), RenderError> {
        match self {
            Code::Write(code) => writer.write(&code.text),
            Code::Value(code) => {
                if !code.encoded {
                    writer.write("{");
                }
                writer.write("{{");
                writer.write(&code.name);
                writer.write("}}");
                if !code.encoded {
                    writer.write("}");
                }
            }
            Code::Iterable(section) => section.identity(writer, "#")?,
            Code::IfIterable(section) => section.identity(writer, "?")?,
            Code::Inverted(section) => section.identity(writer, "^")?,
            Code::Function(section) => section.identity(writer, "_")?,
            Code::Name(section) => section.identity(writer, "$")?,
            Code::Partial(code) => {
                writer.write("{{>");
                writer.write(&code.name);
                writer.write("}}");
            }
            Code::Extend(code) => {
                writer.write("{{<");
                writer.write(&code.name);
                writer.write("}}");
            }
            Code::Eof(_) => {}
        }
        Ok(())
    }

    /// Diagnostic line captured at construction.
    pub fn line(&self) -> u32 {
        match self {
            Code::Write(code) => code.line,
            Code::Value(code) => code.line,
            Code::Iterable(section)
            | Code::IfIterable(section)
            | Code::Inverted(section)
            | Code::Function(section)
            | Code::Name(section) => section.line,
            Code::Partial(code) => code.line,
            Code::Extend(code) => code.line,
            Code::Eof(code) => code.line,
        }
    }
}

impl SectionCode {
    /// Runs the children against each sub-scope through one deferred
    /// subcomputation per iteration. The parent writer keeps accepting
    /// appends while the iterations wait for flush; their output is
    /// spliced in at the enqueue positions.
    fn execute_scopes(&self, writer: &mut FutureWriter, scopes: Vec<Scope>) {
        for sub_scope in scopes {
            let children = Rc::clone(&self.children);
            let file = self.file.clone();
            let line = self.line;
            writer.enqueue(move || {
                let mut section_writer = FutureWriter::new();
                for child in children.iter() {
                    child
                        .execute(&mut section_writer, RenderMode::Scoped(&sub_scope))
                        .map_err(|error| error.wrap(&file, line))?;
                }
                Ok(section_writer)
            });
        }
    }

    /// `{{_name}}`: a bound callable post-processes the body rendered
    /// against the current scope; a null/missing binding degrades to a
    /// once-through section; anything else is a type violation.
    fn execute_function(&self, writer: &mut FutureWriter, scope: &Scope) -> Result<(), RenderError> {
        match scope.lookup(&self.name) {
            Some(Value::Lambda(lambda)) => {
                let mut body_writer = FutureWriter::new();
                for child in self.children.iter() {
                    child.execute(&mut body_writer, RenderMode::Scoped(scope))?;
                }
                let body = body_writer.into_string()?;
                writer.write(&lambda.apply(&body));
                Ok(())
            }
            None | Some(Value::Null) => {
                self.execute_scopes(writer, vec![scope.clone()]);
                Ok(())
            }
            Some(_) => Err(RenderError::NotAFunction {
                name: self.name.clone(),
                file: self.file.clone(),
                line: self.line,
            }),
        }
    }

    fn identity(&self, writer: &mut FutureWriter, marker: &str) -> Result<(), RenderError> {
        writer.write("{{");
        writer.write(marker);
        writer.write(&self.name);
        writer.write("}}");
        for child in self.children.iter() {
            child.identity(writer)?;
        }
        writer.write("{{/");
        writer.write(&self.name);
        writer.write("}}");
        Ok(())
    }
}

impl PartialCode {
    /// A scope bound at the partial's own name becomes the partial's
    /// context (chained to the enclosing scope), which is what lets the
    /// inverse pass store its recovery under that name and still re-render
    /// faithfully. Anything else renders against the enclosing scope.
    fn execute_scoped(&self, writer: &mut FutureWriter, scope: &Scope) {
        let partial = Rc::clone(&self.template);
        let scope = match scope.lookup(&self.name) {
            Some(Value::Scope(nested)) => nested.with_parent(Rc::new(scope.clone())),
            _ => scope.clone(),
        };
        let file = self.file.clone();
        let line = self.line;
        writer.enqueue(move || {
            let mut partial_writer = FutureWriter::new();
            for code in partial.compiled() {
                code.execute(&mut partial_writer, RenderMode::Scoped(&scope))
                    .map_err(|error| error.wrap(&file, line))?;
            }
            Ok(partial_writer)
        });
    }
}

impl ExtendCode {
    fn execute_scoped(&self, writer: &mut FutureWriter, scope: &Scope) -> Result<(), RenderError> {
        for code in &self.codes {
            code.execute(writer, RenderMode::Scoped(scope))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::factory::CodeFactory;
    use crate::scope::Lambda;
    use crate::template::TemplateRegistry;

    fn render(codes: &[Code], scope: &Scope) -> String {
        let mut writer = FutureWriter::new();
        for code in codes {
            code.execute(&mut writer, RenderMode::Scoped(scope))
                .expect("execute failed");
        }
        writer.into_string().expect("flush failed")
    }

    fn identity(codes: &[Code]) -> String {
        let mut writer = FutureWriter::new();
        for code in codes {
            code.execute(&mut writer, RenderMode::Identity)
                .expect("identity failed");
        }
        writer.into_string().expect("flush failed")
    }

    fn scope_with(pairs: &[(&str, Value)]) -> Scope {
        let mut scope = Scope::new();
        for (name, value) in pairs {
            scope.set(name, value.clone());
        }
        scope
    }

    #[test]
    fn writes_literals_and_values() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "hello.mustache");
        let codes = vec![
            factory.write("Hello ", 1),
            factory.value("name", true, 1),
            factory.write("!", 1),
            factory.eof(1),
        ];

        let scope = scope_with(&[("name", Value::from("world"))]);
        assert_eq!(render(&codes, &scope), "Hello world!");
    }

    #[test]
    fn missing_value_renders_empty() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "hello.mustache");
        let codes = vec![factory.value("name", true, 1), factory.eof(1)];

        assert_eq!(render(&codes, &Scope::new()), "");
    }

    #[test]
    fn encoded_value_escapes_markup() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "value.mustache");
        let encoded = vec![factory.value("v", true, 1), factory.eof(1)];
        let raw = vec![factory.value("v", false, 1), factory.eof(1)];

        let scope = scope_with(&[("v", Value::from("<b>&</b>"))]);
        assert_eq!(render(&encoded, &scope), "&lt;b&gt;&amp;&lt;/b&gt;");
        assert_eq!(render(&raw, &scope), "<b>&</b>");
    }

    #[test]
    fn iterable_renders_each_sub_scope_in_order() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "list.mustache");
        let body = vec![
            factory.write("[", 1),
            factory.value("v", true, 1),
            factory.write("]", 1),
        ];
        let codes = vec![factory.iterable("xs", body, 1), factory.eof(1)];

        let scope = scope_with(&[(
            "xs",
            Value::List(vec![
                scope_with(&[("v", Value::from("a"))]),
                scope_with(&[("v", Value::from("b"))]),
            ]),
        )]);
        assert_eq!(render(&codes, &scope), "[a][b]");
    }

    #[test]
    fn iterable_sub_scope_sees_enclosing_bindings() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "list.mustache");
        let body = vec![factory.value("v", true, 1), factory.value("sep", true, 1)];
        let codes = vec![factory.iterable("xs", body, 1), factory.eof(1)];

        let scope = scope_with(&[
            ("sep", Value::from(";")),
            ("xs", Value::List(vec![scope_with(&[("v", Value::from("a"))])])),
        ]);
        assert_eq!(render(&codes, &scope), "a;");
    }

    #[test]
    fn iterable_over_null_or_false_emits_nothing() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "list.mustache");
        let codes = vec![
            factory.iterable("xs", vec![factory.write("x", 1)], 1),
            factory.eof(1),
        ];

        assert_eq!(render(&codes, &Scope::new()), "");
        assert_eq!(render(&codes, &scope_with(&[("xs", Value::Null)])), "");
        assert_eq!(render(&codes, &scope_with(&[("xs", Value::from(false))])), "");
    }

    #[test]
    fn truthy_scalar_iterates_once_over_enclosing_scope() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "flag.mustache");
        let codes = vec![
            factory.iterable("on", vec![factory.value("v", true, 1)], 1),
            factory.eof(1),
        ];

        let scope = scope_with(&[("on", Value::from(true)), ("v", Value::from("yes"))]);
        assert_eq!(render(&codes, &scope), "yes");
    }

    #[test]
    fn inverted_section_renders_only_for_falsy_bindings() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "inverted.mustache");
        let codes = vec![
            factory.inverted("empty", vec![factory.write("none", 1)], 1),
            factory.eof(1),
        ];

        assert_eq!(render(&codes, &scope_with(&[("empty", Value::from(false))])), "none");
        assert_eq!(render(&codes, &Scope::new()), "none");
        let present = scope_with(&[("empty", Value::List(vec![Scope::new()]))]);
        assert_eq!(render(&codes, &present), "");
    }

    #[test]
    fn if_section_runs_once_for_truthy_bindings() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "if.mustache");
        let codes = vec![
            factory.if_iterable("xs", vec![factory.write("some", 1)], 1),
            factory.eof(1),
        ];

        let many = scope_with(&[("xs", Value::List(vec![Scope::new(), Scope::new()]))]);
        assert_eq!(render(&codes, &many), "some");
        assert_eq!(render(&codes, &Scope::new()), "");
    }

    #[test]
    fn function_section_post_processes_body() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "function.mustache");
        let codes = vec![
            factory.function("shout", vec![factory.value("word", true, 1)], 1),
            factory.eof(1),
        ];

        let scope = scope_with(&[
            ("word", Value::from("quiet")),
            ("shout", Value::from(Lambda::new(|body| body.to_uppercase()))),
        ]);
        assert_eq!(render(&codes, &scope), "QUIET");
    }

    #[test]
    fn function_section_with_missing_binding_runs_once() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "function.mustache");
        let codes = vec![
            factory.function("f", vec![factory.value("word", true, 1)], 1),
            factory.eof(1),
        ];

        let scope = scope_with(&[("word", Value::from("plain"))]);
        assert_eq!(render(&codes, &scope), "plain");
    }

    #[test]
    fn function_section_rejects_non_callable_binding() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "function.mustache");
        let codes = vec![
            factory.function("f", vec![factory.write("x", 2)], 2),
            factory.eof(2),
        ];

        let scope = scope_with(&[("f", Value::from("not callable"))]);
        let mut writer = FutureWriter::new();
        let error = codes[0]
            .execute(&mut writer, RenderMode::Scoped(&scope))
            .expect_err("expected type violation");
        assert!(matches!(
            error,
            RenderError::NotAFunction { ref name, ref file, line: 2 }
                if name == "f" && file == "function.mustache"
        ));
    }

    #[test]
    fn child_failure_is_wrapped_with_section_coordinates() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "wrap.mustache");
        let body = vec![factory.function("f", vec![], 3)];
        let codes = vec![factory.iterable("xs", body, 2), factory.eof(2)];

        let scope = scope_with(&[
            ("xs", Value::List(vec![scope_with(&[("f", Value::from("x"))])])),
        ]);
        let mut writer = FutureWriter::new();
        codes[0]
            .execute(&mut writer, RenderMode::Scoped(&scope))
            .expect("enqueue should not fail");
        let error = writer.into_string().expect_err("expected wrapped failure");
        assert!(matches!(
            error,
            RenderError::Execution { ref file, line: 2, .. } if file == "wrap.mustache"
        ));
    }

    #[test]
    fn partial_renders_referent_against_enclosing_scope() {
        let mut registry = TemplateRegistry::new();
        let inner_codes = {
            let factory = CodeFactory::new(&registry, "b.mustache");
            vec![
                factory.write("Hi ", 1),
                factory.value("who", true, 1),
                factory.eof(1),
            ]
        };
        registry.insert(crate::template::Template::new("b.mustache", inner_codes));

        let factory = CodeFactory::new(&registry, "a.mustache");
        let codes = vec![
            factory.partial("b.mustache", 1).expect("partial resolution"),
            factory.eof(1),
        ];

        let scope = scope_with(&[("who", Value::from("X"))]);
        assert_eq!(render(&codes, &scope), "Hi X");
    }

    #[test]
    fn partial_prefers_sub_scope_bound_at_its_name() {
        let mut registry = TemplateRegistry::new();
        let inner_codes = {
            let factory = CodeFactory::new(&registry, "b.mustache");
            vec![
                factory.write("Hi ", 1),
                factory.value("who", true, 1),
                factory.eof(1),
            ]
        };
        registry.insert(crate::template::Template::new("b.mustache", inner_codes));

        let factory = CodeFactory::new(&registry, "a.mustache");
        let codes = vec![
            factory.partial("b.mustache", 1).expect("partial resolution"),
            factory.eof(1),
        ];

        let scope = scope_with(&[(
            "b.mustache",
            Value::from(scope_with(&[("who", Value::from("nested"))])),
        )]);
        assert_eq!(render(&codes, &scope), "Hi nested");
    }

    #[test]
    fn dotted_name_descends_nested_scopes() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "dotted.mustache");
        let codes = vec![factory.value("a.b", true, 1), factory.eof(1)];

        let mut scope = Scope::new();
        scope.set("a.b", Value::from("z"));
        assert_eq!(render(&codes, &scope), "z");
    }

    #[test]
    fn identity_reproduces_template_source() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "identity.mustache");
        let codes = vec![
            factory.write("Hello ", 1),
            factory.value("name", true, 1),
            factory.value("raw", false, 1),
            factory.iterable("xs", vec![factory.value("v", true, 1)], 1),
            factory.inverted("empty", vec![factory.write("none", 1)], 1),
            factory.if_iterable("cond", vec![factory.write("yes", 1)], 1),
            factory.function("f", vec![factory.write("body", 1)], 1),
            factory.name("region", vec![factory.write("text", 1)], 1),
            factory.eof(1),
        ];

        assert_eq!(
            identity(&codes),
            "Hello {{name}}{{{raw}}}\
             {{#xs}}{{v}}{{/xs}}\
             {{^empty}}none{{/empty}}\
             {{?cond}}yes{{/cond}}\
             {{_f}}body{{/f}}\
             {{$region}}text{{/region}}"
        );
    }

    #[test]
    fn section_outputs_splice_in_enqueue_order() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "order.mustache");
        let codes = vec![
            factory.write("pre|", 1),
            factory.iterable("xs", vec![factory.value("v", true, 1)], 1),
            factory.write("|post", 1),
            factory.eof(1),
        ];

        let scope = scope_with(&[(
            "xs",
            Value::List(vec![
                scope_with(&[("v", Value::from("1"))]),
                scope_with(&[("v", Value::from("2"))]),
                scope_with(&[("v", Value::from("3"))]),
            ]),
        )]);
        assert_eq!(render(&codes, &scope), "pre|123|post");
    }

    #[test]
    fn reports_construction_line() {
        let registry = TemplateRegistry::new();
        let factory = CodeFactory::new(&registry, "line.mustache");
        assert_eq!(factory.write("x", 3).line(), 3);
        assert_eq!(factory.value("v", true, 4).line(), 4);
        assert_eq!(factory.iterable("xs", vec![], 5).line(), 5);
        assert_eq!(factory.eof(9).line(), 9);
    }
}
