//! Inverse interpreter.
//!
//! `unexecute` consumes rendered text left to right and rebuilds a scope
//! that would have produced it. Mismatches are ordinary `None` results,
//! never errors; the top-level caller decides whether a failed alignment
//! matters. Each opcode sees a lookahead slice of the codes that follow it
//! in document order, built fresh per call by `truncate`.

use crate::code::{
    Code, EofCode, ExtendCode, PartialCode, RenderMode, SectionCode, ValueCode, WriteCode,
};
use crate::encode::decode;
use crate::scope::{Lambda, Scope, Value};
use crate::writer::FutureWriter;

/// Lookahead view for the code at `start`: its remaining siblings followed
/// by the caller's own lookahead. Freshly allocated so recursive calls
/// never share mutable state.
pub(crate) fn truncate<'a>(codes: &'a [Code], start: usize, next: &[&'a Code]) -> Vec<&'a Code> {
    codes[start..].iter().chain(next.iter().copied()).collect()
}

impl Code {
    /// Reverse-matches this opcode against `text` at `position`, binding
    /// whatever it recovers into `scope`. `None` means the text cannot be
    /// aligned here; section variants rewind `position` to their own start
    /// before treating an attempt as absent.
    pub fn unexecute(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        match self {
            Code::Write(code) => code.unexecute(text, position),
            Code::Value(code) => code.unexecute(scope, text, position, next),
            Code::Iterable(section) => section.unexecute_iterable(scope, text, position, next),
            Code::IfIterable(section) => section.unexecute_if(scope, text, position, next),
            Code::Inverted(section) => section.unexecute_inverted(scope, text, position, next),
            Code::Function(section) => section.unexecute_function(scope, text, position, next),
            Code::Name(section) => section.unexecute_pass(scope, text, position, next),
            Code::Partial(code) => code.unexecute(scope, text, position, next),
            Code::Extend(code) => code.unexecute(scope, text, position, next),
            Code::Eof(code) => code.unexecute(text, position),
        }
    }
}

impl WriteCode {
    fn unexecute(&self, text: &str, position: &mut usize) -> Option<()> {
        let rest = text.as_bytes().get(*position..)?;
        if rest.starts_with(self.text.as_bytes()) {
            *position += self.text.len();
            return Some(());
        }
        None
    }
}

impl ValueCode {
    fn unexecute(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        let raw = unexecute_value(scope, text, position, next)?;
        let value = if self.encoded { decode(&raw) } else { raw };
        scope.set(&self.name, Value::String(value));
        Some(())
    }
}

/// Shared value-span primitive: the substring a spanning opcode consumes is
/// found by probing the first lookahead code forward one character at a
/// time until it matches. Commits `position` to the match start and returns
/// the span. Probing runs through `probe == text.len()` so `Eof` can
/// anchor a trailing span at the end of text.
fn unexecute_value(
    scope: &mut Scope,
    text: &str,
    position: &mut usize,
    next: &[&Code],
) -> Option<String> {
    if next.is_empty() {
        return None;
    }
    let mut probe = *position;
    let span_end = loop {
        let mut probe_position = probe;
        if next[0]
            .unexecute(scope, text, &mut probe_position, &next[1..])
            .is_some()
        {
            break probe;
        }
        match text.get(probe..).and_then(|rest| rest.chars().next()) {
            Some(skipped) => probe += skipped.len_utf8(),
            None => return None,
        }
    };
    let value = text[*position..span_end].to_string();
    *position = span_end;
    Some(value)
}

impl SectionCode {
    /// One pass over the children, threading `accumulator` through each
    /// with a lookahead of the remaining siblings plus the outer lookahead.
    fn unexecute_pass(
        &self,
        accumulator: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        for (index, child) in self.children.iter().enumerate() {
            let lookahead = truncate(&self.children, index + 1, next);
            child.unexecute(accumulator, text, position, &lookahead)?;
        }
        Some(())
    }

    /// Greedy reverse match: keep consuming iterations until the children
    /// stop matching, then bind the collected sub-scopes. An empty list
    /// means the section was absent from the text, still a successful
    /// alignment.
    fn unexecute_iterable(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        let mut results = Vec::new();
        loop {
            let start = *position;
            let mut iteration = Scope::new();
            if self
                .unexecute_pass(&mut iteration, text, position, next)
                .is_none()
            {
                *position = start;
                break;
            }
            if *position == start {
                // Zero-width match; keeping it would never terminate.
                break;
            }
            results.push(iteration);
        }
        if !results.is_empty() {
            scope.set(&self.name, Value::List(results));
        }
        Some(())
    }

    /// Single-pass variant of the greedy match; a recovered sub-scope is
    /// bound even when empty so a re-render reproduces the section body.
    fn unexecute_if(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        let start = *position;
        let mut result = Scope::new();
        if self
            .unexecute_pass(&mut result, text, position, next)
            .is_none()
        {
            *position = start;
            return Some(());
        }
        scope.set(&self.name, Value::Scope(result));
        Some(())
    }

    /// Single pass; on success the recovered bindings merge into the
    /// enclosing scope and the section name records `false`, marking the
    /// inverted branch as taken.
    fn unexecute_inverted(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        let start = *position;
        let mut result = Scope::new();
        if self
            .unexecute_pass(&mut result, text, position, next)
            .is_none()
        {
            *position = start;
            return Some(());
        }
        scope.merge(result);
        scope.set(&self.name, Value::Bool(false));
        Some(())
    }

    /// The section's span is extracted like a value; a recovered callable
    /// then maps the body (re-rendered forward against what has been
    /// recovered so far) to the extracted text, so a forward re-render of
    /// the same template reproduces it.
    fn unexecute_function(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        let extracted = unexecute_value(scope, text, position, next)?;
        let mut body_writer = FutureWriter::new();
        for child in self.children.iter() {
            child
                .execute(&mut body_writer, RenderMode::Scoped(scope))
                .ok()?;
        }
        let body = body_writer.into_string().ok()?;
        let lambda = match scope.lookup(&self.name) {
            Some(Value::Lambda(existing)) => existing,
            _ => {
                let created = Lambda::recovered();
                scope.set(&self.name, Value::Lambda(created.clone()));
                created
            }
        };
        lambda.record(body, extracted);
        Some(())
    }
}

impl PartialCode {
    /// The partial's span is extracted like a value, then inverted through
    /// the partial's own compiled codes from position zero; the recovered
    /// scope is bound under the partial's name.
    fn unexecute(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        let span = unexecute_value(scope, text, position, next)?;
        let recovered = self.template.unexecute(&span)?;
        scope.set(&self.name, Value::Scope(recovered));
        Some(())
    }
}

impl ExtendCode {
    fn unexecute(
        &self,
        scope: &mut Scope,
        text: &str,
        position: &mut usize,
        next: &[&Code],
    ) -> Option<()> {
        for (index, code) in self.codes.iter().enumerate() {
            let lookahead = truncate(&self.codes, index + 1, next);
            code.unexecute(scope, text, position, &lookahead)?;
        }
        Some(())
    }
}

impl EofCode {
    /// Terminal anchor: only the end of text satisfies it.
    fn unexecute(&self, text: &str, position: &mut usize) -> Option<()> {
        if *position == text.len() {
            Some(())
        } else {
            None
        }
    }
}
