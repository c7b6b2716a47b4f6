//! Streaming output pipeline.
//!
//! A `FutureWriter` buffers an ordered queue of write items: literal text,
//! completed nested writers (section boundaries), and deferred
//! subcomputations producing more writers. Flushing drains the queue in
//! enqueue order, so a subcomputation's output lands exactly where it was
//! enqueued even though it only runs at flush time. After an enqueue the
//! caller keeps appending; those appends land after the deferred item.

use std::io::Write;

use crate::error::RenderError;

type Thunk = Box<dyn FnOnce() -> Result<FutureWriter, RenderError>>;

enum WriteItem {
    Text(String),
    Nested(FutureWriter),
    Deferred(Thunk),
}

/// Ordered writer accepting text and deferred subwriters.
#[derive(Default)]
pub struct FutureWriter {
    items: Vec<WriteItem>,
}

impl FutureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends literal text, coalescing with a trailing text item.
    pub fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(WriteItem::Text(buffer)) = self.items.last_mut() {
            buffer.push_str(text);
            return;
        }
        self.items.push(WriteItem::Text(text.to_string()));
    }

    /// Splices a completed child writer into the stream. Section contents
    /// go through one of these so they cannot interleave with the
    /// surrounding stream.
    pub fn append(&mut self, child: FutureWriter) {
        self.items.push(WriteItem::Nested(child));
    }

    /// Enqueues a deferred subcomputation; it runs during flush and its
    /// output is spliced in at this queue position.
    pub fn enqueue(
        &mut self,
        deferred: impl FnOnce() -> Result<FutureWriter, RenderError> + 'static,
    ) {
        self.items.push(WriteItem::Deferred(Box::new(deferred)));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drains the queue in enqueue order into an I/O sink, evaluating
    /// deferred items as they are reached.
    pub fn flush_to(self, sink: &mut dyn Write) -> Result<(), RenderError> {
        for item in self.items {
            match item {
                WriteItem::Text(text) => sink.write_all(text.as_bytes())?,
                WriteItem::Nested(child) => child.flush_to(sink)?,
                WriteItem::Deferred(deferred) => deferred()?.flush_to(sink)?,
            }
        }
        Ok(())
    }

    /// Flush for in-memory rendering.
    pub fn into_string(self) -> Result<String, RenderError> {
        let mut rendered = String::new();
        self.flush_into(&mut rendered)?;
        Ok(rendered)
    }

    fn flush_into(self, out: &mut String) -> Result<(), RenderError> {
        for item in self.items {
            match item {
                WriteItem::Text(text) => out.push_str(&text),
                WriteItem::Nested(child) => child.flush_into(out)?,
                WriteItem::Deferred(deferred) => deferred()?.flush_into(out)?,
            }
        }
        Ok(())
    }
}
