//! `mustachio` library crate.
//!
//! Compiled template code model for a Mustache-family logic-less engine.
//! High-level layout:
//! - data model: `scope` (nested key/value contexts) and `writer` (ordered
//!   streaming output)
//! - compiled form: `code` (the opcode variants) built through `factory`,
//!   which is the parser's output sink
//! - interpreters: forward rendering lives on `code`, the inverse pass in
//!   `unexecute`
//! - orchestration: `template` (handles, partial resolution, entry points)
pub mod code;
pub mod encode;
pub mod error;
pub mod factory;
pub mod scope;
pub mod template;
pub(crate) mod unexecute;
pub mod writer;

pub use code::{Code, RenderMode};
pub use error::{CompileError, RenderError};
pub use factory::CodeFactory;
pub use scope::{Lambda, Scope, Value};
pub use template::{PartialResolver, Template, TemplateRegistry};
pub use writer::FutureWriter;
