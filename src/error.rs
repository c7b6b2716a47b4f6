use thiserror::Error;

/// Construction-time failures reported back to the parser/caller.
///
/// These are fatal: a template whose partials cannot be resolved or whose
/// extend block is malformed never produces a compiled code array.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Partial '{name}' not found at {file}:{line}")]
    PartialNotFound {
        name: String,
        file: String,
        line: u32,
    },
    #[error("Illegal code in extend section '{name}' at {file}:{line}")]
    IllegalExtendChild {
        name: String,
        file: String,
        line: u32,
    },
    #[error("Overrides failed to match named sections {keys:?} at {file}:{line}")]
    UnusedOverrides {
        keys: Vec<String>,
        file: String,
        line: u32,
    },
}

/// Forward-rendering failures.
///
/// Deferred section computations wrap their causes with the file and line
/// of the code that enqueued them. The inverse interpreter never produces
/// these: a mismatch there is an ordinary `None`.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("'{name}' is not a function at {file}:{line}")]
    NotAFunction {
        name: String,
        file: String,
        line: u32,
    },
    #[error("Execution failed at {file}:{line}")]
    Execution {
        file: String,
        line: u32,
        #[source]
        source: Box<RenderError>,
    },
    #[error("Write failed")]
    Write(#[from] std::io::Error),
}

impl RenderError {
    pub(crate) fn wrap(self, file: &str, line: u32) -> Self {
        RenderError::Execution {
            file: file.to_string(),
            line,
            source: Box::new(self),
        }
    }
}
