use core::{error::Error, fmt};

use crate::heap::Value;

pub type EvaluationResult<T = Value> = Result<T, LispError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LispError {
    /// The heap is still full after a collection.
    OutOfMemory,
    UnboundSymbol(String),
    /// Application of something that is neither a primitive nor a procedure.
    BadApply(&'static str),
    AssignUndeclared(String),
    MalformedInput(String),
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
}

impl LispError {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "OutOfMemory",
            Self::UnboundSymbol(_) => "UnboundSymbol",
            Self::BadApply(_) => "BadApply",
            Self::AssignUndeclared(_) => "AssignUndeclared",
            Self::MalformedInput(_) => "MalformedInput",
            Self::WrongType { .. } => "WrongType",
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedInput(reason.into())
    }
}

impl fmt::Display for LispError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::UnboundSymbol(name) => write!(f, "undefined symbol '{}'", name),
            Self::BadApply(kind) => write!(f, "bad apply: {} is not a procedure", kind),
            Self::AssignUndeclared(name) => write!(f, "setq of undeclared variable '{}'", name),
            Self::MalformedInput(reason) => write!(f, "malformed input: {}", reason),
            Self::WrongType { expected, found } => write!(f, "expected {}, found {}", expected, found),
        }
    }
}

impl Error for LispError {}
