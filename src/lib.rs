mod builtin;
mod config;
mod context;
mod error;
mod gc;
mod heap;
mod interpreter;
mod parser;
mod printer;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use context::EvaluationContext;
pub use error::{EvaluationResult, LispError};
pub use heap::{Heap, HeapStats, Kind, Object, Pinned, Value};
pub use interpreter::{apply, evaluate, Frame};
pub use parser::{parse_all, Reader};
pub use printer::Printer;
