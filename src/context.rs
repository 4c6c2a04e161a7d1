use std::io::BufRead;

use log::debug;

use crate::{
    builtin::builtin_frame,
    config::Config,
    error::EvaluationResult,
    heap::{Heap, Value},
    interpreter::{evaluate, Frame},
    parser::Reader,
};

/// An evaluation context owns one heap and the global environment in it.
///
/// Values handed out by the context are plain handles: they stay valid
/// until the next call that may allocate, unless they are reachable from
/// the global environment (for example through a `define`).
pub struct EvaluationContext {
    heap: Heap,
    global: Frame,
    config: Config,
}

impl EvaluationContext {
    pub fn new() -> EvaluationResult<Self> {
        Self::with_config(Config::default())
    }

    /// Fails with `OutOfMemory` when the capacity cannot hold the global
    /// environment.
    pub fn with_config(config: Config) -> EvaluationResult<Self> {
        let mut heap = Heap::new(config.capacity)?;
        let global = builtin_frame(&mut heap)?;
        debug!("evaluation context created with {:?}", config);
        Ok(Self { heap, global, config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn global_environment(&self) -> Frame {
        self.global
    }

    /// A reader over `input` using this context's token limit.
    pub fn reader<R: BufRead>(&self, input: R) -> Reader<R> {
        Reader::new(input).with_token_limit(self.config.max_token_len)
    }

    /// Reads the next datum from `reader` into this context's heap.
    pub fn read<R: BufRead>(&mut self, reader: &mut Reader<R>) -> EvaluationResult<Option<Value>> {
        reader.read(&mut self.heap)
    }

    /// Evaluates an expression previously read into this context.
    pub fn evaluate(&mut self, expression: Value) -> EvaluationResult {
        let _expression = self.heap.pin(expression);
        evaluate(expression, self.global, &mut self.heap)
    }

    /// Evaluates every expression in `source`, returning the value of the
    /// last one, or nil if there is none.
    pub fn evaluate_str(&mut self, source: &str) -> EvaluationResult {
        let mut reader = self.reader(source.as_bytes());
        let result = self.heap.pin(self.heap.nil());
        while let Some(expression) = self.read(&mut reader)? {
            let value = self.evaluate(expression)?;
            result.set(value);
        }
        Ok(result.get())
    }

    pub fn render(&self, value: Value) -> String {
        self.heap.display(value).to_string()
    }
}
