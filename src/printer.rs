use core::fmt;

use crate::heap::{Heap, Object, Value};

/// `Display` adapter rendering a value the way the reader would read it back.
pub struct Printer<'h> {
    heap: &'h Heap,
    value: Value,
}

impl Heap {
    pub fn display(&self, value: Value) -> Printer<'_> {
        Printer { heap: self, value }
    }
}

impl Printer<'_> {
    fn write(&self, f: &mut fmt::Formatter<'_>, value: Value, budget: &mut usize) -> fmt::Result {
        match &self.heap[value] {
            Object::Symbol(name) => write!(f, "{}", name),
            Object::Fixnum(number) => write!(f, "{}", number),
            Object::Str(text) => write!(f, "\"{}\"", text),
            Object::Primitive(_) => write!(f, "<PRIM>"),
            Object::Proc { .. } => write!(f, "<PROC>"),
            Object::Cell(..) => self.write_list(f, value, budget),
        }
    }

    fn write_list(&self, f: &mut fmt::Formatter<'_>, list: Value, budget: &mut usize) -> fmt::Result {
        write!(f, "(")?;
        let mut current = list;
        let mut first = true;

        while let Object::Cell(head, rest) = self.heap[current] {
            // A heap holds at most `capacity` cells, so anything longer is a cycle.
            if *budget == 0 {
                return write!(f, "{}...)", if first { "" } else { " " });
            }
            *budget -= 1;

            if !first {
                write!(f, " ")?;
            }
            first = false;
            self.write(f, head, budget)?;
            current = rest;
        }

        if !self.heap.is_nil(current) {
            write!(f, " . ")?;
            self.write(f, current, budget)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Printer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut budget = self.heap.capacity();
        self.write(f, self.value, &mut budget)
    }
}
