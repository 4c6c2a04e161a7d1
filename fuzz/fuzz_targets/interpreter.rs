#![no_main]

use core::fmt;

use itertools::Itertools;
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};

// Builtins and load from variables
#[derive(Arbitrary, Debug)]
enum LispAtom {
    Add, Sub, Mul, Div,
    Eq, Cons, Car, Cdr,
    List, Length,
    Nil, True,

    Identifier(u8),
    Number(u16),
    Text(u8),
}

impl fmt::Display for LispAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", match self {
            LispAtom::Add => "+",
            LispAtom::Sub => "-",
            LispAtom::Mul => "*",
            LispAtom::Div => "/",
            LispAtom::Eq => "eq",
            LispAtom::Cons => "cons",
            LispAtom::Car => "car",
            LispAtom::Cdr => "cdr",
            LispAtom::List => "list",
            LispAtom::Length => "length",
            LispAtom::Nil => "nil",
            LispAtom::True => "t",
            // A small alphabet so definitions and lookups collide.
            LispAtom::Identifier(identifier) => return write!(f, "v{}", identifier % 8),
            LispAtom::Number(value) => return write!(f, "{}", value),
            LispAtom::Text(length) => return write!(f, "\"{}\"", "s".repeat(*length as usize % 8)),
        })
    }
}

#[derive(Arbitrary, Debug)]
enum LispCommand {
    Lambda(Vec<LispCommand>),
    Define(Vec<LispCommand>),
    Setq(Vec<LispCommand>),
    If(Vec<LispCommand>),
    Quote(Box<LispCommand>),
    Apply(Vec<LispCommand>),

    Atom(LispAtom),
}

fn stringify_arguments(values: &[LispCommand]) -> String {
    values.iter()
        .map(LispCommand::to_string)
        .join(" ")
}

impl fmt::Display for LispCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LispCommand::Atom(atom) => atom.fmt(f),
            LispCommand::Quote(quoted) => write!(f, "'{}", quoted),
            LispCommand::Lambda(args) => write!(f, "(lambda {})", stringify_arguments(args)),
            LispCommand::Define(args) => write!(f, "(define {})", stringify_arguments(args)),
            LispCommand::Setq(args) => write!(f, "(setq {})", stringify_arguments(args)),
            LispCommand::If(args) => write!(f, "(if {})", stringify_arguments(args)),
            LispCommand::Apply(args) => write!(f, "({})", stringify_arguments(args)),
        }
    }
}

fuzz_target!(|commands: Vec<LispCommand>| {
    let Ok(mut context) = cellisp::EvaluationContext::new() else { return };

    for command in commands {
        let command = command.to_string();
        if let Ok(value) = context.evaluate_str(&command) {
            let _ = context.render(value);
        }

        let stats = context.heap().stats();
        assert_eq!(stats.free + stats.active, stats.capacity);
        assert_eq!(context.heap().pinned_count(), 0);
    }
});
