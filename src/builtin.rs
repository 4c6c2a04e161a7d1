use log::debug;

use crate::{
    error::{EvaluationResult, LispError},
    heap::{Heap, PrimitiveFn, Value},
    interpreter::Frame,
};

fn fixnums(arguments: Value, heap: &Heap) -> EvaluationResult<Vec<i64>> {
    heap.iter_list(arguments)
        .map(|value| {
            heap.as_fixnum(value).ok_or_else(|| LispError::WrongType {
                expected: "fixnum",
                found: heap.kind(value).name(),
            })
        })
        .collect()
}

/// Folds the first operand against the rest. No operands gives 0.
fn fold_from_first(arguments: Value, heap: &mut Heap, f: fn(i64, i64) -> i64) -> EvaluationResult {
    let numbers = fixnums(arguments, heap)?;
    let result = match numbers.split_first() {
        Some((&seed, rest)) => rest.iter().fold(seed, |acc, &n| f(acc, n)),
        None => 0,
    };
    heap.fixnum(result)
}

fn builtin_add(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    let total = fixnums(arguments, heap)?.into_iter().fold(0i64, i64::wrapping_add);
    heap.fixnum(total)
}

fn builtin_sub(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    fold_from_first(arguments, heap, i64::wrapping_sub)
}

fn builtin_mul(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    let total = fixnums(arguments, heap)?.into_iter().fold(1i64, i64::wrapping_mul);
    heap.fixnum(total)
}

fn builtin_div(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    // Division by zero yields 0 instead of failing.
    fold_from_first(arguments, heap, |dividend, divisor| {
        if divisor == 0 {
            0
        } else {
            dividend.wrapping_div(divisor)
        }
    })
}

fn builtin_eq(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    let first = heap.car(arguments);
    let second = heap.car(heap.cdr(arguments));

    // Only fixnums compare; everything else is unequal, even to itself.
    match (heap.as_fixnum(first), heap.as_fixnum(second)) {
        (Some(a), Some(b)) if a == b => Ok(heap.t()),
        _ => Ok(heap.nil()),
    }
}

fn builtin_cons(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    let first = heap.car(arguments);
    let rest = heap.car(heap.cdr(arguments));
    heap.cons(first, rest)
}

fn builtin_car(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    Ok(heap.car(heap.car(arguments)))
}

fn builtin_cdr(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    Ok(heap.cdr(heap.car(arguments)))
}

fn builtin_list(arguments: Value, _heap: &mut Heap) -> EvaluationResult {
    // The evaluator hands every call a freshly built argument list.
    Ok(arguments)
}

fn builtin_length(arguments: Value, heap: &mut Heap) -> EvaluationResult {
    let length = heap.iter_list(heap.car(arguments)).count();
    heap.fixnum(length as i64)
}

const BUILTINS: [(&str, PrimitiveFn); 10] = [
    ("+", builtin_add),
    ("-", builtin_sub),
    ("*", builtin_mul),
    ("/", builtin_div),
    ("eq", builtin_eq),
    ("cons", builtin_cons),
    ("car", builtin_car),
    ("cdr", builtin_cdr),
    ("list", builtin_list),
    ("length", builtin_length),
];

/// Creates the global frame, registers it as a collector root and fills it
/// with `nil`, `t` and the primitive library.
pub(crate) fn builtin_frame(heap: &mut Heap) -> EvaluationResult<Frame> {
    let global = Frame::root(heap)?;
    heap.set_global_env(global.0);

    let (nil, t) = (heap.nil(), heap.t());
    global.insert(nil, nil, heap)?;
    global.insert(t, t, heap)?;

    for (name, function) in BUILTINS {
        let symbol = heap.intern(name)?;
        let primitive = heap.primitive(function)?;
        global.insert(symbol, primitive, heap)?;
    }

    debug!("global environment ready: {:?}", heap.stats());
    Ok(global)
}
