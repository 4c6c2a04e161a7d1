use itertools::{EitherOrBoth, Itertools};
use log::trace;

use crate::{
    error::{EvaluationResult, LispError},
    heap::{Heap, Kind, Object, SpecialForm, Value},
};

/// One environment frame: a cell holding an association list of
/// `(symbol . value)` pairs and the parent frame.
///
/// The global frame's parent is nil. New bindings are pushed onto the front
/// of a frame's association list, so the frame cell itself never changes
/// identity and closures holding it see later definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame(pub Value);

impl Frame {
    pub fn root(heap: &mut Heap) -> EvaluationResult<Self> {
        heap.cons(heap.nil(), heap.nil()).map(Self)
    }

    /// A child of `parent` starting with the given association list.
    pub fn extend(bindings: Value, parent: Frame, heap: &mut Heap) -> EvaluationResult<Self> {
        heap.cons(bindings, parent.0).map(Self)
    }

    pub fn parent(self, heap: &Heap) -> Option<Frame> {
        let parent = heap.cdr(self.0);
        (!heap.is_nil(parent)).then_some(Frame(parent))
    }

    /// The `(symbol . value)` pair bound to `symbol`, innermost frame first.
    pub fn binding(self, symbol: Value, heap: &Heap) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(current) = frame {
            let found = heap
                .iter_list(heap.car(current.0))
                .find(|&pair| heap.car(pair) == symbol);
            if found.is_some() {
                return found;
            }
            frame = current.parent(heap);
        }
        None
    }

    pub fn get(self, symbol: Value, heap: &Heap) -> EvaluationResult {
        match self.binding(symbol, heap) {
            Some(pair) => Ok(heap.cdr(pair)),
            None => Err(LispError::UnboundSymbol(symbol_name(symbol, heap))),
        }
    }

    /// Adds a binding to this frame, shadowing any outer one.
    ///
    /// The pair is the first thing allocated, so `value` need not be rooted.
    pub fn insert(self, symbol: Value, value: Value, heap: &mut Heap) -> EvaluationResult<()> {
        let pair = heap.cons(symbol, value)?;
        let bindings = heap.cons(pair, heap.car(self.0))?;
        heap.set_car(self.0, bindings);
        Ok(())
    }

    /// Rebinds an existing binding anywhere in the chain, or adds one here.
    pub fn define(self, symbol: Value, value: Value, heap: &mut Heap) -> EvaluationResult<()> {
        match self.binding(symbol, heap) {
            Some(pair) => {
                heap.set_cdr(pair, value);
                Ok(())
            }
            None => self.insert(symbol, value, heap),
        }
    }
}

fn symbol_name(symbol: Value, heap: &Heap) -> String {
    heap.symbol_name(symbol).unwrap_or("?").to_owned()
}

fn expect_symbol(value: Value, form: &str, heap: &Heap) -> EvaluationResult<Value> {
    match heap.kind(value) {
        Kind::Symbol => Ok(value),
        other => Err(LispError::malformed(format!(
            "{} target must be a symbol, not a {}",
            form,
            other.name()
        ))),
    }
}

fn evaluate_if(operands: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    // (if condition then else); a missing branch reads as nil.
    let condition = heap.car(operands);
    let branches = heap.cdr(operands);

    let test = evaluate(condition, environment, heap)?;
    let branch = if heap.is_nil(test) {
        heap.car(heap.cdr(branches))
    } else {
        heap.car(branches)
    };
    evaluate(branch, environment, heap)
}

fn evaluate_define(operands: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    let target = expect_symbol(heap.car(operands), "define", heap)?;
    let value = evaluate(heap.car(heap.cdr(operands)), environment, heap)?;
    let value = heap.pin(value);

    environment.define(target, value.get(), heap)?;
    Ok(value.get())
}

fn evaluate_setq(operands: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    let target = expect_symbol(heap.car(operands), "setq", heap)?;
    if environment.binding(target, heap).is_none() {
        return Err(LispError::AssignUndeclared(symbol_name(target, heap)));
    }

    let value = evaluate(heap.car(heap.cdr(operands)), environment, heap)?;
    // Bindings are never removed, so the pair found above is still in the chain.
    if let Some(pair) = environment.binding(target, heap) {
        heap.set_cdr(pair, value);
    }
    Ok(value)
}

fn evaluate_lambda(operands: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    // (lambda vars body...) captures the frame itself, not a copy.
    let vars = heap.car(operands);
    let body = heap.cdr(operands);
    heap.procedure(vars, body, environment.0)
}

/// Evaluates each operand left to right into a fresh list.
fn evaluate_arguments(operands: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    let head = heap.pin(heap.nil());
    let mut tail = heap.nil();
    let mut remaining = operands;

    while heap.is_cell(remaining) {
        let argument = evaluate(heap.car(remaining), environment, heap)?;
        let argument = heap.pin(argument);
        let cell = heap.cons(argument.get(), heap.nil())?;
        if heap.is_nil(tail) {
            head.set(cell);
        } else {
            heap.set_cdr(tail, cell);
        }
        tail = cell;
        remaining = heap.cdr(remaining);
    }

    Ok(head.get())
}

fn evaluate_list(expression: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    // Special forms are recognised by the identity of the head symbol and
    // cannot be shadowed. Anything else is an application.
    let head = heap.car(expression);
    let operands = heap.cdr(expression);

    match heap.keywords().special_form(head) {
        Some(SpecialForm::Quote) => return Ok(heap.car(operands)),
        Some(SpecialForm::If) => return evaluate_if(operands, environment, heap),
        Some(SpecialForm::Define) => return evaluate_define(operands, environment, heap),
        Some(SpecialForm::Setq) => return evaluate_setq(operands, environment, heap),
        Some(SpecialForm::Lambda) => return evaluate_lambda(operands, environment, heap),
        None => {}
    }

    let procedure = evaluate(head, environment, heap)?;
    let procedure = heap.pin(procedure);
    let arguments = evaluate_arguments(operands, environment, heap)?;
    let arguments = heap.pin(arguments);

    apply(procedure.get(), arguments.get(), environment, heap)
}

/// Evaluates the forms of `body` in order, returning the last value.
fn progn(body: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    let mut result = heap.nil();
    let mut forms = body;
    while heap.is_cell(forms) {
        result = evaluate(heap.car(forms), environment, heap)?;
        forms = heap.cdr(forms);
    }
    Ok(result)
}

/// Zips parameters with arguments into a new association list.
///
/// Parameters without an argument are bound to nil; surplus arguments are
/// dropped.
fn bind_parameters(vars: Value, arguments: Value, heap: &mut Heap) -> EvaluationResult {
    let parameters = heap.iter_list(vars).collect_vec();
    let values = heap.iter_list(arguments).collect_vec();
    if parameters.len() != values.len() {
        trace!("arity mismatch: {} parameters, {} arguments", parameters.len(), values.len());
    }

    let bindings = heap.pin(heap.nil());
    for pair in parameters.into_iter().zip_longest(values) {
        let (parameter, value) = match pair {
            EitherOrBoth::Both(parameter, value) => (parameter, value),
            EitherOrBoth::Left(parameter) => (parameter, heap.nil()),
            EitherOrBoth::Right(_) => break,
        };
        let binding = heap.cons(parameter, value)?;
        let extended = heap.cons(binding, bindings.get())?;
        bindings.set(extended);
    }
    Ok(bindings.get())
}

/// Applies a primitive or procedure to an already evaluated argument list.
///
/// Both must be reachable by the caller. A procedure runs in a new frame
/// extending the environment it captured; `_caller` is not consulted.
pub fn apply(procedure: Value, arguments: Value, _caller: Frame, heap: &mut Heap) -> EvaluationResult {
    enum Callee {
        Native(crate::heap::PrimitiveFn),
        Lisp { vars: Value, body: Value, env: Value },
    }

    let callee = match &heap[procedure] {
        Object::Primitive(function) => Callee::Native(*function),
        Object::Proc { vars, body, env } => Callee::Lisp { vars: *vars, body: *body, env: *env },
        other => return Err(LispError::BadApply(other.kind().name())),
    };

    match callee {
        Callee::Native(function) => function(arguments, heap),
        Callee::Lisp { vars, body, env } => {
            let bindings = bind_parameters(vars, arguments, heap)?;
            let frame = Frame::extend(bindings, Frame(env), heap)?;
            let _frame = heap.pin(frame.0);
            progn(body, frame, heap)
        }
    }
}

/// Evaluates `expression` in `environment`.
///
/// Both must be reachable from a root for the duration of the call; the
/// result is not, and the caller must pin it before allocating again.
pub fn evaluate(expression: Value, environment: Frame, heap: &mut Heap) -> EvaluationResult {
    match heap.kind(expression) {
        Kind::Symbol => environment.get(expression, heap),
        Kind::Cell => evaluate_list(expression, environment, heap),
        Kind::Fixnum | Kind::String | Kind::Primitive | Kind::Proc => Ok(expression),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use crate::{
        context::EvaluationContext,
        test_utils::{all_testcases, load_test_pair, TestOutput},
    };

    use super::*;

    fn run(context: &mut EvaluationContext, source: &str) -> Result<String, LispError> {
        context.evaluate_str(source).map(|value| context.render(value))
    }

    fn compare(rendered: &str, expected: &TestOutput) -> bool {
        match expected {
            TestOutput::Number(number) => rendered == number.to_string(),
            TestOutput::Text(text) => rendered == text,
        }
    }

    fn assert_run(testcase: usize, entries: &[(String, Result<TestOutput, String>)]) -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        for (lineno, (source, expected)) in entries.iter().enumerate() {
            let result = run(&mut context, source);
            println!("{}:\n{:?}", source, result);
            match (&result, expected) {
                (Ok(rendered), Ok(expected)) => assert!(
                    compare(rendered, expected),
                    "Testcase({}, {}): Got {:?}, expected {:?}",
                    testcase,
                    lineno,
                    result,
                    expected
                ),
                (Err(error), Err(expected)) => assert_eq!(
                    error.name(),
                    expected.as_str(),
                    "Testcase({}, {}): Got {:?}, expected {:?}",
                    testcase,
                    lineno,
                    result,
                    expected
                ),
                _ => bail!("Testcase({}, {}): Got {:?}, expected {:?}", testcase, lineno, result, expected),
            }

            let stats = context.heap().stats();
            assert_eq!(stats.free + stats.active, stats.capacity);
            assert_eq!(context.heap().pinned_count(), 0, "pins leaked after {:?}", source);
        }
        Ok(())
    }

    #[test]
    fn evaluate_testcase() -> anyhow::Result<()> {
        for testcase in all_testcases() {
            println!("Running testcase {}", testcase);
            let entries = load_test_pair(testcase)?;
            assert_run(testcase, &entries)?;
        }
        Ok(())
    }

    #[test]
    fn variadic_arithmetic() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(run(&mut context, "(+ 1 2 3)")?, "6");
        Ok(())
    }

    #[test]
    fn closures_square() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define square (lambda (x) (* x x)))")?;
        assert_eq!(run(&mut context, "(square 5)")?, "25");
        Ok(())
    }

    #[test]
    fn conditional_on_numeric_equality() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(run(&mut context, "(if (eq 1 1) 10 20)")?, "10");
        assert_eq!(run(&mut context, "(if (eq 1 2) 10 20)")?, "20");
        Ok(())
    }

    #[test]
    fn setq_requires_a_declaration() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(
            run(&mut context, "(setq y 5)"),
            Err(LispError::AssignUndeclared("y".to_owned()))
        );
        run(&mut context, "(define y 1)")?;
        assert_eq!(run(&mut context, "(setq y 5)")?, "5");
        assert_eq!(run(&mut context, "y")?, "5");
        Ok(())
    }

    #[test]
    fn pairs_and_their_parts() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define p (cons 1 2))")?;
        assert_eq!(run(&mut context, "(car p)")?, "1");
        assert_eq!(run(&mut context, "(cdr p)")?, "2");
        assert_eq!(run(&mut context, "p")?, "(1 . 2)");
        assert_eq!(run(&mut context, "(car 5)")?, "nil");
        Ok(())
    }

    #[test]
    fn unbound_symbol_is_reported() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(
            run(&mut context, "(+ 1 nothing)"),
            Err(LispError::UnboundSymbol("nothing".to_owned()))
        );
        // The context keeps working after an error.
        assert_eq!(run(&mut context, "(+ 1 1)")?, "2");
        Ok(())
    }

    #[test]
    fn applying_a_number_is_bad_apply() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(run(&mut context, "(1 2)"), Err(LispError::BadApply("fixnum")));
        Ok(())
    }

    #[test]
    fn closures_share_their_environment() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define get-n (lambda () n))")?;
        assert_eq!(
            run(&mut context, "(get-n)"),
            Err(LispError::UnboundSymbol("n".to_owned()))
        );
        run(&mut context, "(define n 7)")?;
        assert_eq!(run(&mut context, "(get-n)")?, "7");
        run(&mut context, "(setq n 8)")?;
        assert_eq!(run(&mut context, "(get-n)")?, "8");
        Ok(())
    }

    #[test]
    fn procedures_extend_their_defining_environment() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define x 1)")?;
        run(&mut context, "(define show-x (lambda () x))")?;
        run(&mut context, "(define shadow (lambda (x) (show-x)))")?;
        // Lexical scope: the caller's x is not visible to show-x.
        assert_eq!(run(&mut context, "(shadow 99)")?, "1");
        Ok(())
    }

    #[test]
    fn parameters_shadow_globals() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define x 1)")?;
        assert_eq!(run(&mut context, "((lambda (x) (+ x 1)) 10)")?, "11");
        assert_eq!(run(&mut context, "x")?, "1");
        Ok(())
    }

    #[test]
    fn define_inside_a_body_updates_an_outer_binding() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define counter 0)")?;
        run(&mut context, "(define bump (lambda () (define counter (+ counter 1))))")?;
        run(&mut context, "(bump)")?;
        run(&mut context, "(bump)")?;
        assert_eq!(run(&mut context, "counter")?, "2");
        Ok(())
    }

    #[test]
    fn define_of_a_new_name_inside_a_body_stays_local() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define f (lambda () (define local 5) (+ local 1)))")?;
        assert_eq!(run(&mut context, "(f)")?, "6");
        assert_eq!(
            run(&mut context, "local"),
            Err(LispError::UnboundSymbol("local".to_owned()))
        );
        Ok(())
    }

    #[test]
    fn setq_assigns_the_innermost_binding() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define x 1)")?;
        assert_eq!(run(&mut context, "((lambda (x) (setq x 5) x) 2)")?, "5");
        assert_eq!(run(&mut context, "x")?, "1");
        Ok(())
    }

    #[test]
    fn arity_mismatch_binds_nil_and_drops_extras() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define second (lambda (a b) b))")?;
        assert_eq!(run(&mut context, "(second 1)")?, "nil");
        assert_eq!(run(&mut context, "(second 1 2 3)")?, "2");
        Ok(())
    }

    #[test]
    fn body_forms_run_in_sequence() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(&mut context, "(define x 0)")?;
        assert_eq!(run(&mut context, "((lambda () (setq x 1) (setq x (+ x 1)) (* x 10)))")?, "20");
        assert_eq!(run(&mut context, "((lambda ()))")?, "nil");
        Ok(())
    }

    #[test]
    fn quote_returns_its_operand_unevaluated() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(run(&mut context, "'(a b . c)")?, "(a b . c)");
        assert_eq!(run(&mut context, "(quote undefined-name)")?, "undefined-name");
        Ok(())
    }

    #[test]
    fn self_evaluating_values() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(run(&mut context, "\"text\"")?, "\"text\"");
        assert_eq!(run(&mut context, "car")?, "<PRIM>");
        assert_eq!(run(&mut context, "(lambda (x) x)")?, "<PROC>");
        assert_eq!(run(&mut context, "t")?, "t");
        assert_eq!(run(&mut context, "nil")?, "nil");
        Ok(())
    }

    #[test]
    fn define_needs_a_symbol_target() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        assert_eq!(run(&mut context, "(define 5 6)").map_err(|e| e.name()), Err("MalformedInput"));
        Ok(())
    }

    #[test]
    fn recursion_survives_collection() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(
            &mut context,
            "(define fact (lambda (n) (if (eq n 0) 1 (* n (fact (- n 1))))))",
        )?;
        for _ in 0..20 {
            assert_eq!(run(&mut context, "(fact 10)")?, "3628800");
        }
        assert!(context.heap().stats().collections > 0);
        Ok(())
    }

    #[test]
    fn deep_live_recursion_runs_out_of_memory() -> anyhow::Result<()> {
        let mut context = EvaluationContext::new()?;
        run(
            &mut context,
            "(define count (lambda (n) (if (eq n 0) 0 (+ 1 (count (- n 1))))))",
        )?;
        assert_eq!(run(&mut context, "(count 20)")?, "20");
        assert_eq!(run(&mut context, "(count 1000)"), Err(LispError::OutOfMemory));
        // Everything the failed call held was released with its pins.
        assert_eq!(run(&mut context, "(count 20)")?, "20");
        Ok(())
    }
}
