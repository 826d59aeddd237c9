use super::value::{lookup, Scope};
use super::*;
use crate::kernel::PolygonKernel;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn interpreter(limits: Limits, root: value::Env) -> Interpreter {
    Interpreter::new(
        Arc::new(PolygonKernel),
        root,
        Meter::new(limits, CancellationToken::new()),
    )
}

fn run_main_with(src: &str, limits: Limits) -> ScriptResult<Value> {
    let program = parse_program(src)?;
    let mut interp = interpreter(limits, Scope::new_root());
    let global = interp.run(&program)?;
    let main = lookup(&global, "main").expect("main defined");
    interp.call_value(&main, vec![])
}

fn run_main(src: &str) -> ScriptResult<Value> {
    run_main_with(src, Limits::default())
}

fn number(src: &str) -> f64 {
    match run_main(src) {
        Ok(Value::Number(n)) => n,
        other => panic!("expected a number from {:?}, got {:?}", src, other),
    }
}

fn string(src: &str) -> String {
    match run_main(src) {
        Ok(Value::Str(s)) => s.to_string(),
        other => panic!("expected a string from {:?}, got {:?}", src, other),
    }
}

#[test]
fn test_arithmetic_and_precedence() {
    assert_eq!(number("function main() { return 1 + 2 * 3 - 4 / 2; }"), 5.0);
    assert_eq!(number("function main() { return 2 ** 3 ** 2; }"), 512.0);
    assert_eq!(number("function main() { return 7 % 4 + -(-1); }"), 4.0);
}

#[test]
fn test_string_concatenation() {
    assert_eq!(string("function main() { return 'n=' + 3 + 1; }"), "n=31");
    assert_eq!(string("function main() { return [1, 2, 3].join('-'); }"), "1-2-3");
    assert_eq!(string("function main() { return (2.5).toFixed(2); }"), "2.50");
}

#[test]
fn test_closures_and_defaults() {
    let src = r#"
        const makeCounter = (start = 10) => {
            let n = start
            return () => ++n
        }
        function main() {
            const next = makeCounter()
            next()
            return next()
        }
    "#;
    assert_eq!(number(src), 12.0);
}

#[test]
fn test_function_declarations_are_hoisted() {
    let src = "function main() { return helper(4); }\nfunction helper(x) { return x * x; }";
    assert_eq!(number(src), 16.0);
}

#[test]
fn test_destructuring() {
    let src = r#"
        function main() {
            const { a, b: renamed = 5, ...rest } = { a: 1, c: 3, d: 4 }
            const [x, , y = 7, ...tail] = [10, 20, undefined, 30, 40]
            return a + renamed + rest.c + rest.d + x + y + tail.length
        }
    "#;
    assert_eq!(number(src), 1.0 + 5.0 + 3.0 + 4.0 + 10.0 + 7.0 + 2.0);
}

#[test]
fn test_parameter_destructuring_and_rest() {
    let src = r#"
        const size = ({ width = 1, depth = 2 } = {}) => width * depth
        const sum = (...xs) => xs.reduce((acc, x) => acc + x, 0)
        function main() { return size() + size({ width: 3 }) + sum(1, 2, 3) }
    "#;
    assert_eq!(number(src), 2.0 + 6.0 + 6.0);
}

#[test]
fn test_loops_break_continue() {
    let src = r#"
        function main() {
            let total = 0
            for (let i = 0; i < 10; i++) {
                if (i % 2 == 0) continue
                if (i > 7) break
                total += i
            }
            for (const [k, v] of [[1, 2], [3, 4]]) total += k * v
            let n = 3
            while (n > 0) { total += 100; n-- }
            return total
        }
    "#;
    assert_eq!(number(src), (1.0 + 3.0 + 5.0 + 7.0) + 14.0 + 300.0);
}

#[test]
fn test_array_methods() {
    let src = r#"
        function main() {
            const xs = [3, 1, 2]
            xs.push(4)
            const doubled = xs.map(x => x * 2)
            const big = doubled.filter(x => x > 3)
            const nested = [[1, [2]], [3]].flat()
            return big.length * 100 + nested.length * 10 + (xs.includes(4) ? 1 : 0)
        }
    "#;
    assert_eq!(number(src), 300.0 + 30.0 + 1.0);
}

#[test]
fn test_spread_in_calls_and_literals() {
    let src = r#"
        const add3 = (a, b, c) => a + b + c
        function main() {
            const parts = [1, 2]
            const obj = { ...{ x: 1 }, y: 2 }
            return add3(...parts, 3) + [...parts, ...parts].length + obj.x + obj.y
        }
    "#;
    assert_eq!(number(src), 6.0 + 4.0 + 3.0);
}

#[test]
fn test_compound_assignment_evaluates_target_once() {
    let src = r#"
        function main() {
            const xs = [0, 0, 0]
            let i = 0
            xs[i++] += 5
            return xs[0] * 10 + i
        }
    "#;
    assert_eq!(number(src), 51.0);
}

#[test]
fn test_typeof_undeclared_is_undefined() {
    assert_eq!(string("function main() { return typeof nothingHere; }"), "undefined");
    assert_eq!(string("function main() { return typeof main; }"), "function");
}

#[test]
fn test_const_reassignment_fails() {
    let err = run_main("function main() { const a = 1; a = 2; return a; }").unwrap_err();
    assert!(matches!(err, ScriptError::Type(_)));
}

#[test]
fn test_redeclaration_fails() {
    let err = run_main("let a = 1;\nlet a = 2;\nfunction main() { return a; }").unwrap_err();
    assert!(matches!(err, ScriptError::Syntax { line: 2, .. }));
}

#[test]
fn test_undefined_name_is_reference_error() {
    let err = run_main("function main() { return cube({ size: 1 }); }").unwrap_err();
    assert_eq!(err, ScriptError::Reference("cube is not defined".into()));
}

#[test]
fn test_calling_non_function_names_the_callee() {
    let err = run_main("function main() { const o = { a: 1 }; return o.a(); }").unwrap_err();
    assert_eq!(err, ScriptError::Type("o.a is not a function".into()));
}

#[test]
fn test_reading_property_of_undefined() {
    let err = run_main("function main() { let o; return o.size; }").unwrap_err();
    assert!(err.to_string().contains("reading 'size'"));
}

#[test]
fn test_throw_uses_message() {
    let err = run_main("function main() { throw { message: 'bad part' }; }").unwrap_err();
    assert_eq!(err, ScriptError::Thrown("bad part".into()));
    assert_eq!(err.to_string(), "Uncaught bad part");
}

#[test]
fn test_infinite_loop_exhausts_step_budget() {
    let limits = Limits {
        max_steps: 50_000,
        ..Limits::default()
    };
    let err = run_main_with("function main() { while (true) {} }", limits).unwrap_err();
    assert_eq!(err, ScriptError::BudgetExhausted(BudgetKind::Steps));
    assert!(err.is_timeout());
}

#[test]
fn test_deadline_stops_execution() {
    let limits = Limits {
        max_steps: u64::MAX,
        deadline: Some(Instant::now() + Duration::from_millis(20)),
        ..Limits::default()
    };
    let err = run_main_with("function main() { for (;;) {} }", limits).unwrap_err();
    assert_eq!(err, ScriptError::BudgetExhausted(BudgetKind::Deadline));
}

#[test]
fn test_cancellation_stops_execution() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let program = parse_program("function main() { while (true) {} }").unwrap();
    let mut interp = Interpreter::new(
        Arc::new(PolygonKernel),
        Scope::new_root(),
        Meter::new(Limits::default(), cancel),
    );
    let global = interp.run(&program).unwrap();
    let main = lookup(&global, "main").unwrap();
    assert_eq!(interp.call_value(&main, vec![]).unwrap_err(), ScriptError::Cancelled);
}

#[test]
fn test_unbounded_recursion_is_range_error() {
    let limits = Limits {
        max_call_depth: 32,
        ..Limits::default()
    };
    let src = "function f(n) { return f(n + 1); }\nfunction main() { return f(0); }";
    let err = run_main_with(src, limits).unwrap_err();
    assert!(matches!(err, ScriptError::Range(_)));
}

#[test]
fn test_array_growth_is_bounded() {
    let limits = Limits {
        max_array_len: 1000,
        ..Limits::default()
    };
    let src = "function main() { const xs = []; for (;;) xs.push(1); }";
    assert!(matches!(run_main_with(src, limits), Err(ScriptError::Range(_))));
}

fn small_allocation_budget() -> Limits {
    Limits {
        max_alloc_bytes: 32 << 20,
        ..Limits::default()
    }
}

#[test]
fn test_length_assignment_is_charged() {
    let limits = Limits {
        max_steps: 2000,
        max_alloc_bytes: 32 << 20,
        ..Limits::default()
    };
    let src = r#"
        function main() {
            const keep = [];
            for (let i = 0; i < 40; i++) {
                const b = [];
                b.length = 1048576;
                keep.push(b);
            }
            return keep.length;
        }
    "#;
    let err = run_main_with(src, limits).unwrap_err();
    assert_eq!(err, ScriptError::BudgetExhausted(BudgetKind::Memory));
    assert!(!err.is_timeout());
}

#[test]
fn test_concat_copies_are_charged() {
    let src = r#"
        function main() {
            const big = [];
            big.length = 1000000;
            const keep = [];
            for (let i = 0; i < 100; i++) keep.push(big.concat([i]));
            return keep.length;
        }
    "#;
    assert_eq!(
        run_main_with(src, small_allocation_budget()).unwrap_err(),
        ScriptError::BudgetExhausted(BudgetKind::Memory)
    );
}

#[test]
fn test_derived_strings_are_charged() {
    let src = r#"
        function main() {
            let s = "x";
            for (let i = 0; i < 20; i++) s = s + s;
            const keep = [];
            for (let i = 0; i < 1000; i++) keep.push(s.toUpperCase());
            return keep.length;
        }
    "#;
    assert_eq!(
        run_main_with(src, small_allocation_budget()).unwrap_err(),
        ScriptError::BudgetExhausted(BudgetKind::Memory)
    );
}

#[test]
fn test_ordinary_programs_stay_within_allocation_budget() {
    let src = r#"
        function main() {
            const xs = [];
            for (let i = 0; i < 10000; i++) xs.push([i, i * 2, i * 3]);
            return xs.map((p) => p[0]).concat([1, 2]).length;
        }
    "#;
    assert_eq!(number(src), 10002.0);
}

fn forty_two(_: &mut Interpreter, _: Vec<Value>) -> ScriptResult<Value> {
    Ok(Value::Number(42.0))
}

#[test]
fn test_native_functions_from_root_scope() {
    let root = Scope::new_root();
    root.borrow_mut()
        .declare(Rc::from("answer"), Value::native("answer", forty_two), false);
    let program = parse_program("function main() { return answer() + 1; }").unwrap();
    let mut interp = interpreter(Limits::default(), root);
    let global = interp.run(&program).unwrap();
    let main = lookup(&global, "main").unwrap();
    assert!(matches!(interp.call_value(&main, vec![]), Ok(Value::Number(n)) if n == 43.0));
}

#[test]
fn test_program_may_shadow_root_names() {
    let root = Scope::new_root();
    root.borrow_mut()
        .declare(Rc::from("answer"), Value::native("answer", forty_two), false);
    let program = parse_program("const answer = () => 7;\nfunction main() { return answer(); }").unwrap();
    let mut interp = interpreter(Limits::default(), root);
    let global = interp.run(&program).unwrap();
    let main = lookup(&global, "main").unwrap();
    assert!(matches!(interp.call_value(&main, vec![]), Ok(Value::Number(n)) if n == 7.0));
}
