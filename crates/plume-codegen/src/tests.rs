use plume_ast::names::NameGen;

use crate::c_ast::{CDef, CType, CUnit};
use crate::{emit, generate};

fn compile(source: &str) -> (CUnit, String) {
    let (module, errors) = plume_parser::parse(source);
    assert!(errors.is_empty(), "parse errors: {:?}", errors);
    let program = plume_typeck::check(&module).expect("program type checks");
    let mut names = NameGen::new();
    let unit = generate(&program, &mut names).expect("code generation succeeds");
    let text = emit(&unit);
    (unit, text)
}

fn struct_fields<'u>(unit: &'u CUnit, pred: impl Fn(&str) -> bool) -> Vec<&'u (smol_str::SmolStr, CType)> {
    for def in &unit.defs {
        if let CDef::Struct { name, fields } = def {
            if pred(name) {
                return fields.iter().collect();
            }
        }
    }
    panic!("no struct matching predicate");
}

// ── Closure conversion ───────────────────────────────────────────

#[test]
fn captured_names_become_env_fields() {
    // S4: the inner lambda captures exactly `x`.
    let (unit, text) = compile(
        "val adder = (x: Int) => (y: Int) => x + y;
         val main = () => { val add3 = adder(3); printlnInt(add3(4)) }",
    );
    let fields = struct_fields(&unit, |n| n.starts_with("fn__") && n.ends_with("_env"));
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].0, "x");
    assert_eq!(fields[0].1, CType::Int);
    assert!(text.contains("malloc"), "environment is heap allocated");
    assert!(text.contains("->x = "), "capture is stored into the env");
}

#[test]
fn lifted_function_takes_env_first() {
    let (unit, _) = compile(
        "val adder = (x: Int) => (y: Int) => x + y;
         val main = () => printlnInt(adder(1)(2))",
    );
    let lifted = unit
        .defs
        .iter()
        .find_map(|d| match d {
            CDef::Func(f) if f.name.starts_with("fn__") => Some(f),
            _ => None,
        })
        .expect("inner lambda lifted");
    assert_eq!(lifted.params[0].0, "env");
    assert!(matches!(lifted.params[0].1, CType::Ptr(_)));
}

#[test]
fn non_capturing_lambda_is_a_plain_function() {
    let (unit, text) = compile(
        "val inc = (n: Int) => n + 1;
         val main = () => printlnInt(inc(41))",
    );
    let inc = unit
        .defs
        .iter()
        .find_map(|d| match d {
            CDef::Func(f) if f.name.starts_with("inc__") => Some(f),
            _ => None,
        })
        .expect("inc lifted under its binding name");
    // Uniform calling convention: an (unused) void* env slot.
    assert_eq!(inc.params.len(), 2);
    assert_eq!(inc.params[0].1, CType::Void.ptr());
    assert!(text.contains("(NULL, 41)"), "direct call with null env");
}

#[test]
fn mutual_recursion_resolves_to_direct_calls() {
    // S2: peers call each other by their pre-assigned function names.
    let (_, text) = compile(
        "val main = () => {
           val isEven = (n: Int) => if n == 0 then 1 else isOdd(n - 1);
           val isOdd = (n: Int) => if n == 0 then 0 else isEven(n - 1);
           printlnInt(isEven(readInt()))
         }",
    );
    assert!(text.contains("isEven__"), "isEven lifted");
    assert!(text.contains("isOdd__"), "isOdd lifted");
    assert!(
        text.contains("isOdd__2(NULL, "),
        "peer reference is a direct call:\n{}",
        text
    );
}

// ── Classes ──────────────────────────────────────────────────────

#[test]
fn class_lowers_to_struct_and_constructor() {
    // S1.
    let (unit, text) = compile(
        "class Main { val fact: Int => Int = (n: Int) => if n <= 1 then 1 else n * fact(n - 1); val main = () => printlnInt(fact(readInt())) }",
    );
    let fields = struct_fields(&unit, |n| n.starts_with("Main_struct__"));
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].0, "fact");
    assert!(matches!(&fields[0].1, CType::Ptr(inner) if **inner == CType::Struct("closure".into())));
    assert!(text.contains("Main_new__"), "constructor emitted and called");
    assert!(
        text.contains("->self->fact"),
        "method reaches members through self:\n{}",
        text
    );
}

#[test]
fn constructor_initializes_members_in_order() {
    let (unit, _) = compile(
        "class Counter(start: Int) {
           var count: Int = start;
           val incr = (n: Int) => count = count + n
         }
         val main = () => {
           val c = new Counter(3);
           c.incr(4);
           printlnInt(c.count)
         }",
    );
    let ctor = unit
        .defs
        .iter()
        .find_map(|d| match d {
            CDef::Func(f) if f.name.starts_with("Counter_new__") => Some(f),
            _ => None,
        })
        .expect("constructor function");
    assert_eq!(ctor.params.len(), 1, "one constructor parameter");
    assert!(matches!(ctor.ret, CType::Ptr(_)));
}

// ── Entry points ─────────────────────────────────────────────────

#[test]
fn top_level_main_called_directly() {
    let (_, text) = compile("val main = () => printlnInt(7)");
    assert!(text.contains("int main(void) {"));
    assert!(text.contains("main__0(NULL);"), "user main called once:\n{}", text);
}

#[test]
fn class_main_instantiated_then_called() {
    let (_, text) = compile(
        "class Main { val main = () => printlnInt(9) }",
    );
    assert!(text.contains("Main_new__"), "Main instantiated");
    assert!(text.contains("->main->fun"), "member closure invoked");
}

// ── Arrays, strings, operators ───────────────────────────────────

#[test]
fn arrays_allocate_and_index() {
    let (_, text) = compile(
        "val main = () => {
           val a: Array[Int] = [5];
           a(0) = 1;
           printlnInt(a(0))
         }",
    );
    assert!(text.contains("malloc"));
    assert!(text.contains("sizeof(int)"));
    assert!(text.contains("[0]"));
}

#[test]
fn pow_lowers_to_helpers() {
    let (_, text) = compile(
        "val a = 2 ^ 10;
         val b = 2.0 ^ 10.0;
         val main = () => { printlnInt(a); printlnFloat(b) }",
    );
    assert!(text.contains("plume_ipow(2, 10)"), "{}", text);
    assert!(text.contains("pow(2.0, 10.0)"), "{}", text);
    assert!(text.contains("#include <math.h>"));
}

#[test]
fn printlns_lower_to_printf() {
    let (unit, text) = compile("val main = () => { printlnInt(1); printlnFloat(2.5) }");
    assert!(unit.need_stdio);
    assert!(text.contains("printf(\"%d\\n\", 1)"));
    assert!(text.contains("printf(\"%f\\n\", 2.5)"));
}

#[test]
fn read_builtins_emit_scanf_stubs() {
    let (_, text) = compile("val main = () => printlnInt(readInt())");
    assert!(text.contains("int plume_read_int(void)"));
    assert!(text.contains("scanf(\"%d\", &x)"));
}

// ── Properties ───────────────────────────────────────────────────

#[test]
fn mangling_is_deterministic() {
    // Given a fresh unique-name reset, compiling the same tree twice
    // yields byte-identical C.
    let source = "class Main { val fact: Int => Int = (n: Int) => if n <= 1 then 1 else n * fact(n - 1); val main = () => printlnInt(fact(readInt())) }";
    let (module, errors) = plume_parser::parse(source);
    assert!(errors.is_empty(), "parse errors: {:?}", errors);
    let program = plume_typeck::check(&module).expect("program type checks");
    let mut names = NameGen::new();
    let first = emit(&generate(&program, &mut names).expect("first pass"));
    names.reset();
    let second = emit(&generate(&program, &mut names).expect("second pass"));
    assert_eq!(first, second, "byte-identical output after a name reset");
}

#[test]
fn builtins_are_not_first_class() {
    let (module, errors) = plume_parser::parse("val p = printlnInt; val main = () => ()");
    assert!(errors.is_empty());
    let program = plume_typeck::check(&module).expect("typer accepts the binding");
    let mut names = NameGen::new();
    let err = generate(&program, &mut names).unwrap_err();
    assert!(err.message.contains("can only be called"), "{}", err);
}

#[test]
fn if_expression_uses_result_temporary() {
    let (_, text) = compile("val main = () => printlnInt(if 1 < 2 then 10 else 20)");
    assert!(text.contains("ifres__"), "{}", text);
    assert!(text.contains("if ((1 < 2)) {"));
}

#[test]
fn impure_while_condition_reevaluates() {
    let (_, text) = compile(
        "val main = () => {
           var keep = 0;
           while (if keep < 3 then true else false) do keep = keep + 1;
           printlnInt(keep)
         }",
    );
    assert!(text.contains("while (1) {"), "{}", text);
    assert!(text.contains("break;"), "{}", text);
}
