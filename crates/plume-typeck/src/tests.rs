use crate::*;

fn try_check(source: &str) -> Result<TypedProgram, TypeError> {
    let (module, errors) = plume_parser::parse(source);
    assert!(errors.is_empty(), "parse errors: {:?}", errors);
    check(&module)
}

fn check_ok(source: &str) -> TypedProgram {
    match try_check(source) {
        Ok(program) => program,
        Err(e) => panic!("unexpected type error: {}", e),
    }
}

fn check_err(source: &str) -> String {
    match try_check(source) {
        Ok(_) => panic!("expected a type error, got none"),
        Err(e) => e.message,
    }
}

fn local_ty<'p>(program: &'p TypedProgram, name: &str) -> &'p Ty {
    program
        .locals
        .iter()
        .find(|(_, l)| l.name == name)
        .map(|(_, l)| &l.ty)
        .unwrap_or_else(|| panic!("no local `{}`", name))
}

fn int_to_int() -> Ty {
    Ty::Lambda(vec![Ty::Int], Box::new(Ty::Int))
}

// ── Passing programs ─────────────────────────────────────────────

#[test]
fn arithmetic_binding() {
    let p = check_ok("val x = 1 + 2 * 3; val main = () => printlnInt(x)");
    assert_eq!(*local_ty(&p, "x"), Ty::Int);
}

#[test]
fn annotated_binding() {
    let p = check_ok("val x: Float = 1.5 / 2.0; val main = () => printlnFloat(x)");
    assert_eq!(*local_ty(&p, "x"), Ty::Float);
}

#[test]
fn lambda_types_from_annotations() {
    let p = check_ok("val add = (x: Int, y: Int) => x + y; val main = () => printlnInt(add(1, 2))");
    assert_eq!(
        *local_ty(&p, "add"),
        Ty::Lambda(vec![Ty::Int, Ty::Int], Box::new(Ty::Int))
    );
}

#[test]
fn factorial_in_class() {
    // S1: recursion through a class member.
    let p = check_ok(
        "class Main { val fact: Int => Int = (n: Int) => if n <= 1 then 1 else n * fact(n - 1); val main = () => printlnInt(fact(readInt())) }",
    );
    assert!(matches!(p.entry, Entry::ClassMain { .. }));
    let (_, class) = p.classes.iter().next().expect("one class");
    let fact = &class.members[class.member_index("fact").unwrap()];
    assert_eq!(fact.ty, int_to_int());
}

#[test]
fn mutual_recursion_in_block() {
    // S2: a recursive group inside main's body block.
    let p = check_ok(
        "val main = () => {
           val isEven = (n: Int) => if n == 0 then 1 else isOdd(n - 1);
           val isOdd = (n: Int) => if n == 0 then 0 else isEven(n - 1);
           printlnInt(isEven(readInt()))
         }",
    );
    assert_eq!(*local_ty(&p, "isEven"), int_to_int());
    assert_eq!(*local_ty(&p, "isOdd"), int_to_int());
}

#[test]
fn newton_loop_with_var() {
    // S3 shape: Float ops, while, var reassignment, capture-free lambda.
    check_ok(
        "val main = () => {
           val x = readFloat();
           printlnFloat(x);
           var guess = 1.0;
           val abs = (v: Float) => if v < 0.0 then -v else v;
           while abs(guess * guess - x) > 1e-5 do guess = (guess + x / guess) / 2.0;
           printlnFloat(guess)
         }",
    );
}

#[test]
fn lambda_capture() {
    // S4: nested lambda capturing the outer parameter.
    let p = check_ok(
        "val adder = (x: Int) => (y: Int) => x + y;
         val main = () => { val add3 = adder(3); printlnInt(add3(4)) }",
    );
    assert_eq!(
        *local_ty(&p, "adder"),
        Ty::Lambda(vec![Ty::Int], Box::new(int_to_int()))
    );
    assert_eq!(*local_ty(&p, "add3"), int_to_int());
}

#[test]
fn recursive_group_inference() {
    // S5: `g` is un-annotated and must come out as Int => Int.
    let p = check_ok(
        "val f = (n: Int) => if n == 0 then 1 else g(n - 1);
         val g = (n: Int) => f(n - 1);
         val main = () => printlnInt(f(3))",
    );
    assert_eq!(*local_ty(&p, "g"), int_to_int());
    assert_eq!(*local_ty(&p, "f"), int_to_int());
}

#[test]
fn top_level_main_entry() {
    let p = check_ok("val main = () => printlnInt(1)");
    assert!(matches!(p.entry, Entry::TopLevel(_)));
}

#[test]
fn class_with_ctor_params_and_members() {
    let p = check_ok(
        "class Counter(start: Int) {
           var count: Int = start;
           val incr = (n: Int) => count = count + n
         }
         val main = () => {
           val c = new Counter(10);
           c.incr(5);
           printlnInt(c.count)
         }",
    );
    let (_, class) = p.classes.iter().next().expect("one class");
    assert_eq!(class.ctor_params.len(), 1);
    assert!(class.sealed);
}

#[test]
fn select_before_class_declaration_uses_predicates() {
    let p = check_ok(
        "val read = (c: Counter) => c.count;
         class Counter { val count = 42 }
         val main = () => printlnInt(read(new Counter()))",
    );
    // The predicate discharged against the later-typed class.
    match local_ty(&p, "read") {
        Ty::Lambda(params, ret) => {
            assert!(matches!(params[0], Ty::Class(_)));
            assert_eq!(**ret, Ty::Int);
        }
        other => panic!("expected function type, got {:?}", other),
    }
}

#[test]
fn member_assignment_through_select() {
    check_ok(
        "class Box { var value: Int = 0 }
         val main = () => {
           val b = new Box();
           b.value = 7;
           printlnInt(b.value)
         }",
    );
}

#[test]
fn arrays_with_ascription() {
    check_ok(
        "val main = () => {
           val a: Array[Int] = [10];
           a(0) = 5;
           printlnInt(a(0))
         }",
    );
}

#[test]
fn array_parameter_indexing() {
    check_ok(
        "val sum2 = (arr: Array[Float]) => arr(0) + arr(1);
         val main = () => {
           val a: Array[Float] = [2];
           a(0) = 1.5;
           a(1) = 2.5;
           printlnFloat(sum2(a))
         }",
    );
}

#[test]
fn printf_variadic() {
    check_ok("val main = () => printf(\"%d %f\\n\", 1, 2.0)");
}

#[test]
fn while_loop_is_unit() {
    let p = check_ok(
        "val main = () => {
           var i = 0;
           while i < 3 do i = i + 1;
           printlnInt(i)
         }",
    );
    let has_while_unit = p
        .exprs
        .iter()
        .any(|(_, e)| matches!(e.kind, TExprKind::While { .. }) && e.ty == Ty::Unit);
    assert!(has_while_unit);
}

// ── Testable properties ──────────────────────────────────────────

#[test]
fn no_residual_type_variables() {
    let p = check_ok(
        "val f = (n: Int) => if n == 0 then 1 else g(n - 1);
         val g = (n: Int) => f(n - 1);
         val main = () => { val a: Array[Int] = [2]; a(0) = f(1); printlnInt(a(0)) }",
    );
    for (_, e) in p.exprs.iter() {
        assert!(!e.ty.has_var(), "residual variable in {:?}", e);
    }
    for (_, l) in p.locals.iter() {
        assert!(!l.ty.has_var(), "residual variable in local {}", l.name);
    }
    for (_, lam) in p.lambdas.iter() {
        assert!(!lam.ret.has_var());
        assert!(lam.params.iter().all(|(_, t)| !t.has_var()));
    }
}

#[test]
fn scope_lookup_soundness() {
    // Every `x` reference in the tree resolves to the binding's symbol.
    let p = check_ok("val x = 1; val main = () => printlnInt(x + x)");
    let x_sym = p
        .locals
        .iter()
        .find(|(_, l)| l.name == "x")
        .map(|(_, l)| l.sym)
        .unwrap();
    let mut refs = 0;
    for (_, e) in p.exprs.iter() {
        if let TExprKind::Ident(sid) = e.kind {
            if p.symbols[sid].name == "x" {
                assert_eq!(sid, x_sym);
                refs += 1;
            }
        }
    }
    assert_eq!(refs, 2);
}

#[test]
fn free_names_of_nested_capture() {
    let p = check_ok(
        "val adder = (x: Int) => (y: Int) => x + y;
         val main = () => printlnInt(adder(3)(4))",
    );
    let inner = p
        .lambdas
        .iter()
        .find(|(_, l)| l.params.len() == 1 && p.symbols[l.params[0].0].name == "y")
        .map(|(_, l)| l)
        .expect("inner lambda");
    let free_names: Vec<_> = inner.free.iter().map(|&s| p.symbols[s].name.clone()).collect();
    assert_eq!(free_names, vec!["x"]);

    let outer = p
        .lambdas
        .iter()
        .find(|(_, l)| l.params.len() == 1 && p.symbols[l.params[0].0].name == "x")
        .map(|(_, l)| l)
        .expect("outer lambda");
    assert!(outer.free.is_empty(), "outer lambda captures nothing");
}

#[test]
fn free_names_include_recursive_siblings() {
    let p = check_ok(
        "val main = () => {
           val isEven = (n: Int) => if n == 0 then 1 else isOdd(n - 1);
           val isOdd = (n: Int) => if n == 0 then 0 else isEven(n - 1);
           printlnInt(isEven(2))
         }",
    );
    let is_even = p
        .lambdas
        .iter()
        .find(|(_, l)| l.name_hint == "isEven")
        .map(|(_, l)| l)
        .unwrap();
    let free: Vec<_> = is_even.free.iter().map(|&s| p.symbols[s].name.clone()).collect();
    assert_eq!(free, vec!["isOdd"]);
}

#[test]
fn operator_table_totality() {
    // Permitted combinations type-check; everything else is rejected at
    // the operator span.
    for op in ["+", "-", "*", "/", "^"] {
        check_ok(&format!("val a = 1 {op} 2; val main = () => ()", op = op));
        check_ok(&format!("val a = 1.0 {op} 2.0; val main = () => ()", op = op));
        check_err(&format!("val a = 1 {op} 2.0; val main = () => ()", op = op));
        check_err(&format!("val a = true {op} false; val main = () => ()", op = op));
    }
    check_ok("val a = 7 % 2; val main = () => ()");
    check_err("val a = 7.0 % 2.0; val main = () => ()");
    for op in ["<", "<=", ">", ">="] {
        let p = check_ok(&format!("val a = 1 {op} 2; val main = () => ()", op = op));
        assert_eq!(*local_ty(&p, "a"), Ty::Bool);
        check_ok(&format!("val a = 1.0 {op} 2.0; val main = () => ()", op = op));
        check_err(&format!("val a = true {op} false; val main = () => ()", op = op));
    }
    for op in ["&&", "||"] {
        check_ok(&format!("val a = true {op} false; val main = () => ()", op = op));
        check_err(&format!("val a = 1 {op} 2; val main = () => ()", op = op));
    }
    for op in ["==", "!="] {
        check_ok(&format!("val a = 1 {op} 2; val main = () => ()", op = op));
        check_ok(&format!("val a = 1.0 {op} 2.0; val main = () => ()", op = op));
        check_ok(&format!("val a = true {op} false; val main = () => ()", op = op));
        check_err(&format!("val a = 1 {op} 2.0; val main = () => ()", op = op));
    }
}

#[test]
fn unary_operators() {
    check_ok("val a = !true; val main = () => ()");
    check_ok("val a = -1; val b = -1.5; val main = () => ()");
    check_err("val a = !1; val main = () => ()");
    check_err("val a = -true; val main = () => ()");
}

// ── Errors ───────────────────────────────────────────────────────

#[test]
fn immutable_reassignment_rejected() {
    // S6.
    let msg = check_err("val main = () => { val x = 1; x = 2; printlnInt(x) }");
    assert!(msg.contains("can not assign to immutable"), "got: {}", msg);
}

#[test]
fn unknown_symbol() {
    let msg = check_err("val main = () => printlnInt(nope)");
    assert!(msg.contains("unknown symbol"), "got: {}", msg);
}

#[test]
fn branch_type_mismatch_is_immediate() {
    let msg = check_err("val main = () => { val r = if true then 1 else 1.5; printlnInt(r) }");
    assert!(msg.contains("branches of if"), "got: {}", msg);
}

#[test]
fn apply_arity_mismatch() {
    let msg = check_err("val f = (x: Int) => x; val main = () => printlnInt(f(1, 2))");
    assert!(msg.contains("expected 1 argument"), "got: {}", msg);
}

#[test]
fn apply_non_function() {
    let msg = check_err("val main = () => { val x = 1; printlnInt(x(2)) }");
    assert!(msg.contains("can not be applied"), "got: {}", msg);
}

#[test]
fn new_arity_mismatch() {
    let msg = check_err(
        "class Point(x: Int, y: Int) { val sum = x + y }
         val main = () => { val p = new Point(1); printlnInt(p.sum) }",
    );
    assert!(msg.contains("expects 2 argument"), "got: {}", msg);
}

#[test]
fn select_on_non_class() {
    let msg = check_err("val main = () => { val x = 1; printlnInt(x.field) }");
    assert!(msg.contains("non-class"), "got: {}", msg);
}

#[test]
fn missing_member_predicate_unsatisfied() {
    let msg = check_err(
        "val read = (c: Counter) => c.missing;
         class Counter { val count = 0 }
         val main = () => printlnInt(read(new Counter()))",
    );
    assert!(msg.contains("has no member"), "got: {}", msg);
}

#[test]
fn assignment_to_non_lvalue() {
    let msg = check_err(
        "class A { val x = 1 }
         val main = () => { val a = new A(); a.x = 2; printlnInt(a.x) }",
    );
    assert!(msg.contains("can not assign"), "got: {}", msg);
}

#[test]
fn ascription_mismatch() {
    let msg = check_err("val x: Int = 1.5; val main = () => ()");
    assert!(msg.contains("type mismatch"), "got: {}", msg);
}

#[test]
fn lambda_return_ascription_is_hard_equality() {
    let msg = check_err("val f = (n: Int): Float => n; val main = () => ()");
    assert!(msg.contains("lambda body has type"), "got: {}", msg);
}

#[test]
fn condition_must_be_boolean() {
    let msg = check_err("val main = () => { while 1 do printlnInt(1); () }");
    assert!(msg.contains("type mismatch"), "got: {}", msg);
}

#[test]
fn duplicate_definition_in_frame() {
    let msg = check_err("val x = 1; val x = 2; val main = () => ()");
    assert!(msg.contains("duplicate definition"), "got: {}", msg);
}

#[test]
fn missing_main_rejected() {
    let msg = check_err("val x = 1");
    assert!(msg.contains("main"), "got: {}", msg);
}

#[test]
fn wrong_main_type_rejected() {
    let msg = check_err("val main = (x: Int) => ()");
    assert!(msg.contains("main must have type"), "got: {}", msg);
}

#[test]
fn unconstrained_array_element_fails_instantiation() {
    let msg = check_err("val main = () => { val a = [3]; printlnInt(1) }");
    assert!(msg.contains("can not instantiate"), "got: {}", msg);
}

#[test]
fn printf_first_argument_must_be_string() {
    let msg = check_err("val main = () => printf(42)");
    assert!(msg.contains("String"), "got: {}", msg);
}

#[test]
fn infinite_type_rejected() {
    let msg = check_err("val f = (n: Int) => f; val main = () => ()");
    assert!(msg.contains("infinite type"), "got: {}", msg);
}
