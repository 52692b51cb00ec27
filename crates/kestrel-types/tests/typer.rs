//! Integration tests for the expression typer, built from hand-assembled
//! surface trees.

use kestrel_ast::ast::{
    BinOp, Define, EffectDecl, Expr, HandleCase, LambdaExpr, Module, Param, PureCase, RecordDecl,
    RecordItem, RecordRow, Stmt, Toplevel, TypeExpr, TypeVar,
};
use kestrel_types::{
    type_module, type_toplevel, CheckError, GlobalEnv, TermKind, Type, TypeErrorKind,
    TypedToplevel,
};

fn ty(name: &str) -> TypeExpr {
    TypeExpr::named(name)
}

/// `Log.log(string) => void`, `Stdio.print(string) => void`, `Read.read() => string`.
fn prelude() -> GlobalEnv {
    let mut global = GlobalEnv::new();
    for decl in [
        EffectDecl::new("Log", vec![("log", vec![ty("string")], ty("void"))]),
        EffectDecl::new("Stdio", vec![("print", vec![ty("string")], ty("void"))]),
        EffectDecl::new("Read", vec![("read", vec![], ty("string"))]),
    ] {
        type_toplevel(&mut global, &Toplevel::Effect(decl)).unwrap();
    }
    global
}

fn define_ok(global: &mut GlobalEnv, def: Define) -> Type {
    match type_toplevel(global, &Toplevel::Define(def)) {
        Ok(TypedToplevel::Define { term, .. }) => term.is,
        other => panic!("expected a definition, got {other:?}"),
    }
}

fn expr_ok(global: &mut GlobalEnv, expr: Expr) -> Type {
    match type_toplevel(global, &Toplevel::Expr(expr)) {
        Ok(TypedToplevel::Expr(term)) => term.is,
        other => panic!("expected an expression, got {other:?}"),
    }
}

fn type_err(global: &mut GlobalEnv, item: Toplevel) -> TypeErrorKind {
    match type_toplevel(global, &item) {
        Err(CheckError::Type(err)) => err.kind,
        other => panic!("expected a type error, got {other:?}"),
    }
}

fn thunk_ty(effects: Vec<&str>, ret: &str) -> TypeExpr {
    TypeExpr::lambda(vec![], effects, ty(ret))
}

/// `collect = (fn: () ={Log}> void): string ={}> handle(fn) { Log.log(v, k) => v ++ "\n" ++ collect(k); pure(a) => "end" }`
fn collect_def() -> Define {
    let case = HandleCase::new(
        "Log",
        "log",
        vec!["v"],
        "k",
        Expr::binary(
            Expr::binary(Expr::var("v"), BinOp::Concat, Expr::string("\n")),
            BinOp::Concat,
            Expr::call(Expr::var("collect"), vec![Expr::var("k")]),
        ),
    );
    let body = Expr::handle(
        Expr::var("fn"),
        vec![case],
        PureCase::new("a", Expr::string("end")),
    );
    Define::new(
        "collect",
        None,
        Expr::lambda(
            LambdaExpr::new(vec![Param::new("fn", thunk_ty(vec!["Log"], "void"))], body)
                .with_ret(ty("string"))
                .with_effects(vec![]),
        ),
    )
}

// ============================================================================
// Literals, operators, blocks
// ============================================================================

#[test]
fn operators_resolve_through_builtins() {
    let mut global = prelude();
    let sum = Expr::binary(Expr::int(1), BinOp::Add, Expr::int(2));
    assert_eq!(expr_ok(&mut global, sum), Type::int());

    let eq = Expr::binary(Expr::string("a"), BinOp::Eq, Expr::string("b"));
    assert_eq!(expr_ok(&mut global, eq), Type::bool_());
}

#[test]
fn generic_operator_requires_homogeneous_operands() {
    let mut global = prelude();
    let eq = Expr::binary(Expr::string("a"), BinOp::Eq, Expr::int(1));
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(eq)),
        TypeErrorKind::TypeMismatch { .. }
    ));
}

#[test]
fn unbound_identifier_is_reported() {
    let mut global = prelude();
    assert_eq!(
        type_err(&mut global, Toplevel::Expr(Expr::var("nope"))),
        TypeErrorKind::UnboundIdentifier("nope".to_string())
    );
}

#[test]
fn block_type_is_last_expression() {
    let mut global = prelude();
    let block = Expr::block(vec![
        Stmt::let_("x", Expr::int(2)),
        Stmt::expr(Expr::binary(Expr::var("x"), BinOp::Mul, Expr::int(3))),
    ]);
    assert_eq!(expr_ok(&mut global, block), Type::int());

    let trailing_let = Expr::block(vec![Stmt::let_("x", Expr::int(2))]);
    assert_eq!(expr_ok(&mut global, trailing_let), Type::void());
}

#[test]
fn if_without_else_must_be_void() {
    let mut global = prelude();
    let bad = Expr::if_(Expr::bool(true), Expr::int(1), None);
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(bad)),
        TypeErrorKind::TypeMismatch { .. }
    ));

    let good = Expr::if_(Expr::bool(true), Expr::int(1), Some(Expr::int(2)));
    assert_eq!(expr_ok(&mut global, good), Type::int());
}

#[test]
fn rest_builtin_takes_any_number_of_arguments() {
    let mut global = prelude();
    let call = Expr::call(
        Expr::var("concatAll"),
        vec![Expr::string("a"), Expr::string("b"), Expr::string("c")],
    );
    assert_eq!(expr_ok(&mut global, call), Type::string());

    let bad = Expr::call(Expr::var("concatAll"), vec![Expr::int(1)]);
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(bad)),
        TypeErrorKind::TypeMismatch { .. }
    ));
}

// ============================================================================
// raise / handle
// ============================================================================

#[test]
fn raise_with_wrong_arity_is_a_compile_error() {
    let mut global = prelude();
    let f = Expr::thunk(Expr::raise(
        "Log",
        "log",
        vec![Expr::string("a"), Expr::string("b")],
    ));
    assert_eq!(
        type_err(&mut global, Toplevel::Define(Define::new("f", None, f))),
        TypeErrorKind::ArityMismatch {
            expected: 1,
            found: 2
        }
    );
}

#[test]
fn raise_of_unknown_constructor() {
    let mut global = prelude();
    let f = Expr::thunk(Expr::raise("Log", "shout", vec![]));
    assert!(matches!(
        type_err(&mut global, Toplevel::Define(Define::new("f", None, f))),
        TypeErrorKind::UnknownEffectConstructor { .. }
    ));
}

#[test]
fn lambda_infers_raised_effects() {
    let mut global = prelude();
    let f = Expr::thunk(Expr::block(vec![
        Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("a")])),
        Stmt::expr(Expr::raise("Read", "read", vec![])),
    ]));
    let is = define_ok(&mut global, Define::new("f", None, f));
    assert_eq!(global.show_type(&is), "() ={Log, Read}> string");
}

#[test]
fn declared_effects_must_cover_the_body() {
    let mut global = prelude();
    let f = Expr::lambda(
        LambdaExpr::new(vec![], Expr::raise("Log", "log", vec![Expr::string("a")]))
            .with_effects(vec!["Stdio"]),
    );
    assert_eq!(
        type_err(&mut global, Toplevel::Define(Define::new("f", None, f))),
        TypeErrorKind::UndeclaredEffect {
            effect: "Log".to_string()
        }
    );
}

#[test]
fn toplevel_expression_may_not_leak_effects() {
    let mut global = prelude();
    let raise = Expr::raise("Log", "log", vec![Expr::string("a")]);
    assert_eq!(
        type_err(&mut global, Toplevel::Expr(raise)),
        TypeErrorKind::UnhandledEffect {
            effects: "{Log}".to_string()
        }
    );
}

#[test]
fn handle_over_effect_the_target_cannot_raise() {
    let mut global = prelude();
    let handle = Expr::handle(
        Expr::thunk(Expr::string("quiet")),
        vec![HandleCase::new("Log", "log", vec!["v"], "k", Expr::string("x"))],
        PureCase::new("a", Expr::var("a")),
    );
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(handle)),
        TypeErrorKind::EffectNotRaised { .. }
    ));
}

#[test]
fn handle_removes_the_handled_effect() {
    let mut global = prelude();
    let is = define_ok(&mut global, collect_def());
    assert_eq!(global.show_type(&is), "(() ={Log}> void) ={}> string");

    let call = Expr::call(
        Expr::var("collect"),
        vec![Expr::thunk(Expr::block(vec![
            Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("a")])),
            Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("b")])),
        ]))],
    );
    assert_eq!(expr_ok(&mut global, call), Type::string());
}

#[test]
fn handle_keeps_other_effects_of_the_target() {
    let mut global = prelude();
    let f = Expr::thunk(Expr::handle(
        Expr::thunk(Expr::block(vec![
            Stmt::expr(Expr::raise("Stdio", "print", vec![Expr::string("p")])),
            Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("a")])),
        ])),
        vec![HandleCase::new("Log", "log", vec!["v"], "k", Expr::var("v"))],
        PureCase::new("a", Expr::string("done")),
    ));
    let is = define_ok(&mut global, Define::new("f", None, f));
    assert_eq!(global.show_type(&is), "() ={Stdio}> string");
}

#[test]
fn handle_case_continuation_type() {
    let mut global = prelude();
    // `k` takes the constructor's return value and yields the target's result.
    let f = Expr::thunk(Expr::handle(
        Expr::thunk(Expr::raise("Read", "read", vec![])),
        vec![HandleCase::new(
            "Read",
            "read",
            vec![],
            "k",
            Expr::call(Expr::var("k"), vec![Expr::int(3)]),
        )],
        PureCase::new("a", Expr::var("a")),
    ));
    assert!(matches!(
        type_err(&mut global, Toplevel::Define(Define::new("f", None, f))),
        TypeErrorKind::TypeMismatch { .. }
    ));
}

#[test]
fn handle_needs_every_constructor_once() {
    let mut global = prelude();
    let decl = EffectDecl::new(
        "State",
        vec![
            ("get", vec![], ty("int")),
            ("set", vec![ty("int")], ty("void")),
        ],
    );
    type_toplevel(&mut global, &Toplevel::Effect(decl)).unwrap();
    let target = || Expr::thunk(Expr::raise("State", "get", vec![]));

    let missing = Expr::handle(
        target(),
        vec![HandleCase::new("State", "get", vec![], "k", Expr::int(0))],
        PureCase::new("a", Expr::var("a")),
    );
    assert_eq!(
        type_err(&mut global, Toplevel::Expr(missing)),
        TypeErrorKind::MissingHandlerCase {
            effect: "State".to_string(),
            constr: "set".to_string()
        }
    );

    let twice = Expr::handle(
        target(),
        vec![
            HandleCase::new("State", "get", vec![], "k", Expr::int(0)),
            HandleCase::new("State", "get", vec![], "k", Expr::int(1)),
        ],
        PureCase::new("a", Expr::var("a")),
    );
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(twice)),
        TypeErrorKind::DuplicateHandlerCase { .. }
    ));
}

// ============================================================================
// Polymorphism
// ============================================================================

/// `collectLog = {e}(fn: () ={Log, e}> void): string ={e}> handle(fn) { Log.log(v, k) => v ++ "\n" ++ collectLog{e}(k); pure(a) => "end" }`
fn collect_log_def() -> Define {
    let case = HandleCase::new(
        "Log",
        "log",
        vec!["v"],
        "k",
        Expr::binary(
            Expr::binary(Expr::var("v"), BinOp::Concat, Expr::string("\n")),
            BinOp::Concat,
            Expr::call_with(Expr::var("collectLog"), vec![], Some(vec!["e"]), vec![Expr::var("k")]),
        ),
    );
    let body = Expr::handle(
        Expr::var("fn"),
        vec![case],
        PureCase::new("a", Expr::string("end")),
    );
    Define::new(
        "collectLog",
        None,
        Expr::lambda(
            LambdaExpr::new(
                vec![Param::new("fn", thunk_ty(vec!["Log", "e"], "void"))],
                body,
            )
            .with_effect_vars(vec!["e"])
            .with_ret(ty("string"))
            .with_effects(vec!["e"]),
        ),
    )
}

#[test]
fn effect_polymorphic_handler() {
    let mut global = prelude();
    let is = define_ok(&mut global, collect_log_def());
    assert_eq!(global.show_type(&is), "{e}(() ={Log, e}> void) ={e}> string");
}

#[test]
fn effect_variable_is_inferred_from_lambda_arguments() {
    let mut global = prelude();
    define_ok(&mut global, collect_log_def());
    let g = Expr::thunk(Expr::call(
        Expr::var("collectLog"),
        vec![Expr::thunk(Expr::block(vec![
            Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("a")])),
            Stmt::expr(Expr::raise("Stdio", "print", vec![Expr::string("P")])),
        ]))],
    ));
    let is = define_ok(&mut global, Define::new("g", None, g));
    assert_eq!(global.show_type(&is), "() ={Stdio}> string");
}

#[test]
fn explicit_empty_effect_argument_makes_the_call_pure() {
    let mut global = prelude();
    define_ok(&mut global, collect_log_def());
    let call = Expr::call_with(
        Expr::var("collectLog"),
        vec![],
        Some(vec![]),
        vec![Expr::thunk(Expr::raise("Log", "log", vec![Expr::string("a")]))],
    );
    match type_toplevel(&mut global, &Toplevel::Expr(call)) {
        Ok(TypedToplevel::Expr(term)) => {
            let TermKind::Apply { signature, .. } = &term.kind else {
                panic!("expected an application, got {:?}", term.kind);
            };
            assert!(signature.effects.is_empty());
            assert!(!signature.is_cps());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn generic_identity_is_instantiated_per_call() {
    let mut global = prelude();
    let id = Expr::lambda(
        LambdaExpr::new(vec![Param::new("x", ty("T"))], Expr::var("x"))
            .with_type_vars(vec![TypeVar::new("T", vec![])])
            .with_ret(ty("T"))
            .with_effects(vec![]),
    );
    define_ok(&mut global, Define::new("id", None, id));

    let n = Expr::call(Expr::var("id"), vec![Expr::int(1)]);
    assert_eq!(expr_ok(&mut global, n), Type::int());
    let s = Expr::call_with(Expr::var("id"), vec![ty("string")], None, vec![Expr::string("s")]);
    assert_eq!(expr_ok(&mut global, s), Type::string());
}

#[test]
fn unannotated_recursion_is_inferred() {
    let mut global = prelude();
    // count = (n: int) => if (n < 1) { 0 } else { count(n - 1) }
    let body = Expr::if_(
        Expr::binary(Expr::var("n"), BinOp::Lt, Expr::int(1)),
        Expr::int(0),
        Some(Expr::call(
            Expr::var("count"),
            vec![Expr::binary(Expr::var("n"), BinOp::Sub, Expr::int(1))],
        )),
    );
    let count = Expr::lambda(LambdaExpr::new(vec![Param::new("n", ty("int"))], body));
    let is = define_ok(&mut global, Define::new("count", None, count));
    assert_eq!(global.show_type(&is), "(int) ={}> int");
}

#[test]
fn bounded_type_variable_needs_an_explicit_argument() {
    let mut global = prelude();
    let named = RecordDecl::new("Named", vec![RecordItem::row("name", ty("string"))]);
    type_toplevel(&mut global, &Toplevel::Record(named)).unwrap();
    let get = Expr::lambda(
        LambdaExpr::new(vec![Param::new("x", ty("T"))], Expr::attr(Expr::var("x"), "name"))
            .with_type_vars(vec![TypeVar::new("T", vec!["Named"])]),
    );
    // The body only knows `x: T`, which is not a record.
    assert!(matches!(
        type_err(&mut global, Toplevel::Define(Define::new("get", None, get))),
        TypeErrorKind::TypeMismatch { .. }
    ));

    let show = Expr::lambda(
        LambdaExpr::new(vec![Param::new("x", ty("T"))], Expr::string("ok"))
            .with_type_vars(vec![TypeVar::new("T", vec!["Named"])]),
    );
    define_ok(&mut global, Define::new("show", None, show));
    let call = Expr::call(Expr::var("show"), vec![Expr::int(1)]);
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(call)),
        TypeErrorKind::ArityMismatch { .. }
    ));
    let call = Expr::call_with(Expr::var("show"), vec![ty("int")], None, vec![Expr::int(1)]);
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(call)),
        TypeErrorKind::SubtypeError { .. }
    ));
}

// ============================================================================
// Records
// ============================================================================

fn records() -> GlobalEnv {
    let mut global = prelude();
    for decl in [
        RecordDecl::new("Named", vec![RecordItem::row("name", ty("string"))]),
        RecordDecl::new(
            "Person",
            vec![RecordItem::spread("Named"), RecordItem::row("age", ty("int"))],
        ),
    ] {
        type_toplevel(&mut global, &Toplevel::Record(decl)).unwrap();
    }
    global
}

#[test]
fn record_with_subtype_rows() {
    let mut global = records();
    let person = Expr::record(
        "Person",
        vec![
            RecordRow::field("name", Expr::string("Ada")),
            RecordRow::field("age", Expr::int(36)),
        ],
    );
    let name = Expr::attr(person, "name");
    assert_eq!(expr_ok(&mut global, name), Type::string());
}

#[test]
fn record_spread_fills_its_group() {
    let mut global = records();
    let named = Expr::record("Named", vec![RecordRow::field("name", Expr::string("Ada"))]);
    let person = Expr::record(
        "Person",
        vec![RecordRow::Spread(named), RecordRow::field("age", Expr::int(36))],
    );
    let is = expr_ok(&mut global, person);
    assert_eq!(global.show_type(&is), "Person");
}

#[test]
fn record_errors() {
    let mut global = records();
    let missing = Expr::record("Person", vec![RecordRow::field("age", Expr::int(1))]);
    assert_eq!(
        type_err(&mut global, Toplevel::Expr(missing)),
        TypeErrorKind::MissingAttribute {
            record: "Named".to_string(),
            name: "name".to_string()
        }
    );

    let twice = Expr::record(
        "Named",
        vec![
            RecordRow::field("name", Expr::string("a")),
            RecordRow::field("name", Expr::string("b")),
        ],
    );
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(twice)),
        TypeErrorKind::DuplicateAttribute { .. }
    ));

    let bad_spread = Expr::record(
        "Person",
        vec![RecordRow::Spread(Expr::int(3)), RecordRow::field("age", Expr::int(1))],
    );
    assert!(matches!(
        type_err(&mut global, Toplevel::Expr(bad_spread)),
        TypeErrorKind::InvalidSpread { .. }
    ));
}

// ============================================================================
// Modules
// ============================================================================

#[test]
fn module_keeps_going_after_a_type_error() {
    let mut global = prelude();
    let module = Module::new(vec![
        Toplevel::Expr(Expr::var("missing")),
        Toplevel::Define(Define::new("one", None, Expr::int(1))),
        Toplevel::Expr(Expr::binary(Expr::var("one"), BinOp::Add, Expr::int(1))),
    ]);
    let results = type_module(&mut global, &module).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_err());
    assert!(results[1].is_ok());
    assert!(results[2].is_ok());
}

#[test]
fn reregistering_identical_effects_is_idempotent() {
    let mut global = prelude();
    let before = global.effect_count();
    let again = EffectDecl::new("Log", vec![("log", vec![ty("string")], ty("void"))]);
    let id = match type_toplevel(&mut global, &Toplevel::Effect(again)).unwrap() {
        TypedToplevel::Effect(id) => id,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(global.effect_count(), before);
    assert_eq!(Some(id), global.effect_by_name("Log"));
    assert!(matches!(
        global.builtin("==").and_then(Type::as_lambda),
        Some(l) if l.type_vars.len() == 1
    ));
}

#[cfg(feature = "serde")]
#[test]
fn snapshot_roundtrips_through_json() {
    let mut global = prelude();
    define_ok(&mut global, collect_def());
    let json = serde_json::to_string(&global.snapshot()).unwrap();
    let restored = GlobalEnv::from_snapshot(serde_json::from_str(&json).unwrap());
    assert_eq!(restored.term_by_name("collect"), global.term_by_name("collect"));
    assert_eq!(
        restored.effect_constructor("Log", "log"),
        global.effect_constructor("Log", "log")
    );
}

// ============================================================================
// Calling-convention coercions
// ============================================================================

fn expr_term(global: &mut GlobalEnv, expr: Expr) -> kestrel_types::Term {
    match type_toplevel(global, &Toplevel::Expr(expr)) {
        Ok(TypedToplevel::Expr(term)) => term,
        other => panic!("expected an expression, got {other:?}"),
    }
}

fn is_cps(ty: &Type) -> bool {
    ty.as_lambda().is_some_and(|l| l.is_cps())
}

#[test]
fn annotated_let_coerces_pure_function() {
    let mut global = prelude();
    let term = expr_term(
        &mut global,
        Expr::block(vec![
            Stmt::let_typed("f", thunk_ty(vec!["Log"], "void"), Expr::thunk(Expr::block(vec![]))),
            Stmt::let_("g", Expr::thunk(Expr::block(vec![]))),
            Stmt::expr(Expr::int(1)),
        ]),
    );
    let TermKind::Sequence(stmts) = &term.kind else {
        panic!("expected a block, got {:?}", term.kind);
    };
    let values: Vec<_> = stmts
        .iter()
        .filter_map(|s| match s {
            kestrel_types::term::TypedStmt::Let { value, .. } => Some(value),
            kestrel_types::term::TypedStmt::Expr(_) => None,
        })
        .collect();
    assert!(matches!(values[0].kind, TermKind::Coerce(_)));
    assert!(is_cps(&values[0].is));
    assert!(matches!(values[1].kind, TermKind::Lambda { .. }));
    assert!(!is_cps(&values[1].is));
}

#[test]
fn pure_else_branch_takes_the_effectful_branch_type() {
    let mut global = prelude();
    let log = Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("y")]));
    let term = expr_term(
        &mut global,
        Expr::if_(
            Expr::bool(false),
            Expr::thunk(Expr::block(vec![log])),
            Some(Expr::thunk(Expr::block(vec![]))),
        ),
    );
    let TermKind::If { yes, no: Some(no), .. } = &term.kind else {
        panic!("expected an if with else, got {:?}", term.kind);
    };
    assert!(matches!(yes.kind, TermKind::Lambda { .. }));
    assert!(matches!(no.kind, TermKind::Coerce(_)));
    assert_eq!(no.is, yes.is);
}

#[test]
fn annotated_definition_keeps_its_declared_convention() {
    let mut global = prelude();
    let ty = define_ok(
        &mut global,
        Define::new(
            "quiet",
            Some(thunk_ty(vec!["Log"], "void")),
            Expr::thunk(Expr::block(vec![])),
        ),
    );
    assert!(is_cps(&ty));
    assert_eq!(global.show_type(&ty), "() ={Log}> void");
}
