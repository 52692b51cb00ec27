//! Shape tests for continuation-passing lowering. Programs are typed first so
//! the lowering sees the same terms the driver hands it.

use kestrel_ast::ast::{
    BinOp, Define, EffectDecl, Expr, HandleCase, LambdaExpr, Param, PureCase, Stmt, Toplevel,
    TypeExpr,
};
use kestrel_lower::{check_lowered, lower_define, lower_expr, Cps};
use kestrel_types::{type_toplevel, GlobalEnv, Symbol, TermId, TypedToplevel};

fn ty(name: &str) -> TypeExpr {
    TypeExpr::named(name)
}

fn prelude() -> GlobalEnv {
    let mut global = GlobalEnv::new();
    let log = EffectDecl::new("Log", vec![("log", vec![ty("string")], ty("void"))]);
    type_toplevel(&mut global, &Toplevel::Effect(log)).unwrap();
    global
}

fn define(global: &mut GlobalEnv, def: Define) -> (TermId, Cps) {
    match type_toplevel(global, &Toplevel::Define(def)) {
        Ok(TypedToplevel::Define { id, term, .. }) => (id, lower_define(&term, id).unwrap()),
        other => panic!("expected a definition, got {other:?}"),
    }
}

fn expr(global: &mut GlobalEnv, expr: Expr) -> Cps {
    match type_toplevel(global, &Toplevel::Expr(expr)) {
        Ok(TypedToplevel::Expr(term)) => lower_expr(&term).unwrap(),
        other => panic!("expected an expression, got {other:?}"),
    }
}

fn contains(cps: &Cps, pred: impl Fn(&Cps) -> bool) -> bool {
    let mut found = false;
    cps.visit(&mut |node| found |= pred(node));
    found
}

fn lambda_arity(cps: &Cps) -> usize {
    match cps {
        Cps::Lambda { args, .. } => args.len(),
        other => panic!("expected a lambda, got {other}"),
    }
}

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
            LambdaExpr::new(
                vec![Param::new("fn", TypeExpr::lambda(vec![], vec!["Log"], ty("void")))],
                body,
            )
            .with_ret(ty("string"))
            .with_effects(vec![]),
        ),
    )
}

// ============================================================================
// Calling convention
// ============================================================================

#[test]
fn pure_functions_stay_direct() {
    let mut global = prelude();
    let inc = Expr::lambda(LambdaExpr::new(
        vec![Param::new("x", ty("int"))],
        Expr::binary(Expr::var("x"), BinOp::Add, Expr::int(1)),
    ));
    let (_, cps) = define(&mut global, Define::new("inc", None, inc));
    assert_eq!(lambda_arity(&cps), 1);
    assert!(!contains(&cps, |n| matches!(
        n,
        Cps::Capture { .. } | Cps::Raise { .. } | Cps::Handle { .. }
    )));
}

#[test]
fn effectful_functions_take_handlers_and_done() {
    let mut global = prelude();
    let f = Expr::lambda(LambdaExpr::new(
        vec![Param::new("msg", ty("string"))],
        Expr::raise("Log", "log", vec![Expr::var("msg")]),
    ));
    let (_, cps) = define(&mut global, Define::new("say", None, f));
    let Cps::Lambda { args, body } = &cps else {
        panic!("expected a lambda, got {cps}");
    };
    assert_eq!(args.len(), 3);
    assert_eq!(args[1], Symbol::handlers());
    assert!(matches!(body.as_ref(), Cps::Raise { .. }));
}

#[test]
fn raise_continues_in_its_done_lambda() {
    let mut global = prelude();
    let f = Expr::thunk(Expr::block(vec![
        Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("a")])),
        Stmt::expr(Expr::raise("Log", "log", vec![Expr::string("b")])),
    ]));
    let (_, cps) = define(&mut global, Define::new("twice", None, f));
    let Cps::Lambda { body, .. } = &cps else {
        panic!("expected a lambda, got {cps}");
    };
    let Cps::Raise { done, .. } = body.as_ref() else {
        panic!("expected a raise, got {body}");
    };
    let Cps::Lambda { body: rest, .. } = done.as_ref() else {
        panic!("expected a done lambda, got {done}");
    };
    assert!(contains(rest, |n| matches!(n, Cps::Raise { .. })));
}

// ============================================================================
// Handlers
// ============================================================================

#[test]
fn handle_in_pure_function_is_captured() {
    let mut global = prelude();
    let (id, cps) = define(&mut global, collect_def());
    assert_eq!(lambda_arity(&cps), 1);
    let Cps::Lambda { body, .. } = &cps else {
        unreachable!()
    };
    let Cps::Capture { body: inner, .. } = body.as_ref() else {
        panic!("expected a capture, got {body}");
    };
    let Cps::Let { binding, value, .. } = inner.as_ref() else {
        panic!("expected the empty handler list to be bound, got {inner}");
    };
    assert_eq!(*binding, Symbol::handlers());
    assert_eq!(**value, Cps::EmptyHandlers);
    assert!(contains(&cps, |n| matches!(n, Cps::Handle { cases, .. } if cases.len() == 1)));
    // The recursive call resolves to the definition itself.
    assert!(contains(&cps, |n| *n == Cps::Global(id)));
}

#[test]
fn handler_case_takes_handlers_args_and_k() {
    let mut global = prelude();
    let (_, cps) = define(&mut global, collect_def());
    let mut arities = vec![];
    cps.visit(&mut |n| {
        if let Cps::Handle { cases, pure, .. } = n {
            arities.extend(cases.iter().map(lambda_arity));
            arities.push(lambda_arity(pure));
        }
    });
    assert_eq!(arities, vec![3, 2]);
}

// ============================================================================
// Arguments
// ============================================================================

#[test]
fn pure_argument_is_wrapped_for_effectful_parameter() {
    let mut global = prelude();
    define(&mut global, collect_def());
    let call = Expr::call(Expr::var("collect"), vec![Expr::thunk(Expr::block(vec![]))]);
    let cps = expr(&mut global, call);
    let Cps::Call { args, .. } = &cps else {
        panic!("expected a call, got {cps}");
    };
    let Cps::Let { value, body, .. } = &args[0] else {
        panic!("expected the argument to be wrapped, got {}", args[0]);
    };
    assert_eq!(lambda_arity(value), 0);
    assert_eq!(lambda_arity(body), 2);
}

#[test]
fn effectful_argument_is_passed_as_is() {
    let mut global = prelude();
    define(&mut global, collect_def());
    let call = Expr::call(
        Expr::var("collect"),
        vec![Expr::thunk(Expr::raise("Log", "log", vec![Expr::string("a")]))],
    );
    let cps = expr(&mut global, call);
    let Cps::Call { args, .. } = &cps else {
        panic!("expected a call, got {cps}");
    };
    assert_eq!(lambda_arity(&args[0]), 2);
}

#[test]
fn coerced_let_value_is_wrapped() {
    let mut global = prelude();
    let program = Expr::block(vec![
        Stmt::let_typed(
            "f",
            TypeExpr::lambda(vec![], vec!["Log"], ty("void")),
            Expr::thunk(Expr::block(vec![])),
        ),
        Stmt::expr(Expr::int(1)),
    ]);
    let cps = expr(&mut global, program);
    let Cps::Let { value, .. } = &cps else {
        panic!("expected a let, got {cps}");
    };
    let Cps::Let { value: inner, body: wrapper, .. } = value.as_ref() else {
        panic!("expected the bound value to be wrapped, got {value}");
    };
    assert_eq!(lambda_arity(inner), 0);
    assert_eq!(lambda_arity(wrapper), 2);
    assert_eq!(check_lowered(&cps), Ok(()));
}

#[test]
fn lowered_code_keeps_binders_unique() {
    let mut global = prelude();
    let (_, cps) = define(&mut global, collect_def());
    assert_eq!(check_lowered(&cps), Ok(()));
}
