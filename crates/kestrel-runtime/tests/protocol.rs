//! Handler-list protocol exercised directly with native callables.

use kestrel_runtime::{install_handler, raise, HandlerList, Machine, Native, RuntimeError, Value};
use kestrel_types::EffectId;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type NativeFn = dyn Fn(&Machine, Vec<Value>) -> Result<Value, RuntimeError>;

struct FnNative(Box<NativeFn>);

impl fmt::Debug for FnNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnNative")
    }
}

impl Native for FnNative {
    fn name(&self) -> &'static str {
        "test"
    }

    fn call(&self, machine: &Machine, args: Vec<Value>) -> Result<Value, RuntimeError> {
        (self.0)(machine, args)
    }
}

fn native(f: impl Fn(&Machine, Vec<Value>) -> Result<Value, RuntimeError> + 'static) -> Value {
    Value::Native(Rc::new(FnNative(Box::new(f))))
}

fn handlers(value: &Value) -> HandlerList {
    value.as_handlers().unwrap().clone()
}

fn ignore() -> Value {
    native(|_, _| Ok(Value::Unit))
}

/// The handler list seen by a body installed for `effect` on top of `outer`.
fn installed(machine: &Machine, effect: u32, outer: &HandlerList) -> HandlerList {
    let seen = Rc::new(RefCell::new(HandlerList::new()));
    let probe = {
        let seen = seen.clone();
        native(move |_, args| {
            *seen.borrow_mut() = handlers(&args[0]);
            Ok(Value::Unit)
        })
    };
    install_handler(machine, EffectId(effect), probe, vec![], ignore(), outer).unwrap();
    let list = seen.borrow().clone();
    list
}

// ============================================================================
// Handler lists
// ============================================================================

#[test]
fn installed_handlers_are_innermost_first() {
    let machine = Machine::default();
    let outer = installed(&machine, 0, &HandlerList::new());
    let inner = installed(&machine, 1, &outer);
    assert_eq!(inner.effects(), vec![EffectId(1), EffectId(0)]);
}

#[test]
fn find_returns_innermost_match_and_the_rest() {
    let machine = Machine::default();
    let a = installed(&machine, 0, &HandlerList::new());
    let b = installed(&machine, 1, &a);
    let c = installed(&machine, 0, &b);
    let (found, others) = c.find(EffectId(0)).unwrap();
    assert!(Rc::ptr_eq(&found, c.iter().next().unwrap()));
    assert_eq!(others.effects(), vec![EffectId(1), EffectId(0)]);
    assert!(c.find(EffectId(7)).is_none());
}

#[test]
fn without_removes_by_identity() {
    let machine = Machine::default();
    let a = installed(&machine, 0, &HandlerList::new());
    let b = installed(&machine, 0, &a);
    let inner = b.iter().next().unwrap().clone();
    assert_eq!(b.without(&inner).len(), 1);
    // A different dispatcher for the same effect is left alone.
    assert_eq!(a.without(&inner).len(), 1);
}

#[test]
fn reconcile_puts_fresh_handlers_first_without_duplicates() {
    let machine = Machine::default();
    let base = installed(&machine, 0, &HandlerList::new());
    let fresh = installed(&machine, 2, &base);
    let current = installed(&machine, 1, &base);
    let merged = HandlerList::reconcile(&fresh, &current);
    assert_eq!(merged.effects(), vec![EffectId(2), EffectId(0), EffectId(1)]);
}

// ============================================================================
// raise
// ============================================================================

#[test]
fn raise_without_handler_is_uncaught() {
    let machine = Machine::default();
    let outer = installed(&machine, 0, &HandlerList::new());
    let err = raise(&machine, &outer, EffectId(5), 0, vec![], ignore()).unwrap_err();
    assert_eq!(
        err,
        RuntimeError::UncaughtEffect {
            effect: EffectId(5),
            handlers: "eff0".to_string(),
        }
    );
}

#[test]
fn raise_of_missing_case() {
    let machine = Machine::default();
    let body = native(|m, args| raise(m, &handlers(&args[0]), EffectId(0), 1, vec![], ignore()));
    let err = install_handler(&machine, EffectId(0), body, vec![ignore()], ignore(), &HandlerList::new())
        .unwrap_err();
    assert_eq!(err, RuntimeError::NoSuchCase { effect: EffectId(0), idx: 1 });
}

#[test]
fn case_runs_without_its_own_handler() {
    let machine = Machine::default();
    let seen = Rc::new(RefCell::new(None));
    let case = {
        let seen = seen.clone();
        native(move |_, args| {
            *seen.borrow_mut() = Some(handlers(&args[0]).effects());
            Ok(Value::Unit)
        })
    };
    let outer = installed(&machine, 1, &HandlerList::new());
    let body = native(|m, args| raise(m, &handlers(&args[0]), EffectId(0), 0, vec![], ignore()));
    install_handler(&machine, EffectId(0), body, vec![case], ignore(), &outer).unwrap();
    assert_eq!(*seen.borrow(), Some(vec![EffectId(1)]));
}

#[test]
fn resumption_is_one_shot() {
    let machine = Machine::default();
    let case = native(|m, args| {
        let (h, k) = (args[0].clone(), args[1].clone());
        m.apply(&k, vec![Value::Int(1), h.clone(), ignore()])?;
        m.apply(&k, vec![Value::Int(2), h, ignore()])
    });
    let body = native(|m, args| raise(m, &handlers(&args[0]), EffectId(0), 0, vec![], ignore()));
    let err = install_handler(&machine, EffectId(0), body, vec![case], ignore(), &HandlerList::new())
        .unwrap_err();
    assert_eq!(err, RuntimeError::ResumedTwice);
}

#[test]
fn resumed_value_and_handlers_reach_the_raise_continuation() {
    let machine = Machine::default();
    let received = Rc::new(RefCell::new(None));
    let done = {
        let received = received.clone();
        native(move |_, args| {
            *received.borrow_mut() = Some((handlers(&args[0]).effects(), args[1].clone()));
            Ok(Value::Unit)
        })
    };
    let fresh = installed(&machine, 3, &HandlerList::new());
    let case = native(move |m, args| {
        m.apply(&args[1], vec![Value::string("hi"), Value::Handlers(fresh.clone()), ignore()])
    });
    let body = native(move |m, args| {
        raise(m, &handlers(&args[0]), EffectId(0), 0, vec![], done.clone())
    });
    let outer = installed(&machine, 1, &HandlerList::new());
    install_handler(&machine, EffectId(0), body, vec![case], ignore(), &outer).unwrap();
    assert_eq!(
        *received.borrow(),
        Some((vec![EffectId(3), EffectId(1)], Value::string("hi")))
    );
}
