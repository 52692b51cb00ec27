//! Handler-list runtime protocol.
//!
//! A handler list is an immutable list of dispatchers, innermost first. It is
//! threaded through effectful code as an ordinary argument, so each piece of
//! code sees exactly the handlers installed around it.
//!
//! Handlers are shallow: a case runs without its own dispatcher, and resuming
//! continues the raising code under whatever handlers the case installed
//! around the resumption. Those take precedence over the handlers that were
//! live at the raise.

use crate::eval::Machine;
use crate::value::{Native, Value};
use crate::RuntimeError;
use kestrel_types::EffectId;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error};

/// One installed handler.
pub struct Dispatcher {
    pub effect: EffectId,
    cases: Vec<Value>,
    /// Where the handled computation's final value goes. Starts as the pure
    /// case and is redirected by each resumption.
    return_ptr: RefCell<Value>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.effect)
    }
}

#[derive(Clone, Default)]
pub struct HandlerList(Option<Rc<Node>>);

struct Node {
    entry: Rc<Dispatcher>,
    next: HandlerList,
}

impl HandlerList {
    pub fn new() -> Self {
        HandlerList(None)
    }

    pub fn prepend(&self, entry: Rc<Dispatcher>) -> HandlerList {
        HandlerList(Some(Rc::new(Node {
            entry,
            next: self.clone(),
        })))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Dispatcher>> {
        let mut cur = self.0.as_deref();
        std::iter::from_fn(move || {
            let node = cur?;
            cur = node.next.0.as_deref();
            Some(&node.entry)
        })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Effects of the installed dispatchers, innermost first.
    pub fn effects(&self) -> Vec<EffectId> {
        self.iter().map(|d| d.effect).collect()
    }

    fn from_entries(entries: Vec<Rc<Dispatcher>>) -> HandlerList {
        entries
            .into_iter()
            .rev()
            .fold(HandlerList::new(), |list, entry| list.prepend(entry))
    }

    /// The innermost dispatcher for `effect`, and the list without it.
    pub fn find(&self, effect: EffectId) -> Option<(Rc<Dispatcher>, HandlerList)> {
        let entry = self.iter().find(|d| d.effect == effect)?.clone();
        let others = self.without(&entry);
        Some((entry, others))
    }

    /// This list minus `entry`, compared by identity.
    pub fn without(&self, entry: &Rc<Dispatcher>) -> HandlerList {
        if !self.iter().any(|d| Rc::ptr_eq(d, entry)) {
            return self.clone();
        }
        HandlerList::from_entries(
            self.iter()
                .filter(|d| !Rc::ptr_eq(d, entry))
                .cloned()
                .collect(),
        )
    }

    /// `fresh` followed by every dispatcher of `current` not already in it.
    pub fn reconcile(fresh: &HandlerList, current: &HandlerList) -> HandlerList {
        let mut entries: Vec<Rc<Dispatcher>> = fresh.iter().cloned().collect();
        for d in current.iter() {
            if !fresh.iter().any(|f| Rc::ptr_eq(f, d)) {
                entries.push(d.clone());
            }
        }
        HandlerList::from_entries(entries)
    }

    fn describe(&self) -> String {
        self.effects()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Debug for HandlerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.describe())
    }
}

/// Install a dispatcher for `effect` on top of `outer` and run `body(handlers,
/// exit)` under it.
pub fn install_handler(
    machine: &Machine,
    effect: EffectId,
    body: Value,
    cases: Vec<Value>,
    pure: Value,
    outer: &HandlerList,
) -> Result<Value, RuntimeError> {
    let dispatcher = Rc::new(Dispatcher {
        effect,
        cases,
        return_ptr: RefCell::new(pure),
    });
    let handlers = outer.prepend(dispatcher.clone());
    debug!(%effect, installed = handlers.len(), "installing handler");
    let exit = Value::Native(Rc::new(FrameExit { dispatcher }));
    machine.apply(&body, vec![Value::Handlers(handlers), exit])
}

/// Raise constructor `idx` of `effect` against `handlers`. The matched case
/// runs under the remaining handlers and receives a one-shot resumption
/// that continues with `done`.
pub fn raise(
    machine: &Machine,
    handlers: &HandlerList,
    effect: EffectId,
    idx: usize,
    args: Vec<Value>,
    done: Value,
) -> Result<Value, RuntimeError> {
    let Some((dispatcher, others)) = handlers.find(effect) else {
        error!(%effect, ?handlers, "uncaught effect");
        return Err(RuntimeError::UncaughtEffect {
            effect,
            handlers: handlers.describe(),
        });
    };
    let case = dispatcher
        .cases
        .get(idx)
        .cloned()
        .ok_or(RuntimeError::NoSuchCase { effect, idx })?;
    debug!(%effect, idx, "dispatching");
    let resume = Resume {
        dispatcher,
        raise_k: done,
        current: others.clone(),
        used: Cell::new(false),
    };
    let mut call = Vec::with_capacity(args.len() + 2);
    call.push(Value::Handlers(others));
    call.extend(args);
    call.push(Value::Native(Rc::new(resume)));
    machine.apply(&case, call)
}

/// The `done` continuation handed to a handled body. Drops its dispatcher and
/// forwards the value to wherever the dispatcher currently returns.
#[derive(Debug)]
struct FrameExit {
    dispatcher: Rc<Dispatcher>,
}

impl Native for FrameExit {
    fn name(&self) -> &'static str {
        "frame-exit"
    }

    fn call(&self, machine: &Machine, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let [handlers, value] = exact(self.name(), args)?;
        let remaining = handlers.as_handlers()?.without(&self.dispatcher);
        let target = self.dispatcher.return_ptr.borrow().clone();
        debug!(effect = %self.dispatcher.effect, "leaving handler frame");
        machine.apply(&target, vec![Value::Handlers(remaining), value])
    }
}

/// The `k` of a handler case. Called as `(value, handlers, done)`, or as
/// `(handlers, done)` when the operation returns nothing.
#[derive(Debug)]
struct Resume {
    dispatcher: Rc<Dispatcher>,
    raise_k: Value,
    /// Handlers live at the raise, minus the dispatcher that caught it.
    current: HandlerList,
    used: Cell<bool>,
}

impl Native for Resume {
    fn name(&self) -> &'static str {
        "resume"
    }

    fn call(&self, machine: &Machine, mut args: Vec<Value>) -> Result<Value, RuntimeError> {
        let value = match args.len() {
            3 => args.remove(0),
            2 => Value::Unit,
            found => {
                return Err(RuntimeError::ArityMismatch {
                    callee: self.name().to_string(),
                    expected: 3,
                    found,
                })
            }
        };
        if self.used.replace(true) {
            return Err(RuntimeError::ResumedTwice);
        }
        let [handlers, done] = exact(self.name(), args)?;
        let merged = HandlerList::reconcile(handlers.as_handlers()?, &self.current);
        *self.dispatcher.return_ptr.borrow_mut() = done;
        debug!(effect = %self.dispatcher.effect, handlers = ?merged, "resuming");
        machine.apply(&self.raise_k, vec![Value::Handlers(merged), value])
    }
}

fn exact<const N: usize>(callee: &str, args: Vec<Value>) -> Result<[Value; N], RuntimeError> {
    let found = args.len();
    args.try_into().map_err(|_| RuntimeError::ArityMismatch {
        callee: callee.to_string(),
        expected: N,
        found,
    })
}
