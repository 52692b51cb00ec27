//! Tree-walking evaluator for lowered programs.

use crate::builtins;
use crate::protocol::{self, HandlerList};
use crate::value::{Closure, Env, Native, RecordValue, Value};
use crate::RuntimeError;
use kestrel_lower::{Cps, CpsGroup};
use kestrel_types::{TermId, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{trace, warn};

/// Default limit on nested calls. Continuation-passing code nests a call per
/// effectful step, so this also bounds how long a handled computation runs
/// before it has to return.
pub const MAX_CALL_DEPTH: usize = 10_000;

/// Remaining native stack below which evaluation moves to a fresh segment.
const STACK_RED_ZONE: usize = 256 * 1024;
/// Size of each segment allocated once the red zone is reached.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

enum GlobalState {
    Evaluating,
    Done(Value),
}

pub struct Machine {
    globals: HashMap<TermId, Rc<Cps>>,
    values: RefCell<HashMap<TermId, GlobalState>>,
    depth: Cell<usize>,
    max_depth: usize,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MAX_CALL_DEPTH)
    }
}

impl Machine {
    pub fn new(max_depth: usize) -> Self {
        Machine {
            globals: HashMap::new(),
            values: RefCell::new(HashMap::new()),
            depth: Cell::new(0),
            max_depth,
        }
    }

    /// Register a lowered definition. Definitions are evaluated on first use.
    pub fn define(&mut self, id: TermId, body: Cps) {
        self.values.get_mut().remove(&id);
        self.globals.insert(id, Rc::new(body));
    }

    pub fn is_defined(&self, id: TermId) -> bool {
        self.globals.contains_key(&id)
    }

    /// Evaluate a lowered toplevel expression.
    pub fn eval(&self, cps: &Cps) -> Result<Value, RuntimeError> {
        self.eval_in(&Env::new(), cps)
    }

    fn global(&self, id: TermId) -> Result<Value, RuntimeError> {
        match self.values.borrow().get(&id) {
            Some(GlobalState::Done(value)) => return Ok(value.clone()),
            Some(GlobalState::Evaluating) => return Err(RuntimeError::CyclicGlobal(id)),
            None => {}
        }
        let body = self
            .globals
            .get(&id)
            .cloned()
            .ok_or(RuntimeError::UnknownGlobal(id))?;
        self.values.borrow_mut().insert(id, GlobalState::Evaluating);
        let result = self.eval(&body);
        let mut values = self.values.borrow_mut();
        match &result {
            Ok(value) => values.insert(id, GlobalState::Done(value.clone())),
            Err(_) => values.remove(&id),
        };
        result
    }

    /// Every nested call passes through here, so the native stack grows on
    /// demand and only `max_depth` bounds how deep a program may go.
    fn eval_in(&self, env: &Env, cps: &Cps) -> Result<Value, RuntimeError> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.eval_node(env, cps))
    }

    fn eval_node(&self, env: &Env, cps: &Cps) -> Result<Value, RuntimeError> {
        match cps {
            Cps::Int(n) => Ok(Value::Int(*n)),
            Cps::Float(x) => Ok(Value::Float(*x)),
            Cps::Bool(b) => Ok(Value::Bool(*b)),
            Cps::Str(s) => Ok(Value::string(s)),
            Cps::Unit => Ok(Value::Unit),
            Cps::Var(sym) => env
                .get(sym)
                .cloned()
                .ok_or_else(|| RuntimeError::UnboundVariable(sym.to_string())),
            Cps::Builtin(name) => Ok(Value::Builtin(Rc::from(name.as_str()))),
            Cps::Global(id) => self.global(*id),
            Cps::Call { target, args } => {
                let callee = self.eval_in(env, target)?;
                let args = self.eval_all(env, args)?;
                self.apply(&callee, args)
            }
            Cps::Lambda { args, body } => Ok(Value::Closure(Rc::new(Closure {
                args: args.clone(),
                body: body.clone(),
                env: env.clone(),
            }))),
            Cps::If { cond, yes, no } => match self.eval_in(env, cond)? {
                Value::Bool(true) => self.eval_in(env, yes),
                Value::Bool(false) => self.eval_in(env, no),
                other => Err(RuntimeError::Unexpected {
                    expected: "bool",
                    found: other.kind().to_string(),
                }),
            },
            Cps::Let {
                binding,
                value,
                body,
            } => {
                let value = self.eval_in(env, value)?;
                self.eval_in(&env.bind(binding, value), body)
            }
            Cps::Sequence(items) => {
                let mut last = Value::Unit;
                for item in items {
                    last = self.eval_in(env, item)?;
                }
                Ok(last)
            }
            Cps::Record {
                ty,
                spreads,
                groups,
            } => self.eval_record(env, *ty, spreads, groups),
            Cps::Attribute {
                target,
                record,
                idx,
            } => match self.eval_in(env, target)? {
                Value::Record(r) => r
                    .group(*record)
                    .and_then(|rows| rows.get(*idx))
                    .cloned()
                    .ok_or_else(|| RuntimeError::MissingRecordGroup(record.to_string())),
                other => Err(RuntimeError::Unexpected {
                    expected: "a record",
                    found: other.kind().to_string(),
                }),
            },
            Cps::EmptyHandlers => Ok(Value::Handlers(HandlerList::new())),
            Cps::Raise {
                handlers,
                effect,
                idx,
                args,
                done,
            } => {
                let handlers = self.eval_in(env, handlers)?;
                let args = self.eval_all(env, args)?;
                let done = self.eval_in(env, done)?;
                protocol::raise(self, handlers.as_handlers()?, *effect, *idx, args, done)
            }
            Cps::Handle {
                effect,
                body,
                cases,
                pure,
                handlers,
            } => {
                let body = self.eval_in(env, body)?;
                let cases = self.eval_all(env, cases)?;
                let pure = self.eval_in(env, pure)?;
                let handlers = self.eval_in(env, handlers)?;
                protocol::install_handler(self, *effect, body, cases, pure, handlers.as_handlers()?)
            }
            Cps::Capture { done, body } => {
                let slot = Rc::new(CaptureSlot::default());
                let env = env.bind(done, Value::Native(slot.clone()));
                self.eval_in(&env, body)?;
                slot.value.take().ok_or(RuntimeError::NoResult)
            }
        }
    }

    fn eval_all(&self, env: &Env, items: &[Cps]) -> Result<Vec<Value>, RuntimeError> {
        items.iter().map(|item| self.eval_in(env, item)).collect()
    }

    /// Spreads first, then explicit rows in group order. A row without an
    /// explicit value comes from the group's spread source.
    fn eval_record(
        &self,
        env: &Env,
        ty: TypeId,
        spreads: &[Cps],
        groups: &[CpsGroup],
    ) -> Result<Value, RuntimeError> {
        let mut sources = Vec::with_capacity(spreads.len());
        for spread in spreads {
            match self.eval_in(env, spread)? {
                Value::Record(r) => sources.push(r),
                other => {
                    return Err(RuntimeError::Unexpected {
                        expected: "a record",
                        found: other.kind().to_string(),
                    })
                }
            }
        }
        let mut out = Vec::with_capacity(groups.len());
        for group in groups {
            let source = group
                .spread
                .and_then(|s| sources.get(s))
                .and_then(|r| r.group(group.ty));
            let mut rows = Vec::with_capacity(group.rows.len());
            for (i, row) in group.rows.iter().enumerate() {
                let value = match row {
                    Some(expr) => self.eval_in(env, expr)?,
                    None => source
                        .and_then(|rows| rows.get(i))
                        .cloned()
                        .ok_or_else(|| RuntimeError::MissingRecordGroup(group.ty.to_string()))?,
                };
                rows.push(value);
            }
            out.push((group.ty, rows));
        }
        Ok(Value::Record(Rc::new(RecordValue { ty, groups: out })))
    }

    /// Call any callable value.
    pub fn apply(&self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            return Err(RuntimeError::DepthLimitExceeded(self.max_depth));
        }
        self.depth.set(depth);
        let result = self.apply_inner(callee, args);
        self.depth.set(depth - 1);
        result
    }

    fn apply_inner(&self, callee: &Value, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match callee {
            Value::Closure(closure) => {
                if closure.args.len() != args.len() {
                    return Err(RuntimeError::ArityMismatch {
                        callee: callee.to_string(),
                        expected: closure.args.len(),
                        found: args.len(),
                    });
                }
                let env = closure
                    .args
                    .iter()
                    .zip(args)
                    .fold(closure.env.clone(), |env, (sym, value)| env.bind(sym, value));
                self.eval_in(&env, &closure.body)
            }
            Value::Builtin(name) => builtins::call(name, args),
            Value::Native(native) => {
                trace!(native = native.name(), "calling");
                native.call(self, args)
            }
            other => Err(RuntimeError::NotAFunction(other.kind().to_string())),
        }
    }
}

/// The `done` of a [`Cps::Capture`]: records the delivered value.
#[derive(Debug, Default)]
struct CaptureSlot {
    value: RefCell<Option<Value>>,
}

impl Native for CaptureSlot {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn call(&self, _machine: &Machine, args: Vec<Value>) -> Result<Value, RuntimeError> {
        let [_handlers, value]: [Value; 2] =
            args.try_into()
                .map_err(|args: Vec<Value>| RuntimeError::ArityMismatch {
                    callee: self.name().to_string(),
                    expected: 2,
                    found: args.len(),
                })?;
        if self.value.replace(Some(value)).is_some() {
            warn!("captured computation delivered more than one result");
        }
        Ok(Value::Unit)
    }
}
