//! Runtime values and environments.

use crate::eval::Machine;
use crate::protocol::HandlerList;
use crate::RuntimeError;
use kestrel_lower::Cps;
use kestrel_types::{Symbol, TypeId};
use std::fmt;
use std::rc::Rc;

/// A callable implemented by the runtime itself rather than by lowered code:
/// frame exits, resumptions and capture slots.
pub trait Native: fmt::Debug {
    fn name(&self) -> &'static str;
    fn call(&self, machine: &Machine, args: Vec<Value>) -> Result<Value, RuntimeError>;
}

#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<str>),
    Record(Rc<RecordValue>),
    Closure(Rc<Closure>),
    Builtin(Rc<str>),
    Handlers(HandlerList),
    Native(Rc<dyn Native>),
}

#[derive(Debug)]
pub struct Closure {
    pub args: Vec<Symbol>,
    pub body: Rc<Cps>,
    pub env: Env,
}

/// One row vector per group, in the declaring record's group order.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    pub ty: TypeId,
    pub groups: Vec<(TypeId, Vec<Value>)>,
}

impl RecordValue {
    pub fn group(&self, ty: TypeId) -> Option<&[Value]> {
        self.groups
            .iter()
            .find(|(id, _)| *id == ty)
            .map(|(_, rows)| rows.as_slice())
    }
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    /// Short description for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "void",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Record(_) => "record",
            Value::Closure(_) | Value::Builtin(_) | Value::Native(_) => "function",
            Value::Handlers(_) => "handler list",
        }
    }

    pub fn as_handlers(&self) -> Result<&HandlerList, RuntimeError> {
        match self {
            Value::Handlers(list) => Ok(list),
            other => Err(RuntimeError::Unexpected {
                expected: "a handler list",
                found: other.kind().to_string(),
            }),
        }
    }
}

/// Structural equality; functions never compare equal.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Record(r) => {
                write!(f, "{} {{", r.ty)?;
                for (i, (_, rows)) in r.groups.iter().enumerate() {
                    if i > 0 {
                        write!(f, " |")?;
                    }
                    for row in rows {
                        write!(f, " {row}")?;
                    }
                }
                write!(f, " }}")
            }
            Value::Closure(c) => write!(f, "<fn/{}>", c.args.len()),
            Value::Builtin(name) => write!(f, "<builtin:{name}>"),
            Value::Handlers(list) => write!(f, "<handlers:{list:?}>"),
            Value::Native(n) => write!(f, "<{}>", n.name()),
        }
    }
}

/// Persistent local environment keyed by symbol unique. Closures share
/// structure with the scope they were created in.
#[derive(Clone, Default)]
pub struct Env(Option<Rc<Frame>>);

struct Frame {
    unique: u32,
    value: Value,
    next: Env,
}

impl Env {
    pub fn new() -> Self {
        Env(None)
    }

    pub fn bind(&self, sym: &Symbol, value: Value) -> Env {
        Env(Some(Rc::new(Frame {
            unique: sym.unique,
            value,
            next: self.clone(),
        })))
    }

    pub fn get(&self, sym: &Symbol) -> Option<&Value> {
        let mut cur = self.0.as_deref();
        while let Some(frame) = cur {
            if frame.unique == sym.unique {
                return Some(&frame.value);
            }
            cur = frame.next.0.as_deref();
        }
        None
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut uniques = vec![];
        let mut cur = self.0.as_deref();
        while let Some(frame) = cur {
            uniques.push(frame.unique);
            cur = frame.next.0.as_deref();
        }
        f.debug_tuple("Env").field(&uniques).finish()
    }
}

// Long environment chains would otherwise drop recursively.
impl Drop for Frame {
    fn drop(&mut self) {
        let mut next = self.next.0.take();
        while let Some(rc) = next {
            match Rc::try_unwrap(rc) {
                Ok(mut frame) => next = frame.next.0.take(),
                Err(_) => break,
            }
        }
    }
}
