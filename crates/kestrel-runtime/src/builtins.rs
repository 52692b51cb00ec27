//! Primitive operations. Names match the builtin table the typer checks
//! against, so only arity and operand shapes are re-checked here.

use crate::value::Value;
use crate::RuntimeError;

pub fn call(name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    match name {
        "+" | "-" | "*" | "/" => {
            let (a, b) = ints(name, args)?;
            let out = match name {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                "*" => a.checked_mul(b),
                _ if b == 0 => return Err(RuntimeError::Builtin("division by zero".into())),
                _ => a.checked_div(b),
            };
            out.map(Value::Int)
                .ok_or_else(|| RuntimeError::Builtin(format!("integer overflow in {name}")))
        }
        "<" | ">" | "<=" | ">=" => {
            let (a, b) = ints(name, args)?;
            Ok(Value::Bool(match name {
                "<" => a < b,
                ">" => a > b,
                "<=" => a <= b,
                _ => a >= b,
            }))
        }
        "==" => {
            let [a, b] = exact(name, args)?;
            Ok(Value::Bool(a == b))
        }
        "++" => {
            let [a, b] = exact(name, args)?;
            Ok(Value::string(&format!("{}{}", string(&a)?, string(&b)?)))
        }
        "intToString" => {
            let [n] = exact(name, args)?;
            match n {
                Value::Int(n) => Ok(Value::string(&n.to_string())),
                other => Err(unexpected("int", &other)),
            }
        }
        "stringLength" => {
            let [s] = exact(name, args)?;
            Ok(Value::Int(string(&s)?.chars().count() as i64))
        }
        "concatAll" => {
            let mut out = String::new();
            for arg in &args {
                out.push_str(string(arg)?);
            }
            Ok(Value::string(&out))
        }
        other => Err(RuntimeError::Builtin(format!("unknown builtin `{other}`"))),
    }
}

fn exact<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], RuntimeError> {
    let found = args.len();
    args.try_into().map_err(|_| RuntimeError::ArityMismatch {
        callee: name.to_string(),
        expected: N,
        found,
    })
}

fn ints(name: &str, args: Vec<Value>) -> Result<(i64, i64), RuntimeError> {
    match exact(name, args)? {
        [Value::Int(a), Value::Int(b)] => Ok((a, b)),
        [Value::Int(_), other] | [other, _] => Err(unexpected("int", &other)),
    }
}

fn string(value: &Value) -> Result<&str, RuntimeError> {
    match value {
        Value::Str(s) => Ok(&**s),
        other => Err(unexpected("string", other)),
    }
}

fn unexpected(expected: &'static str, found: &Value) -> RuntimeError {
    RuntimeError::Unexpected {
        expected,
        found: found.kind().to_string(),
    }
}
