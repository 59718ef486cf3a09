//! Native functions installed in every fresh global environment.
//!
//! Operators are ordinary globals: `+(1, 2)` looks up `+` and calls it.
//! Comparisons answer with the integers 1 and 0, which is what a
//! conditional jump tests against.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::io::{self, Write};
use std::rc::Rc;

use crate::env::GlobalEnv;
use crate::value::{Function, Value};
use crate::vm::VmError;

type NativeResult = Result<Value, VmError>;

/// Creates a global environment holding `global`, `print` and the operators.
/// `print` writes to `out`.
pub fn global_env(out: impl Write + 'static) -> GlobalEnv {
    let env = GlobalEnv::new();
    env.register("global", Value::Global);

    let out = RefCell::new(out);
    native(&env, "print", move |_, args| {
        let line = args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ");
        writeln!(out.borrow_mut(), "{}", line).map_err(|e| VmError::Output(e.to_string()))?;
        Ok(Value::Undefined)
    });

    arithmetic(&env, "+", |a, b| Ok(a.wrapping_add(b)));
    arithmetic(&env, "-", |a, b| Ok(a.wrapping_sub(b)));
    arithmetic(&env, "*", |a, b| Ok(a.wrapping_mul(b)));
    arithmetic(&env, "/", |a, b| if b == 0 { Err(VmError::DivisionByZero) } else { Ok(a.wrapping_div(b)) });
    arithmetic(&env, "%", |a, b| if b == 0 { Err(VmError::DivisionByZero) } else { Ok(a.wrapping_rem(b)) });

    binary(&env, "==", |a, b| Ok(truth(a == b)));
    binary(&env, "!=", |a, b| Ok(truth(a != b)));
    comparison(&env, "<", Ordering::is_lt);
    comparison(&env, "<=", Ordering::is_le);
    comparison(&env, ">", Ordering::is_gt);
    comparison(&env, ">=", Ordering::is_ge);

    env
}

fn native(env: &GlobalEnv, name: &str, f: impl Fn(&Value, &[Value]) -> NativeResult + 'static) {
    env.register(name, Value::Function(Function::native(name, f)));
}

fn truth(b: bool) -> Value {
    Value::Int(b as i64)
}

fn binary(env: &GlobalEnv, name: &'static str, f: impl Fn(&Value, &Value) -> NativeResult + 'static) {
    native(env, name, move |_, args| match args {
        [a, b] => f(a, b),
        _ => Err(VmError::ArityMismatch { function: name.to_string(), expected: 2, found: args.len() }),
    });
}

fn int_arg(value: &Value) -> Result<i64, VmError> {
    match value {
        Value::Int(n) => Ok(*n),
        other => Err(VmError::TypeMismatch { expected: "integer", found: other.type_name() }),
    }
}

fn arithmetic(env: &GlobalEnv, name: &'static str, f: impl Fn(i64, i64) -> Result<i64, VmError> + 'static) {
    binary(env, name, move |a, b| f(int_arg(a)?, int_arg(b)?).map(Value::Int));
}

fn comparison(env: &GlobalEnv, name: &'static str, test: fn(Ordering) -> bool) {
    binary(env, name, move |a, b| {
        let ordering = match (a, b) {
            (Value::Int(x), Value::Int(y)) => x.cmp(y),
            (Value::Str(x), Value::Str(y)) => x.cmp(y),
            (Value::Int(_) | Value::Str(_), other) | (other, _) => {
                return Err(VmError::TypeMismatch { expected: "integer or string", found: other.type_name() });
            }
        };
        Ok(truth(test(ordering)))
    });
}

/// In-memory output sink. Clones share one buffer, so a test can hand one
/// to [`global_env`] and read what `print` wrote through another.
#[derive(Debug, Clone, Default)]
pub struct Capture {
    buffer: Rc<RefCell<Vec<u8>>>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.borrow()).into_owned()
    }

    pub fn clear(&self) {
        self.buffer.borrow_mut().clear();
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
