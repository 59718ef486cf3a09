//! A bytecode compiler and stack machine for a small JavaScript-like
//! language.
//!
//! Programs arrive as an already-parsed tree ([`ast::Script`], usually read
//! from JSON). The [`compiler`] lowers every function literal to a
//! [`bytecode::CodeUnit`]; the [`vm::Machine`] runs them against a word
//! stack, a bump-allocated [`heap::Heap`] and a shared [`env::GlobalEnv`].

use std::fmt::Write as _;
use std::io::Write;
use std::rc::Rc;

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod env;
pub mod heap;
pub mod value;
pub mod vm;

use ast::Script;
use compiler::{CompileError, Compiler, CompilerConfig};
use env::GlobalEnv;
use value::{ConstantTable, Function, FunctionKind, ObjectRef, Value};
use vm::{Machine, RuntimeError, VmConfig, VmError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid syntax tree: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Compile(e) => e.code(),
            Error::Runtime(e) => e.code(),
            Error::Io { .. } => "SJ-I001",
            Error::Json(_) => "SJ-I002",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub compiler: CompilerConfig,
    pub vm: VmConfig,
}

/// Compiler and machine bundled over one constant table and one global
/// environment. Scripts evaluated one after another share globals and heap,
/// so a function defined by one is callable from the next.
pub struct Engine {
    machine: Machine,
    compiler: CompilerConfig,
}

impl Engine {
    /// An engine whose `print` writes to `out`.
    pub fn new(config: Config, out: impl Write + 'static) -> Self {
        Self::with_globals(config, builtins::global_env(out))
    }

    pub fn with_globals(config: Config, globals: GlobalEnv) -> Self {
        Engine { machine: Machine::new(ConstantTable::new(), globals, config.vm), compiler: config.compiler }
    }

    pub fn compile(&mut self, script: &Script) -> Result<Rc<Function>, CompileError> {
        Compiler::new(self.machine.constants_mut(), self.compiler.clone()).compile_script(script)
    }

    /// Compiles and runs `script`, returning what its body returned.
    pub fn eval(&mut self, script: &Script) -> Result<Value, Error> {
        let main = self.compile(script)?;
        Ok(self.machine.run_main(&main)?)
    }

    pub fn eval_json(&mut self, json: &str) -> Result<Value, Error> {
        let script = Script::from_json(json)?;
        self.eval(&script)
    }

    /// Calls the global function `name`.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, Error> {
        Ok(self.machine.call_global(name, args)?)
    }

    pub fn get_field(&self, object: &ObjectRef, name: &str) -> Result<Value, VmError> {
        self.machine.get_field(object, name)
    }

    pub fn globals(&self) -> &GlobalEnv {
        self.machine.globals()
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Compiles `script` and lists the bytecode of `main` followed by every
    /// function literal it contains, in the order they were compiled.
    pub fn dump(&mut self, script: &Script) -> Result<String, CompileError> {
        let first_constant = self.machine.constants().len();
        let main = self.compile(script)?;
        let constants = self.machine.constants();

        let mut units: Vec<&Function> = vec![main.as_ref()];
        units.extend(constants.iter().skip(first_constant).filter_map(|v| match v {
            Value::Function(f) if matches!(f.kind, FunctionKind::Compiled(_)) => Some(f.as_ref()),
            _ => None,
        }));

        let mut out = String::new();
        for (i, function) in units.into_iter().enumerate() {
            let Some(unit) = function.code() else { continue };
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(
                out,
                "== {} (params {}, slots {}) ==",
                function.name,
                unit.param_count.saturating_sub(1),
                unit.slot_count
            );
            out.push_str(&bytecode::disassemble(unit, constants));
        }
        Ok(out)
    }
}
