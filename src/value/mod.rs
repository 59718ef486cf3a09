use std::fmt;
use std::rc::Rc;

use crate::bytecode::CodeUnit;
use crate::vm::VmError;

pub mod constants;
pub mod tag;

pub use constants::ConstantTable;
pub use tag::{Kind, TagValue};

/// Host-level primitive: receives the decoded receiver and arguments.
pub type NativeFn = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, VmError>>;

pub enum FunctionKind {
    Native(NativeFn),
    Compiled(Rc<CodeUnit>),
}

/// A callable. Compiled functions carry a [`CodeUnit`]; native ones don't.
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
}

impl Function {
    pub fn native(name: impl Into<String>, f: impl Fn(&Value, &[Value]) -> Result<Value, VmError> + 'static) -> Rc<Self> {
        Rc::new(Function { name: name.into(), kind: FunctionKind::Native(Rc::new(f)) })
    }

    pub fn compiled(name: impl Into<String>, code: CodeUnit) -> Rc<Self> {
        Rc::new(Function { name: name.into(), kind: FunctionKind::Compiled(Rc::new(code)) })
    }

    pub fn code(&self) -> Option<&Rc<CodeUnit>> {
        match &self.kind {
            FunctionKind::Compiled(code) => Some(code),
            FunctionKind::Native(_) => None,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.code().is_some() { "compiled" } else { "native" };
        f.debug_struct("Function").field("name", &self.name).field("kind", &kind).finish()
    }
}

/// Field layout shared by every object built at one construction site.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassDescriptor {
    fields: Vec<String>,
}

impl ClassDescriptor {
    pub fn new(fields: Vec<String>) -> Self {
        ClassDescriptor { fields }
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }
}

/// A decoded heap reference. The class header is read eagerly, the fields
/// stay on the heap until asked for.
#[derive(Debug, Clone)]
pub struct ObjectRef {
    pub index: u32,
    pub class: Rc<ClassDescriptor>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Int(i64),
    Str(Rc<str>),
    Bool(bool),
    Function(Rc<Function>),
    Class(Rc<ClassDescriptor>),
    Object(ObjectRef),
    /// The global environment's reference to itself.
    Global,
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Object(_) => "object",
            Value::Global => "global",
        }
    }

    pub fn as_function(&self) -> Option<&Rc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => a.index == b.index,
            (Value::Global, Value::Global) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Function(func) => write!(f, "function {}", func.name),
            Value::Class(class) => write!(f, "class {{{}}}", class.field_names().join(", ")),
            Value::Object(obj) => write!(f, "object@{} {{{}}}", obj.index, obj.class.field_names().join(", ")),
            Value::Global => write!(f, "global"),
        }
    }
}
