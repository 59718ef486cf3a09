use std::collections::HashMap;
use std::rc::Rc;

use super::Value;

/// Dedup key: scalars by value, functions and classes by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Undefined,
    Int(i64),
    Str(Rc<str>),
    Bool(bool),
    Global,
    Ptr(usize),
}

impl ConstKey {
    fn of(value: &Value) -> Option<ConstKey> {
        Some(match value {
            Value::Undefined => ConstKey::Undefined,
            Value::Int(n) => ConstKey::Int(*n),
            Value::Str(s) => ConstKey::Str(s.clone()),
            Value::Bool(b) => ConstKey::Bool(*b),
            Value::Global => ConstKey::Global,
            Value::Function(f) => ConstKey::Ptr(Rc::as_ptr(f) as usize),
            Value::Class(c) => ConstKey::Ptr(Rc::as_ptr(c) as usize),
            // objects are encoded as heap references, never stored here
            Value::Object(_) => return None,
        })
    }
}

/// Append-only, index-addressed table of values too large or irregular to
/// inline into a tagged word. Shared by every code unit of one engine.
#[derive(Debug)]
pub struct ConstantTable {
    values: Vec<Value>,
    index: HashMap<ConstKey, u32>,
}

impl ConstantTable {
    pub fn new() -> Self {
        let mut table = ConstantTable { values: Vec::with_capacity(64), index: HashMap::new() };
        table.register(Value::Undefined);
        table
    }

    /// Returns the index of `value`, appending it if no equal entry exists.
    pub fn register(&mut self, value: Value) -> u32 {
        let key = ConstKey::of(&value);
        if let Some(idx) = key.as_ref().and_then(|k| self.index.get(k)) {
            return *idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(value);
        if let Some(k) = key {
            self.index.insert(k, idx);
        }
        idx
    }

    pub fn get(&self, index: u32) -> Option<&Value> {
        self.values.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }
}

impl Default for ConstantTable {
    fn default() -> Self {
        Self::new()
    }
}
