use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// The global name → value mapping. Cloning yields another handle to the
/// same bindings, so natives, the machine and the host all see one table.
#[derive(Debug, Clone, Default)]
pub struct GlobalEnv {
    bindings: Rc<RefCell<HashMap<String, Value>>>,
}

impl GlobalEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name`, replacing any previous value.
    pub fn register(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Missing names yield undefined.
    pub fn lookup(&self, name: &str) -> Value {
        self.bindings.borrow().get(name).cloned().unwrap_or(Value::Undefined)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}
