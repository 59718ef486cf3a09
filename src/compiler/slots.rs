//! Pass 1: flat local-slot allocation.
//!
//! Slot 0 is the receiver (`this`), then the parameters in order, then every
//! `var` declaration in document order, including both arms of every `if`
//! and declarations nested inside expressions. Nested function literals get
//! their own table and are not visited.

use std::collections::HashMap;

use super::CompileError;
use crate::ast::{Block, Expr};

pub const RECEIVER: &str = "this";

#[derive(Debug, Clone, PartialEq)]
pub struct SlotTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl SlotTable {
    fn new() -> Self {
        let mut table = SlotTable { names: Vec::new(), index: HashMap::new() };
        table.declare(RECEIVER);
        table
    }

    /// Maps `name` to a slot, reusing the existing one if already declared.
    /// Returns the slot and whether it was newly created.
    fn declare(&mut self, name: &str) -> (usize, bool) {
        if let Some(&slot) = self.index.get(name) {
            return (slot, false);
        }
        let slot = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), slot);
        (slot, true)
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

struct Allocator {
    slots: SlotTable,
    strict: bool,
}

impl Allocator {
    fn declare(&mut self, name: &str, line: u32) -> Result<(), CompileError> {
        let (_, fresh) = self.slots.declare(name);
        if !fresh && self.strict {
            return Err(CompileError::Redeclaration { name: name.to_string(), line });
        }
        Ok(())
    }

    fn visit_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for instr in &block.instrs {
            self.visit(instr)?;
        }
        Ok(())
    }

    /// Parameters own one slot each whatever the mode: the call protocol
    /// copies one argument per parameter into consecutive slots.
    fn declare_parameter(&mut self, name: &str, line: u32) -> Result<(), CompileError> {
        let (_, fresh) = self.slots.declare(name);
        if !fresh {
            return Err(CompileError::Redeclaration { name: name.to_string(), line });
        }
        Ok(())
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> Result<(), CompileError> {
        for expr in exprs {
            self.visit(expr)?;
        }
        Ok(())
    }

    /// Children are visited in evaluation order, which is document order.
    fn visit(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Block(block) => self.visit_block(block),
            Expr::LocalVarAssignment { name, expr, declaration, line } => {
                self.visit(expr)?;
                if *declaration {
                    self.declare(name, *line)?;
                }
                Ok(())
            }
            Expr::If { condition, then_block, else_block, .. } => {
                self.visit(condition)?;
                self.visit_block(then_block)?;
                self.visit_block(else_block)
            }
            Expr::FunCall { callee, args, .. } => {
                self.visit(callee)?;
                self.visit_all(args)
            }
            Expr::MethodCall { receiver, args, .. } => {
                self.visit(receiver)?;
                self.visit_all(args)
            }
            Expr::Return { expr, .. } => self.visit(expr),
            Expr::New { fields, .. } => {
                for init in fields {
                    self.visit(&init.value)?;
                }
                Ok(())
            }
            Expr::FieldAccess { receiver, .. } => self.visit(receiver),
            Expr::FieldAssignment { receiver, expr, .. } => {
                self.visit(receiver)?;
                self.visit(expr)
            }
            Expr::Literal { .. } | Expr::LocalVarAccess { .. } | Expr::Fun { .. } => Ok(()),
        }
    }
}

/// Builds the slot table for one function body. In strict mode a second
/// `var` of the same name is rejected; otherwise it shares the slot.
/// Parameters that repeat each other or the receiver are always rejected.
pub fn allocate(parameters: &[String], body: &Block, strict: bool, line: u32) -> Result<SlotTable, CompileError> {
    let mut alloc = Allocator { slots: SlotTable::new(), strict };
    for p in parameters {
        alloc.declare_parameter(p, line)?;
    }
    alloc.visit_block(body)?;
    Ok(alloc.slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    fn params(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn receiver_then_parameters_then_locals() {
        let body = block(vec![var("a", int(1)), call(local("print"), vec![local("a")]), var("b", int(2))]);
        let slots = allocate(&params(&["x", "y"]), &body, false, 1).unwrap();
        assert_eq!(slots.names(), &["this", "x", "y", "a", "b"]);
        assert_eq!(slots.slot_of("this"), Some(0));
        assert_eq!(slots.slot_of("y"), Some(2));
        assert_eq!(slots.slot_of("b"), Some(4));
        assert_eq!(slots.slot_of("print"), None);
    }

    #[test]
    fn both_branches_share_the_flat_space() {
        let body = block(vec![if_else(
            local("c"),
            vec![var("t", int(1))],
            vec![var("f", int(2)), if_else(local("c"), vec![var("deep", int(3))], vec![])],
        )]);
        let slots = allocate(&[], &body, false, 1).unwrap();
        assert_eq!(slots.names(), &["this", "t", "f", "deep"]);
    }

    #[test]
    fn nested_function_bodies_are_not_visited() {
        let body = block(vec![fun(Some("g"), &["p"], vec![var("inner", int(1))]), var("outer", int(2))]);
        let slots = allocate(&[], &body, false, 1).unwrap();
        assert_eq!(slots.names(), &["this", "outer"]);
    }

    #[test]
    fn plain_assignments_do_not_allocate() {
        let body = block(vec![var("a", int(1)), assign("a", int(2)), assign("zz", int(3))]);
        let slots = allocate(&[], &body, false, 1).unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn redeclaration_reuses_the_slot_when_lenient() {
        let body = block(vec![var("a", int(1)), if_else(local("a"), vec![var("a", int(2))], vec![])]);
        let slots = allocate(&[], &body, false, 1).unwrap();
        assert_eq!(slots.names(), &["this", "a"]);
    }

    #[test]
    fn redeclaration_is_rejected_when_strict() {
        let body = block(vec![var("a", int(1)), var("a", int(2)).at(4)]);
        let err = allocate(&[], &body, true, 1).unwrap_err();
        assert!(matches!(err, CompileError::Redeclaration { ref name, line: 4 } if name == "a"));
    }

    #[test]
    fn duplicate_parameter_is_rejected_in_both_modes() {
        for strict in [false, true] {
            let err = allocate(&params(&["x", "x"]), &block(vec![]), strict, 9).unwrap_err();
            assert!(matches!(err, CompileError::Redeclaration { ref name, line: 9 } if name == "x"));
        }
    }

    #[test]
    fn parameter_cannot_shadow_the_receiver() {
        let err = allocate(&params(&["this"]), &block(vec![]), false, 2).unwrap_err();
        assert!(matches!(err, CompileError::Redeclaration { ref name, line: 2 } if name == "this"));
    }

    #[test]
    fn var_may_reuse_a_parameter_slot_when_lenient() {
        let body = block(vec![var("x", int(1))]);
        let slots = allocate(&params(&["x"]), &body, false, 1).unwrap();
        assert_eq!(slots.names(), &["this", "x"]);
    }

    #[test]
    fn declarations_inside_expressions_get_slots() {
        let body = block(vec![
            call(local("print"), vec![var("arg", int(1))]),
            ret(var("result", local("arg"))),
            if_else(var("cond", int(0)), vec![], vec![]),
        ]);
        let slots = allocate(&[], &body, false, 1).unwrap();
        assert_eq!(slots.names(), &["this", "arg", "result", "cond"]);
    }
}
