//! Constructor helpers for building trees by hand.
//!
//! Nodes are created with line 0; use [`Expr::at`] to attach a source line.

use super::{Block, Expr, FieldInit, Literal};

impl Expr {
    /// Returns the same node tagged with `line`.
    pub fn at(mut self, new_line: u32) -> Expr {
        match &mut self {
            Expr::Block(block) => block.line = new_line,
            Expr::Literal { line, .. }
            | Expr::FunCall { line, .. }
            | Expr::LocalVarAccess { line, .. }
            | Expr::LocalVarAssignment { line, .. }
            | Expr::Fun { line, .. }
            | Expr::Return { line, .. }
            | Expr::If { line, .. }
            | Expr::New { line, .. }
            | Expr::FieldAccess { line, .. }
            | Expr::FieldAssignment { line, .. }
            | Expr::MethodCall { line, .. } => *line = new_line,
        }
        self
    }
}

pub fn block(instrs: Vec<Expr>) -> Block {
    Block { instrs, line: 0 }
}

fn literal(value: Literal) -> Expr {
    Expr::Literal { value, line: 0 }
}

pub fn int(n: i64) -> Expr {
    literal(Literal::Int(n))
}

pub fn str_lit(s: &str) -> Expr {
    literal(Literal::Str(s.to_string()))
}

pub fn boolean(b: bool) -> Expr {
    literal(Literal::Bool(b))
}

pub fn undefined() -> Expr {
    literal(Literal::Undefined)
}

pub fn local(name: &str) -> Expr {
    Expr::LocalVarAccess { name: name.to_string(), line: 0 }
}

/// `var name = expr`
pub fn var(name: &str, expr: Expr) -> Expr {
    Expr::LocalVarAssignment { name: name.to_string(), expr: Box::new(expr), declaration: true, line: 0 }
}

/// `name = expr` on an already declared local
pub fn assign(name: &str, expr: Expr) -> Expr {
    Expr::LocalVarAssignment { name: name.to_string(), expr: Box::new(expr), declaration: false, line: 0 }
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::FunCall { callee: Box::new(callee), args, line: 0 }
}

/// Call of a global primitive such as `+` or `<=`.
pub fn op(name: &str, left: Expr, right: Expr) -> Expr {
    call(local(name), vec![left, right])
}

pub fn fun(name: Option<&str>, parameters: &[&str], body: Vec<Expr>) -> Expr {
    Expr::Fun {
        name: name.map(str::to_string),
        parameters: parameters.iter().map(|p| p.to_string()).collect(),
        body: block(body),
        line: 0,
    }
}

pub fn ret(expr: Expr) -> Expr {
    Expr::Return { expr: Box::new(expr), line: 0 }
}

pub fn if_else(condition: Expr, then_block: Vec<Expr>, else_block: Vec<Expr>) -> Expr {
    Expr::If {
        condition: Box::new(condition),
        then_block: block(then_block),
        else_block: block(else_block),
        line: 0,
    }
}

pub fn new_object(fields: Vec<(&str, Expr)>) -> Expr {
    Expr::New {
        fields: fields
            .into_iter()
            .map(|(name, value)| FieldInit { name: name.to_string(), value })
            .collect(),
        line: 0,
    }
}

pub fn field(receiver: Expr, name: &str) -> Expr {
    Expr::FieldAccess { receiver: Box::new(receiver), name: name.to_string(), line: 0 }
}

pub fn set_field(receiver: Expr, name: &str, expr: Expr) -> Expr {
    Expr::FieldAssignment {
        receiver: Box::new(receiver),
        name: name.to_string(),
        expr: Box::new(expr),
        line: 0,
    }
}

pub fn method(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::MethodCall { receiver: Box::new(receiver), name: name.to_string(), args, line: 0 }
}
