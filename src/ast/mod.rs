use serde::{Deserialize, Serialize};

pub mod build;

// ---- Core AST types ----

/// A sequence of expressions evaluated in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub instrs: Vec<Expr>,
    #[serde(default)]
    pub line: u32,
}

/// Literal values that can appear directly in source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Str(String),
    Bool(bool),
    Undefined,
}

/// One `name: expr` entry of an object literal, kept in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInit {
    pub name: String,
    pub value: Expr,
}

/// Expressions. Every node carries the source line it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    Block(Block),

    Literal {
        value: Literal,
        #[serde(default)]
        line: u32,
    },

    /// `callee(args...)`
    FunCall {
        callee: Box<Expr>,
        args: Vec<Expr>,
        #[serde(default)]
        line: u32,
    },

    /// Variable reference, resolved to a slot or to the global environment
    LocalVarAccess {
        name: String,
        #[serde(default)]
        line: u32,
    },

    /// `var name = expr` when `declaration`, `name = expr` otherwise
    LocalVarAssignment {
        name: String,
        expr: Box<Expr>,
        declaration: bool,
        #[serde(default)]
        line: u32,
    },

    /// `function name(params) { body }`, name is optional
    Fun {
        name: Option<String>,
        parameters: Vec<String>,
        body: Block,
        #[serde(default)]
        line: u32,
    },

    Return {
        expr: Box<Expr>,
        #[serde(default)]
        line: u32,
    },

    /// `if (condition) { then } else { otherwise }`
    If {
        condition: Box<Expr>,
        then_block: Block,
        else_block: Block,
        #[serde(default)]
        line: u32,
    },

    /// Object literal: `{ x: 1, y: 2 }`
    New {
        fields: Vec<FieldInit>,
        #[serde(default)]
        line: u32,
    },

    /// `receiver.name`
    FieldAccess {
        receiver: Box<Expr>,
        name: String,
        #[serde(default)]
        line: u32,
    },

    /// `receiver.name = expr`
    FieldAssignment {
        receiver: Box<Expr>,
        name: String,
        expr: Box<Expr>,
        #[serde(default)]
        line: u32,
    },

    /// `receiver.name(args...)`
    MethodCall {
        receiver: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        #[serde(default)]
        line: u32,
    },
}

impl Expr {
    pub fn line(&self) -> u32 {
        match self {
            Expr::Block(block) => block.line,
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
            | Expr::MethodCall { line, .. } => *line,
        }
    }

    /// Statement-only nodes leave nothing on the operand stack; every other
    /// node leaves exactly one value.
    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            Expr::Block(_)
                | Expr::If { .. }
                | Expr::LocalVarAssignment { .. }
                | Expr::FieldAssignment { .. }
                | Expr::Return { .. }
        )
    }
}

/// A complete program is the body of the implicit `main` function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub body: Block,
}

impl Script {
    pub fn new(instrs: Vec<Expr>) -> Self {
        Script { body: Block { instrs, line: 1 } }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    #[test]
    fn statement_classification() {
        assert!(var("x", int(1)).is_statement());
        assert!(ret(int(1)).is_statement());
        assert!(if_else(int(1), vec![], vec![]).is_statement());
        assert!(set_field(local("o"), "x", int(2)).is_statement());
        assert!(!int(1).is_statement());
        assert!(!call(local("f"), vec![]).is_statement());
        assert!(!fun(Some("f"), &[], vec![]).is_statement());
        assert!(!new_object(vec![("x", int(1))]).is_statement());
    }

    #[test]
    fn line_is_reported_for_every_node() {
        let e = call(local("print"), vec![int(1)]).at(7);
        assert_eq!(e.line(), 7);
        let b = Expr::Block(Block { instrs: vec![], line: 3 });
        assert_eq!(b.line(), 3);
    }

    #[test]
    fn script_json_round_trip() {
        let script = Script::new(vec![call(local("print"), vec![str_lit("hi")])]);
        let json = serde_json::to_string(&script).unwrap();
        assert!(json.contains("\"kind\":\"FunCall\""));
        let back = Script::from_json(&json).unwrap();
        assert_eq!(back, script);
    }

    #[test]
    fn missing_line_defaults_to_zero() {
        let json = r#"{"body":{"instrs":[{"kind":"LocalVarAccess","name":"x"}]}}"#;
        let script = Script::from_json(json).unwrap();
        assert_eq!(script.body.instrs[0].line(), 0);
        assert_eq!(script.body.line, 0);
    }

    #[test]
    fn literal_json_shape() {
        let json = r#"{"kind":"Literal","value":{"Int":-4},"line":2}"#;
        let e: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(e, int(-4).at(2));
        let json = r#"{"kind":"Literal","value":"Undefined"}"#;
        let e: Expr = serde_json::from_str(json).unwrap();
        assert_eq!(e, undefined());
    }
}
