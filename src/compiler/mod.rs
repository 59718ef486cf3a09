use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::*;
use crate::bytecode::*;
use crate::value::tag::{encode_constant, encode_small_int};
use crate::value::{ClassDescriptor, ConstantTable, Function, TagValue, Value};

pub mod slots;

use slots::SlotTable;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("variable '{name}' is already declared")]
    Redeclaration { name: String, line: u32 },
    #[error("assignment to unknown local variable '{name}'")]
    UnresolvedLocal { name: String, line: u32 },
    #[error("field '{name}' is initialized twice")]
    DuplicateField { name: String, line: u32 },
}

impl CompileError {
    pub fn line(&self) -> u32 {
        match self {
            CompileError::Redeclaration { line, .. }
            | CompileError::UnresolvedLocal { line, .. }
            | CompileError::DuplicateField { line, .. } => *line,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CompileError::Redeclaration { .. } => "SJ-C001",
            CompileError::UnresolvedLocal { .. } => "SJ-C002",
            CompileError::DuplicateField { .. } => "SJ-C003",
        }
    }
}

type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Reject a second `var` of a name in the same function.
    pub strict_declarations: bool,
}

// ── Compiler ─────────────────────────────────────────────────────────

/// Lowers function bodies to bytecode, appending every non-inline constant
/// to the shared table.
pub struct Compiler<'a> {
    constants: &'a mut ConstantTable,
    config: CompilerConfig,
}

impl<'a> Compiler<'a> {
    pub fn new(constants: &'a mut ConstantTable, config: CompilerConfig) -> Self {
        Compiler { constants, config }
    }

    /// The script body becomes the zero-parameter function `main`.
    pub fn compile_script(&mut self, script: &Script) -> CompileResult<Rc<Function>> {
        self.compile_function(Some("main"), &[], &script.body, script.body.line)
    }

    pub fn compile_function(
        &mut self,
        name: Option<&str>,
        parameters: &[String],
        body: &Block,
        line: u32,
    ) -> CompileResult<Rc<Function>> {
        let name = name.unwrap_or("lambda");
        let slots = slots::allocate(parameters, body, self.config.strict_declarations, line)?;

        let mut buf = CodeBuffer::new();
        self.visit_block(body, &slots, &mut buf)?;
        let end_line = body.instrs.last().map(Expr::line).unwrap_or(line);
        buf.emit(OP_CONST, end_line).operand(TagValue::UNDEFINED.raw());
        buf.emit(OP_RET, end_line);

        let unit = buf.finish(parameters.len() + 1, slots.len());
        debug!(function = name, params = parameters.len(), slots = unit.slot_count, words = unit.code.len(), "compiled");
        trace!("{}:\n{}", name, disassemble(&unit, self.constants));
        Ok(Function::compiled(name, unit))
    }

    fn constant(&mut self, value: Value) -> u32 {
        encode_constant(value, self.constants).raw()
    }

    fn visit_block(&mut self, block: &Block, slots: &SlotTable, buf: &mut CodeBuffer) -> CompileResult<()> {
        for instr in &block.instrs {
            self.visit(instr, slots, buf)?;
            if !instr.is_statement() {
                buf.emit(OP_POP, instr.line());
            }
        }
        Ok(())
    }

    /// Visits `expr` where exactly one value must be left on the stack.
    /// Statement-only nodes evaluate to undefined there.
    fn visit_value(&mut self, expr: &Expr, slots: &SlotTable, buf: &mut CodeBuffer) -> CompileResult<()> {
        self.visit(expr, slots, buf)?;
        if expr.is_statement() {
            buf.emit(OP_CONST, expr.line()).operand(TagValue::UNDEFINED.raw());
        }
        Ok(())
    }

    fn visit(&mut self, expr: &Expr, slots: &SlotTable, buf: &mut CodeBuffer) -> CompileResult<()> {
        match expr {
            Expr::Block(block) => self.visit_block(block, slots, buf)?,

            Expr::Literal { value, line } => {
                let word = match value {
                    Literal::Int(n) => match encode_small_int(*n) {
                        Some(word) => word.raw(),
                        None => self.constant(Value::Int(*n)),
                    },
                    Literal::Str(s) => self.constant(Value::str(s)),
                    Literal::Bool(b) => self.constant(Value::Bool(*b)),
                    Literal::Undefined => TagValue::UNDEFINED.raw(),
                };
                buf.emit(OP_CONST, *line).operand(word);
            }

            Expr::LocalVarAccess { name, line } => match slots.slot_of(name) {
                Some(slot) => {
                    buf.emit(OP_LOAD, *line).operand(slot as u32);
                }
                None => {
                    let name_word = self.constant(Value::str(name));
                    buf.emit(OP_LOOKUP, *line).operand(name_word);
                }
            },

            Expr::LocalVarAssignment { name, expr, line, .. } => {
                self.visit_value(expr, slots, buf)?;
                let slot = slots
                    .slot_of(name)
                    .ok_or_else(|| CompileError::UnresolvedLocal { name: name.clone(), line: *line })?;
                buf.emit(OP_STORE, *line).operand(slot as u32);
            }

            Expr::Fun { name, parameters, body, line } => {
                let function = self.compile_function(name.as_deref(), parameters, body, *line)?;
                let fun_word = self.constant(Value::Function(function));
                buf.emit(OP_CONST, *line).operand(fun_word);
                // named literals bind themselves globally when this code runs
                if let Some(name) = name {
                    let name_word = self.constant(Value::str(name));
                    buf.emit(OP_DUP, *line);
                    buf.emit(OP_REGISTER, *line).operand(name_word);
                }
            }

            Expr::FunCall { callee, args, line } => {
                self.visit_value(callee, slots, buf)?;
                buf.emit(OP_CONST, *line).operand(TagValue::UNDEFINED.raw());
                for arg in args {
                    self.visit_value(arg, slots, buf)?;
                }
                buf.emit(OP_FUNCALL, *line).operand(args.len() as u32);
            }

            Expr::MethodCall { receiver, name, args, line } => {
                // [recv] -> [recv, recv] -> [recv, fn] -> [fn, recv]
                self.visit_value(receiver, slots, buf)?;
                let name_word = self.constant(Value::str(name));
                buf.emit(OP_DUP, *line);
                buf.emit(OP_GET, *line).operand(name_word);
                buf.emit(OP_SWAP, *line);
                for arg in args {
                    self.visit_value(arg, slots, buf)?;
                }
                buf.emit(OP_FUNCALL, *line).operand(args.len() as u32);
            }

            Expr::Return { expr, line } => {
                self.visit_value(expr, slots, buf)?;
                buf.emit(OP_RET, *line);
            }

            Expr::If { condition, then_block, else_block, line } => {
                self.visit_value(condition, slots, buf)?;
                buf.emit(OP_JUMP_IF_FALSE, *line);
                let to_else = buf.placeholder();
                self.visit_block(then_block, slots, buf)?;
                buf.emit(OP_GOTO, *line);
                let to_end = buf.placeholder();
                buf.patch(to_else, buf.label());
                self.visit_block(else_block, slots, buf)?;
                buf.patch(to_end, buf.label());
            }

            Expr::New { fields, line } => {
                let mut names: Vec<String> = Vec::with_capacity(fields.len());
                for init in fields {
                    if names.contains(&init.name) {
                        return Err(CompileError::DuplicateField { name: init.name.clone(), line: *line });
                    }
                    names.push(init.name.clone());
                }
                // values are pushed in slot order, NEW pops them in one go
                for init in fields {
                    self.visit_value(&init.value, slots, buf)?;
                }
                let class = Rc::new(ClassDescriptor::new(names));
                let class_word = self.constant(Value::Class(class));
                buf.emit(OP_NEW, *line).operand(class_word);
            }

            Expr::FieldAccess { receiver, name, line } => {
                self.visit_value(receiver, slots, buf)?;
                let name_word = self.constant(Value::str(name));
                buf.emit(OP_GET, *line).operand(name_word);
            }

            Expr::FieldAssignment { receiver, name, expr, line } => {
                self.visit_value(receiver, slots, buf)?;
                self.visit_value(expr, slots, buf)?;
                let name_word = self.constant(Value::str(name));
                buf.emit(OP_PUT, *line).operand(name_word);
            }
        }
        Ok(())
    }
}

/// Compiles `script` against `constants` with the default configuration.
pub fn compile(script: &Script, constants: &mut ConstantTable) -> CompileResult<Rc<Function>> {
    Compiler::new(constants, CompilerConfig::default()).compile_script(script)
}
