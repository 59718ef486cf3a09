use std::fmt::Write;

use crate::value::{ConstantTable, Kind, TagValue, Value};

// ── Opcodes ──────────────────────────────────────────────────────────
//
// The stream is a flat Vec<u32>: an opcode word followed by its operand
// words. Operand meaning per opcode:
//
//   CONST          tagged word to push
//   LOOKUP         constant word naming a global
//   REGISTER       constant word naming a global
//   LOAD / STORE   local slot index
//   FUNCALL        argument count
//   GOTO / JUMP_IF_FALSE   absolute target offset
//   NEW            constant word of the class descriptor
//   GET / PUT      constant word naming the field

pub const OP_CONST: u32 = 1;
pub const OP_LOOKUP: u32 = 2;
pub const OP_REGISTER: u32 = 3;
pub const OP_LOAD: u32 = 4;
pub const OP_STORE: u32 = 5;
pub const OP_DUP: u32 = 6;
pub const OP_POP: u32 = 7;
pub const OP_SWAP: u32 = 8;
pub const OP_FUNCALL: u32 = 9;
pub const OP_RET: u32 = 10;
pub const OP_GOTO: u32 = 11;
pub const OP_JUMP_IF_FALSE: u32 = 12;
pub const OP_NEW: u32 = 13;
pub const OP_GET: u32 = 14;
pub const OP_PUT: u32 = 15;

pub fn op_name(op: u32) -> Option<&'static str> {
    Some(match op {
        OP_CONST => "CONST",
        OP_LOOKUP => "LOOKUP",
        OP_REGISTER => "REGISTER",
        OP_LOAD => "LOAD",
        OP_STORE => "STORE",
        OP_DUP => "DUP",
        OP_POP => "POP",
        OP_SWAP => "SWAP",
        OP_FUNCALL => "FUNCALL",
        OP_RET => "RET",
        OP_GOTO => "GOTO",
        OP_JUMP_IF_FALSE => "JUMP_IF_FALSE",
        OP_NEW => "NEW",
        OP_GET => "GET",
        OP_PUT => "PUT",
        _ => return None,
    })
}

pub fn operand_count(op: u32) -> usize {
    match op {
        OP_DUP | OP_POP | OP_SWAP | OP_RET => 0,
        _ => 1,
    }
}

// ── Code unit ────────────────────────────────────────────────────────

/// Compiled body of one function literal. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    pub code: Vec<u32>,
    /// `(offset, line)` for every instruction start, in offset order.
    pub lines: Vec<(u32, u32)>,
    /// Declared parameters plus the implicit receiver.
    pub param_count: usize,
    /// Receiver, parameters and every declared local.
    pub slot_count: usize,
}

impl CodeUnit {
    /// Source line of the instruction starting at or before `pc`.
    pub fn line_at(&self, pc: usize) -> u32 {
        let pos = self.lines.partition_point(|&(offset, _)| offset as usize <= pc);
        if pos == 0 { 0 } else { self.lines[pos - 1].1 }
    }
}

// ── Code buffer ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u32>,
    lines: Vec<(u32, u32)>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer { code: Vec::with_capacity(32), lines: Vec::new() }
    }

    /// Starts a new instruction, recording its source line.
    pub fn emit(&mut self, op: u32, line: u32) -> &mut Self {
        let at = self.code.len() as u32;
        if self.lines.last().map(|&(_, l)| l) != Some(line) {
            self.lines.push((at, line));
        }
        self.code.push(op);
        self
    }

    pub fn operand(&mut self, word: u32) -> &mut Self {
        self.code.push(word);
        self
    }

    /// Offset of the next word to be emitted.
    pub fn label(&self) -> usize {
        self.code.len()
    }

    /// Reserves an operand word to be patched later; returns its offset.
    pub fn placeholder(&mut self) -> usize {
        self.code.push(0);
        self.code.len() - 1
    }

    pub fn patch(&mut self, position: usize, label: usize) {
        self.code[position] = label as u32;
    }

    pub fn finish(self, param_count: usize, slot_count: usize) -> CodeUnit {
        debug_assert!(slot_count >= param_count, "{param_count} parameters need at least as many slots");
        CodeUnit { code: self.code, lines: self.lines, param_count, slot_count }
    }
}

// ── Disassembly ──────────────────────────────────────────────────────

fn describe_word(word: u32, constants: &ConstantTable) -> String {
    match TagValue::from_raw(word).kind() {
        Kind::SmallInt(n) => n.to_string(),
        Kind::Reference(idx) => format!("@{}", idx),
        Kind::Constant(idx) => match constants.get(idx) {
            Some(Value::Str(s)) => format!("{:?}", s),
            Some(v) => v.to_string(),
            None => format!("#{}?", idx),
        },
    }
}

/// Renders `unit` one instruction per line, e.g. `0004  LOAD 1  ; line 3`.
pub fn disassemble(unit: &CodeUnit, constants: &ConstantTable) -> String {
    let mut out = String::new();
    let mut pc = 0;
    let mut last_line = None;
    while pc < unit.code.len() {
        let op = unit.code[pc];
        let Some(name) = op_name(op) else {
            let _ = writeln!(out, "{:04}  <unknown {}>", pc, op);
            pc += 1;
            continue;
        };
        let _ = write!(out, "{:04}  {}", pc, name);
        let n = operand_count(op);
        for i in 1..=n {
            match unit.code.get(pc + i) {
                Some(&word) => {
                    let shown = match op {
                        OP_LOAD | OP_STORE | OP_FUNCALL | OP_GOTO | OP_JUMP_IF_FALSE => word.to_string(),
                        _ => describe_word(word, constants),
                    };
                    let _ = write!(out, " {}", shown);
                }
                None => {
                    let _ = write!(out, " <missing>");
                }
            }
        }
        let line = unit.line_at(pc);
        if last_line != Some(line) {
            let _ = write!(out, "  ; line {}", line);
            last_line = Some(line);
        }
        out.push('\n');
        pc += 1 + n;
    }
    out
}
