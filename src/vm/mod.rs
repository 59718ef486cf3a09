use std::rc::Rc;

use tracing::trace;

use crate::bytecode::*;
use crate::env::GlobalEnv;
use crate::heap::Heap;
use crate::value::tag::{decode, encode_any_value, encode_constant};
use crate::value::{ConstantTable, Function, FunctionKind, Kind, ObjectRef, TagValue, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("wrong number of arguments for {function}: expected {expected} but got {found}")]
    ArityMismatch { function: String, expected: usize, found: usize },
    #[error("no field '{name}' on object")]
    UnknownField { name: String },
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("heap exhausted: {requested} words requested, {available} available")]
    HeapExhausted { requested: usize, available: usize },
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u32 },
    #[error("stack overflow: limit of {limit} words reached")]
    StackOverflow { limit: usize },
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("execution ran past the end of the code at offset {pc}")]
    CodeOverrun { pc: usize },
    #[error("invalid constant index {index}")]
    InvalidConstant { index: u32 },
    #[error("invalid heap reference @{index}")]
    InvalidReference { index: u32 },
    #[error("output failed: {0}")]
    Output(String),
    #[error("slot {slot} is outside a frame of {slot_count} slots")]
    InvalidSlot { slot: usize, slot_count: usize },
}

impl VmError {
    pub fn code(&self) -> &'static str {
        match self {
            VmError::ArityMismatch { .. } => "SJ-R001",
            VmError::UnknownField { .. } => "SJ-R002",
            VmError::TypeMismatch { .. } => "SJ-R003",
            VmError::HeapExhausted { .. } => "SJ-R004",
            VmError::UnknownOpcode { .. } => "SJ-R005",
            VmError::StackOverflow { .. } => "SJ-R006",
            VmError::StackUnderflow => "SJ-R007",
            VmError::DivisionByZero => "SJ-R008",
            VmError::CodeOverrun { .. } => "SJ-R009",
            VmError::InvalidConstant { .. } => "SJ-R010",
            VmError::InvalidReference { .. } => "SJ-R011",
            VmError::Output(_) => "SJ-R012",
            VmError::InvalidSlot { .. } => "SJ-R013",
        }
    }
}

type VmResult<T> = Result<T, VmError>;

/// A [`VmError`] located at the instruction that raised it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error} (in {function}, line {line}, at {op})")]
pub struct RuntimeError {
    pub error: VmError,
    pub function: String,
    pub line: u32,
    pub op: &'static str,
}

impl RuntimeError {
    fn at(error: VmError, frame: &Frame, pc: usize) -> Self {
        let op = frame.unit.code.get(pc).and_then(|&op| op_name(op)).unwrap_or("?");
        RuntimeError { error, function: frame.function.name.clone(), line: frame.unit.line_at(pc), op }
    }

    /// Failure raised before any instruction of `function` ran.
    fn entry(error: VmError, function: &Function) -> Self {
        RuntimeError { error, function: function.name.clone(), line: 0, op: "FUNCALL" }
    }

    pub fn code(&self) -> &'static str {
        self.error.code()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Object heap size in words. Fixed for the machine's lifetime.
    pub heap_words: usize,
    pub initial_stack_words: usize,
    /// Growth limit of the operand stack; exceeding it is a StackOverflow.
    pub max_stack_words: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig { heap_words: 4096, initial_stack_words: 96, max_stack_words: 1 << 20 }
    }
}

// ── Activation records ───────────────────────────────────────────────
//
// A frame of a compiled function, from its base pointer upwards:
//
//   bp - 1                  callee function word
//   bp + 0                  receiver (slot 0)
//   bp + 1 ..               arguments, then the remaining locals
//   bp + slot_count + 0     saved bp
//   bp + slot_count + 1     saved pc
//   bp + slot_count + 2     calling function word
//   bp + slot_count + 3 ..  operands

const BP_OFFSET: usize = 0;
const PC_OFFSET: usize = 1;
const FUN_OFFSET: usize = 2;
pub const ACTIVATION_SIZE: usize = 3;

/// Saved pc of a frame entered from the host; returning from it ends the run.
pub const RETURN_TO_HOST: u32 = u32::MAX;

/// The function whose code is currently executing.
struct Frame {
    function: Rc<Function>,
    word: u32,
    unit: Rc<CodeUnit>,
}

/// Slot operands address the current frame only.
fn frame_slot(unit: &CodeUnit, operand: u32) -> VmResult<usize> {
    let slot = operand as usize;
    if slot >= unit.slot_count {
        return Err(VmError::InvalidSlot { slot, slot_count: unit.slot_count });
    }
    Ok(slot)
}

// ── Machine ──────────────────────────────────────────────────────────

pub struct Machine {
    stack: Vec<u32>,
    sp: usize,
    bp: usize,
    heap: Heap,
    constants: ConstantTable,
    globals: GlobalEnv,
    config: VmConfig,
}

impl Machine {
    pub fn new(constants: ConstantTable, globals: GlobalEnv, config: VmConfig) -> Self {
        let initial = config.initial_stack_words.min(config.max_stack_words);
        Machine {
            stack: vec![0; initial],
            sp: 0,
            bp: 0,
            heap: Heap::with_capacity(config.heap_words),
            constants,
            globals,
            config,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn constants(&self) -> &ConstantTable {
        &self.constants
    }

    /// Code compiled for this machine must register its constants here.
    pub fn constants_mut(&mut self) -> &mut ConstantTable {
        &mut self.constants
    }

    pub fn globals(&self) -> &GlobalEnv {
        &self.globals
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Runs a compiled script body with an undefined receiver and no arguments.
    pub fn run_main(&mut self, main: &Rc<Function>) -> Result<Value, RuntimeError> {
        self.invoke(main, &Value::Undefined, &[])
    }

    /// Calls a global function by name with an undefined receiver.
    pub fn call_global(&mut self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        match self.globals.lookup(name) {
            Value::Function(f) => self.invoke(&f, &Value::Undefined, args),
            other => Err(RuntimeError {
                error: VmError::TypeMismatch { expected: "function", found: other.type_name() },
                function: name.to_string(),
                line: 0,
                op: "FUNCALL",
            }),
        }
    }

    /// Host-side call. Arity is checked exactly as FUNCALL checks it. On
    /// failure the stack is unwound to where it was before the call.
    pub fn invoke(&mut self, function: &Rc<Function>, receiver: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let (sp, bp) = (self.sp, self.bp);
        let result = match &function.kind {
            FunctionKind::Native(native) => (**native)(receiver, args).map_err(|e| RuntimeError::entry(e, function)),
            FunctionKind::Compiled(unit) => {
                let frame = Frame {
                    function: function.clone(),
                    word: encode_constant(Value::Function(function.clone()), &mut self.constants).raw(),
                    unit: unit.clone(),
                };
                self.enter_from_host(&frame, receiver, args)
                    .map_err(|e| RuntimeError::entry(e, function))
                    .and_then(|()| self.execute(frame))
            }
        };
        if result.is_err() {
            self.sp = sp;
            self.bp = bp;
        }
        result
    }

    /// Reads a field of a heap object; an unknown name yields undefined.
    pub fn get_field(&self, object: &ObjectRef, name: &str) -> VmResult<Value> {
        match object.class.slot_of(name) {
            Some(slot) => self.decode(self.heap.field_get(object.index, slot).raw()),
            None => Ok(Value::Undefined),
        }
    }

    fn enter_from_host(&mut self, frame: &Frame, receiver: &Value, args: &[Value]) -> VmResult<()> {
        self.push(frame.word)?;
        let receiver = self.encode(receiver);
        self.push(receiver)?;
        for arg in args {
            let word = self.encode(arg);
            self.push(word)?;
        }
        self.enter(frame, args.len(), RETURN_TO_HOST, frame.word)
    }

    // ── Stack plumbing ───────────────────────────────────────────────

    fn decode(&self, word: u32) -> VmResult<Value> {
        decode(TagValue::from_raw(word), &self.constants, &self.heap)
    }

    fn encode(&mut self, value: &Value) -> u32 {
        encode_any_value(value, &mut self.constants).raw()
    }

    /// Grows the stack so that index `top - 1` is addressable.
    fn reserve(&mut self, top: usize) -> VmResult<()> {
        if top <= self.stack.len() {
            return Ok(());
        }
        let limit = self.config.max_stack_words;
        if top > limit {
            return Err(VmError::StackOverflow { limit });
        }
        let len = (self.stack.len() * 2).max(top).min(limit);
        self.stack.resize(len, 0);
        Ok(())
    }

    fn push(&mut self, word: u32) -> VmResult<()> {
        self.reserve(self.sp + 1)?;
        self.stack[self.sp] = word;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<u32> {
        if self.sp == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    fn peek(&self) -> VmResult<u32> {
        self.sp.checked_sub(1).map(|top| self.stack[top]).ok_or(VmError::StackUnderflow)
    }

    fn type_of(&self, word: u32) -> &'static str {
        self.decode(word).map(|v| v.type_name()).unwrap_or("invalid value")
    }

    fn name_operand(&self, word: u32) -> VmResult<Rc<str>> {
        match self.decode(word)? {
            Value::Str(name) => Ok(name),
            other => Err(VmError::TypeMismatch { expected: "name", found: other.type_name() }),
        }
    }

    fn function_at(&self, word: u32) -> VmResult<Rc<Function>> {
        match self.decode(word)? {
            Value::Function(f) => Ok(f),
            other => Err(VmError::TypeMismatch { expected: "function", found: other.type_name() }),
        }
    }

    /// Resolves the receiver word to its heap index and class.
    fn object_at(&self, word: u32) -> VmResult<ObjectRef> {
        match TagValue::from_raw(word).kind() {
            Kind::Reference(_) => match self.decode(word)? {
                Value::Object(obj) => Ok(obj),
                other => Err(VmError::TypeMismatch { expected: "object", found: other.type_name() }),
            },
            _ => Err(VmError::TypeMismatch { expected: "object", found: self.type_of(word) }),
        }
    }

    /// Only the integer 0 and the `false` constant take a conditional jump.
    fn is_false(&self, word: u32) -> bool {
        let word = TagValue::from_raw(word);
        if word == TagValue::FALSE {
            return true;
        }
        match word.kind() {
            Kind::Constant(index) => matches!(self.constants.get(index), Some(Value::Bool(false))),
            _ => false,
        }
    }

    // ── Call protocol ────────────────────────────────────────────────

    /// Builds the callee's frame over the `argc` arguments on top of the
    /// stack, with receiver and callee word just below them.
    fn enter(&mut self, callee: &Frame, argc: usize, return_pc: u32, caller_word: u32) -> VmResult<()> {
        let unit = &callee.unit;
        if argc + 1 != unit.param_count {
            return Err(VmError::ArityMismatch {
                function: callee.function.name.clone(),
                expected: unit.param_count.saturating_sub(1),
                found: argc,
            });
        }
        if unit.slot_count < unit.param_count {
            return Err(VmError::InvalidSlot { slot: unit.param_count - 1, slot_count: unit.slot_count });
        }
        let bp = self.sp - argc - 1;
        let activation = bp + unit.slot_count;
        self.reserve(activation + ACTIVATION_SIZE)?;

        self.stack[activation + BP_OFFSET] = self.bp as u32;
        self.stack[activation + PC_OFFSET] = return_pc;
        self.stack[activation + FUN_OFFSET] = caller_word;
        for slot in &mut self.stack[bp + unit.param_count..activation] {
            *slot = TagValue::UNDEFINED.raw();
        }

        self.bp = bp;
        self.sp = activation + ACTIVATION_SIZE;
        trace!(function = %callee.function.name, argc, bp, "enter");
        Ok(())
    }

    fn execute(&mut self, mut frame: Frame) -> Result<Value, RuntimeError> {
        let mut pc = 0;
        loop {
            let at = pc;
            match self.step(&mut frame, &mut pc) {
                Ok(None) => {}
                Ok(Some(result)) => return Ok(result),
                Err(error) => return Err(RuntimeError::at(error, &frame, at)),
            }
        }
    }

    /// Executes one instruction. Returns the final value once the frame
    /// entered from the host returns.
    fn step(&mut self, frame: &mut Frame, pc: &mut usize) -> VmResult<Option<Value>> {
        let code = &frame.unit.code;
        let op = *code.get(*pc).ok_or(VmError::CodeOverrun { pc: *pc })?;
        if op_name(op).is_none() {
            return Err(VmError::UnknownOpcode { op });
        }
        let operand = match operand_count(op) {
            0 => 0,
            _ => *code.get(*pc + 1).ok_or(VmError::CodeOverrun { pc: *pc + 1 })?,
        };
        *pc += 1 + operand_count(op);

        match op {
            OP_CONST => self.push(operand)?,

            OP_LOOKUP => {
                let name = self.name_operand(operand)?;
                let value = self.globals.lookup(&name);
                let word = self.encode(&value);
                self.push(word)?;
            }

            OP_REGISTER => {
                let name = self.name_operand(operand)?;
                let word = self.pop()?;
                let value = self.decode(word)?;
                trace!(name = %name, value = %value, "register");
                self.globals.register(name.to_string(), value);
            }

            OP_LOAD => {
                let slot = frame_slot(&frame.unit, operand)?;
                let word = self.stack[self.bp + slot];
                self.push(word)?;
            }

            OP_STORE => {
                let slot = frame_slot(&frame.unit, operand)?;
                let word = self.pop()?;
                self.stack[self.bp + slot] = word;
            }

            OP_DUP => {
                let word = self.peek()?;
                self.push(word)?;
            }

            OP_POP => {
                self.pop()?;
            }

            OP_SWAP => {
                let top = self.pop()?;
                let below = self.pop()?;
                self.push(top)?;
                self.push(below)?;
            }

            OP_FUNCALL => {
                let argc = operand as usize;
                let base_arg = self.sp.checked_sub(argc).filter(|&b| b >= 2).ok_or(VmError::StackUnderflow)?;
                let callee_word = self.stack[base_arg - 2];
                let callee = self.function_at(callee_word)?;
                match &callee.kind {
                    FunctionKind::Native(native) => {
                        let receiver = self.decode(self.stack[base_arg - 1])?;
                        let args = self.stack[base_arg..self.sp]
                            .iter()
                            .map(|&w| self.decode(w))
                            .collect::<VmResult<Vec<_>>>()?;
                        trace!(function = %callee.name, argc, "native call");
                        let result = (**native)(&receiver, &args)?;
                        let word = self.encode(&result);
                        // drop callee and receiver along with the arguments
                        self.sp = base_arg - 2;
                        self.push(word)?;
                    }
                    FunctionKind::Compiled(unit) => {
                        let next = Frame { function: callee.clone(), word: callee_word, unit: unit.clone() };
                        self.enter(&next, argc, *pc as u32, frame.word)?;
                        *frame = next;
                        *pc = 0;
                    }
                }
            }

            OP_RET => {
                let result = self.pop()?;
                let activation = self.bp + frame.unit.slot_count;
                let saved_bp = self.stack[activation + BP_OFFSET] as usize;
                let saved_pc = self.stack[activation + PC_OFFSET];
                let caller_word = self.stack[activation + FUN_OFFSET];
                self.sp = self.bp - 1;
                self.bp = saved_bp;
                trace!(function = %frame.function.name, "return");
                if saved_pc == RETURN_TO_HOST {
                    return self.decode(result).map(Some);
                }
                let caller = self.function_at(caller_word)?;
                let unit = caller
                    .code()
                    .cloned()
                    .ok_or(VmError::TypeMismatch { expected: "compiled function", found: "native function" })?;
                *frame = Frame { function: caller, word: caller_word, unit };
                *pc = saved_pc as usize;
                self.push(result)?;
            }

            OP_GOTO => *pc = operand as usize,

            OP_JUMP_IF_FALSE => {
                let condition = self.pop()?;
                if self.is_false(condition) {
                    *pc = operand as usize;
                }
            }

            OP_NEW => {
                let class = match self.decode(operand)? {
                    Value::Class(class) => class,
                    other => return Err(VmError::TypeMismatch { expected: "class", found: other.type_name() }),
                };
                let base = self.sp.checked_sub(class.len()).ok_or(VmError::StackUnderflow)?;
                let fields: Vec<TagValue> = self.stack[base..self.sp].iter().map(|&w| TagValue::from_raw(w)).collect();
                let reference = self.heap.allocate(TagValue::from_raw(operand), &fields)?;
                self.sp = base;
                self.push(reference.raw())?;
            }

            OP_GET => {
                let name = self.name_operand(operand)?;
                let receiver = self.pop()?;
                let object = self.object_at(receiver)?;
                let word = match object.class.slot_of(&name) {
                    Some(slot) => self.heap.field_get(object.index, slot).raw(),
                    None => TagValue::UNDEFINED.raw(),
                };
                self.push(word)?;
            }

            OP_PUT => {
                let name = self.name_operand(operand)?;
                let value = self.pop()?;
                let receiver = self.pop()?;
                let object = self.object_at(receiver)?;
                let slot = object
                    .class
                    .slot_of(&name)
                    .ok_or_else(|| VmError::UnknownField { name: name.to_string() })?;
                self.heap.field_put(object.index, slot, TagValue::from_raw(value));
            }

            _ => return Err(VmError::UnknownOpcode { op }),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{Expr, Script};
    use crate::builtins::{self, Capture};
    use crate::compiler::{self, CompileError};

    fn machine_with(config: VmConfig) -> (Machine, Capture) {
        let out = Capture::new();
        let machine = Machine::new(ConstantTable::new(), builtins::global_env(out.clone()), config);
        (machine, out)
    }

    fn run_with(config: VmConfig, instrs: Vec<Expr>) -> (Result<Value, RuntimeError>, Machine, Capture) {
        let (mut machine, out) = machine_with(config);
        let main = compiler::compile(&Script::new(instrs), machine.constants_mut()).unwrap();
        let result = machine.run_main(&main);
        (result, machine, out)
    }

    fn run(instrs: Vec<Expr>) -> (Result<Value, RuntimeError>, Machine, Capture) {
        run_with(VmConfig::default(), instrs)
    }

    fn fact() -> Expr {
        fun(
            Some("fact"),
            &["n"],
            vec![
                if_else(op("<=", local("n"), int(1)), vec![ret(int(1))], vec![]),
                ret(op("*", local("n"), call(local("fact"), vec![op("-", local("n"), int(1))]))),
            ],
        )
    }

    #[test]
    fn print_of_sum() {
        let (result, _, out) = run(vec![call(local("print"), vec![op("+", int(1), int(2))])]);
        assert_eq!(result.unwrap(), Value::Undefined);
        assert_eq!(out.contents(), "3\n");
    }

    #[test]
    fn recursive_factorial() {
        let (result, mut machine, _) = run(vec![fact(), ret(call(local("fact"), vec![int(5)]))]);
        assert_eq!(result.unwrap(), Value::Int(120));
        // the stack is back where it started
        assert_eq!(machine.sp, 0);
        assert_eq!(machine.call_global("fact", &[Value::Int(6)]).unwrap(), Value::Int(720));
    }

    #[test]
    fn arity_is_checked_on_calls() {
        let (result, _, _) = run(vec![fact(), call(local("fact"), vec![int(1), int(2)]).at(3)]);
        let err = result.unwrap_err();
        assert_eq!(err.error, VmError::ArityMismatch { function: "fact".into(), expected: 1, found: 2 });
        assert_eq!(err.function, "main");
        assert_eq!(err.line, 3);
        assert_eq!(err.op, "FUNCALL");
    }

    #[test]
    fn arity_is_checked_on_host_calls() {
        let (result, mut machine, _) = run(vec![fact()]);
        result.unwrap();
        let err = machine.call_global("fact", &[]).unwrap_err();
        assert!(matches!(err.error, VmError::ArityMismatch { expected: 1, found: 0, .. }));
        assert_eq!(machine.sp, 0);
    }

    #[test]
    fn uninitialized_locals_are_undefined() {
        let (result, _, _) = run(vec![if_else(int(0), vec![var("a", int(1))], vec![]), ret(local("a"))]);
        assert_eq!(result.unwrap(), Value::Undefined);
    }

    #[test]
    fn parameters_bind_positionally() {
        let (result, _, _) = run(vec![
            fun(Some("sub"), &["a", "b"], vec![ret(op("-", local("a"), local("b")))]),
            ret(call(local("sub"), vec![int(10), int(4)])),
        ]);
        assert_eq!(result.unwrap(), Value::Int(6));
    }

    #[test]
    fn conditional_takes_exactly_one_branch() {
        let branch = |cond: Expr| {
            vec![
                if_else(
                    cond,
                    vec![call(local("print"), vec![str_lit("then")])],
                    vec![call(local("print"), vec![str_lit("else")])],
                ),
                call(local("print"), vec![str_lit("after")]),
            ]
        };
        let (_, _, out) = run(branch(op("<", int(1), int(2))));
        assert_eq!(out.contents(), "then\nafter\n");
        let (_, _, out) = run(branch(op(">", int(1), int(2))));
        assert_eq!(out.contents(), "else\nafter\n");
    }

    #[test]
    fn false_literal_branches_but_other_values_do_not() {
        let pick = |cond: Expr| {
            let (result, _, _) = run(vec![if_else(cond, vec![ret(int(1))], vec![ret(int(2))])]);
            result.unwrap()
        };
        assert_eq!(pick(boolean(false)), Value::Int(2));
        assert_eq!(pick(int(0)), Value::Int(2));
        assert_eq!(pick(boolean(true)), Value::Int(1));
        assert_eq!(pick(undefined()), Value::Int(1));
        assert_eq!(pick(str_lit("")), Value::Int(1));
    }

    #[test]
    fn field_lifecycle() {
        let object = || var("o", new_object(vec![("x", int(1)), ("y", int(2))]));

        let (result, _, _) = run(vec![object(), ret(field(local("o"), "x"))]);
        assert_eq!(result.unwrap(), Value::Int(1));

        let (result, _, _) = run(vec![object(), ret(field(local("o"), "z"))]);
        assert_eq!(result.unwrap(), Value::Undefined);

        let (result, _, _) = run(vec![object(), set_field(local("o"), "y", int(5)), ret(field(local("o"), "y"))]);
        assert_eq!(result.unwrap(), Value::Int(5));

        let (result, _, _) = run(vec![object(), set_field(local("o"), "z", int(3)).at(4)]);
        let err = result.unwrap_err();
        assert_eq!(err.error, VmError::UnknownField { name: "z".into() });
        assert_eq!(err.line, 4);
        assert_eq!(err.op, "PUT");
    }

    #[test]
    fn objects_are_returned_to_the_host() {
        let (result, machine, _) = run(vec![ret(new_object(vec![("a", str_lit("s")), ("b", int(-4))]))]);
        let Value::Object(obj) = result.unwrap() else { panic!("expected an object") };
        assert_eq!(machine.get_field(&obj, "a").unwrap(), Value::str("s"));
        assert_eq!(machine.get_field(&obj, "b").unwrap(), Value::Int(-4));
        assert_eq!(machine.get_field(&obj, "c").unwrap(), Value::Undefined);
    }

    #[test]
    fn method_calls_pass_the_receiver_as_this() {
        let (result, _, _) = run(vec![
            var(
                "counter",
                new_object(vec![
                    ("v", int(41)),
                    ("next", fun(None, &[], vec![ret(op("+", field(local("this"), "v"), int(1)))])),
                ]),
            ),
            ret(method(local("counter"), "next", vec![])),
        ]);
        assert_eq!(result.unwrap(), Value::Int(42));
    }

    #[test]
    fn field_access_on_a_non_object_fails() {
        let (result, _, _) = run(vec![field(int(3), "x")]);
        assert_eq!(result.unwrap_err().error, VmError::TypeMismatch { expected: "object", found: "integer" });
    }

    #[test]
    fn calling_a_non_function_fails() {
        let (result, _, _) = run(vec![call(int(3), vec![])]);
        assert_eq!(result.unwrap_err().error, VmError::TypeMismatch { expected: "function", found: "integer" });
    }

    #[test]
    fn unknown_globals_are_undefined() {
        let (result, _, _) = run(vec![ret(local("nowhere"))]);
        assert_eq!(result.unwrap(), Value::Undefined);
    }

    #[test]
    fn named_functions_register_when_their_definition_runs() {
        let (result, machine, _) = run(vec![if_else(int(0), vec![fun(Some("never"), &[], vec![])], vec![]), fun(Some("yes"), &[], vec![])]);
        result.unwrap();
        assert_eq!(machine.globals().lookup("never"), Value::Undefined);
        assert!(matches!(machine.globals().lookup("yes"), Value::Function(ref f) if f.name == "yes"));
    }

    #[test]
    fn large_and_negative_integers_survive() {
        let (result, _, _) = run(vec![ret(op("-", int(0), int(5)))]);
        assert_eq!(result.unwrap(), Value::Int(-5));
        let (result, _, _) = run(vec![ret(op("*", int(1 << 30), int(8)))]);
        assert_eq!(result.unwrap(), Value::Int(1 << 33));
    }

    #[test]
    fn heap_exhaustion_is_fatal() {
        let config = VmConfig { heap_words: 4, ..VmConfig::default() };
        let (result, _, _) = run_with(config, vec![new_object(vec![("x", int(1)), ("y", int(2)), ("z", int(3))])]);
        assert_eq!(result.unwrap_err().error, VmError::HeapExhausted { requested: 5, available: 4 });
    }

    #[test]
    fn unbounded_recursion_overflows() {
        let config = VmConfig { initial_stack_words: 8, max_stack_words: 256, ..VmConfig::default() };
        let (result, mut machine, _) = run_with(
            config,
            vec![fun(Some("down"), &[], vec![ret(call(local("down"), vec![]))]), call(local("down"), vec![])],
        );
        assert_eq!(result.unwrap_err().error, VmError::StackOverflow { limit: 256 });
        // the machine is reusable after a failure
        assert_eq!(machine.sp, 0);
        assert!(machine.call_global("print", &[Value::Int(1)]).is_ok());
    }

    #[test]
    fn division_by_zero_is_reported() {
        let (result, _, _) = run(vec![op("/", int(1), int(0))]);
        let err = result.unwrap_err();
        assert_eq!(err.error, VmError::DivisionByZero);
        assert_eq!(err.code(), "SJ-R008");
    }

    #[test]
    fn hand_built_code_is_checked() {
        let (mut machine, _) = machine_with(VmConfig::default());
        let unit = CodeUnit { code: vec![99], lines: vec![], param_count: 1, slot_count: 1 };
        let err = machine.run_main(&Function::compiled("bad", unit)).unwrap_err();
        assert_eq!(err.error, VmError::UnknownOpcode { op: 99 });
        assert_eq!(err.op, "?");

        let unit = CodeUnit { code: vec![OP_CONST, 0], lines: vec![], param_count: 1, slot_count: 1 };
        let err = machine.run_main(&Function::compiled("short", unit)).unwrap_err();
        assert_eq!(err.error, VmError::CodeOverrun { pc: 2 });
    }

    #[test]
    fn slot_operands_stay_inside_the_frame() {
        let (mut machine, _) = machine_with(VmConfig::default());
        let unit = CodeUnit { code: vec![OP_LOAD, 1, OP_RET], lines: vec![], param_count: 1, slot_count: 1 };
        let err = machine.run_main(&Function::compiled("load", unit)).unwrap_err();
        assert_eq!(err.error, VmError::InvalidSlot { slot: 1, slot_count: 1 });
        assert_eq!(err.op, "LOAD");
        assert_eq!(err.code(), "SJ-R013");

        let unit = CodeUnit { code: vec![OP_CONST, 0, OP_STORE, 7], lines: vec![], param_count: 1, slot_count: 2 };
        let err = machine.run_main(&Function::compiled("store", unit)).unwrap_err();
        assert_eq!(err.error, VmError::InvalidSlot { slot: 7, slot_count: 2 });
        assert_eq!(err.op, "STORE");
    }

    #[test]
    fn frame_smaller_than_its_parameters_is_refused() {
        let (mut machine, _) = machine_with(VmConfig::default());
        let unit = CodeUnit { code: vec![OP_CONST, 0, OP_RET], lines: vec![], param_count: 3, slot_count: 2 };
        let f = Function::compiled("narrow", unit);
        let err = machine.invoke(&f, &Value::Undefined, &[Value::Int(1), Value::Int(2)]).unwrap_err();
        assert_eq!(err.error, VmError::InvalidSlot { slot: 2, slot_count: 2 });
    }

    #[test]
    fn repeated_or_receiver_parameters_never_reach_the_machine() {
        for params in [&["x", "x"][..], &["this"][..]] {
            let (mut machine, _) = machine_with(VmConfig::default());
            let script = Script::new(vec![
                fun(Some("f"), params, vec![ret(local("x"))]),
                call(local("f"), vec![int(1), int(2)]),
            ]);
            let err = compiler::compile(&script, machine.constants_mut()).unwrap_err();
            assert!(matches!(err, CompileError::Redeclaration { .. }), "{params:?}: {err:?}");
            assert_eq!(machine.globals().lookup("f"), Value::Undefined);
        }
    }

    #[test]
    fn field_assignment_returned_as_a_value_is_undefined() {
        let (result, machine, _) = run(vec![
            var("o", new_object(vec![("x", int(0))])),
            ret(set_field(local("o"), "x", int(1))),
        ]);
        assert_eq!(result.unwrap(), Value::Undefined);
        assert_eq!(machine.sp, 0);
    }

    #[test]
    fn statements_as_arguments_keep_the_stack_balanced() {
        let (result, machine, out) = run(vec![
            var("o", new_object(vec![("x", int(0))])),
            call(local("print"), vec![var("a", int(5)), set_field(local("o"), "x", int(9))]),
            call(local("print"), vec![local("a"), field(local("o"), "x")]),
            ret(op("+", local("a"), int(1))),
        ]);
        assert_eq!(result.unwrap(), Value::Int(6));
        assert_eq!(out.contents(), "undefined undefined\n5 9\n");
        assert_eq!(machine.sp, 0);
    }

    #[test]
    fn globals_are_shared_between_runs() {
        let (mut machine, out) = machine_with(VmConfig::default());
        let first = compiler::compile(&Script::new(vec![fact()]), machine.constants_mut()).unwrap();
        machine.run_main(&first).unwrap();
        let second = compiler::compile(
            &Script::new(vec![call(local("print"), vec![call(local("fact"), vec![int(4)])])]),
            machine.constants_mut(),
        )
        .unwrap();
        machine.run_main(&second).unwrap();
        assert_eq!(out.contents(), "24\n");
    }

    #[test]
    fn compile_errors_stop_before_execution() {
        let (machine, _) = machine_with(VmConfig::default());
        let mut table = ConstantTable::new();
        let err = compiler::compile(&Script::new(vec![assign("x", int(1))]), &mut table).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedLocal { .. }));
        assert_eq!(machine.heap().used(), 0);
    }
}
