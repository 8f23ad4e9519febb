use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;

use ember_core::code::{read_u16, read_u8};
use ember_core::{
    Closure, CompiledFunction, EmberError, HashKey, Opcode, StackTrace, TraceFrame, Value,
};

use crate::config::VmLimits;
use crate::emit::Bytecode;
use crate::frame::Frame;

static NULL: Value = Value::Null;

/// The bytecode virtual machine. One instance runs one program; the
/// constant pool is shared read-only, everything else is owned.
pub struct Vm {
    constants: Arc<[Value]>,
    /// Preallocated to `stack_size`; `sp` is one past the top.
    stack: Vec<Value>,
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    limits: VmLimits,
    interrupt: Option<Arc<AtomicBool>>,
    steps: usize,
}

impl Vm {
    pub fn new(bytecode: &Bytecode) -> Self {
        Self::build(bytecode, VmLimits::default())
    }

    /// A VM with custom resource ceilings. Fails if the program needs more
    /// global slots than `limits` allows.
    pub fn with_limits(bytecode: &Bytecode, limits: VmLimits) -> Result<Self, EmberError> {
        if limits.max_frames == 0 {
            return Err(EmberError::Config(
                "max_frames must be at least 1".to_string(),
            ));
        }
        if bytecode.num_globals > limits.globals_size {
            return Err(EmberError::GlobalOutOfRange {
                index: bytecode.num_globals - 1,
                capacity: limits.globals_size,
            });
        }
        Ok(Self::build(bytecode, limits))
    }

    fn build(bytecode: &Bytecode, limits: VmLimits) -> Self {
        let main = CompiledFunction::new(bytecode.instructions.clone(), 0, 0).named("<main>");
        let main = Arc::new(Closure::new(Arc::new(main), Vec::new()));
        let mut frames = Vec::with_capacity(limits.max_frames);
        frames.push(Frame::new(main, 0));
        Vm {
            constants: bytecode.constants.clone(),
            stack: vec![Value::Null; limits.stack_size],
            sp: 0,
            globals: vec![Value::Null; limits.globals_size],
            frames,
            limits,
            interrupt: None,
            steps: 0,
        }
    }

    /// Continue with the globals of an earlier run.
    pub fn with_globals(mut self, mut globals: Vec<Value>) -> Result<Self, EmberError> {
        if globals.len() > self.limits.globals_size {
            return Err(EmberError::GlobalOutOfRange {
                index: globals.len() - 1,
                capacity: self.limits.globals_size,
            });
        }
        globals.resize(self.limits.globals_size, Value::Null);
        self.globals = globals;
        Ok(self)
    }

    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    /// Abort the run with `Interrupted` once `flag` is set.
    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    pub fn limits(&self) -> &VmLimits {
        &self.limits
    }

    /// The value on top of the operand stack, if any.
    pub fn stack_top(&self) -> Option<&Value> {
        self.sp.checked_sub(1).map(|i| &self.stack[i])
    }

    /// The most recently popped value; the result of the last expression
    /// statement once a run finishes.
    pub fn last_popped(&self) -> &Value {
        self.stack.get(self.sp).unwrap_or(&NULL)
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn global(&self, index: usize) -> Option<&Value> {
        self.globals.get(index)
    }

    /// Run the program to completion and return the last popped value.
    pub fn run(&mut self) -> Result<Value, EmberError> {
        tracing::debug!(
            "vm run: {} instructions, {} constants",
            self.frames[0].instructions().len(),
            self.constants.len()
        );
        match self.execute() {
            Ok(()) => {
                tracing::debug!("vm done after {} steps", self.steps);
                Ok(self.last_popped().clone())
            }
            Err(err) => {
                let trace = self.stack_trace();
                tracing::debug!(
                    "vm aborted after {} steps at depth {}: {err}",
                    self.steps,
                    self.frames.len()
                );
                Err(err.with_stack_trace(trace))
            }
        }
    }

    fn execute(&mut self) -> Result<(), EmberError> {
        // Outer loop picks up the current frame; the inner loop runs until
        // a call or return changes it.
        'dispatch: loop {
            let fi = self.frames.len() - 1;
            let closure = self.frames[fi].closure.clone();
            let base = self.frames[fi].base;
            let mut ip = self.frames[fi].ip;
            let code = closure.func.instructions.as_bytes();

            loop {
                if ip >= code.len() {
                    self.frames[fi].ip = ip;
                    if fi == 0 {
                        return Ok(());
                    }
                    // Falling off the end of a body returns null.
                    self.return_from(Value::Null)?;
                    continue 'dispatch;
                }
                if let Err(err) = self.tick() {
                    self.frames[fi].ip = ip;
                    return Err(err);
                }

                let op_ip = ip;
                let byte = code[ip];
                let Some(op) = Opcode::from_u8(byte) else {
                    self.frames[fi].ip = op_ip;
                    return Err(EmberError::UnknownOpcode(byte));
                };
                if op_ip + op.width() > code.len() {
                    self.frames[fi].ip = op_ip;
                    return Err(EmberError::invalid_bytecode(format!(
                        "truncated {} at {op_ip:04}",
                        op.definition().name
                    )));
                }
                ip += 1;

                let result = match op {
                    Opcode::Constant => {
                        let idx = read_u16(code, ip) as usize;
                        ip += 2;
                        match self.constants.get(idx).cloned() {
                            Some(val) => self.push(val),
                            None => Err(EmberError::invalid_bytecode(format!(
                                "constant {idx} out of range"
                            ))),
                        }
                    }
                    Opcode::Pop => self.pop().map(drop),
                    Opcode::True => self.push(Value::Bool(true)),
                    Opcode::False => self.push(Value::Bool(false)),
                    Opcode::Null => self.push(Value::Null),

                    Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                        self.binary_op(op)
                    }
                    Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                        self.comparison(op)
                    }
                    Opcode::Minus | Opcode::Bang => self.unary_op(op),

                    Opcode::Jump => {
                        ip = read_u16(code, ip) as usize;
                        Ok(())
                    }
                    Opcode::JumpNotTruthy => {
                        let target = read_u16(code, ip) as usize;
                        ip += 2;
                        match self.pop() {
                            Ok(cond) => {
                                if !cond.is_truthy() {
                                    ip = target;
                                }
                                Ok(())
                            }
                            Err(err) => Err(err),
                        }
                    }

                    Opcode::GetGlobal => {
                        let idx = read_u16(code, ip) as usize;
                        ip += 2;
                        match self.globals.get(idx).cloned() {
                            Some(val) => self.push(val),
                            None => Err(self.global_out_of_range(idx)),
                        }
                    }
                    Opcode::SetGlobal => {
                        let idx = read_u16(code, ip) as usize;
                        ip += 2;
                        self.set_global(idx)
                    }
                    Opcode::GetLocal => {
                        let slot = base + read_u8(code, ip) as usize;
                        ip += 1;
                        match self.stack.get(slot).cloned() {
                            Some(val) => self.push(val),
                            None => Err(self.local_out_of_range(slot)),
                        }
                    }
                    Opcode::SetLocal => {
                        let slot = base + read_u8(code, ip) as usize;
                        ip += 1;
                        self.set_local(slot)
                    }
                    Opcode::GetBuiltin => {
                        let idx = read_u8(code, ip) as usize;
                        ip += 1;
                        match ember_stdlib::builtins().get(idx) {
                            Some(builtin) => self.push(Value::Builtin(builtin)),
                            None => Err(EmberError::invalid_bytecode(format!(
                                "builtin {idx} out of range"
                            ))),
                        }
                    }
                    Opcode::GetFree => {
                        let idx = read_u8(code, ip) as usize;
                        ip += 1;
                        match closure.free.get(idx).cloned() {
                            Some(val) => self.push(val),
                            None => Err(EmberError::invalid_bytecode(format!(
                                "free variable {idx} out of range"
                            ))),
                        }
                    }
                    Opcode::CurrentClosure => self.push(Value::Closure(closure.clone())),

                    Opcode::Array => {
                        let n = read_u16(code, ip) as usize;
                        ip += 2;
                        self.build_array(n)
                    }
                    Opcode::Hash => {
                        let n = read_u16(code, ip) as usize;
                        ip += 2;
                        self.build_hash(n)
                    }
                    Opcode::Index => self.index(),

                    Opcode::Call => {
                        let argc = read_u8(code, ip) as usize;
                        ip += 1;
                        self.frames[fi].ip = ip;
                        match self.call(argc) {
                            Ok(true) => continue 'dispatch,
                            Ok(false) => Ok(()),
                            Err(err) => Err(err),
                        }
                    }
                    Opcode::ReturnValue => match self.pop() {
                        Ok(result) => match self.return_from(result) {
                            Ok(()) => continue 'dispatch,
                            Err(err) => Err(err),
                        },
                        Err(err) => Err(err),
                    },
                    Opcode::Return => match self.return_from(Value::Null) {
                        Ok(()) => continue 'dispatch,
                        Err(err) => Err(err),
                    },

                    Opcode::Closure => {
                        let idx = read_u16(code, ip) as usize;
                        let n_free = read_u8(code, ip + 2) as usize;
                        ip += 3;
                        self.make_closure(idx, n_free)
                    }
                };

                if let Err(err) = result {
                    self.frames[fi].ip = op_ip;
                    return Err(err);
                }
            }
        }
    }

    /// Count one instruction against the step limit and poll the interrupt flag.
    fn tick(&mut self) -> Result<(), EmberError> {
        if self.limits.max_steps > 0 && self.steps >= self.limits.max_steps {
            return Err(EmberError::StepLimitExceeded(self.limits.max_steps));
        }
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::Relaxed) {
                return Err(EmberError::Interrupted);
            }
        }
        self.steps += 1;
        Ok(())
    }

    // --- Stack ---

    #[inline]
    fn push(&mut self, val: Value) -> Result<(), EmberError> {
        if self.sp >= self.stack.len() {
            return Err(EmberError::StackOverflow {
                capacity: self.stack.len(),
            });
        }
        self.stack[self.sp] = val;
        self.sp += 1;
        Ok(())
    }

    /// Pop the top value. The slot keeps its contents so `last_popped`
    /// can read it until something overwrites it.
    #[inline]
    fn pop(&mut self) -> Result<Value, EmberError> {
        if self.sp == 0 {
            return Err(EmberError::invalid_bytecode("operand stack underflow"));
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    /// Take the top `n` values off the stack, bottom first.
    fn take(&mut self, n: usize) -> Result<Vec<Value>, EmberError> {
        if n > self.sp {
            return Err(EmberError::invalid_bytecode(format!(
                "need {n} operands, stack holds {}",
                self.sp
            )));
        }
        let start = self.sp - n;
        let items = self.stack[start..self.sp].to_vec();
        self.sp = start;
        Ok(items)
    }

    fn global_out_of_range(&self, index: usize) -> EmberError {
        EmberError::GlobalOutOfRange {
            index,
            capacity: self.globals.len(),
        }
    }

    fn local_out_of_range(&self, slot: usize) -> EmberError {
        EmberError::invalid_bytecode(format!(
            "local slot {slot} beyond stack capacity {}",
            self.stack.len()
        ))
    }

    fn set_global(&mut self, index: usize) -> Result<(), EmberError> {
        let val = self.pop()?;
        if index >= self.globals.len() {
            return Err(self.global_out_of_range(index));
        }
        self.globals[index] = val;
        Ok(())
    }

    fn set_local(&mut self, slot: usize) -> Result<(), EmberError> {
        let val = self.pop()?;
        if slot >= self.stack.len() {
            return Err(self.local_out_of_range(slot));
        }
        self.stack[slot] = val;
        Ok(())
    }

    // --- Operators ---

    fn binary_op(&mut self, op: Opcode) -> Result<(), EmberError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (&left, &right) {
            (Value::Int(l), Value::Int(r)) => int_arith(op, *l, *r)?,
            (Value::String(l), Value::String(r)) if op == Opcode::Add => {
                let mut s = String::with_capacity(l.len() + r.len());
                s.push_str(l);
                s.push_str(r);
                Value::String(Arc::from(s))
            }
            _ => {
                return Err(EmberError::unsupported_operator(
                    operator_symbol(op),
                    left.type_name(),
                    right.type_name(),
                ))
            }
        };
        self.push(result)
    }

    fn unary_op(&mut self, op: Opcode) -> Result<(), EmberError> {
        let operand = self.pop()?;
        let result = match (op, operand) {
            (Opcode::Minus, Value::Int(n)) => Value::Int(n.wrapping_neg()),
            (Opcode::Minus, other) => {
                return Err(EmberError::type_error("INTEGER", other.type_name()))
            }
            (_, operand) => Value::Bool(!operand.is_truthy()),
        };
        self.push(result)
    }

    fn comparison(&mut self, op: Opcode) -> Result<(), EmberError> {
        let right = self.pop()?;
        let left = self.pop()?;
        let result = match (op, &left, &right) {
            (Opcode::GreaterThan, Value::Int(l), Value::Int(r)) => l > r,
            (Opcode::Equal, _, _) => left.identical(&right),
            (Opcode::NotEqual, _, _) => !left.identical(&right),
            _ => {
                return Err(EmberError::unsupported_operator(
                    operator_symbol(op),
                    left.type_name(),
                    right.type_name(),
                ))
            }
        };
        self.push(Value::Bool(result))
    }

    // --- Composites ---

    fn build_array(&mut self, n: usize) -> Result<(), EmberError> {
        let items = self.take(n)?;
        self.push(Value::array(items))
    }

    fn build_hash(&mut self, pairs: usize) -> Result<(), EmberError> {
        let flat = self.take(pairs * 2)?;
        let mut map: HashMap<HashKey, Value> = HashMap::with_capacity(pairs);
        let mut it = flat.into_iter();
        while let (Some(key), Some(val)) = (it.next(), it.next()) {
            let key = key
                .hash_key()
                .ok_or_else(|| EmberError::Unhashable(key.type_name().to_string()))?;
            map.insert(key, val);
        }
        self.push(Value::Hash(Arc::new(map)))
    }

    fn index(&mut self) -> Result<(), EmberError> {
        let index = self.pop()?;
        let collection = self.pop()?;
        let result = match (&collection, &index) {
            (Value::Array(items), Value::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or_default(),
            (Value::Array(_), other) => {
                return Err(EmberError::type_error("INTEGER", other.type_name()))
            }
            (Value::Hash(map), key) => {
                let key = key
                    .hash_key()
                    .ok_or_else(|| EmberError::Unhashable(key.type_name().to_string()))?;
                map.get(&key).cloned().unwrap_or_default()
            }
            (other, _) => {
                return Err(EmberError::IndexNotSupported(
                    other.type_name().to_string(),
                ))
            }
        };
        self.push(result)
    }

    // --- Calls ---

    /// Call the value sitting below the top `argc` stack slots.
    /// Returns `true` when a new frame was pushed.
    fn call(&mut self, argc: usize) -> Result<bool, EmberError> {
        let Some(callee_slot) = self.sp.checked_sub(argc + 1) else {
            return Err(EmberError::invalid_bytecode("call without a callee"));
        };
        match self.stack[callee_slot].clone() {
            Value::Closure(closure) => {
                self.call_closure(closure, argc)?;
                Ok(true)
            }
            Value::Builtin(builtin) => {
                let result = (builtin.func)(&self.stack[self.sp - argc..self.sp])?;
                self.sp = callee_slot;
                self.push(result)?;
                Ok(false)
            }
            other => Err(EmberError::NotCallable(other.type_name().to_string())),
        }
    }

    fn call_closure(&mut self, closure: Arc<Closure>, argc: usize) -> Result<(), EmberError> {
        let func = &closure.func;
        if argc != func.num_parameters {
            return Err(EmberError::arity(
                func.display_name(),
                func.num_parameters,
                argc,
            ));
        }
        if self.frames.len() >= self.limits.max_frames {
            return Err(EmberError::FrameOverflow {
                capacity: self.limits.max_frames,
            });
        }
        let base = self.sp - argc;
        let top = base + func.num_locals.max(argc);
        if top > self.stack.len() {
            return Err(EmberError::StackOverflow {
                capacity: self.stack.len(),
            });
        }
        for slot in &mut self.stack[self.sp..top] {
            *slot = Value::Null;
        }
        self.sp = top;
        tracing::trace!(
            "call {} argc={argc} base={base} depth={}",
            func.display_name(),
            self.frames.len() + 1
        );
        self.frames.push(Frame::new(closure, base));
        Ok(())
    }

    /// Pop the current frame, drop its locals and the callee, push `result`.
    fn return_from(&mut self, result: Value) -> Result<(), EmberError> {
        if self.frames.len() <= 1 {
            return Err(EmberError::ReturnOutsideFunction);
        }
        let Some(frame) = self.frames.pop() else {
            return Err(EmberError::ReturnOutsideFunction);
        };
        tracing::trace!("return from {} to depth {}", frame.name(), self.frames.len());
        self.sp = frame.base.saturating_sub(1);
        self.push(result)
    }

    fn make_closure(&mut self, const_idx: usize, n_free: usize) -> Result<(), EmberError> {
        let func = match self.constants.get(const_idx) {
            Some(Value::Function(func)) => func.clone(),
            Some(other) => {
                return Err(EmberError::type_error(
                    "COMPILED_FUNCTION",
                    other.type_name(),
                ))
            }
            None => {
                return Err(EmberError::invalid_bytecode(format!(
                    "constant {const_idx} out of range"
                )))
            }
        };
        let free = self.take(n_free)?;
        self.push(Value::closure(func, free))
    }

    fn stack_trace(&self) -> StackTrace {
        let call_width = Opcode::Call.width();
        StackTrace(
            self.frames
                .iter()
                .rev()
                .enumerate()
                .map(|(depth, frame)| TraceFrame {
                    name: frame.name().to_string(),
                    // Callers are suspended just past their OpCall.
                    ip: if depth == 0 {
                        frame.ip
                    } else {
                        frame.ip.saturating_sub(call_width)
                    },
                })
                .collect(),
        )
    }
}

fn int_arith(op: Opcode, l: i64, r: i64) -> Result<Value, EmberError> {
    let n = match op {
        Opcode::Add => l.wrapping_add(r),
        Opcode::Sub => l.wrapping_sub(r),
        Opcode::Mul => l.wrapping_mul(r),
        Opcode::Div => {
            if r == 0 {
                return Err(EmberError::DivisionByZero);
            }
            l.wrapping_div(r)
        }
        _ => {
            return Err(EmberError::unsupported_operator(
                operator_symbol(op),
                "INTEGER",
                "INTEGER",
            ))
        }
    };
    Ok(Value::Int(n))
}

fn operator_symbol(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::GreaterThan => ">",
        other => other.definition().name,
    }
}
