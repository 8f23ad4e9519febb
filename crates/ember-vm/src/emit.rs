use std::sync::Arc;

use ember_core::{make, CompiledFunction, EmberError, Instructions, Opcode, Value};

use crate::symbol_table::{ScopeId, Symbol, SymbolScope, SymbolTables};

/// A finished program: the main instruction stream, the constant pool and
/// the number of global slots it needs.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Arc<[Value]>,
    pub num_globals: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

/// A function body closed by [`Emitter::leave_scope`].
#[derive(Debug)]
pub struct FinishedScope {
    pub instructions: Instructions,
    /// Captured originals, to be loaded in the enclosing scope before `OpClosure`.
    pub free_symbols: Vec<Symbol>,
    pub num_locals: usize,
}

/// Builder for bytecode programs. Owns the constant pool, one instruction
/// buffer per open function body, and the symbol tables for those bodies.
pub struct Emitter {
    constants: Vec<Value>,
    scopes: Vec<CompilationScope>,
    symbols: SymbolTables,
    current: ScopeId,
}

impl Emitter {
    /// An emitter with the built-in table registered in the root scope.
    pub fn new() -> Self {
        let mut e = Emitter {
            constants: Vec::new(),
            scopes: vec![CompilationScope::default()],
            symbols: SymbolTables::new(),
            current: ScopeId::ROOT,
        };
        e.register_builtins();
        e
    }

    fn register_builtins(&mut self) {
        for (i, builtin) in ember_stdlib::builtins().iter().enumerate() {
            self.symbols.define_builtin(ScopeId::ROOT, i, builtin.name);
        }
    }

    /// Append a constant, returning its pool index.
    pub fn add_constant(&mut self, val: Value) -> usize {
        self.constants.push(val);
        self.constants.len() - 1
    }

    /// Add `val` to the pool and emit `OpConstant` for it.
    pub fn emit_constant(&mut self, val: Value) -> usize {
        let idx = self.add_constant(val);
        self.emit(Opcode::Constant, &[idx])
    }

    /// Emit one instruction, returning its address.
    pub fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let ins = make(op, operands);
        let scope = self.scope_mut();
        let position = scope.instructions.push(&ins);
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction {
            opcode: op,
            position,
        });
        position
    }

    /// Emit a jump with a placeholder target, returning its address for
    /// [`patch_jump`](Self::patch_jump).
    pub fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit(op, &[9999])
    }

    /// Point the jump at `pos` to the current position.
    pub fn patch_jump(&mut self, pos: usize) -> Result<(), EmberError> {
        let target = self.current_position();
        self.change_operand(pos, target)
    }

    /// Rewrite the single operand of the instruction at `pos`.
    pub fn change_operand(&mut self, pos: usize, operand: usize) -> Result<(), EmberError> {
        let ins = &mut self.scope_mut().instructions;
        let byte = ins
            .get(pos)
            .copied()
            .ok_or_else(|| EmberError::invalid_bytecode(format!("no instruction at {pos}")))?;
        let op = Opcode::from_u8(byte).ok_or(EmberError::UnknownOpcode(byte))?;
        if pos + op.width() > ins.len() {
            return Err(EmberError::invalid_bytecode(format!(
                "{} at {pos} runs past the end",
                op.definition().name
            )));
        }
        ins.patch(pos, &make(op, &[operand]));
        Ok(())
    }

    pub fn current_position(&self) -> usize {
        self.scope().instructions.len()
    }

    pub fn last_instruction_is(&self, op: Opcode) -> bool {
        let scope = self.scope();
        !scope.instructions.is_empty() && scope.last.is_some_and(|last| last.opcode == op)
    }

    /// Drop a trailing `OpPop`, so a block's last expression stays on the stack.
    pub fn remove_last_pop(&mut self) {
        if !self.last_instruction_is(Opcode::Pop) {
            return;
        }
        let scope = self.scope_mut();
        if let Some(last) = scope.last {
            scope.instructions.truncate(last.position);
            scope.last = scope.previous;
        }
    }

    /// Turn a trailing `OpPop` into `OpReturnValue` (implicit return).
    pub fn replace_last_pop_with_return(&mut self) {
        if !self.last_instruction_is(Opcode::Pop) {
            return;
        }
        let scope = self.scope_mut();
        if let Some(last) = scope.last.as_mut() {
            scope
                .instructions
                .patch(last.position, &make(Opcode::ReturnValue, &[]));
            last.opcode = Opcode::ReturnValue;
        }
    }

    /// Open a function body: a fresh instruction buffer and an enclosed
    /// symbol table.
    pub fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.current = self.symbols.enclose(self.current);
    }

    /// Close the innermost function body. Returns `None` at the root.
    pub fn leave_scope(&mut self) -> Option<FinishedScope> {
        let outer = self.symbols.outer(self.current)?;
        let scope = self.scopes.pop()?;
        let finished = FinishedScope {
            instructions: scope.instructions,
            free_symbols: self.symbols.free_symbols(self.current).to_vec(),
            num_locals: self.symbols.num_definitions(self.current),
        };
        self.current = outer;
        Some(finished)
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        self.symbols.define(self.current, name)
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        self.symbols.define_function_name(self.current, name)
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        self.symbols.resolve(self.current, name)
    }

    pub fn scope_id(&self) -> ScopeId {
        self.current
    }

    pub fn symbols(&self) -> &SymbolTables {
        &self.symbols
    }

    /// Emit the read for `symbol` in the current scope.
    pub fn load_symbol(&mut self, symbol: &Symbol) -> usize {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[]),
        }
    }

    /// Emit the write for `symbol`. Only globals and locals are assignable.
    pub fn store_symbol(&mut self, symbol: &Symbol) -> Result<usize, EmberError> {
        match symbol.scope {
            SymbolScope::Global => Ok(self.emit(Opcode::SetGlobal, &[symbol.index])),
            SymbolScope::Local => Ok(self.emit(Opcode::SetLocal, &[symbol.index])),
            other => Err(EmberError::invalid_bytecode(format!(
                "cannot assign to {other:?} symbol `{}`",
                symbol.name
            ))),
        }
    }

    /// Close the current function body and emit the code that builds its
    /// closure in the enclosing scope: one load per captured variable, then
    /// `OpClosure`. Returns the template's constant index.
    pub fn finish_function(
        &mut self,
        num_parameters: usize,
        name: Option<&str>,
    ) -> Result<usize, EmberError> {
        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[]);
        }
        let finished = self
            .leave_scope()
            .ok_or_else(|| EmberError::invalid_bytecode("no function scope to close"))?;

        for free in &finished.free_symbols {
            self.load_symbol(free);
        }
        let mut func =
            CompiledFunction::new(finished.instructions, finished.num_locals, num_parameters);
        if let Some(name) = name {
            func = func.named(name);
        }
        let idx = self.add_constant(Value::function(func));
        self.emit(Opcode::Closure, &[idx, finished.free_symbols.len()]);
        Ok(idx)
    }

    /// Snapshot the program built so far.
    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scopes[0].instructions.clone(),
            constants: Arc::from(self.constants.as_slice()),
            num_globals: self.symbols.num_definitions(ScopeId::ROOT),
        }
    }

    fn scope(&self) -> &CompilationScope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}
