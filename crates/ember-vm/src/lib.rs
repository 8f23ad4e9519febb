//! Symbol resolution, bytecode emission and the stack virtual machine.

pub mod config;
pub mod disasm;
pub mod emit;
mod frame;
pub mod symbol_table;
pub mod vm;

pub use config::VmLimits;
pub use disasm::disassemble;
pub use emit::{Bytecode, Emitter, FinishedScope};
pub use symbol_table::{ScopeId, Symbol, SymbolScope, SymbolTables};
pub use vm::Vm;
