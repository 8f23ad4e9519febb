pub mod code;
pub mod error;
pub mod value;

pub use code::{lookup, make, read_operands, Definition, Instructions, Opcode};
pub use error::{EmberError, StackTrace, TraceFrame};
pub use value::{Builtin, BuiltinFn, Closure, CompiledFunction, HashKey, Value};
