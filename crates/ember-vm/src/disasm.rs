use std::fmt::Write;

use ember_core::Value;

use crate::emit::Bytecode;

/// Render a whole program: the main stream, then every function template
/// in the constant pool, each under its own header.
pub fn disassemble(bytecode: &Bytecode) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== <main> ==");
    out.push_str(&bytecode.instructions.disassemble());

    for (idx, constant) in bytecode.constants.iter().enumerate() {
        if let Value::Function(func) = constant {
            let _ = writeln!(out);
            match &func.name {
                Some(name) => {
                    let _ = writeln!(out, "== fn #{idx} {name} ==");
                }
                None => {
                    let _ = writeln!(out, "== fn #{idx} ==");
                }
            }
            let _ = writeln!(
                out,
                "; params={} locals={}",
                func.num_parameters, func.num_locals
            );
            out.push_str(&func.instructions.disassemble());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use ember_core::{Instructions, Opcode};

    use super::*;
    use crate::emit::Emitter;

    #[test]
    fn test_disassemble_main_only() {
        let mut e = Emitter::new();
        e.emit_constant(Value::Int(1));
        e.emit_constant(Value::Int(2));
        e.emit(Opcode::Add, &[]);
        e.emit(Opcode::Pop, &[]);
        let output = disassemble(&e.bytecode());
        assert_eq!(
            output,
            "== <main> ==\n\
             0000 OpConstant 0\n\
             0003 OpConstant 1\n\
             0006 OpAdd\n\
             0007 OpPop\n"
        );
    }

    #[test]
    fn test_disassemble_functions() {
        let mut e = Emitter::new();
        e.emit_constant(Value::Int(10));
        e.emit(Opcode::Pop, &[]);
        e.enter_scope();
        let x = e.define("x");
        e.load_symbol(&x);
        e.emit(Opcode::Pop, &[]);
        e.finish_function(1, Some("id")).unwrap();
        e.emit(Opcode::Pop, &[]);

        let output = disassemble(&e.bytecode());
        assert_eq!(
            output,
            "== <main> ==\n\
             0000 OpConstant 0\n\
             0003 OpPop\n\
             0004 OpClosure 1 0\n\
             0008 OpPop\n\
             \n\
             == fn #1 id ==\n\
             ; params=1 locals=1\n\
             0000 OpGetLocal 0\n\
             0002 OpReturnValue\n"
        );
    }

    #[test]
    fn test_disassemble_bad_byte_in_function() {
        let mut e = Emitter::new();
        let mut func = ember_core::CompiledFunction::new(Instructions::from(vec![0xffu8]), 0, 0);
        func.name = Some("broken".to_string());
        e.add_constant(Value::function(func));
        let output = disassemble(&e.bytecode());
        assert!(output.contains("== fn #0 broken =="));
        assert!(output.contains("0000 ERROR: opcode 255 undefined"));
    }
}
