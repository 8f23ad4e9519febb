#![allow(dead_code)]

//! Helpers that assemble programs the way a code generator would: each
//! helper emits the instructions for one expression form.

use ember_core::{EmberError, Opcode, Value};
use ember_vm::{Bytecode, Emitter, Vm, VmLimits};

pub type Expr<'a> = Box<dyn FnOnce(&mut Emitter) + 'a>;

pub fn program(build: impl FnOnce(&mut Emitter)) -> Bytecode {
    let mut e = Emitter::new();
    build(&mut e);
    e.bytecode()
}

pub fn run(build: impl FnOnce(&mut Emitter)) -> Result<Value, EmberError> {
    Vm::new(&program(build)).run()
}

pub fn run_with(limits: VmLimits, build: impl FnOnce(&mut Emitter)) -> Result<Value, EmberError> {
    Vm::with_limits(&program(build), limits)?.run()
}

pub fn int(e: &mut Emitter, n: i64) {
    e.emit_constant(Value::Int(n));
}

pub fn string(e: &mut Emitter, s: &str) {
    e.emit_constant(Value::string(s));
}

pub fn boolean(e: &mut Emitter, b: bool) {
    e.emit(if b { Opcode::True } else { Opcode::False }, &[]);
}

/// An expression statement: the value is evaluated and discarded.
pub fn stmt(e: &mut Emitter, expr: impl FnOnce(&mut Emitter)) {
    expr(e);
    e.emit(Opcode::Pop, &[]);
}

pub fn infix(
    e: &mut Emitter,
    op: Opcode,
    left: impl FnOnce(&mut Emitter),
    right: impl FnOnce(&mut Emitter),
) {
    left(e);
    right(e);
    e.emit(op, &[]);
}

/// `left < right`, emitted as `right > left`.
pub fn less_than(
    e: &mut Emitter,
    left: impl FnOnce(&mut Emitter),
    right: impl FnOnce(&mut Emitter),
) {
    right(e);
    left(e);
    e.emit(Opcode::GreaterThan, &[]);
}

/// `if (cond) { then } else { alt }`. Each branch is a statement list whose
/// final `OpPop` is removed so the branch leaves its value behind.
pub fn if_else(
    e: &mut Emitter,
    cond: impl FnOnce(&mut Emitter),
    then: impl FnOnce(&mut Emitter),
    alt: Option<Expr<'_>>,
) {
    cond(e);
    let jump_not_truthy = e.emit_jump(Opcode::JumpNotTruthy);
    then(e);
    e.remove_last_pop();
    let jump = e.emit_jump(Opcode::Jump);
    e.patch_jump(jump_not_truthy).unwrap();
    match alt {
        Some(alt) => {
            alt(e);
            e.remove_last_pop();
        }
        None => {
            e.emit(Opcode::Null, &[]);
        }
    }
    e.patch_jump(jump).unwrap();
}

/// `let name = value;` The name is bound before the value is compiled so a
/// function literal can refer to itself.
pub fn let_(e: &mut Emitter, name: &str, value: impl FnOnce(&mut Emitter)) {
    let symbol = e.define(name);
    value(e);
    e.store_symbol(&symbol).unwrap();
}

pub fn ident(e: &mut Emitter, name: &str) {
    let symbol = e
        .resolve(name)
        .unwrap_or_else(|| panic!("undefined variable {name}"));
    e.load_symbol(&symbol);
}

/// `fn(params) { body }`, optionally named for self-reference.
pub fn function(
    e: &mut Emitter,
    name: Option<&str>,
    params: &[&str],
    body: impl FnOnce(&mut Emitter),
) {
    e.enter_scope();
    if let Some(name) = name {
        e.define_function_name(name);
    }
    for param in params {
        e.define(param);
    }
    body(e);
    e.finish_function(params.len(), name).unwrap();
}

pub fn return_(e: &mut Emitter, value: impl FnOnce(&mut Emitter)) {
    value(e);
    e.emit(Opcode::ReturnValue, &[]);
}

pub fn call(e: &mut Emitter, callee: impl FnOnce(&mut Emitter), args: Vec<Expr<'_>>) {
    callee(e);
    let argc = args.len();
    for arg in args {
        arg(e);
    }
    e.emit(Opcode::Call, &[argc]);
}

pub fn array(e: &mut Emitter, items: Vec<Expr<'_>>) {
    let n = items.len();
    for item in items {
        item(e);
    }
    e.emit(Opcode::Array, &[n]);
}

pub fn hash(e: &mut Emitter, pairs: Vec<(Expr<'_>, Expr<'_>)>) {
    let n = pairs.len();
    for (key, value) in pairs {
        key(e);
        value(e);
    }
    e.emit(Opcode::Hash, &[n]);
}

pub fn index(e: &mut Emitter, collection: impl FnOnce(&mut Emitter), idx: impl FnOnce(&mut Emitter)) {
    collection(e);
    idx(e);
    e.emit(Opcode::Index, &[]);
}

/// Box an expression builder; the bound gives the closure its signature.
pub fn expr<'a>(f: impl FnOnce(&mut Emitter) + 'a) -> Expr<'a> {
    Box::new(f)
}

pub fn lit(n: i64) -> Expr<'static> {
    expr(move |e| int(e, n))
}

pub fn str_lit(s: &'static str) -> Expr<'static> {
    expr(move |e| string(e, s))
}

pub fn var(name: &'static str) -> Expr<'static> {
    expr(move |e| ident(e, name))
}

pub fn ints(ns: &[i64]) -> Value {
    Value::array(ns.iter().map(|n| Value::Int(*n)).collect())
}
