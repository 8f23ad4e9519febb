//! Instruction codec.
//!
//! An instruction is one opcode byte followed by its operands, each written
//! big-endian at the width declared by the opcode's [`Definition`].
//! An [`Instructions`] stream is a flat byte vector; a byte offset into it is
//! an instruction address.

use std::fmt;
use std::ops::Deref;

use crate::error::EmberError;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Constant,       // u16 const index → push constants[i]
    Add,            // pop right, pop left, push left + right
    Pop,            // discard TOS (statement result)
    Sub,
    Mul,
    Div,
    True,
    False,
    Equal,
    NotEqual,
    GreaterThan,
    Minus,          // unary -
    Bang,           // unary !
    JumpNotTruthy,  // u16 absolute target, pops condition
    Jump,           // u16 absolute target
    Null,
    GetGlobal,      // u16 slot
    SetGlobal,      // u16 slot
    Array,          // u16 element count
    Hash,           // u16 pair count, keys and values interleaved
    Index,          // pop index, pop collection
    Call,           // u8 argument count
    ReturnValue,    // return TOS
    Return,         // return null
    GetLocal,       // u8 slot relative to frame base
    SetLocal,       // u8 slot relative to frame base
    GetBuiltin,     // u8 built-in table index
    Closure,        // u16 const index of function template, u8 free count
    GetFree,        // u8 captured-value index
    CurrentClosure, // push the executing closure
}

const ALL_OPCODES: [Opcode; 30] = [
    Opcode::Constant,
    Opcode::Add,
    Opcode::Pop,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::True,
    Opcode::False,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::GreaterThan,
    Opcode::Minus,
    Opcode::Bang,
    Opcode::JumpNotTruthy,
    Opcode::Jump,
    Opcode::Null,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::Array,
    Opcode::Hash,
    Opcode::Index,
    Opcode::Call,
    Opcode::ReturnValue,
    Opcode::Return,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::GetBuiltin,
    Opcode::Closure,
    Opcode::GetFree,
    Opcode::CurrentClosure,
];

/// Mnemonic and operand layout of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Definition {
    /// Total operand bytes following the opcode byte.
    pub fn operand_len(&self) -> usize {
        self.operand_widths.iter().sum()
    }
}

impl Opcode {
    /// Every opcode, ordered by its byte value.
    pub fn all() -> &'static [Opcode] {
        &ALL_OPCODES
    }

    pub fn from_u8(byte: u8) -> Option<Opcode> {
        ALL_OPCODES.get(byte as usize).copied()
    }

    pub fn definition(self) -> &'static Definition {
        const NONE: &[usize] = &[];
        macro_rules! def {
            ($name:literal, $widths:expr) => {
                &Definition {
                    name: $name,
                    operand_widths: $widths,
                }
            };
        }
        match self {
            Opcode::Constant => def!("OpConstant", &[2]),
            Opcode::Add => def!("OpAdd", NONE),
            Opcode::Pop => def!("OpPop", NONE),
            Opcode::Sub => def!("OpSub", NONE),
            Opcode::Mul => def!("OpMul", NONE),
            Opcode::Div => def!("OpDiv", NONE),
            Opcode::True => def!("OpTrue", NONE),
            Opcode::False => def!("OpFalse", NONE),
            Opcode::Equal => def!("OpEqual", NONE),
            Opcode::NotEqual => def!("OpNotEqual", NONE),
            Opcode::GreaterThan => def!("OpGreaterThan", NONE),
            Opcode::Minus => def!("OpMinus", NONE),
            Opcode::Bang => def!("OpBang", NONE),
            Opcode::JumpNotTruthy => def!("OpJumpNotTruthy", &[2]),
            Opcode::Jump => def!("OpJump", &[2]),
            Opcode::Null => def!("OpNull", NONE),
            Opcode::GetGlobal => def!("OpGetGlobal", &[2]),
            Opcode::SetGlobal => def!("OpSetGlobal", &[2]),
            Opcode::Array => def!("OpArray", &[2]),
            Opcode::Hash => def!("OpHash", &[2]),
            Opcode::Index => def!("OpIndex", NONE),
            Opcode::Call => def!("OpCall", &[1]),
            Opcode::ReturnValue => def!("OpReturnValue", NONE),
            Opcode::Return => def!("OpReturn", NONE),
            Opcode::GetLocal => def!("OpGetLocal", &[1]),
            Opcode::SetLocal => def!("OpSetLocal", &[1]),
            Opcode::GetBuiltin => def!("OpGetBuiltin", &[1]),
            Opcode::Closure => def!("OpClosure", &[2, 1]),
            Opcode::GetFree => def!("OpGetFree", &[1]),
            Opcode::CurrentClosure => def!("OpCurrentClosure", NONE),
        }
    }

    /// Size of the full instruction (opcode byte + operands).
    pub fn width(self) -> usize {
        1 + self.definition().operand_len()
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

/// Look up the definition for a raw opcode byte.
pub fn lookup(byte: u8) -> Result<&'static Definition, EmberError> {
    Opcode::from_u8(byte)
        .map(Opcode::definition)
        .ok_or(EmberError::UnknownOpcode(byte))
}

/// Encode one instruction. Operands wider than their declared width are
/// truncated to the low-order bytes; missing operands encode as zero.
pub fn make(op: Opcode, operands: &[usize]) -> Vec<u8> {
    let def = op.definition();
    let mut out = Vec::with_capacity(1 + def.operand_len());
    out.push(op as u8);
    for (i, width) in def.operand_widths.iter().enumerate() {
        let operand = operands.get(i).copied().unwrap_or(0);
        match width {
            2 => out.extend_from_slice(&(operand as u16).to_be_bytes()),
            1 => out.push(operand as u8),
            _ => {}
        }
    }
    out
}

/// Decode the operands that follow an opcode byte. Returns the operands in
/// declaration order and the number of bytes consumed. A stream that ends
/// before the declared operand width is `InvalidBytecode`.
pub fn read_operands(def: &Definition, ins: &[u8]) -> Result<(Vec<usize>, usize), EmberError> {
    if ins.len() < def.operand_len() {
        return Err(EmberError::invalid_bytecode(format!("truncated {}", def.name)));
    }
    let mut operands = Vec::with_capacity(def.operand_widths.len());
    let mut offset = 0;
    for width in def.operand_widths {
        match width {
            2 => operands.push(read_u16(ins, offset) as usize),
            1 => operands.push(read_u8(ins, offset) as usize),
            _ => {}
        }
        offset += width;
    }
    Ok((operands, offset))
}

/// Big-endian u16 at `offset`. Bytes past the end read as zero.
#[inline]
pub fn read_u16(ins: &[u8], offset: usize) -> u16 {
    let hi = ins.get(offset).copied().unwrap_or(0);
    let lo = ins.get(offset + 1).copied().unwrap_or(0);
    u16::from_be_bytes([hi, lo])
}

#[inline]
pub fn read_u8(ins: &[u8], offset: usize) -> u8 {
    ins.get(offset).copied().unwrap_or(0)
}

/// An append-only bytecode stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Instructions(Vec::new())
    }

    /// Append raw instruction bytes, returning the address they start at.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let pos = self.0.len();
        self.0.extend_from_slice(bytes);
        pos
    }

    /// Overwrite the instruction at `pos` with `bytes`. The caller must keep
    /// the width unchanged; used for operand back-patching during emission.
    pub fn patch(&mut self, pos: usize, bytes: &[u8]) {
        self.0[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    /// Drop everything from `pos` onwards.
    pub fn truncate(&mut self, pos: usize) {
        self.0.truncate(pos);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Render one line per instruction: offset, mnemonic, operands.
    /// An unknown opcode yields an error line and decoding resumes at the
    /// next byte. A truncated final instruction yields an error line and
    /// ends the listing.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let mut pos = 0;
        while pos < self.0.len() {
            match lookup(self.0[pos]) {
                Ok(def) => match read_operands(def, &self.0[pos + 1..]) {
                    Ok((operands, read)) => {
                        out.push_str(&format!("{pos:04} {}\n", fmt_instruction(def, &operands)));
                        pos += 1 + read;
                    }
                    Err(_) => {
                        out.push_str(&format!("{pos:04} ERROR: truncated {}\n", def.name));
                        break;
                    }
                },
                Err(err) => {
                    out.push_str(&format!("{pos:04} ERROR: {err}\n"));
                    pos += 1;
                }
            }
        }
        out
    }
}

fn fmt_instruction(def: &Definition, operands: &[usize]) -> String {
    let mut line = def.name.to_string();
    for operand in operands {
        line.push(' ');
        line.push_str(&operand.to_string());
    }
    line
}

impl Deref for Instructions {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Instructions(bytes)
    }
}

impl FromIterator<Vec<u8>> for Instructions {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Instructions(iter.into_iter().flatten().collect())
    }
}

impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}
