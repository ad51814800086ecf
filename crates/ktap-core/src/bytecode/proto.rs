//! Compiled function prototypes and the builder the front end fills them with.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use core::hash::{Hash, Hasher};
use core::mem;

use crate::bytecode::grow::GrowBuffer;
use crate::bytecode::opcode::{Instruction, MAXARG_BX};
use crate::CoreResult;

/// Maximum number of upvalues of one function.
pub const MAX_UPVALUES: usize = 255;
/// Maximum number of local variable records of one function.
pub const MAX_LOCVARS: usize = i16::MAX as usize;
/// Maximum number of instructions of one function.
pub const MAX_CODE: usize = i32::MAX as usize;

/// Values that can live in the constant pool.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Constant {
    /// `nil`.
    Nil,
    /// Boolean literal.
    Bool(bool),
    /// Number literal (ktap numbers are doubles).
    Number(f64),
    /// String literal.
    Str(String),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Number(a), Constant::Number(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Constant::Nil => {}
            Constant::Bool(b) => b.hash(state),
            Constant::Number(v) => v.to_bits().hash(state),
            Constant::Str(s) => s.hash(state),
        }
    }
}

impl From<bool> for Constant {
    fn from(v: bool) -> Self { Constant::Bool(v) }
}
impl From<f64> for Constant {
    fn from(v: f64) -> Self { Constant::Number(v) }
}
impl From<&str> for Constant {
    fn from(v: &str) -> Self { Constant::Str(v.to_owned()) }
}
impl From<String> for Constant {
    fn from(v: String) -> Self { Constant::Str(v) }
}

/// Debug record of a local variable and the pc range where it is live.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LocVar {
    /// Source name.
    pub name: String,
    /// First pc where the variable is active.
    pub start_pc: i32,
    /// First pc where the variable is dead.
    pub end_pc: i32,
}

/// Description of a captured variable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UpvalDesc {
    /// Source name.
    pub name: String,
    /// True when captured from the enclosing function's stack, false when
    /// taken from the enclosing function's own upvalues.
    pub instack: bool,
    /// Register or upvalue index in the enclosing function.
    pub idx: u8,
}

/// One compiled function and the functions nested in it.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Prototype {
    /// Chunk name the function comes from.
    pub source: String,
    /// Line of the `function` keyword (0 for the main chunk).
    pub line_defined: i32,
    /// Line of the closing `end`.
    pub last_line_defined: i32,
    /// Number of fixed parameters.
    pub num_params: u8,
    /// Accepts `...`.
    pub is_vararg: bool,
    /// Registers needed by the function.
    pub max_stack_size: u8,
    /// Instruction words.
    pub code: Vec<Instruction>,
    /// Source line of each instruction (parallel to `code`).
    pub lineinfo: Vec<i32>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Local variable debug records.
    pub locvars: Vec<LocVar>,
    /// Upvalue descriptors.
    pub upvalues: Vec<UpvalDesc>,
    /// Nested functions, in declaration order.
    pub protos: Vec<Prototype>,
}

impl Prototype {
    /// Number of prototypes in this tree, `self` included.
    pub fn tree_size(&self) -> usize { 1 + self.protos.iter().map(Prototype::tree_size).sum::<usize>() }

    /// Number of instructions in this tree.
    pub fn tree_code_len(&self) -> usize {
        self.code.len() + self.protos.iter().map(Prototype::tree_code_len).sum::<usize>()
    }
}

/// Incremental builder for a [`Prototype`].
///
/// Every array is a [`GrowBuffer`] with ktap's per-function limits, so
/// overflowing one reports which collection is full.
#[derive(Debug)]
pub struct ProtoBuilder {
    source: String,
    line_defined: i32,
    last_line_defined: i32,
    num_params: u8,
    is_vararg: bool,
    max_stack_size: u8,
    code: GrowBuffer<Instruction>,
    lineinfo: GrowBuffer<i32>,
    constants: GrowBuffer<Constant>,
    locvars: GrowBuffer<LocVar>,
    upvalues: GrowBuffer<UpvalDesc>,
    protos: GrowBuffer<Prototype>,
}

impl ProtoBuilder {
    /// Builder for a function of chunk `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            line_defined: 0,
            last_line_defined: 0,
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            code: GrowBuffer::new("instructions", MAX_CODE),
            lineinfo: GrowBuffer::new("line entries", MAX_CODE),
            constants: GrowBuffer::new("constants", MAXARG_BX as usize),
            locvars: GrowBuffer::new("local variables", MAX_LOCVARS),
            upvalues: GrowBuffer::new("upvalues", MAX_UPVALUES),
            protos: GrowBuffer::new("functions", MAXARG_BX as usize),
        }
    }

    /// Lines spanned by the function.
    pub fn lines(&mut self, first: i32, last: i32) -> &mut Self {
        self.line_defined = first;
        self.last_line_defined = last;
        self
    }

    /// Parameter count and vararg flag.
    pub fn params(&mut self, count: u8, vararg: bool) -> &mut Self {
        self.num_params = count;
        self.is_vararg = vararg;
        self
    }

    /// Line of the `function` keyword.
    pub const fn line_defined(&self) -> i32 { self.line_defined }

    /// Fixed parameter count.
    pub const fn num_params(&self) -> u8 { self.num_params }

    /// Vararg flag.
    pub const fn is_vararg(&self) -> bool { self.is_vararg }

    /// Register budget.
    pub fn max_stack(&mut self, size: u8) -> &mut Self {
        self.max_stack_size = size;
        self
    }

    /// Appends an instruction and its source line; returns its pc.
    pub fn emit(&mut self, instr: Instruction, line: i32) -> CoreResult<usize> {
        let pc = self.code.push(instr)?;
        self.lineinfo.push(line)?;
        Ok(pc)
    }

    /// Current instruction count.
    pub fn pc(&self) -> usize { self.code.len() }

    /// Interns a constant and returns its index.
    pub fn add_constant(&mut self, value: impl Into<Constant>) -> CoreResult<u32> {
        let value = value.into();
        if let Some(idx) = self.constants.iter().position(|c| *c == value) {
            return Ok(idx as u32);
        }
        Ok(self.constants.push(value)? as u32)
    }

    /// Registers a local variable record and returns its register.
    pub fn add_local(&mut self, name: impl Into<String>, start_pc: i32, end_pc: i32) -> CoreResult<u32> {
        Ok(self.locvars.push(LocVar { name: name.into(), start_pc, end_pc })? as u32)
    }

    /// Registers an upvalue and returns its index.
    pub fn add_upvalue(&mut self, name: impl Into<String>, instack: bool, idx: u8) -> CoreResult<u32> {
        Ok(self.upvalues.push(UpvalDesc { name: name.into(), instack, idx })? as u32)
    }

    /// Adopts a nested function and returns its index (CLOSURE Bx).
    pub fn add_child(&mut self, child: Prototype) -> CoreResult<u32> {
        Ok(self.protos.push(child)? as u32)
    }

    /// Freezes the builder into a prototype.
    pub fn finish(self) -> Prototype {
        Prototype {
            source: self.source,
            line_defined: self.line_defined,
            last_line_defined: self.last_line_defined,
            num_params: self.num_params,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_stack_size,
            code: self.code.into_vec(),
            lineinfo: self.lineinfo.into_vec(),
            constants: self.constants.into_vec(),
            locvars: self.locvars.into_vec(),
            upvalues: self.upvalues.into_vec(),
            protos: self.protos.into_vec(),
        }
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
