//! Bytecode building blocks: prototypes, instruction accessors, bounded
//! growth, validation, disassembly and a small listing assembler.

/// Bounded size-class growable arrays.
pub mod grow;
/// Instruction word layout and opcode table.
pub mod opcode;
/// Function prototypes and their builder.
pub mod proto;
/// Structural validation of prototype trees.
pub mod helpers;
/// Textual disassembler.
pub mod disasm;
/// Listing assembler.
pub mod asm;

pub use grow::{grow_size, GrowBuffer, MIN_SIZE};
pub use opcode::{Instruction, OpCode};
pub use proto::{Constant, LocVar, ProtoBuilder, Prototype, UpvalDesc};
