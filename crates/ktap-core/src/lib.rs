//! ktap-core — shared primitives of the ktap toolchain
//!
//! Provides:
//! - `GrowBuffer` + `grow_size` : bounded size-class growth for per-function arrays
//! - `Prototype`, `Constant`, `LocVar`, `UpvalDesc`, `ProtoBuilder` : compiled function tree
//! - `Instruction` / `OpCode` : accessors over the packed 32-bit instruction word
//! - `Disassembler` : human-readable listing of a prototype tree
//! - `validate_proto` : structural checks run before a tree leaves the compiler
//! - `assemble` : tiny listing assembler used by tooling and tests
//! - Errors `CoreError` + alias `CoreResult<T>`
//!
//! Features:
//! - `serde` (default): derive (de)serialization on the data model

#![deny(missing_docs)]

/* ─────────────────────────── Public modules ─────────────────────────── */

/// Bytecode primitives (prototypes, opcodes, growth, disassembly, helpers).
pub mod bytecode;

/// Re-export of the validation helpers.
pub use bytecode::helpers;
/// Re-export of the textual disassembler.
pub use bytecode::disasm;
/// Re-export of the listing assembler.
pub use bytecode::asm;

pub use bytecode::{
    grow_size, Constant, GrowBuffer, Instruction, LocVar, OpCode, ProtoBuilder, Prototype,
    UpvalDesc,
};

use std::borrow::Cow;

use thiserror::Error;

/* ─────────────────────────── Common result ─────────────────────────── */

/// Result alias shared by the core.
pub type CoreResult<T> = core::result::Result<T, CoreError>;

/* ─────────────────────────── Errors ─────────────────────────── */

/// Low-level errors common to the toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A bounded collection reached its hard limit.
    #[error("too many {what} (limit is {limit})")]
    CapacityExceeded {
        /// Kind of collection ("constants", "local variables", ...).
        what: &'static str,
        /// Hard limit of the collection.
        limit: usize,
    },

    /// The allocator refused to provide the grown storage.
    #[error("cannot allocate {requested} slots for {what}")]
    AllocationFailure {
        /// Kind of collection being grown.
        what: &'static str,
        /// Element count that was requested.
        requested: usize,
    },

    /// Structural invariant violated (bad index, length mismatch, ...).
    #[error("corrupted: {0}")]
    Corrupted(Cow<'static, str>),
}

impl CoreError {
    /// Builds a "corrupted" error.
    pub fn corrupted(msg: impl Into<Cow<'static, str>>) -> Self { CoreError::Corrupted(msg.into()) }
}

/* ─────────────────────────── Prelude ─────────────────────────── */

/// Convenience prelude importing the key types of the crate.
pub mod prelude {
    /// Re-exports for quick imports.
    pub use super::{
        bytecode::disasm::Disassembler, grow_size, helpers::validate_proto, Constant, CoreError,
        CoreResult, GrowBuffer, Instruction, LocVar, OpCode, ProtoBuilder, Prototype, UpvalDesc,
    };
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_kind_and_limit() {
        let err = CoreError::CapacityExceeded { what: "upvalues", limit: 255 };
        assert_eq!(err.to_string(), "too many upvalues (limit is 255)");
    }

    #[test]
    fn corrupted_accepts_owned_and_static() {
        assert_eq!(CoreError::corrupted("x"), CoreError::Corrupted(Cow::Borrowed("x")));
        assert_eq!(CoreError::corrupted(String::from("y")).to_string(), "corrupted: y");
    }
}
