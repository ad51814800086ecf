//! ktap-chunk — binary chunk format of ktap bytecode
//!
//! A chunk is a header followed by the root function, each function being
//! followed by its children (pre-order). All integers are little-endian.
//!
//! ```text
//! Header   "\x1bktap" version:u8=1 format:u8=0 endian:u8=1
//!          sizeof(int)=4 sizeof(size)=4 sizeof(instr)=4 sizeof(number)=8
//!          integral:u8=0 tail "\x19\x93\r\n\x1a\n"
//!
//! Function
//!   metadata   source:str line_defined:i32 last_line_defined:i32
//!              num_params:u8 is_vararg:u8 max_stack_size:u8
//!   lineinfo   n:u32 line:i32 * n
//!   constants  n:u32 (tag:u8 payload) * n
//!                tag 0 nil | 1 bool value:u8 | 3 number f64 | 4 string str
//!   locvars    n:u32 (name:str start_pc:i32 end_pc:i32) * n
//!   upvalues   n:u32 (name:str instack:u8 idx:u8) * n
//!   code       n:u32 instr:u32 * n
//!   protos     n:u32, then the n child functions
//!
//! str = len:u32 bytes (UTF-8)
//! ```
//!
//! Each block is handed to the [`Sink`] in one call, so a sink sees
//! `1 + 7 * functions` calls for a successful dump.
//!
//! API:
//! - [`dump`] / [`ChunkWriter`] : stream a prototype tree into any [`Sink`]
//! - [`TrunkBuffer`] : in-memory sink with demand-driven doubling
//! - [`IoSink`] : pass-through sink over `std::io::Write`
//! - [`read_chunk`] (feature `reader`) : inverse of [`dump`]

#![deny(missing_docs)]

/// Sink seam and the two stock sinks.
pub mod sink;
/// Chunk writer.
pub mod writer;
/// Chunk reader.
#[cfg(feature = "reader")]
pub mod reader;

pub use sink::{IoSink, Sink, TrunkBuffer, TRUNK_INITIAL_SIZE};
pub use writer::{dump, dump_to_vec, ChunkWriter, WriteError};

#[cfg(feature = "reader")]
pub use reader::{read_chunk, ReadError};

/// Chunk signature.
pub const SIGNATURE: &[u8; 5] = b"\x1bktap";
/// Format version written in the header.
pub const CHUNK_VERSION: u8 = 0x01;
/// Format variant (0 = official).
pub const CHUNK_FORMAT: u8 = 0;
/// Bytes guarding against text-mode mangling.
pub const CHUNK_TAIL: &[u8; 6] = b"\x19\x93\r\n\x1a\n";

/// Full header, as written at the start of every chunk.
pub const HEADER: [u8; 19] = {
    let mut h = [0u8; 19];
    h[0] = SIGNATURE[0];
    h[1] = SIGNATURE[1];
    h[2] = SIGNATURE[2];
    h[3] = SIGNATURE[3];
    h[4] = SIGNATURE[4];
    h[5] = CHUNK_VERSION;
    h[6] = CHUNK_FORMAT;
    h[7] = 1; // little endian
    h[8] = 4; // int
    h[9] = 4; // size
    h[10] = 4; // instruction
    h[11] = 8; // number
    h[12] = 0; // numbers are floating point
    h[13] = CHUNK_TAIL[0];
    h[14] = CHUNK_TAIL[1];
    h[15] = CHUNK_TAIL[2];
    h[16] = CHUNK_TAIL[3];
    h[17] = CHUNK_TAIL[4];
    h[18] = CHUNK_TAIL[5];
    h
};

/// Constant tags (ktap value types).
pub mod tag {
    /// `nil`.
    pub const NIL: u8 = 0;
    /// Boolean.
    pub const BOOLEAN: u8 = 1;
    /// Number.
    pub const NUMBER: u8 = 3;
    /// String.
    pub const STRING: u8 = 4;
}

/// True when `bytes` starts with a chunk signature.
pub fn is_chunk(bytes: &[u8]) -> bool { bytes.starts_with(SIGNATURE) }
