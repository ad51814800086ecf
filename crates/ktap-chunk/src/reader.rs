//! Chunk reader, the inverse of [`crate::dump`].
//!
//! Counts read from the input are never trusted for preallocation: vectors
//! grow as elements are actually decoded.

use byteorder::{ByteOrder, LittleEndian};
use ktap_core::{Constant, Instruction, LocVar, Prototype, UpvalDesc};
use thiserror::Error;
use tracing::debug;

use crate::{tag, HEADER};

/// Deepest function nesting accepted.
const MAX_DEPTH: usize = 200;

/// Decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// Input ended in the middle of a field.
    #[error("truncated chunk at offset {at}")]
    Truncated {
        /// Offset of the incomplete field.
        at: usize,
    },
    /// Signature, version or size bytes do not match.
    #[error("not a ktap chunk (bad header)")]
    BadHeader,
    /// Unknown constant tag.
    #[error("unknown constant tag {tag} at offset {at}")]
    UnknownConstant {
        /// Tag byte found.
        tag: u8,
        /// Offset of the tag.
        at: usize,
    },
    /// A string field is not UTF-8.
    #[error("invalid UTF-8 string at offset {at}")]
    InvalidUtf8 {
        /// Offset of the string payload.
        at: usize,
    },
    /// Bytes remain after the root function.
    #[error("{0} trailing bytes after the chunk")]
    TrailingBytes(usize),
    /// Functions nested deeper than the reader accepts.
    #[error("functions nested deeper than {MAX_DEPTH}")]
    TooDeep,
}

/// Decodes a complete chunk into its root prototype.
pub fn read_chunk(bytes: &[u8]) -> Result<Prototype, ReadError> {
    let mut r = Cursor { buf: bytes, pos: 0 };
    if r.take(HEADER.len()).map_err(|_| ReadError::BadHeader)? != &HEADER[..] {
        return Err(ReadError::BadHeader);
    }
    let root = r.function(0)?;
    let rest = bytes.len() - r.pos;
    if rest != 0 {
        return Err(ReadError::TrailingBytes(rest));
    }
    debug!(functions = root.tree_size(), bytes = bytes.len(), "chunk read");
    Ok(root)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        let at = self.pos;
        let end = at.checked_add(n).filter(|&e| e <= self.buf.len()).ok_or(ReadError::Truncated { at })?;
        self.pos = end;
        Ok(&self.buf[at..end])
    }

    fn u8(&mut self) -> Result<u8, ReadError> { Ok(self.take(1)?[0]) }

    fn u32(&mut self) -> Result<u32, ReadError> { Ok(LittleEndian::read_u32(self.take(4)?)) }

    fn i32(&mut self) -> Result<i32, ReadError> { Ok(LittleEndian::read_i32(self.take(4)?)) }

    fn f64(&mut self) -> Result<f64, ReadError> { Ok(LittleEndian::read_f64(self.take(8)?)) }

    fn flag(&mut self) -> Result<bool, ReadError> { Ok(self.u8()? != 0) }

    fn str(&mut self) -> Result<String, ReadError> {
        let len = self.u32()? as usize;
        let at = self.pos;
        let raw = self.take(len)?;
        core::str::from_utf8(raw).map(str::to_owned).map_err(|_| ReadError::InvalidUtf8 { at })
    }

    fn count(&mut self) -> Result<usize, ReadError> { Ok(self.u32()? as usize) }

    fn constant(&mut self) -> Result<Constant, ReadError> {
        let at = self.pos;
        Ok(match self.u8()? {
            tag::NIL => Constant::Nil,
            tag::BOOLEAN => Constant::Bool(self.flag()?),
            tag::NUMBER => Constant::Number(self.f64()?),
            tag::STRING => Constant::Str(self.str()?),
            other => return Err(ReadError::UnknownConstant { tag: other, at }),
        })
    }

    fn function(&mut self, depth: usize) -> Result<Prototype, ReadError> {
        if depth > MAX_DEPTH {
            return Err(ReadError::TooDeep);
        }
        let mut f = Prototype {
            source: self.str()?,
            line_defined: self.i32()?,
            last_line_defined: self.i32()?,
            num_params: self.u8()?,
            is_vararg: self.flag()?,
            max_stack_size: self.u8()?,
            ..Prototype::default()
        };

        for _ in 0..self.count()? {
            f.lineinfo.push(self.i32()?);
        }
        for _ in 0..self.count()? {
            f.constants.push(self.constant()?);
        }
        for _ in 0..self.count()? {
            f.locvars.push(LocVar { name: self.str()?, start_pc: self.i32()?, end_pc: self.i32()? });
        }
        for _ in 0..self.count()? {
            f.upvalues.push(UpvalDesc { name: self.str()?, instack: self.flag()?, idx: self.u8()? });
        }
        for _ in 0..self.count()? {
            f.code.push(Instruction(self.u32()?));
        }
        for _ in 0..self.count()? {
            f.protos.push(self.function(depth + 1)?);
        }
        Ok(f)
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */
