//! Streaming chunk writer.

use byteorder::{ByteOrder, LittleEndian};
use ktap_core::{Constant, Prototype};
use thiserror::Error;
use tracing::debug;

use crate::sink::{Sink, TrunkBuffer};
use crate::{tag, HEADER};

/// Why a dump stopped. The bytes already handed to the sink do not form a
/// valid chunk and must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The sink returned a non-zero status.
    #[error("sink rejected the {section} block at offset {offset} (status {status})")]
    Sink {
        /// Block being emitted.
        section: &'static str,
        /// Bytes accepted before the failing call.
        offset: usize,
        /// Status returned by the sink.
        status: i32,
    },

    /// A length does not fit the format's 32-bit counters.
    #[error("{what} too large for the chunk format ({len})")]
    Oversized {
        /// Offending field.
        what: &'static str,
        /// Actual length.
        len: usize,
    },
}

/// Serializes one prototype tree into a [`Sink`].
///
/// Owns a staging buffer, reused for every block, and the running offset.
#[derive(Debug)]
pub struct ChunkWriter<'s, S: Sink + ?Sized> {
    sink: &'s mut S,
    stage: Vec<u8>,
    offset: usize,
    functions: usize,
}

impl<'s, S: Sink + ?Sized> ChunkWriter<'s, S> {
    /// Writer emitting into `sink`.
    pub fn new(sink: &'s mut S) -> Self { Self { sink, stage: Vec::with_capacity(256), offset: 0, functions: 0 } }

    /// Bytes accepted by the sink so far.
    pub const fn offset(&self) -> usize { self.offset }

    /// Writes the header and the whole tree; returns the chunk size.
    pub fn dump(mut self, root: &Prototype) -> Result<usize, WriteError> {
        self.stage.extend_from_slice(&HEADER);
        self.flush("header")?;
        self.function(root)?;
        debug!(functions = self.functions, bytes = self.offset, "chunk dumped");
        Ok(self.offset)
    }

    fn function(&mut self, f: &Prototype) -> Result<(), WriteError> {
        self.functions += 1;

        self.put_str("source", &f.source)?;
        self.put_i32(f.line_defined);
        self.put_i32(f.last_line_defined);
        self.stage.push(f.num_params);
        self.stage.push(u8::from(f.is_vararg));
        self.stage.push(f.max_stack_size);
        self.flush("metadata")?;

        self.put_len("line info", f.lineinfo.len())?;
        for line in &f.lineinfo {
            self.put_i32(*line);
        }
        self.flush("line info")?;

        self.put_len("constants", f.constants.len())?;
        for k in &f.constants {
            match k {
                Constant::Nil => self.stage.push(tag::NIL),
                Constant::Bool(b) => {
                    self.stage.push(tag::BOOLEAN);
                    self.stage.push(u8::from(*b));
                }
                Constant::Number(n) => {
                    self.stage.push(tag::NUMBER);
                    self.put_f64(*n);
                }
                Constant::Str(s) => {
                    self.stage.push(tag::STRING);
                    self.put_str("string constant", s)?;
                }
            }
        }
        self.flush("constants")?;

        self.put_len("local variables", f.locvars.len())?;
        for v in &f.locvars {
            self.put_str("local name", &v.name)?;
            self.put_i32(v.start_pc);
            self.put_i32(v.end_pc);
        }
        self.flush("local variables")?;

        self.put_len("upvalues", f.upvalues.len())?;
        for u in &f.upvalues {
            self.put_str("upvalue name", &u.name)?;
            self.stage.push(u8::from(u.instack));
            self.stage.push(u.idx);
        }
        self.flush("upvalues")?;

        self.put_len("code", f.code.len())?;
        for instr in &f.code {
            self.put_u32(instr.raw());
        }
        self.flush("code")?;

        self.put_len("functions", f.protos.len())?;
        self.flush("functions")?;
        for child in &f.protos {
            self.function(child)?;
        }
        Ok(())
    }

    /// Hands the staged block to the sink.
    fn flush(&mut self, section: &'static str) -> Result<(), WriteError> {
        let status = self.sink.accept(&self.stage);
        if status != 0 {
            return Err(WriteError::Sink { section, offset: self.offset, status });
        }
        self.offset += self.stage.len();
        self.stage.clear();
        Ok(())
    }

    fn put_u32(&mut self, v: u32) {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, v);
        self.stage.extend_from_slice(&b);
    }

    fn put_i32(&mut self, v: i32) {
        let mut b = [0u8; 4];
        LittleEndian::write_i32(&mut b, v);
        self.stage.extend_from_slice(&b);
    }

    fn put_f64(&mut self, v: f64) {
        let mut b = [0u8; 8];
        LittleEndian::write_f64(&mut b, v);
        self.stage.extend_from_slice(&b);
    }

    fn put_len(&mut self, what: &'static str, len: usize) -> Result<(), WriteError> {
        let n = u32::try_from(len).map_err(|_| WriteError::Oversized { what, len })?;
        self.put_u32(n);
        Ok(())
    }

    fn put_str(&mut self, what: &'static str, s: &str) -> Result<(), WriteError> {
        self.put_len(what, s.len())?;
        self.stage.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

/// Dumps `root` into `sink`; returns the number of bytes written.
pub fn dump<S: Sink + ?Sized>(root: &Prototype, sink: &mut S) -> Result<usize, WriteError> {
    ChunkWriter::new(sink).dump(root)
}

/// Dumps `root` into a fresh [`TrunkBuffer`] and returns its bytes.
pub fn dump_to_vec(root: &Prototype) -> Result<Vec<u8>, WriteError> {
    let mut trunk = TrunkBuffer::new();
    dump(root, &mut trunk)?;
    Ok(trunk.into_vec())
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use ktap_core::{Instruction, OpCode, ProtoBuilder};
    use pretty_assertions::assert_eq;

    fn sample() -> Prototype {
        let mut child = ProtoBuilder::new("s.kp");
        child.lines(2, 4).params(1, false);
        child.add_local("x", 0, 1).unwrap();
        child.emit(Instruction::abc(OpCode::Return, 0, 1, 0), 3).unwrap();

        let mut root = ProtoBuilder::new("s.kp");
        root.params(0, true);
        root.add_constant(42.0).unwrap();
        root.add_constant("x").unwrap();
        root.add_upvalue("_ENV", true, 0).unwrap();
        root.add_child(child.finish()).unwrap();
        root.emit(Instruction::abx(OpCode::LoadK, 0, 1), 1).unwrap();
        root.emit(Instruction::abx(OpCode::Closure, 1, 0), 4).unwrap();
        root.emit(Instruction::abc(OpCode::Return, 0, 1, 0), 5).unwrap();
        root.finish()
    }

    #[test]
    fn emits_header_then_sections_in_order() {
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let mut sink = |b: &[u8]| {
            blocks.push(b.to_vec());
            0
        };
        let size = dump(&sample(), &mut sink).unwrap();

        // header + 7 blocks per function, two functions
        assert_eq!(blocks.len(), 1 + 7 * 2);
        assert_eq!(blocks.iter().map(Vec::len).sum::<usize>(), size);
        assert_eq!(blocks[0], HEADER.to_vec());

        // metadata: source, lines, params, vararg, stack
        let mut meta = Vec::new();
        meta.extend_from_slice(&4u32.to_le_bytes());
        meta.extend_from_slice(b"s.kp");
        meta.extend_from_slice(&0i32.to_le_bytes());
        meta.extend_from_slice(&0i32.to_le_bytes());
        meta.extend_from_slice(&[0, 1, 2]);
        assert_eq!(blocks[1], meta);

        // line info
        let mut lines = 3u32.to_le_bytes().to_vec();
        for l in [1i32, 4, 5] {
            lines.extend_from_slice(&l.to_le_bytes());
        }
        assert_eq!(blocks[2], lines);

        // constants: count, then tag before payload
        let mut ks = 2u32.to_le_bytes().to_vec();
        ks.push(tag::NUMBER);
        ks.extend_from_slice(&42.0f64.to_le_bytes());
        ks.push(tag::STRING);
        ks.extend_from_slice(&1u32.to_le_bytes());
        ks.push(b'x');
        assert_eq!(blocks[3], ks);

        // no locals in the root, one upvalue
        assert_eq!(blocks[4], 0u32.to_le_bytes().to_vec());
        let mut up = 1u32.to_le_bytes().to_vec();
        up.extend_from_slice(&4u32.to_le_bytes());
        up.extend_from_slice(b"_ENV");
        up.extend_from_slice(&[1, 0]);
        assert_eq!(blocks[5], up);

        // code then child count
        assert_eq!(&blocks[6][..4], &3u32.to_le_bytes());
        assert_eq!(blocks[6].len(), 4 + 3 * 4);
        assert_eq!(blocks[7], 1u32.to_le_bytes().to_vec());

        // child metadata follows directly
        assert_eq!(&blocks[8][8..12], &2i32.to_le_bytes());
    }

    #[test]
    fn sink_failure_stops_the_dump() {
        let mut calls = 0;
        let mut sink = |_: &[u8]| {
            calls += 1;
            if calls == 2 { -1 } else { 0 }
        };
        let err = dump(&sample(), &mut sink).unwrap_err();
        assert_eq!(err, WriteError::Sink { section: "metadata", offset: HEADER.len(), status: -1 });
        assert_eq!(calls, 2);
    }

    #[test]
    fn trunk_and_callback_receive_identical_bytes() {
        let p = sample();
        let mut collected = Vec::new();
        let mut sink = |b: &[u8]| {
            collected.extend_from_slice(b);
            0
        };
        dump(&p, &mut sink).unwrap();
        assert_eq!(dump_to_vec(&p).unwrap(), collected);
    }

    #[test]
    fn bool_and_nil_constants() {
        let mut b = ProtoBuilder::new("");
        b.add_constant(Constant::Nil).unwrap();
        b.add_constant(false).unwrap();
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let mut sink = |x: &[u8]| {
            blocks.push(x.to_vec());
            0
        };
        dump(&b.finish(), &mut sink).unwrap();
        assert_eq!(blocks[3], vec![2, 0, 0, 0, tag::NIL, tag::BOOLEAN, 0]);
    }
}
