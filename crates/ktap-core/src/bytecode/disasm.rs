//! Textual listing of a prototype tree (`ktap -b`).
//!
//! The [`Disassembler`] owns the output buffer and the function counter, so
//! numbering is shared by every function of one run and strictly increasing
//! in pre-order.

use core::fmt::Write;
use std::mem;

use crate::bytecode::opcode::{index_k, is_k, Instruction, OpCode};
use crate::bytecode::proto::{Constant, Prototype};

const SEPARATOR: &str = "----------------------------------------------------";

/// Traversal context of one listing run.
#[derive(Debug, Default)]
pub struct Disassembler {
    next_fn: usize,
    out: String,
}

impl Disassembler {
    /// Fresh context, numbering from 0.
    pub fn new() -> Self { Self::default() }

    /// Number of functions rendered so far.
    pub const fn functions_rendered(&self) -> usize { self.next_fn }

    /// Renders `proto` at nesting `level`, then its children at `level + 1`.
    ///
    /// Numbering continues across calls on the same context.
    pub fn render(&mut self, proto: &Prototype, level: u32) -> String {
        self.function(proto, level);
        mem::take(&mut self.out)
    }

    fn function(&mut self, f: &Prototype, level: u32) {
        let nr = self.next_fn;
        self.next_fn += 1;

        let out = &mut self.out;
        let _ = writeln!(out);
        let _ = writeln!(out, "{SEPARATOR}");
        let _ = writeln!(out, "function {nr} [level {level}]:");
        let _ = writeln!(out, "linedefined: {}", f.line_defined);
        let _ = writeln!(out, "lastlinedefined: {}", f.last_line_defined);
        let _ = writeln!(out, "numparams: {}", f.num_params);
        let _ = writeln!(out, "is_vararg: {}", u8::from(f.is_vararg));
        let _ = writeln!(out, "maxstacksize: {}", f.max_stack_size);
        let _ = writeln!(out, "source: {}", f.source);

        let _ = write!(out, "sizelineinfo: {} \t", f.lineinfo.len());
        for line in &f.lineinfo {
            let _ = write!(out, "{line} ");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "sizek: {}", f.constants.len());
        for k in &f.constants {
            let _ = match k {
                Constant::Nil => writeln!(out, "\tNIL"),
                Constant::Bool(b) => writeln!(out, "\tBOOLEAN: {}", u8::from(*b)),
                Constant::Number(n) => writeln!(out, "\tTNUMBER: {n}"),
                Constant::Str(s) => writeln!(out, "\tTSTRING: {s}"),
            };
        }

        let _ = writeln!(out, "sizelocvars: {}", f.locvars.len());
        for v in &f.locvars {
            let _ = writeln!(out, "\tlocvars: {} startpc: {} endpc: {}", v.name, v.start_pc, v.end_pc);
        }

        let _ = writeln!(out, "sizeupvalues: {}", f.upvalues.len());
        for u in &f.upvalues {
            let _ = writeln!(out, "\tname: {} instack: {} idx: {}", u.name, u8::from(u.instack), u.idx);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "sizecode: {}", f.code.len());
        for instr in &f.code {
            let _ = writeln!(out, "{}", decode_instruction(f, *instr));
        }

        let _ = writeln!(out, "sizep: {}", f.protos.len());
        for child in &f.protos {
            self.function(child, level + 1);
        }
    }
}

/// Renders a whole tree the way `ktap -b` prints it (root at level 1).
pub fn disassemble(proto: &Prototype) -> String { Disassembler::new().render(proto, 1) }

/// One listing line: raw word, opcode name, then decoded operands.
pub fn decode_instruction(f: &Prototype, instr: Instruction) -> String {
    let mut line = String::new();
    let name = instr.opcode().map_or("UNKNOWN", OpCode::name);
    let _ = write!(line, "{:08x}\t{name}\t", instr.raw());

    match instr.opcode() {
        Some(OpCode::GetTabUp) => {
            let _ = write!(line, "{} <- ", reg(f, instr.a()));
            if instr.b() == 0 {
                line.push_str("global");
            } else {
                let _ = write!(line, "upvalues[{}]", instr.b());
            }
            let _ = write!(line, "{{{}}}", rk(f, instr.c()));
        }
        Some(OpCode::GetTable) => {
            let _ = write!(line, "{} <- {}{{{}}}", reg(f, instr.a()), reg(f, instr.b()), rk(f, instr.c()));
        }
        Some(OpCode::LoadK) => {
            let _ = write!(line, "\t{} <- {}", reg(f, instr.a()), konst(f, instr.bx()));
        }
        Some(OpCode::Call) => {
            let _ = write!(line, "\t{}", reg(f, instr.a()));
        }
        Some(OpCode::Jmp) => {
            let _ = write!(line, "\t{}", instr.sbx());
        }
        _ => {}
    }
    line
}

/// Register operand: local name when one is declared for the slot.
fn reg(f: &Prototype, r: u32) -> String {
    match f.locvars.get(r as usize) {
        Some(v) => v.name.clone(),
        None => format!("base + {r}"),
    }
}

/// RK operand, shared by every opcode that carries one.
pub fn rk(f: &Prototype, x: u32) -> String {
    if is_k(x) { konst(f, index_k(x)) } else { reg(f, x) }
}

fn konst(f: &Prototype, idx: u32) -> String {
    f.constants.get(idx as usize).map_or_else(|| format!("<bad k#{idx}>"), show_const)
}

/// Constant as shown inside decoded operands.
pub fn show_const(value: &Constant) -> String {
    match value {
        Constant::Nil => "nil".into(),
        Constant::Bool(b) => b.to_string(),
        Constant::Number(n) => n.to_string(),
        Constant::Str(s) => format!("\"{s}\""),
    }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::opcode::rk_const;
    use crate::bytecode::proto::ProtoBuilder;
    use pretty_assertions::assert_eq;

    fn leaf(line: i32) -> Prototype {
        let mut b = ProtoBuilder::new("t.kp");
        b.lines(line, line + 1);
        b.emit(Instruction::abc(OpCode::Return, 0, 1, 0), line).unwrap();
        b.finish()
    }

    #[test]
    fn loadk_without_local_uses_base_offset() {
        let mut b = ProtoBuilder::new("t.kp");
        b.add_constant(42.0).unwrap();
        let x = b.add_constant("x").unwrap();
        b.emit(Instruction::abx(OpCode::LoadK, 0, x), 1).unwrap();
        let p = b.finish();

        let line = decode_instruction(&p, p.code[0]);
        assert_eq!(line, format!("{:08x}\tLOADK\t\tbase + 0 <- \"x\"", p.code[0].raw()));

        let text = disassemble(&p);
        assert!(text.contains("\tTNUMBER: 42\n"));
        assert!(text.contains("\tTSTRING: x\n"));
        assert!(text.contains("base + 0 <- \"x\""));
    }

    #[test]
    fn full_listing_of_single_function() {
        let mut b = ProtoBuilder::new("t.kp");
        b.lines(0, 0).params(0, true).max_stack(2);
        b.emit(Instruction::abc(OpCode::Return, 0, 1, 0), 1).unwrap();
        let p = b.finish();
        let ret = p.code[0].raw();

        let expected = format!(
            "\n{SEPARATOR}\n\
             function 0 [level 1]:\n\
             linedefined: 0\n\
             lastlinedefined: 0\n\
             numparams: 0\n\
             is_vararg: 1\n\
             maxstacksize: 2\n\
             source: t.kp\n\
             sizelineinfo: 1 \t1 \n\
             sizek: 0\n\
             sizelocvars: 0\n\
             sizeupvalues: 0\n\
             \n\
             sizecode: 1\n\
             {ret:08x}\tRETURN\t\n\
             sizep: 0\n"
        );
        assert_eq!(disassemble(&p), expected);
    }

    #[test]
    fn rk_operand_decodes_identically_for_both_table_gets() {
        let mut b = ProtoBuilder::new("t.kp");
        b.add_local("tbl", 0, 3).unwrap();
        let k = b.add_constant("key").unwrap();
        for x in [rk_const(k), 0, 5] {
            b.emit(Instruction::abc(OpCode::GetTabUp, 1, 0, x), 1).unwrap();
            b.emit(Instruction::abc(OpCode::GetTable, 1, 0, x), 1).unwrap();
        }
        let p = b.finish();

        for pair in p.code.chunks(2) {
            let up = decode_instruction(&p, pair[0]);
            let tab = decode_instruction(&p, pair[1]);
            let key_up = up.rsplit_once('{').unwrap().1;
            let key_tab = tab.rsplit_once('{').unwrap().1;
            assert_eq!(key_up, key_tab);
        }
        assert!(decode_instruction(&p, p.code[0]).ends_with("base + 1 <- global{\"key\"}"));
        assert!(decode_instruction(&p, p.code[3]).ends_with("base + 1 <- tbl{tbl}"));
        assert!(decode_instruction(&p, p.code[5]).ends_with("{base + 5}"));
    }

    #[test]
    fn upvalue_table_and_jump_and_call() {
        let mut b = ProtoBuilder::new("t.kp");
        b.add_local("a", 0, 4).unwrap();
        let k = b.add_constant(true).unwrap();
        b.emit(Instruction::abc(OpCode::GetTabUp, 0, 2, rk_const(k)), 1).unwrap();
        b.emit(Instruction::asbx(OpCode::Jmp, 0, -3), 1).unwrap();
        b.emit(Instruction::abc(OpCode::Call, 2, 1, 1), 1).unwrap();
        b.emit(Instruction::abc(OpCode::Add, 0, 0, 0), 1).unwrap();
        let p = b.finish();

        assert!(decode_instruction(&p, p.code[0]).ends_with("\tGETTABUP\ta <- upvalues[2]{true}"));
        // the pool section prints flags as 0/1 like the header lines
        assert!(disassemble(&p).contains("\tBOOLEAN: 1\n"));
        assert!(decode_instruction(&p, p.code[1]).ends_with("\tJMP\t\t-3"));
        assert!(decode_instruction(&p, p.code[2]).ends_with("\tCALL\t\tbase + 2"));
        assert!(decode_instruction(&p, p.code[3]).ends_with("\tADD\t"));
    }

    #[test]
    fn missing_constant_does_not_panic() {
        let mut b = ProtoBuilder::new("t.kp");
        b.emit(Instruction::abx(OpCode::LoadK, 0, 9), 1).unwrap();
        let p = b.finish();
        assert!(decode_instruction(&p, p.code[0]).ends_with("<bad k#9>"));
        assert!(decode_instruction(&p, Instruction(62)).contains("\tUNKNOWN\t"));
    }

    #[test]
    fn numbering_is_preorder_and_shared() {
        // root { a { a1 }, b }
        let mut a = ProtoBuilder::new("t.kp");
        a.add_child(leaf(3)).unwrap();
        let mut root = ProtoBuilder::new("t.kp");
        root.add_child(a.finish()).unwrap();
        root.add_child(leaf(9)).unwrap();
        let root = root.finish();

        let mut d = Disassembler::new();
        let text = d.render(&root, 1);
        assert_eq!(d.functions_rendered(), root.tree_size());

        let headers: Vec<&str> = text.lines().filter(|l| l.starts_with("function ")).collect();
        assert_eq!(
            headers,
            vec!["function 0 [level 1]:", "function 1 [level 2]:", "function 2 [level 3]:", "function 3 [level 2]:"]
        );
        let lastline_of_3 = text.split("function 3").nth(1).unwrap();
        assert!(lastline_of_3.contains("linedefined: 9"));

        // a second render on the same context keeps counting
        let again = d.render(&leaf(1), 1);
        assert!(again.contains("function 4 [level 1]:"));
    }

    #[test]
    fn one_line_per_instruction() {
        let mut b = ProtoBuilder::new("t.kp");
        for _ in 0..7 {
            b.emit(Instruction::abc(OpCode::Move, 0, 1, 0), 1).unwrap();
        }
        let p = b.finish();
        let text = disassemble(&p);
        assert_eq!(text.lines().filter(|l| l.contains("\tMOVE\t")).count(), 7);
    }
}
