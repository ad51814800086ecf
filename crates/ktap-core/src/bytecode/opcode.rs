//! Instruction word layout and the ktap opcode table.
//!
//! ```text
//!  31      23 22      14 13    6 5    0
//! +----------+----------+-------+------+
//! |    B:9   |    C:9   |  A:8  | OP:6 |   iABC
//! +----------+----------+-------+------+
//! |        Bx:18        |  A:8  | OP:6 |   iABx / iAsBx (sBx = Bx - MAXARG_SBX)
//! +---------------------+-------+------+
//! ```
//!
//! B and C may be RK operands: with [`BITRK`] set they index the constant
//! pool, otherwise they name a register.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use core::fmt;

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const SIZE_BX: u32 = SIZE_B + SIZE_C;

const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP;
const POS_C: u32 = POS_A + SIZE_A;
const POS_B: u32 = POS_C + SIZE_C;
const POS_BX: u32 = POS_C;

/// Largest A operand.
pub const MAXARG_A: u32 = (1 << SIZE_A) - 1;
/// Largest B operand.
pub const MAXARG_B: u32 = (1 << SIZE_B) - 1;
/// Largest C operand.
pub const MAXARG_C: u32 = (1 << SIZE_C) - 1;
/// Largest Bx operand; also bounds the constant pool and child list.
pub const MAXARG_BX: u32 = (1 << SIZE_BX) - 1;
/// Bias applied to sBx.
pub const MAXARG_SBX: i32 = (MAXARG_BX >> 1) as i32;

/// Tag bit marking an RK operand as a constant index.
pub const BITRK: u32 = 1 << (SIZE_B - 1);
/// Largest constant index reachable through an RK operand.
pub const MAXINDEXRK: u32 = BITRK - 1;

const fn mask(size: u32) -> u32 { (1 << size) - 1 }

/// True when the RK operand `x` addresses the constant pool.
pub const fn is_k(x: u32) -> bool { x & BITRK != 0 }

/// Constant index carried by an RK operand.
pub const fn index_k(x: u32) -> u32 { x & !BITRK }

/// Encodes constant index `idx` as an RK operand.
pub const fn rk_const(idx: u32) -> u32 { idx | BITRK }

macro_rules! opcodes {
    ($($variant:ident => $name:literal,)*) => {
        /// ktap opcodes, in encoding order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        #[repr(u8)]
        #[allow(missing_docs)]
        pub enum OpCode {
            $($variant,)*
        }

        impl OpCode {
            /// Every opcode, indexed by its numeric value.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$variant,)*];

            /// Name used in listings.
            pub const fn name(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)*
                }
            }
        }
    };
}

opcodes! {
    Move => "MOVE",
    LoadK => "LOADK",
    LoadKx => "LOADKX",
    LoadBool => "LOADBOOL",
    LoadNil => "LOADNIL",
    GetUpval => "GETUPVAL",
    GetTabUp => "GETTABUP",
    GetTable => "GETTABLE",
    SetTabUp => "SETTABUP",
    SetTabUpIncr => "SETTABUP_INCR",
    SetUpval => "SETUPVAL",
    SetTable => "SETTABLE",
    SetTableIncr => "SETTABLE_INCR",
    NewTable => "NEWTABLE",
    SelfOp => "SELF",
    Add => "ADD",
    Sub => "SUB",
    Mul => "MUL",
    Div => "DIV",
    Mod => "MOD",
    Pow => "POW",
    Unm => "UNM",
    Not => "NOT",
    Len => "LEN",
    Concat => "CONCAT",
    Jmp => "JMP",
    Eq => "EQ",
    Lt => "LT",
    Le => "LE",
    Test => "TEST",
    TestSet => "TESTSET",
    Call => "CALL",
    TailCall => "TAILCALL",
    Return => "RETURN",
    ForLoop => "FORLOOP",
    ForPrep => "FORPREP",
    TForCall => "TFORCALL",
    TForLoop => "TFORLOOP",
    SetList => "SETLIST",
    Closure => "CLOSURE",
    Vararg => "VARARG",
    ExtraArg => "EXTRAARG",
    Event => "EVENT",
    EventName => "EVENTNAME",
    EventArg => "EVENTARG",
    LoadGlobal => "LOAD_GLOBAL",
    Exit => "EXIT",
}

impl OpCode {
    /// Decodes a raw opcode number.
    pub fn from_u8(raw: u8) -> Option<Self> { Self::ALL.get(raw as usize).copied() }

    /// Looks an opcode up by its listing name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// One packed 32-bit instruction word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Instruction(pub u32);

impl Instruction {
    /// iABC constructor. Operands are masked to their field width.
    pub const fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        Self(
            (op as u32) << POS_OP
                | (a & mask(SIZE_A)) << POS_A
                | (b & mask(SIZE_B)) << POS_B
                | (c & mask(SIZE_C)) << POS_C,
        )
    }

    /// iABx constructor.
    pub const fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        Self((op as u32) << POS_OP | (a & mask(SIZE_A)) << POS_A | (bx & mask(SIZE_BX)) << POS_BX)
    }

    /// iAsBx constructor. Offsets outside the sBx range wrap like the
    /// other operands are masked; callers range-check first.
    pub const fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::abx(op, a, sbx.wrapping_add(MAXARG_SBX) as u32)
    }

    /// Raw word.
    pub const fn raw(self) -> u32 { self.0 }

    /// Raw opcode number (may be out of the known table).
    pub const fn opcode_raw(self) -> u8 { ((self.0 >> POS_OP) & mask(SIZE_OP)) as u8 }

    /// Decoded opcode, `None` for numbers outside the table.
    pub fn opcode(self) -> Option<OpCode> { OpCode::from_u8(self.opcode_raw()) }

    /// A operand.
    pub const fn a(self) -> u32 { (self.0 >> POS_A) & mask(SIZE_A) }

    /// B operand.
    pub const fn b(self) -> u32 { (self.0 >> POS_B) & mask(SIZE_B) }

    /// C operand.
    pub const fn c(self) -> u32 { (self.0 >> POS_C) & mask(SIZE_C) }

    /// Bx operand.
    pub const fn bx(self) -> u32 { (self.0 >> POS_BX) & mask(SIZE_BX) }

    /// Signed sBx operand.
    pub const fn sbx(self) -> i32 { self.bx() as i32 - MAXARG_SBX }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Some(op) => write!(f, "{}({:08x})", op.name(), self.0),
            None => write!(f, "?({:08x})", self.0),
        }
    }
}

impl From<u32> for Instruction {
    fn from(raw: u32) -> Self { Self(raw) }
}

/* ─────────────────────────── Tests ─────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_numbers_follow_table_order() {
        assert_eq!(OpCode::Move as u8, 0);
        assert_eq!(OpCode::LoadK as u8, 1);
        assert_eq!(OpCode::Exit as u8 as usize, OpCode::ALL.len() - 1);
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(OpCode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(OpCode::from_u8(OpCode::ALL.len() as u8), None);
    }

    #[test]
    fn abc_fields() {
        let i = Instruction::abc(OpCode::GetTable, 3, 200, rk_const(17));
        assert_eq!(i.opcode(), Some(OpCode::GetTable));
        assert_eq!(i.a(), 3);
        assert_eq!(i.b(), 200);
        assert!(is_k(i.c()));
        assert_eq!(index_k(i.c()), 17);
        assert!(!is_k(i.b()));
    }

    #[test]
    fn bx_and_sbx() {
        let k = Instruction::abx(OpCode::LoadK, 1, MAXARG_BX);
        assert_eq!(k.bx(), MAXARG_BX);
        assert_eq!(k.a(), 1);

        let back = Instruction::asbx(OpCode::Jmp, 0, -5);
        assert_eq!(back.sbx(), -5);
        assert_eq!(Instruction::asbx(OpCode::Jmp, 0, 7).sbx(), 7);
        // no overflow panic on extreme offsets
        let _ = Instruction::asbx(OpCode::Jmp, 0, i32::MAX);
    }

    #[test]
    fn listing_names() {
        assert_eq!(OpCode::GetTabUp.name(), "GETTABUP");
        assert_eq!(OpCode::LoadGlobal.to_string(), "LOAD_GLOBAL");
        assert_eq!(OpCode::from_name("loadk"), Some(OpCode::LoadK));
        assert_eq!(OpCode::from_name("nope"), None);
    }
}
