//! Structural validation run before a prototype tree is dumped.

use crate::bytecode::opcode::{index_k, is_k, OpCode};
use crate::bytecode::proto::Prototype;
use crate::{CoreError, CoreResult};

/// Checks the invariants consumers rely on, recursively.
///
/// - one line entry per instruction
/// - every constant reference (LOADK Bx, RK operands) is inside the pool
/// - every CLOSURE index names an existing child
/// - every opcode is known
pub fn validate_proto(proto: &Prototype) -> CoreResult<()> {
    validate_at(proto, &mut 0)
}

fn validate_at(f: &Prototype, fn_nr: &mut usize) -> CoreResult<()> {
    let nr = *fn_nr;
    *fn_nr += 1;

    if f.code.len() != f.lineinfo.len() {
        return Err(CoreError::corrupted(format!(
            "function {nr}: {} instructions but {} line entries",
            f.code.len(),
            f.lineinfo.len()
        )));
    }

    let nk = f.constants.len() as u32;
    let check_rk = |pc: usize, x: u32| -> CoreResult<()> {
        if is_k(x) && index_k(x) >= nk {
            return Err(CoreError::corrupted(format!(
                "function {nr}: pc {pc} references constant {} but pool size is {nk}",
                index_k(x)
            )));
        }
        Ok(())
    };

    for (pc, instr) in f.code.iter().enumerate() {
        let op = instr.opcode().ok_or_else(|| {
            CoreError::corrupted(format!("function {nr}: pc {pc} has unknown opcode {}", instr.opcode_raw()))
        })?;
        match op {
            OpCode::LoadK => {
                if instr.bx() >= nk {
                    return Err(CoreError::corrupted(format!(
                        "function {nr}: pc {pc} loads constant {} but pool size is {nk}",
                        instr.bx()
                    )));
                }
            }
            OpCode::GetTabUp | OpCode::GetTable | OpCode::SelfOp => check_rk(pc, instr.c())?,
            OpCode::SetTabUp
            | OpCode::SetTabUpIncr
            | OpCode::SetTable
            | OpCode::SetTableIncr
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Eq
            | OpCode::Lt
            | OpCode::Le => {
                check_rk(pc, instr.b())?;
                check_rk(pc, instr.c())?;
            }
            OpCode::Closure => {
                if instr.bx() as usize >= f.protos.len() {
                    return Err(CoreError::corrupted(format!(
                        "function {nr}: pc {pc} closes over child {} but only {} exist",
                        instr.bx(),
                        f.protos.len()
                    )));
                }
            }
            _ => {}
        }
    }

    for child in &f.protos {
        validate_at(child, fn_nr)?;
    }
    Ok(())
}

/* ─────────────────────────── Tests ─────────────────────────── */
