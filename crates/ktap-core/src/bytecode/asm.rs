//! Small listing assembler producing a [`Prototype`] tree.
//!
//! Used by tests and by the CLI until the script front end is plugged in.
//!
//! ```text
//! ; main chunk
//! .vararg
//! .const "print"
//! GETTABUP 0 0 k:0
//! .function          ; nested function, becomes child 0
//! .params 1
//! .local x 0 2
//! RETURN 0 1
//! .end
//! CLOSURE 1 0
//! LOADK 2 "hello"
//! CALL 0 2 1
//! RETURN 0 1
//! ```
//!
//! Directives: `.lines first last`, `.params n`, `.vararg`, `.stack n`,
//! `.const literal`, `.local name start end`, `.upval name instack idx`,
//! `.function` / `.end`. Instructions take numeric operands; `k:N` marks an
//! RK constant. LOADK also accepts a literal, interned on the fly. Each
//! instruction records the listing line it came from.

use crate::bytecode::opcode::{
    rk_const, Instruction, OpCode, MAXARG_A, MAXARG_B, MAXARG_BX, MAXARG_C, MAXARG_SBX, MAXINDEXRK,
};
use crate::bytecode::proto::{Constant, ProtoBuilder, Prototype};
use crate::{CoreError, CoreResult};

/// Assembles `source` into a prototype tree named `chunk_name`.
pub fn assemble(source: &str, chunk_name: &str) -> CoreResult<Prototype> {
    let mut stack: Vec<ProtoBuilder> = vec![ProtoBuilder::new(chunk_name)];
    // whether each open function set its span with `.lines`
    let mut explicit_lines: Vec<bool> = vec![false];

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let err = |msg: &str| CoreError::corrupted(format!("line {line_no}: {msg}"));
        let here = i32::try_from(line_no).map_err(|_| err("listing too long"))?;

        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        if head == ".function" {
            let mut child = ProtoBuilder::new(chunk_name);
            child.lines(here, here);
            stack.push(child);
            explicit_lines.push(false);
            continue;
        }
        if head == ".end" {
            if stack.len() < 2 {
                return Err(err("`.end` without `.function`"));
            }
            let mut child = stack.pop().ok_or_else(|| err("empty function stack"))?;
            if !explicit_lines.pop().unwrap_or(false) {
                let first = child.line_defined();
                child.lines(first, here);
            }
            let parent = stack.last_mut().ok_or_else(|| err("empty function stack"))?;
            parent.add_child(child.finish())?;
            continue;
        }

        let f = stack.last_mut().ok_or_else(|| err("empty function stack"))?;
        match head {
            ".lines" => {
                let [first, last] = numbers::<2>(&args).map_err(|m| err(&m))?;
                f.lines(to_i32(first).map_err(|m| err(&m))?, to_i32(last).map_err(|m| err(&m))?);
                if let Some(flag) = explicit_lines.last_mut() {
                    *flag = true;
                }
            }
            ".params" => {
                let [n] = numbers::<1>(&args).map_err(|m| err(&m))?;
                let vararg = f.is_vararg();
                f.params(to_u8(n).map_err(|m| err(&m))?, vararg);
            }
            ".vararg" => {
                let n = f.num_params();
                f.params(n, true);
            }
            ".stack" => {
                let [n] = numbers::<1>(&args).map_err(|m| err(&m))?;
                f.max_stack(to_u8(n).map_err(|m| err(&m))?);
            }
            ".const" => {
                f.add_constant(parse_literal(rest).map_err(|m| err(&m))?)?;
            }
            ".local" => {
                let name = args.first().ok_or_else(|| err("`.local` expects a name"))?;
                let [start, end] = numbers::<2>(&args[1..]).map_err(|m| err(&m))?;
                f.add_local(*name, to_i32(start).map_err(|m| err(&m))?, to_i32(end).map_err(|m| err(&m))?)?;
            }
            ".upval" => {
                let name = args.first().ok_or_else(|| err("`.upval` expects a name"))?;
                let [instack, idx] = numbers::<2>(&args[1..]).map_err(|m| err(&m))?;
                f.add_upvalue(*name, instack != 0, to_u8(idx).map_err(|m| err(&m))?)?;
            }
            mnemonic => {
                let op = OpCode::from_name(mnemonic)
                    .ok_or_else(|| err(&format!("unknown instruction `{mnemonic}`")))?;
                let instr = encode(f, op, rest, &args).map_err(|m| err(&m))?;
                f.emit(instr, here)?;
            }
        }
    }

    if stack.len() != 1 {
        return Err(CoreError::corrupted("unterminated `.function` at end of listing"));
    }
    let root = stack.pop().ok_or_else(|| CoreError::corrupted("empty function stack"))?;
    Ok(root.finish())
}

fn encode(f: &mut ProtoBuilder, op: OpCode, rest: &str, args: &[&str]) -> Result<Instruction, String> {
    match op {
        OpCode::LoadK | OpCode::LoadKx => {
            let a = operand(args.first().copied().unwrap_or(""), MAXARG_A, "A")?;
            let k = rest.split_once(char::is_whitespace).map_or("", |(_, k)| k.trim());
            let bx = match k.parse::<u32>() {
                Ok(_) => operand(k, MAXARG_BX, "Bx")?,
                Err(_) => f.add_constant(parse_literal(k)?).map_err(|e| e.to_string())?,
            };
            Ok(Instruction::abx(op, a, bx))
        }
        OpCode::Closure => {
            if args.len() != 2 {
                return Err(format!("{} expects `A Bx`", op.name()));
            }
            Ok(Instruction::abx(op, operand(args[0], MAXARG_A, "A")?, operand(args[1], MAXARG_BX, "Bx")?))
        }
        OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep | OpCode::TForLoop => {
            if args.len() != 2 {
                return Err(format!("{} expects `A sBx`", op.name()));
            }
            let a = operand(args[0], MAXARG_A, "A")?;
            let sbx = args[1].parse::<i32>().map_err(|_| format!("invalid offset `{}`", args[1]))?;
            let max = MAXARG_BX as i32 - MAXARG_SBX;
            if !(-MAXARG_SBX..=max).contains(&sbx) {
                return Err(format!("sBx operand {sbx} out of range ({}..={max})", -MAXARG_SBX));
            }
            Ok(Instruction::asbx(op, a, sbx))
        }
        _ => {
            if args.len() > 3 {
                return Err(format!("{} takes at most 3 operands", op.name()));
            }
            let limits = [(MAXARG_A, "A"), (MAXARG_B, "B"), (MAXARG_C, "C")];
            let mut ops = [0u32; 3];
            for ((slot, arg), (max, what)) in ops.iter_mut().zip(args).zip(limits) {
                *slot = match arg.strip_prefix("k:") {
                    Some(_) if what == "A" => return Err("A cannot address a constant".into()),
                    Some(ix) => rk_const(operand(ix, MAXINDEXRK, "constant")?),
                    None => operand(arg, max, what)?,
                };
            }
            Ok(Instruction::abc(op, ops[0], ops[1], ops[2]))
        }
    }
}

fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if in_str => escaped = !escaped,
            '"' if !escaped => in_str = !in_str,
            ';' if !in_str => return &line[..i],
            _ => escaped = false,
        }
        if c != '\\' {
            escaped = false;
        }
    }
    line
}

fn number(s: &str) -> Result<u32, String> { s.parse::<u32>().map_err(|_| format!("invalid operand `{s}`")) }

/// Numeric operand bounded by its field width.
fn operand(s: &str, max: u32, what: &str) -> Result<u32, String> {
    let v = number(s)?;
    if v > max {
        return Err(format!("{what} operand {v} out of range (max {max})"));
    }
    Ok(v)
}

fn numbers<const N: usize>(args: &[&str]) -> Result<[u32; N], String> {
    if args.len() != N {
        return Err(format!("expected {N} operand(s), got {}", args.len()));
    }
    let mut out = [0u32; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = number(arg)?;
    }
    Ok(out)
}

fn to_i32(n: u32) -> Result<i32, String> { i32::try_from(n).map_err(|_| format!("value {n} does not fit in an i32")) }

fn to_u8(n: u32) -> Result<u8, String> { u8::try_from(n).map_err(|_| format!("value {n} does not fit in a byte")) }

fn parse_literal(input: &str) -> Result<Constant, String> {
    match input {
        "nil" => return Ok(Constant::Nil),
        "true" => return Ok(Constant::Bool(true)),
        "false" => return Ok(Constant::Bool(false)),
        _ => {}
    }
    if input.starts_with('"') {
        return parse_string_literal(input).map(Constant::Str);
    }
    input.parse::<f64>().map(Constant::Number).map_err(|_| format!("invalid literal `{input}`"))
}

fn parse_string_literal(input: &str) -> Result<String, String> {
    let inner = input
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|_| input.len() >= 2)
        .ok_or_else(|| "string literal expected".to_string())?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => return Err("incomplete escape sequence".into()),
        }
    }
    Ok(out)
}

/* ─────────────────────────── Tests ─────────────────────────── */
