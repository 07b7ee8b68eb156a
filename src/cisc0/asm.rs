//! Two-pass assembler for `cisc0` mnemonics. Same shape as [`crate::iris::asm`] — label table built on pass one,
//! operands resolved and encoded on pass two — specialized to `cisc0`'s
//! grammar (bitmask literals, the `addr`/`value`/`mask`/`shift`/`field`
//! register aliases) and its variable-length emission.

use std::collections::HashMap;

use crate::cisc0::codec::{
    encode, ArithOp, ArithSrc, Bitmask, Branch, BranchTarget, CompareOp, EncodingOp, Instruction,
    LogicalOp, LogicalSrc, MemoryOp, ShiftAmount, ShiftDir,
};
use crate::cisc0::codec::{REG_ADDR, REG_CR, REG_MASK, REG_SHIFT_FIELD, REG_SP, REG_VALUE};
use crate::error::AssembleError;
use crate::object::{Record, Segment};

struct Line<'a> {
    number: usize,
    text: &'a str,
}

fn lines(source: &str) -> impl Iterator<Item = Line<'_>> {
    source.lines().enumerate().map(|(i, text)| Line {
        number: i + 1,
        text: text.split(';').next().unwrap_or("").trim(),
    })
}

fn parse_register(token: &str) -> Option<u8> {
    match token {
        "ip" => Some(crate::cisc0::codec::REG_IP),
        "sp" => Some(REG_SP),
        "cr" => Some(REG_CR),
        "addr" => Some(REG_ADDR),
        "value" => Some(REG_VALUE),
        "mask" => Some(REG_MASK),
        "shift" | "field" => Some(REG_SHIFT_FIELD),
        _ => token.strip_prefix('r').and_then(|n| n.parse().ok()),
    }
}

/// Numeric literal: decimal, `0x` hex, `0b` binary, `0q` octal. The fourth numeric form, `0m` 4-bit bitmask, is
/// parsed separately by [`parse_bitmask`] since it is never a plain
/// value operand.
fn parse_number(token: &str) -> Option<i64> {
    if let Some(hex) = token.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = token.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else if let Some(oct) = token.strip_prefix("0q") {
        i64::from_str_radix(oct, 8).ok()
    } else {
        token.parse().ok()
    }
}

fn parse_bitmask(token: &str) -> Option<u8> {
    let bits = token.strip_prefix("0m")?;
    if bits.len() != 4 || !bits.chars().all(|c| c == '0' || c == '1') {
        return None;
    }
    u8::from_str_radix(bits, 2).ok()
}

enum Statement<'a> {
    Label(String),
    Org(u32),
    WordLiteral(Vec<i64>),
    DwordLiteral(Vec<i64>),
    Instruction { mnemonic: &'a str, operands: Vec<&'a str> },
}

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_statement<'a>(number: usize, text: &'a str) -> Result<Option<Statement<'a>>, AssembleError> {
    if text.is_empty() {
        return Ok(None);
    }
    if let Some(label) = text.strip_suffix(':') {
        return Ok(Some(Statement::Label(label.to_string())));
    }
    let tokens = tokenize(text);
    let (head, rest) = tokens
        .split_first()
        .ok_or_else(|| AssembleError::Parse(number, 0, "empty statement".into()).log())?;
    match *head {
        ".org" => {
            let addr = rest
                .first()
                .and_then(|t| parse_number(t))
                .ok_or_else(|| AssembleError::Parse(number, 0, "expected address after .org".into()).log())?;
            Ok(Some(Statement::Org(addr as u32)))
        }
        ".label" => {
            let name = rest
                .first()
                .ok_or_else(|| AssembleError::Parse(number, 0, "expected name after .label".into()).log())?;
            Ok(Some(Statement::Label(name.to_string())))
        }
        ".word" => {
            let values = rest
                .iter()
                .map(|t| parse_number(t).ok_or_else(|| AssembleError::Parse(number, 0, format!("bad literal {t}")).log()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Statement::WordLiteral(values)))
        }
        ".dword" => {
            let values = rest
                .iter()
                .map(|t| parse_number(t).ok_or_else(|| AssembleError::Parse(number, 0, format!("bad literal {t}")).log()))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Statement::DwordLiteral(values)))
        }
        mnemonic => Ok(Some(Statement::Instruction {
            mnemonic,
            operands: rest.to_vec(),
        })),
    }
}

struct PendingInstruction {
    address: u32,
    line: usize,
    mnemonic: String,
    operands: Vec<String>,
}

/// Assemble `source` into a stream of [`Record`]s, matching
/// [`crate::iris::asm::assemble`]'s contract: fully succeeds or emits
/// nothing. `cisc0` object records ignore [`Segment`]; every record is
/// written as [`Segment::Code`] so the loader's flat address space sees
/// one contiguous stream.
pub fn assemble(source: &str) -> Result<Vec<Record>, AssembleError> {
    let mut labels: HashMap<String, u32> = HashMap::new();
    let mut pending: Vec<PendingInstruction> = Vec::new();
    let mut literals: Vec<(u32, i64)> = Vec::new();

    let mut address = 0u32;

    for line in lines(source) {
        let Some(statement) = parse_statement(line.number, line.text)? else {
            continue;
        };
        match statement {
            Statement::Label(name) => {
                labels.insert(name, address);
            }
            Statement::Org(addr) => address = addr,
            Statement::WordLiteral(values) => {
                for value in values {
                    literals.push((address, value));
                    address += 1;
                }
            }
            Statement::DwordLiteral(values) => {
                for value in values {
                    literals.push((address, value));
                    literals.push((address + 1, value >> 16));
                    address += 2;
                }
            }
            Statement::Instruction { mnemonic, operands } => {
                let operands: Vec<String> = operands.into_iter().map(|s| s.to_string()).collect();
                let width = instruction_width_hint(line.number, mnemonic, &operands)?;
                pending.push(PendingInstruction {
                    address,
                    line: line.number,
                    mnemonic: mnemonic.to_string(),
                    operands,
                });
                address += width;
            }
        }
    }

    let mut records = Vec::new();
    for (addr, value) in literals {
        records.push(Record {
            segment: Segment::Code,
            address: addr,
            value: value as u16,
        });
    }
    for instruction in &pending {
        let resolved = encode_instruction(instruction, &labels)?;
        for (i, word) in encode(resolved).into_iter().enumerate() {
            records.push(Record {
                segment: Segment::Code,
                address: instruction.address + i as u32,
                value: word,
            });
        }
    }
    Ok(records)
}

/// A lower bound on an instruction's word count, computed from its
/// mnemonic and operand count alone (before labels resolve), so pass
/// one can advance the address counter without encoding anything yet.
/// Every mnemonic here has a fixed width once its operand shape is
/// known, so this never under/over-counts relative to the real
/// [`encode`] call in pass two.
fn instruction_width_hint(line: usize, mnemonic: &str, operands: &[String]) -> Result<u32, AssembleError> {
    let require = |count: usize| -> Result<(), AssembleError> {
        if operands.len() < count {
            Err(AssembleError::Parse(
                line,
                0,
                format!(
                    "`{mnemonic}` expects {count} operand{}, found {}",
                    if count == 1 { "" } else { "s" },
                    operands.len()
                ),
            )
            .log())
        } else {
            Ok(())
        }
    };
    Ok(match mnemonic {
        "load" | "store" | "loadi" | "storei" | "push" | "pop" => {
            require(1)?;
            2
        }
        "add" | "sub" | "mul" | "div" | "rem" | "cmpeq" | "cmpneq" | "cmplt" | "cmpgt" | "cmple" | "cmpge" => {
            require(2)?;
            match operands.get(1).map(|s| s.as_str()) {
                Some(t) if parse_register(t).is_some() => 1,
                _ => 2,
            }
        }
        "shl" | "shr" => {
            require(2)?;
            1
        }
        "and" | "or" | "xor" | "nand" | "nor" | "not" => {
            let min = if mnemonic == "not" { 1 } else { 2 };
            require(min)?;
            match operands.get(1).map(|s| s.as_str()) {
                Some(t) if parse_register(t).is_some() => 1,
                Some(t) => {
                    let mask = parse_bitmask(t).unwrap_or(0b1111);
                    1 + Bitmask(mask).extra_word_count() as u32
                }
                None => 1,
            }
        }
        "b" | "bc" | "bs" => {
            require(1)?;
            2
        }
        "br" | "brc" => {
            require(1)?;
            1
        }
        "bif" => {
            require(2)?;
            2
        }
        "call" => {
            require(1)?;
            2
        }
        "callr" => {
            require(1)?;
            1
        }
        "sys" => 1,
        "set" => {
            require(2)?;
            let mask = operands.get(1).and_then(|t| parse_bitmask(t)).unwrap_or(0b1111);
            1 + Bitmask(mask).extra_word_count() as u32
        }
        "mov" | "swap" => {
            require(2)?;
            2
        }
        "bitset" | "bitunset" | "encode" | "decode" => {
            require(1)?;
            1
        }
        other => return Err(AssembleError::Parse(line, 0, format!("unknown mnemonic `{other}`")).log()),
    })
}

fn resolve_operand(token: &str, labels: &HashMap<String, u32>) -> Result<i64, AssembleError> {
    if let Some(n) = parse_number(token) {
        return Ok(n);
    }
    labels
        .get(token)
        .copied()
        .map(|a| a as i64)
        .ok_or_else(|| AssembleError::UndefinedLabel(token.to_string()).log())
}

fn reg(token: &str, mnemonic: &str, line: usize) -> Result<u8, AssembleError> {
    parse_register(token)
        .ok_or_else(|| AssembleError::Parse(line, 0, format!("bad register `{token}` in `{mnemonic}`")).log())
}

fn bitmask_operand(token: Option<&String>) -> Bitmask {
    Bitmask(token.and_then(|t| parse_bitmask(t)).unwrap_or(0b1111))
}

fn encode_instruction(
    line: &PendingInstruction,
    labels: &HashMap<String, u32>,
) -> Result<Instruction, AssembleError> {
    let ops = &line.operands;
    let m = line.mnemonic.as_str();

    let arith_src = |token: &str| -> Result<ArithSrc, AssembleError> {
        if let Some(r) = parse_register(token) {
            Ok(ArithSrc::Reg(r))
        } else {
            Ok(ArithSrc::Imm(resolve_operand(token, labels)? as u16))
        }
    };

    match m {
        "load" | "loadi" => Ok(Instruction::Memory {
            op: MemoryOp::Load,
            indirect: m == "loadi",
            bitmask: Bitmask(parse_bitmask(&ops[0]).ok_or_else(|| {
                AssembleError::Parse(line.line, 0, format!("bad bitmask `{}` in `load`", ops[0])).log()
            })?),
            offset: ops.get(1).map(|t| resolve_operand(t, labels)).transpose()?.unwrap_or(0) as u16,
            gpr: 0,
        }),
        "store" | "storei" => Ok(Instruction::Memory {
            op: MemoryOp::Store,
            indirect: m == "storei",
            bitmask: Bitmask(parse_bitmask(&ops[0]).ok_or_else(|| {
                AssembleError::Parse(line.line, 0, format!("bad bitmask `{}` in `store`", ops[0])).log()
            })?),
            offset: ops.get(1).map(|t| resolve_operand(t, labels)).transpose()?.unwrap_or(0) as u16,
            gpr: 0,
        }),
        "push" => Ok(Instruction::Memory {
            op: MemoryOp::Push,
            indirect: false,
            bitmask: bitmask_operand(ops.get(1)),
            offset: 0,
            gpr: reg(&ops[0], m, line.line)?,
        }),
        "pop" => Ok(Instruction::Memory {
            op: MemoryOp::Pop,
            indirect: false,
            bitmask: bitmask_operand(ops.get(1)),
            offset: 0,
            gpr: reg(&ops[0], m, line.line)?,
        }),
        "add" => Ok(Instruction::Arithmetic {
            op: ArithOp::Add,
            dest: reg(&ops[0], m, line.line)?,
            src_or_imm: arith_src(&ops[1])?,
        }),
        "sub" => Ok(Instruction::Arithmetic {
            op: ArithOp::Sub,
            dest: reg(&ops[0], m, line.line)?,
            src_or_imm: arith_src(&ops[1])?,
        }),
        "mul" => Ok(Instruction::Arithmetic {
            op: ArithOp::Mul,
            dest: reg(&ops[0], m, line.line)?,
            src_or_imm: arith_src(&ops[1])?,
        }),
        "div" => Ok(Instruction::Arithmetic {
            op: ArithOp::Div,
            dest: reg(&ops[0], m, line.line)?,
            src_or_imm: arith_src(&ops[1])?,
        }),
        "rem" => Ok(Instruction::Arithmetic {
            op: ArithOp::Rem,
            dest: reg(&ops[0], m, line.line)?,
            src_or_imm: arith_src(&ops[1])?,
        }),
        "shl" => Ok(Instruction::Shift {
            dir: ShiftDir::Left,
            dest: reg(&ops[0], m, line.line)?,
            amount: shift_amount(&ops[1], line.line)?,
        }),
        "shr" => Ok(Instruction::Shift {
            dir: ShiftDir::Right,
            dest: reg(&ops[0], m, line.line)?,
            amount: shift_amount(&ops[1], line.line)?,
        }),
        "and" | "or" | "xor" | "nand" | "nor" => {
            let op = match m {
                "and" => LogicalOp::And,
                "or" => LogicalOp::Or,
                "xor" => LogicalOp::Xor,
                "nand" => LogicalOp::Nand,
                _ => LogicalOp::Nor,
            };
            let dest = reg(&ops[0], m, line.line)?;
            if let Some(r) = parse_register(&ops[1]) {
                Ok(Instruction::Logical {
                    op,
                    dest,
                    src_or_mask: LogicalSrc::Reg(r),
                    immediate: 0,
                })
            } else {
                let mask = parse_bitmask(&ops[1]).unwrap_or(0b1111);
                let imm = ops.get(2).map(|t| resolve_operand(t, labels)).transpose()?.unwrap_or(0);
                Ok(Instruction::Logical {
                    op,
                    dest,
                    src_or_mask: LogicalSrc::Mask(Bitmask(mask)),
                    immediate: imm as u32,
                })
            }
        }
        "not" => Ok(Instruction::Logical {
            op: LogicalOp::Not,
            dest: reg(&ops[0], m, line.line)?,
            src_or_mask: LogicalSrc::Reg(0),
            immediate: 0,
        }),
        "cmpeq" => compare(CompareOp::Eq, ops, line.line, &arith_src),
        "cmpneq" => compare(CompareOp::Neq, ops, line.line, &arith_src),
        "cmplt" => compare(CompareOp::Lt, ops, line.line, &arith_src),
        "cmpgt" => compare(CompareOp::Gt, ops, line.line, &arith_src),
        "cmple" => compare(CompareOp::Le, ops, line.line, &arith_src),
        "cmpge" => compare(CompareOp::Ge, ops, line.line, &arith_src),
        "b" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::Immediate(resolve_operand(&ops[0], labels)? as u16),
            is_call: false,
            is_conditional: false,
            shift_left: false,
        })),
        "bs" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::Immediate(resolve_operand(&ops[0], labels)? as u16),
            is_call: false,
            is_conditional: false,
            shift_left: true,
        })),
        "bc" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::Immediate(resolve_operand(&ops[0], labels)? as u16),
            is_call: false,
            is_conditional: true,
            shift_left: false,
        })),
        "br" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::Register(reg(&ops[0], m, line.line)?),
            is_call: false,
            is_conditional: false,
            shift_left: false,
        })),
        "brc" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::Register(reg(&ops[0], m, line.line)?),
            is_call: false,
            is_conditional: true,
            shift_left: false,
        })),
        "bif" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::IfThenElse {
                on_true: reg(&ops[0], m, line.line)?,
                on_false: reg(&ops[1], m, line.line)?,
            },
            is_call: false,
            is_conditional: true,
            shift_left: false,
        })),
        "call" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::Immediate(resolve_operand(&ops[0], labels)? as u16),
            is_call: true,
            is_conditional: false,
            shift_left: false,
        })),
        "callr" => Ok(Instruction::Branch(Branch {
            target: BranchTarget::Register(reg(&ops[0], m, line.line)?),
            is_call: true,
            is_conditional: false,
            shift_left: false,
        })),
        "sys" => Ok(Instruction::SystemCall),
        "set" => {
            let immediate_token = ops
                .last()
                .ok_or_else(|| AssembleError::Parse(line.line, 0, "`set` expects an immediate operand".into()).log())?;
            Ok(Instruction::Set {
                dest: reg(&ops[0], m, line.line)?,
                bitmask: bitmask_operand(ops.get(1)),
                immediate: resolve_operand(immediate_token, labels)? as u32,
            })
        }
        "mov" => Ok(Instruction::Move {
            dest: reg(&ops[0], m, line.line)?,
            src: reg(&ops[1], m, line.line)?,
            bitmask: bitmask_operand(ops.get(2)),
        }),
        "swap" => Ok(Instruction::Swap {
            a: reg(&ops[0], m, line.line)?,
            b: reg(&ops[1], m, line.line)?,
        }),
        "bitset" => Ok(Instruction::Complex {
            op: EncodingOp::BitSet,
            reg: reg(&ops[0], m, line.line)?,
        }),
        "bitunset" => Ok(Instruction::Complex {
            op: EncodingOp::BitUnset,
            reg: reg(&ops[0], m, line.line)?,
        }),
        "encode" => Ok(Instruction::Complex {
            op: EncodingOp::Encode,
            reg: reg(&ops[0], m, line.line)?,
        }),
        "decode" => Ok(Instruction::Complex {
            op: EncodingOp::Decode,
            reg: reg(&ops[0], m, line.line)?,
        }),
        other => Err(AssembleError::Parse(line.line, 0, format!("unknown mnemonic `{other}`")).log()),
    }
}

fn shift_amount(token: &str, line: usize) -> Result<ShiftAmount, AssembleError> {
    if let Some(r) = parse_register(token) {
        Ok(ShiftAmount::Reg(r))
    } else {
        parse_number(token)
            .map(|n| ShiftAmount::Imm(n as u8))
            .ok_or_else(|| AssembleError::Parse(line, 0, format!("bad shift amount `{token}`")).log())
    }
}

fn compare(
    op: CompareOp,
    ops: &[String],
    line: usize,
    arith_src: &dyn Fn(&str) -> Result<ArithSrc, AssembleError>,
) -> Result<Instruction, AssembleError> {
    Ok(Instruction::Compare {
        op,
        src0: reg(&ops[0], "cmp", line)?,
        src_or_imm: arith_src(&ops[1])?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_simple_program() {
        let source = "set r0, 0m1111, 5\nadd r0, 2\n";
        let records = assemble(source).unwrap();
        assert!(!records.is_empty());
    }

    #[test]
    fn forward_label_reference_resolves() {
        let source = "b end\nadd r0, 1\nend:\nset r1, 0m1111, 1\n";
        let records = assemble(source).unwrap();
        assert!(records.iter().any(|r| r.value != 0));
    }

    #[test]
    fn undefined_label_is_an_error() {
        let source = "b nowhere\n";
        assert!(matches!(assemble(source), Err(AssembleError::UndefinedLabel(_))));
    }

    #[test]
    fn unknown_mnemonic_is_a_parse_error() {
        let source = "frobnicate r0\n";
        assert!(matches!(assemble(source), Err(AssembleError::Parse(..))));
    }

    #[test]
    fn parse_error_reports_the_offending_source_line() {
        let source = "add r0, 1\nadd r0, 2\nfrobnicate r0\n";
        match assemble(source) {
            Err(AssembleError::Parse(line, _, _)) => assert_eq!(line, 3),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn bitmask_literal_parses() {
        assert_eq!(parse_bitmask("0m1010"), Some(0b1010));
        assert_eq!(parse_bitmask("0m11"), None);
    }

    #[test]
    fn set_with_full_bitmask_emits_three_words() {
        let source = "set r3, 0m1111, 0xAABBCCDD\n";
        let records = assemble(source).unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn missing_operands_is_a_parse_error_not_a_panic() {
        let source = "add r0\n";
        assert!(matches!(assemble(source), Err(AssembleError::Parse(..))));
    }

    #[test]
    fn set_with_no_immediate_is_a_parse_error_not_a_panic() {
        let source = "set r0\n";
        assert!(matches!(assemble(source), Err(AssembleError::Parse(..))));
    }

    #[test]
    fn dword_emits_two_words_and_advances_the_address_by_two() {
        let source = ".dword 0x12345678\n.word 0xBEEF\n";
        let records = assemble(source).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].address, 0);
        assert_eq!(records[0].value, 0x5678);
        assert_eq!(records[1].address, 1);
        assert_eq!(records[1].value, 0x1234);
        assert_eq!(records[2].address, 2);
        assert_eq!(records[2].value, 0xBEEF);
    }
}
