//! Two-pass assembler for `iris` mnemonics.
//!
//! Pass one walks the token stream assigning each label the code- or
//! data-segment address it will occupy; pass two re-walks the same
//! stream emitting [`crate::object::Record`]s, now that every label
//! resolves. A label referenced before its definition is exactly the
//! case this buys: `AssembleError::UndefinedLabel` only fires for a
//! label still missing after both passes.
//!
//! The lexer here only ever needs `split`/`filter` over whitespace and
//! commas, so it reaches for nothing beyond `std`; `cisc0/asm.rs` is
//! the same.

use std::collections::HashMap;

use crate::error::AssembleError;
use crate::iris::codec::{
    encode, ArithOp, CompareOp, CrOp, Instruction, Jump, JumpKind, MoveOp, Src1,
};
use crate::object::{Record, Segment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seg {
    Code,
    Data,
}

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
        "ip" => Some(crate::iris::codec::REG_IP),
        "lr" => Some(crate::iris::codec::REG_LR),
        "sp" => Some(crate::iris::codec::REG_SP),
        "cr" => Some(crate::iris::codec::REG_CR),
        "tix" => Some(crate::iris::codec::REG_TIX),
        _ => token.strip_prefix('r').and_then(|n| n.parse().ok()),
    }
}

fn parse_number(token: &str) -> Option<i64> {
    if let Some(hex) = token.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = token.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else {
        token.parse().ok()
    }
}

fn parse_predicate(token: &str) -> Option<u8> {
    token.strip_prefix('p').and_then(|n| n.parse().ok())
}

/// One parsed statement: either a directive, a label definition, or an
/// instruction with its operand tokens still unresolved (labels are
/// resolved in the second pass, once every address is known).
enum Statement<'a> {
    Label(String),
    Org(u32),
    SwitchSegment(Seg),
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
    let (head, rest) = tokens.split_first().ok_or_else(|| {
        AssembleError::Parse(number, 0, "empty statement".into()).log()
    })?;
    match *head {
        ".org" => {
            let addr = rest
                .first()
                .and_then(|t| parse_number(t))
                .ok_or_else(|| AssembleError::Parse(number, 0, "expected address after .org".into()).log())?;
            Ok(Some(Statement::Org(addr as u32)))
        }
        ".code" => Ok(Some(Statement::SwitchSegment(Seg::Code))),
        ".data" => Ok(Some(Statement::SwitchSegment(Seg::Data))),
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
        ".label" => {
            let name = rest
                .first()
                .ok_or_else(|| AssembleError::Parse(number, 0, "expected name after .label".into()).log())?;
            Ok(Some(Statement::Label(name.to_string())))
        }
        mnemonic => Ok(Some(Statement::Instruction {
            mnemonic,
            operands: rest.to_vec(),
        })),
    }
}

/// One resolved unit ready for emission: either one or two 16-bit words
/// (an instruction packet splits lower/upper) or a literal.
enum Unit {
    Packet(u32),
    Word(u16),
}

struct PendingInstruction {
    address: u32,
    segment: Seg,
    line: usize,
    mnemonic: String,
    operands: Vec<String>,
}

/// Assemble `source` into a stream of [`Record`]s. Returns
/// [`AssembleError::UndefinedLabel`] if any operand still names an
/// unresolved label after both passes, or [`AssembleError::Parse`] for
/// any malformed line, in which case no records are returned at all —
/// assembly either fully succeeds or emits nothing.
pub fn assemble(source: &str) -> Result<Vec<Record>, AssembleError> {
    let mut labels: HashMap<String, u32> = HashMap::new();
    let mut pending: Vec<PendingInstruction> = Vec::new();
    let mut literals: Vec<(Seg, u32, i64)> = Vec::new();

    let mut address = 0u32;
    let mut segment = Seg::Code;

    for line in lines(source) {
        let Some(statement) = parse_statement(line.number, line.text)? else {
            continue;
        };
        match statement {
            Statement::Label(name) => {
                labels.insert(name, address);
            }
            Statement::Org(addr) => address = addr,
            Statement::SwitchSegment(seg) => segment = seg,
            Statement::WordLiteral(values) => {
                for value in values {
                    literals.push((segment, address, value));
                    address += 1;
                }
            }
            Statement::DwordLiteral(values) => {
                for value in values {
                    literals.push((segment, address, value));
                    literals.push((segment, address + 1, value >> 16));
                    address += 2;
                }
            }
            Statement::Instruction { mnemonic, operands } => {
                pending.push(PendingInstruction {
                    address,
                    segment,
                    line: line.number,
                    mnemonic: mnemonic.to_string(),
                    operands: operands.into_iter().map(|s| s.to_string()).collect(),
                });
                address += 2;
            }
        }
    }

    let mut records = Vec::new();
    for (seg, addr, value) in literals {
        records.push(word_record(seg, addr, value as u16));
    }
    for instruction in &pending {
        let resolved = encode_instruction(instruction, &labels)?;
        let packet = encode(resolved);
        let seg_byte = match instruction.segment {
            Seg::Code => Segment::Code,
            Seg::Data => Segment::Data,
        };
        records.push(Record {
            segment: seg_byte,
            address: instruction.address,
            value: (packet & 0xFFFF) as u16,
        });
        records.push(Record {
            segment: seg_byte,
            address: instruction.address + 1,
            value: (packet >> 16) as u16,
        });
    }
    Ok(records)
}

fn word_record(seg: Seg, addr: u32, value: u16) -> Record {
    Record {
        segment: match seg {
            Seg::Code => Segment::Code,
            Seg::Data => Segment::Data,
        },
        address: addr,
        value,
    }
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

fn reg(token: &str, line: &PendingInstruction) -> Result<u8, AssembleError> {
    parse_register(token)
        .ok_or_else(|| AssembleError::Parse(line.line, 0, format!("bad register `{token}` in `{}`", line.mnemonic)).log())
}

fn pred(token: &str, line: &PendingInstruction) -> Result<u8, AssembleError> {
    parse_predicate(token)
        .ok_or_else(|| AssembleError::Parse(line.line, 0, format!("bad predicate `{token}` in `{}`", line.mnemonic)).log())
}

/// Code addresses are dword-indexed (one 32-bit packet per instruction
/// pointer unit), but labels are recorded in the word-granular units the
/// object format uses. A label resolved as a jump target has to be
/// halved to land on the packet it actually names; a bare numeric
/// literal is taken to already be in the target's native unit, since a
/// programmer writing `jmp 5` means "packet 5", not "word 5".
fn resolve_jump_target(token: &str, labels: &HashMap<String, u32>) -> Result<i64, AssembleError> {
    if let Some(n) = parse_number(token) {
        return Ok(n);
    }
    labels
        .get(token)
        .map(|&word_address| (word_address / 2) as i64)
        .ok_or_else(|| AssembleError::UndefinedLabel(token.to_string()).log())
}

/// Number of operand tokens each mnemonic requires, checked before any
/// `ops[N]` indexing in [`encode_instruction`]. `None` means the
/// mnemonic is unrecognized; `encode_instruction`'s final match arm
/// reports that.
fn expected_operand_count(mnemonic: &str) -> Option<usize> {
    Some(match mnemonic {
        "add" | "sub" | "mul" | "div" | "rem" | "shl" | "shr" | "and" | "or" | "xor" | "not" | "min" | "max" => 3,
        "cmpeq" | "cmpneq" | "cmplt" | "cmpgt" | "cmple" | "cmpge" => 4,
        "jmp" | "call" | "jmpr" | "callr" => 1,
        "bif" | "callif" | "bifr" => 2,
        "ret" | "rfe" => 0,
        "retif" => 1,
        "ite" => 3,
        "mov" | "set" | "swap" | "load" | "store" | "memset" | "push" | "pushi" | "pop" => 2,
        "loadoff" | "storeoff" | "loadcode" | "storecode" | "ioreadoff" | "iowriteoff" => 3,
        "ioread" | "iowrite" => 2,
        "movtoip" | "movfromip" | "movtolr" | "movfromlr" => 1,
        "crand" | "cror" | "crxor" | "crnor" | "crnand" => 3,
        "crnot" | "crswap" | "crmov" | "savecrs" | "restorecrs" => 2,
        _ => return None,
    })
}

fn encode_instruction(
    line: &PendingInstruction,
    labels: &HashMap<String, u32>,
) -> Result<Instruction, AssembleError> {
    let ops = &line.operands;
    if let Some(expected) = expected_operand_count(line.mnemonic.as_str()) {
        if ops.len() < expected {
            return Err(AssembleError::Parse(
                line.line,
                0,
                format!(
                    "`{}` expects {expected} operand{}, found {}",
                    line.mnemonic,
                    if expected == 1 { "" } else { "s" },
                    ops.len()
                ),
            )
            .log());
        }
    }
    let arith = |op: ArithOp| -> Result<Instruction, AssembleError> {
        let dest = reg(&ops[0], line)?;
        let src0 = reg(&ops[1], line)?;
        let src1 = if let Some(r) = parse_register(&ops[2]) {
            Src1::Reg(r)
        } else {
            Src1::Imm(resolve_operand(&ops[2], labels)? as u8)
        };
        Ok(Instruction::Arithmetic { op, dest, src0, src1 })
    };
    let compare = |op: CompareOp| -> Result<Instruction, AssembleError> {
        let result = pred(&ops[0], line)?;
        let inverse = pred(&ops[1], line)?;
        let src0 = reg(&ops[2], line)?;
        let src1 = if let Some(r) = parse_register(&ops[3]) {
            Src1::Reg(r)
        } else {
            Src1::Imm(resolve_operand(&ops[3], labels)? as u8)
        };
        Ok(Instruction::Compare {
            op,
            result,
            inverse,
            src0,
            src1,
        })
    };

    match line.mnemonic.as_str() {
        "add" => arith(ArithOp::Add),
        "sub" => arith(ArithOp::Sub),
        "mul" => arith(ArithOp::Mul),
        "div" => arith(ArithOp::Div),
        "rem" => arith(ArithOp::Rem),
        "shl" => arith(ArithOp::ShiftLeft),
        "shr" => arith(ArithOp::ShiftRight),
        "and" => arith(ArithOp::And),
        "or" => arith(ArithOp::Or),
        "xor" => arith(ArithOp::Xor),
        "not" => arith(ArithOp::Not),
        "min" => arith(ArithOp::Min),
        "max" => arith(ArithOp::Max),
        "cmpeq" => compare(CompareOp::Eq),
        "cmpneq" => compare(CompareOp::Neq),
        "cmplt" => compare(CompareOp::Lt),
        "cmpgt" => compare(CompareOp::Gt),
        "cmple" => compare(CompareOp::Le),
        "cmpge" => compare(CompareOp::Ge),
        "jmp" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::UnconditionalImmediate,
            link: false,
            predicate: 0,
            imm: resolve_jump_target(&ops[0], labels)? as u16,
            reg: 0,
            reg_false: 0,
        })),
        "call" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::UnconditionalImmediate,
            link: true,
            predicate: 0,
            imm: resolve_jump_target(&ops[0], labels)? as u16,
            reg: 0,
            reg_false: 0,
        })),
        "jmpr" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::UnconditionalRegister,
            link: false,
            predicate: 0,
            imm: 0,
            reg: reg(&ops[0], line)?,
            reg_false: 0,
        })),
        "callr" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::UnconditionalRegister,
            link: true,
            predicate: 0,
            imm: 0,
            reg: reg(&ops[0], line)?,
            reg_false: 0,
        })),
        "bif" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::ConditionalImmediate,
            link: false,
            predicate: pred(&ops[0], line)?,
            imm: resolve_jump_target(&ops[1], labels)? as u16,
            reg: 0,
            reg_false: 0,
        })),
        "callif" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::ConditionalImmediate,
            link: true,
            predicate: pred(&ops[0], line)?,
            imm: resolve_jump_target(&ops[1], labels)? as u16,
            reg: 0,
            reg_false: 0,
        })),
        "bifr" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::ConditionalRegister,
            link: false,
            predicate: pred(&ops[0], line)?,
            imm: 0,
            reg: reg(&ops[1], line)?,
            reg_false: 0,
        })),
        "ret" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::BranchLr,
            link: false,
            predicate: 0,
            imm: 0,
            reg: 0,
            reg_false: 0,
        })),
        "retif" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::BranchLrConditional,
            link: false,
            predicate: pred(&ops[0], line)?,
            imm: 0,
            reg: 0,
            reg_false: 0,
        })),
        "rfe" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::ReturnFromError,
            link: false,
            predicate: 0,
            imm: 0,
            reg: 0,
            reg_false: 0,
        })),
        "ite" => Ok(Instruction::Jump(Jump {
            kind: JumpKind::IfThenElse,
            link: false,
            predicate: pred(&ops[0], line)?,
            imm: 0,
            reg: reg(&ops[1], line)?,
            reg_false: reg(&ops[2], line)?,
        })),
        "mov" => Ok(Instruction::Move(MoveOp::Move {
            dest: reg(&ops[0], line)?,
            src: reg(&ops[1], line)?,
        })),
        "set" => Ok(Instruction::Move(MoveOp::Set {
            dest: reg(&ops[0], line)?,
            imm: resolve_operand(&ops[1], labels)? as u16,
        })),
        "swap" => Ok(Instruction::Move(MoveOp::Swap {
            a: reg(&ops[0], line)?,
            b: reg(&ops[1], line)?,
        })),
        "load" => Ok(Instruction::Move(MoveOp::Load {
            dest: reg(&ops[0], line)?,
            addr: reg(&ops[1], line)?,
        })),
        "loadoff" => Ok(Instruction::Move(MoveOp::LoadOffset {
            dest: reg(&ops[0], line)?,
            addr: reg(&ops[1], line)?,
            offset: reg(&ops[2], line)?,
        })),
        "store" => Ok(Instruction::Move(MoveOp::Store {
            addr: reg(&ops[0], line)?,
            value: reg(&ops[1], line)?,
        })),
        "storeoff" => Ok(Instruction::Move(MoveOp::StoreOffset {
            offset: reg(&ops[0], line)?,
            addr: reg(&ops[1], line)?,
            value: reg(&ops[2], line)?,
        })),
        "memset" => Ok(Instruction::Move(MoveOp::Memset {
            addr: reg(&ops[0], line)?,
            imm: resolve_operand(&ops[1], labels)? as u16,
        })),
        "push" => Ok(Instruction::Move(MoveOp::Push {
            sp: reg(&ops[0], line)?,
            value: reg(&ops[1], line)?,
        })),
        "pushi" => Ok(Instruction::Move(MoveOp::PushImmediate {
            sp: reg(&ops[0], line)?,
            imm: resolve_operand(&ops[1], labels)? as u16,
        })),
        "pop" => Ok(Instruction::Move(MoveOp::Pop {
            sp: reg(&ops[0], line)?,
            dest: reg(&ops[1], line)?,
        })),
        "loadcode" => Ok(Instruction::Move(MoveOp::LoadCode {
            addr: reg(&ops[0], line)?,
            dest_lower: reg(&ops[1], line)?,
            dest_upper: reg(&ops[2], line)?,
        })),
        "storecode" => Ok(Instruction::Move(MoveOp::StoreCode {
            addr: reg(&ops[0], line)?,
            src_lower: reg(&ops[1], line)?,
            src_upper: reg(&ops[2], line)?,
        })),
        "ioread" => Ok(Instruction::Move(MoveOp::IoRead {
            dest: reg(&ops[0], line)?,
            port: reg(&ops[1], line)?,
        })),
        "ioreadoff" => Ok(Instruction::Move(MoveOp::IoReadOffset {
            dest: reg(&ops[0], line)?,
            port: reg(&ops[1], line)?,
            offset: reg(&ops[2], line)?,
        })),
        "iowrite" => Ok(Instruction::Move(MoveOp::IoWrite {
            port: reg(&ops[0], line)?,
            value: reg(&ops[1], line)?,
        })),
        "iowriteoff" => Ok(Instruction::Move(MoveOp::IoWriteOffset {
            offset: reg(&ops[0], line)?,
            port: reg(&ops[1], line)?,
            value: reg(&ops[2], line)?,
        })),
        "movtoip" => Ok(Instruction::Move(MoveOp::MoveToIp {
            src: reg(&ops[0], line)?,
        })),
        "movfromip" => Ok(Instruction::Move(MoveOp::MoveFromIp {
            dest: reg(&ops[0], line)?,
        })),
        "movtolr" => Ok(Instruction::Move(MoveOp::MoveToLr {
            src: reg(&ops[0], line)?,
        })),
        "movfromlr" => Ok(Instruction::Move(MoveOp::MoveFromLr {
            dest: reg(&ops[0], line)?,
        })),
        "crand" => Ok(Instruction::ConditionalRegister(CrOp::And {
            dest: pred(&ops[0], line)?,
            src0: pred(&ops[1], line)?,
            src1: pred(&ops[2], line)?,
        })),
        "cror" => Ok(Instruction::ConditionalRegister(CrOp::Or {
            dest: pred(&ops[0], line)?,
            src0: pred(&ops[1], line)?,
            src1: pred(&ops[2], line)?,
        })),
        "crxor" => Ok(Instruction::ConditionalRegister(CrOp::Xor {
            dest: pred(&ops[0], line)?,
            src0: pred(&ops[1], line)?,
            src1: pred(&ops[2], line)?,
        })),
        "crnor" => Ok(Instruction::ConditionalRegister(CrOp::Nor {
            dest: pred(&ops[0], line)?,
            src0: pred(&ops[1], line)?,
            src1: pred(&ops[2], line)?,
        })),
        "crnand" => Ok(Instruction::ConditionalRegister(CrOp::Nand {
            dest: pred(&ops[0], line)?,
            src0: pred(&ops[1], line)?,
            src1: pred(&ops[2], line)?,
        })),
        "crnot" => Ok(Instruction::ConditionalRegister(CrOp::Not {
            dest: pred(&ops[0], line)?,
            src0: pred(&ops[1], line)?,
        })),
        "crswap" => Ok(Instruction::ConditionalRegister(CrOp::Swap {
            a: pred(&ops[0], line)?,
            b: pred(&ops[1], line)?,
        })),
        "crmov" => Ok(Instruction::ConditionalRegister(CrOp::Move {
            dest: pred(&ops[0], line)?,
            src: pred(&ops[1], line)?,
        })),
        "savecrs" => Ok(Instruction::ConditionalRegister(CrOp::SaveCrs {
            gpr: reg(&ops[0], line)?,
            mask: resolve_operand(&ops[1], labels)? as u16,
        })),
        "restorecrs" => Ok(Instruction::ConditionalRegister(CrOp::RestoreCrs {
            gpr: reg(&ops[0], line)?,
            mask: resolve_operand(&ops[1], labels)? as u16,
        })),
        other => Err(AssembleError::Parse(line.line, 0, format!("unknown mnemonic `{other}`")).log()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_simple_program() {
        let source = "set r0, 2\nset r1, 3\nadd r2, r0, r1\n";
        let records = assemble(source).unwrap();
        assert_eq!(records.len(), 6);
    }

    #[test]
    fn forward_label_reference_resolves() {
        let source = "jmp end\nadd r0, r0, r0\nend:\nset r1, 1\n";
        let records = assemble(source).unwrap();
        assert!(records.iter().any(|r| r.value != 0));
    }

    #[test]
    fn undefined_label_is_an_error() {
        let source = "jmp nowhere\n";
        assert!(matches!(
            assemble(source),
            Err(AssembleError::UndefinedLabel(_))
        ));
    }

    #[test]
    fn unknown_mnemonic_is_a_parse_error() {
        let source = "frobnicate r0\n";
        assert!(matches!(assemble(source), Err(AssembleError::Parse(..))));
    }

    #[test]
    fn offset_and_role_register_mnemonics_assemble() {
        let source = "loadoff r0, r1, r2\nstoreoff r0, r1, r2\nmovtoip r3\nmovfromlr r4\ncrxor p0, p1, p2\n";
        let records = assemble(source).unwrap();
        assert_eq!(records.len(), 10);
    }

    #[test]
    fn parse_error_reports_the_offending_source_line() {
        let source = "add r0, r1, r2\nadd r2, r0, r1\nfrobnicate r0\n";
        match assemble(source) {
            Err(AssembleError::Parse(line, _, _)) => assert_eq!(line, 3),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn missing_operands_is_a_parse_error_not_a_panic() {
        let source = "add r0, r1\n";
        assert!(matches!(assemble(source), Err(AssembleError::Parse(..))));
    }

    #[test]
    fn bare_mnemonic_with_no_operands_is_a_parse_error() {
        let source = "jmp\n";
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

    #[test]
    fn jump_to_a_label_resolves_to_a_dword_cell_index() {
        // Two one-packet (2-word) instructions before the label, so
        // `end` sits at word address 4 — cell index 2. The 16-bit
        // immediate occupies the packet's high word (address + 1).
        let source = "add r0, r0, r0\nadd r0, r0, r0\nend:\njmp end\n";
        let records = assemble(source).unwrap();
        let jmp_high = records
            .iter()
            .find(|r| r.address == 5)
            .expect("jmp's high word should be at word address 5");
        assert_eq!(jmp_high.value, 2);
    }
}
