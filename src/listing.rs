//! Smali-style text for instructions.
//!
//! Register lists print one entry per register word, as smali does, and are regrouped
//! into wide operands from the method prototype when parsed back.

use std::fmt;
use std::fmt::Debug;

use nom::branch::alt;
use nom::bytes::complete::{escaped, tag, take_while1};
use nom::character::complete::{char, digit1, none_of, not_line_ending, one_of, space0, space1};
use nom::combinator::{map, map_res, opt};
use nom::multi::separated_list0;
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;

use crate::dex::assembler::PlacedInsn;
use crate::dex::error::DexError;
use crate::dex::families::{InvokeKind, OpFamily};
use crate::dex::format::Format;
use crate::dex::insn::{Constant, Instruction, RegOperand};
use crate::dex::opcodes::{opcode_by_name, Opcode, ReferenceType};

fn is_range(op: &Opcode) -> bool {
    matches!(op.format, Format::Format3rc | Format::Format4rcc)
}

fn hex(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{:#x}", value)
    }
}

/// Opcode the assembler would pick for `insn` once its indices are known.
fn display_opcode(insn: &Instruction) -> Option<&'static Opcode> {
    let mut trial = insn.clone();
    for c in trial.constants.iter_mut().filter(|c| c.resolved().is_none()) {
        c.set_index(0).ok();
    }
    if trial.family.has_branch_target() && trial.branch_offset.is_none() {
        trial.branch_offset = Some(1);
    }
    let candidates = insn.family.candidates();
    candidates.iter().copied().find(|op| op.format.is_compatible(&trial)).or(candidates.last().copied())
}

fn word_list(op: &Opcode, words: &[u32]) -> String {
    match (is_range(op), words.first(), words.last()) {
        (true, Some(first), Some(last)) => format!("{{v{} .. v{}}}", first, last),
        _ => format!("{{{}}}", words.iter().map(|w| format!("v{}", w)).collect::<Vec<_>>().join(", ")),
    }
}

fn write_insn(f: &mut fmt::Formatter<'_>, op: &Opcode, insn: &Instruction) -> fmt::Result {
    let mut parts = Vec::new();
    if insn.family == OpFamily::InvokeLambda {
        if let Some((closure, args)) = insn.registers.split_first() {
            parts.push(format!("v{}", closure.reg));
            let words = Instruction::new(insn.family).with_regs(args.iter().copied()).word_registers();
            parts.push(word_list(op, &words));
        }
    } else if insn.family.takes_register_list() {
        parts.push(word_list(op, &insn.word_registers()));
    } else {
        let skip = usize::from(op.name.ends_with("/2addr"));
        parts.extend(insn.registers.iter().skip(skip).map(|r| format!("v{}", r.reg)));
    }
    parts.extend(insn.constants.iter().map(|c| c.constant().to_string()));
    if let Some(literal) = insn.literal {
        parts.push(hex(literal));
    }
    if let Some(offset) = insn.branch_offset {
        parts.push(format!("{:+}", offset));
    }

    f.write_str(op.name)?;
    if !parts.is_empty() {
        write!(f, " {}", parts.join(", "))?;
    }
    let indices: Vec<String> = insn
        .constants
        .iter()
        .filter_map(|c| c.resolved().map(|i| format!("{}@{}", c.constant().pool_name(), i)))
        .collect();
    if !indices.is_empty() {
        write!(f, "  # {}", indices.join(", "))?;
    }
    Ok(())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match display_opcode(self) {
            Some(op) => write_insn(f, op, self),
            None => write!(f, "{:?}", self.family),
        }
    }
}

impl fmt::Display for PlacedInsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}: ", self.address)?;
        write_insn(f, self.opcode, &self.insn)
    }
}

/// Renders a method body, one instruction per line.
pub fn render(instructions: &[PlacedInsn]) -> String {
    instructions.iter().map(|p| format!("{}\n", p)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Reg(u16),
    Words(Vec<u16>),
    Str(String),
    Number(i64),
    Reference(String),
}

fn parse_register(input: &str) -> IResult<&str, u16> {
    preceded(char('v'), map_res(digit1, str::parse::<u16>))(input)
}

fn parse_register_list(input: &str) -> IResult<&str, Vec<u16>> {
    delimited(
        pair(char('{'), space0),
        separated_list0(delimited(space0, char(','), space0), parse_register),
        pair(space0, char('}')),
    )(input)
}

/// `{v3 .. v6}`, expanded to every word of the range.
fn parse_register_range(input: &str) -> IResult<&str, Vec<u16>> {
    let (input, _) = pair(char('{'), space0)(input)?;
    let (input, start) = parse_register(input)?;
    let (input, _) = delimited(space0, tag(".."), space0)(input)?;
    let (input, end) = parse_register(input)?;
    let (input, _) = pair(space0, char('}'))(input)?;
    if end < start {
        return Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Verify)));
    }
    Ok((input, (start..=end).collect()))
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'u' => {
                let code: String = chars.by_ref().take(4).collect();
                out.push(char::from_u32(u32::from_str_radix(&code, 16).ok()?)?);
            }
            other => out.push(other),
        }
    }
    Some(out)
}

fn parse_string_literal(input: &str) -> IResult<&str, String> {
    let esc = escaped(none_of("\\\""), '\\', one_of("'\"tbnrfu\\"));
    let esc_or_empty = alt((esc, tag("")));
    let (input, raw) = delimited(char('"'), esc_or_empty, char('"'))(input)?;
    match unescape(raw) {
        Some(s) => Ok((input, s)),
        None => Err(nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Escaped))),
    }
}

/// Signed decimal or `0x` hex integer, with an optional `L` suffix.
pub(crate) fn parse_literal_int<T>(input: &str) -> IResult<&str, T>
where
    T: num_traits::Num + std::ops::Neg<Output = T> + TryFrom<i64>,
    <T as TryFrom<i64>>::Error: Debug,
{
    let (input, sign) = opt(one_of("+-"))(input)?;
    let negative = sign == Some('-');
    let failure = |at| nom::Err::Failure(nom::error::Error::new(at, nom::error::ErrorKind::Digit));

    let (input, magnitude) = if input.starts_with("0x") || input.starts_with("0X") {
        let (input, _) = alt((tag("0x"), tag("0X")))(input)?;
        let (input, digits) = take_while1(|c: char| c.is_ascii_hexdigit())(input)?;
        (input, u64::from_str_radix(digits, 16).map_err(|_| failure(input))?)
    } else {
        let (input, digits) = digit1(input)?;
        (input, digits.parse::<u64>().map_err(|_| failure(input))?)
    };
    let (input, _) = opt(char('L'))(input)?;

    let value = match (negative, magnitude) {
        (true, 0x8000_0000_0000_0000) => i64::MIN,
        (true, m) if m <= i64::MAX as u64 => -(m as i64),
        (false, m) if m <= i64::MAX as u64 => m as i64,
        _ => return Err(failure(input)),
    };
    let value = T::try_from(value).map_err(|_| failure(input))?;
    Ok((input, value))
}

fn parse_reference(input: &str) -> IResult<&str, String> {
    map(take_while1(|c: char| c != ',' && c != '#' && !c.is_whitespace()), str::to_string)(input)
}

fn parse_operand(input: &str) -> IResult<&str, Operand> {
    alt((
        map(parse_register_range, Operand::Words),
        map(parse_register_list, Operand::Words),
        map(parse_register, Operand::Reg),
        map(parse_string_literal, Operand::Str),
        map(parse_literal_int::<i64>, Operand::Number),
        map(parse_reference, Operand::Reference),
    ))(input)
}

fn parse_line(input: &str) -> IResult<&str, (&str, Vec<Operand>)> {
    let (input, _) = space0(input)?;
    let (input, name) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '/')(input)?;
    let (input, operands) =
        opt(preceded(space1, separated_list0(delimited(space0, char(','), space0), parse_operand)))(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = opt(pair(char('#'), not_line_ending))(input)?;
    Ok((input, (name, operands.unwrap_or_default())))
}

/// Words per parameter of a `(...)R` prototype.
fn proto_widths(proto: &str) -> Result<Vec<u8>, DexError> {
    let bad = || DexError::malformed(&format!("bad prototype {}", proto));
    let params = proto.strip_prefix('(').and_then(|p| p.split_once(')')).map(|(params, _)| params).ok_or_else(bad)?;
    let mut widths = Vec::new();
    let mut chars = params.chars();
    while let Some(mut c) = chars.next() {
        let mut array = false;
        while c == '[' {
            array = true;
            c = chars.next().ok_or_else(bad)?;
        }
        if c == 'L' {
            chars.by_ref().find(|c| *c == ';').ok_or_else(bad)?;
        }
        widths.push(if !array && (c == 'J' || c == 'D') { 2 } else { 1 });
    }
    Ok(widths)
}

/// Groups a word list back into operands.
fn group_words(family: OpFamily, constants: &[Constant], words: &[u16]) -> Result<Vec<RegOperand>, DexError> {
    let widths: Vec<u8> = match (family, constants) {
        (OpFamily::Invoke(kind), [Constant::Method { proto, .. }, ..]) => {
            let receiver = if kind == InvokeKind::Static { vec![] } else { vec![1] };
            receiver.into_iter().chain(proto_widths(proto)?).collect()
        }
        (OpFamily::InvokePolymorphic, [_, Constant::Proto(proto)]) => {
            std::iter::once(1).chain(proto_widths(proto)?).collect()
        }
        _ => vec![1; words.len()],
    };
    let total: usize = widths.iter().map(|w| *w as usize).sum();
    if total != words.len() {
        return Err(DexError::malformed(&format!("{} register words for {} argument words", words.len(), total)));
    }
    let mut out = Vec::with_capacity(widths.len());
    let mut i = 0;
    for w in widths {
        let reg = words[i];
        if w == 2 && words[i + 1] as u32 != reg as u32 + 1 {
            return Err(DexError::malformed(&format!("wide argument v{} is not followed by v{}", reg, reg as u32 + 1)));
        }
        out.push(RegOperand::new(reg, w));
        i += w as usize;
    }
    Ok(out)
}

fn reference(kind: ReferenceType, text: &str) -> Result<Constant, DexError> {
    let bad = || DexError::malformed(&format!("cannot read {:?} reference {}", kind, text));
    Ok(match kind {
        ReferenceType::Type => Constant::Type(text.to_string()),
        ReferenceType::Field => {
            let (class, rest) = text.split_once("->").ok_or_else(bad)?;
            let (name, descriptor) = rest.split_once(':').ok_or_else(bad)?;
            Constant::Field { class: class.to_string(), name: name.to_string(), descriptor: descriptor.to_string() }
        }
        ReferenceType::Method => {
            let (class, rest) = text.split_once("->").ok_or_else(bad)?;
            let paren = rest.find('(').ok_or_else(bad)?;
            Constant::Method { class: class.to_string(), name: rest[..paren].to_string(), proto: rest[paren..].to_string() }
        }
        ReferenceType::MethodProto => Constant::Proto(text.to_string()),
        ReferenceType::CallSite => Constant::CallSite(text.strip_prefix("call_site@").ok_or_else(bad)?.to_string()),
        ReferenceType::MethodHandle => {
            Constant::MethodHandle(text.strip_prefix("method_handle@").ok_or_else(bad)?.to_string())
        }
        ReferenceType::String | ReferenceType::None => return Err(bad()),
    })
}

/// Parses one instruction of listing text. Pool indices are left unassigned.
pub fn parse_instruction(input: &str) -> Result<Instruction, DexError> {
    let (rest, (name, operands)) =
        parse_line(input).map_err(|e| DexError::malformed(&format!("cannot parse `{}`: {}", input.trim(), e)))?;
    if !rest.trim().is_empty() {
        return Err(DexError::malformed(&format!("unexpected `{}` in `{}`", rest.trim(), input.trim())));
    }
    let (family, op) = match (OpFamily::of_opcode(name), opcode_by_name(name)) {
        (Some(family), Some(op)) => (family, op),
        _ => return Err(DexError::malformed(&format!("unknown opcode {}", name))),
    };
    let kinds = [Some(op.reference_type), op.reference_type2];

    let mut insn = Instruction::new(family);
    let mut plain = Vec::new();
    let mut words = None;
    for operand in operands {
        match operand {
            Operand::Reg(r) => plain.push(r),
            Operand::Words(w) => words = Some(w),
            Operand::Str(s) => insn = insn.with_constant(Constant::String(s)),
            Operand::Number(n) if family.has_branch_target() => insn.branch_offset = Some(n),
            Operand::Number(n) => insn.literal = Some(n),
            Operand::Reference(text) => {
                let kind = kinds.get(insn.constants.len()).copied().flatten().unwrap_or(ReferenceType::None);
                insn = insn.with_constant(reference(kind, &text)?);
            }
        }
    }

    if op.name.ends_with("/2addr") {
        if let Some(first) = plain.first().copied() {
            plain.insert(0, first);
        }
    }
    let widths = family.register_widths(plain.len());
    insn.registers = plain.into_iter().zip(widths).map(|(reg, w)| RegOperand::new(reg, w)).collect();
    if let Some(words) = words {
        let constants: Vec<Constant> = insn.constants.iter().map(|c| c.constant().clone()).collect();
        insn.registers.extend(group_words(family, &constants, &words)?);
    }
    Ok(insn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::families::{BinaryOperation, TestType};

    fn method(class: &str, name: &str, proto: &str) -> Constant {
        Constant::Method { class: class.into(), name: name.into(), proto: proto.into() }
    }

    #[test]
    fn invoke_text() {
        let insn = Instruction::new(OpFamily::Invoke(InvokeKind::Virtual))
            .with_regs([RegOperand::single(0), RegOperand::single(1)])
            .with_constant(method("Lcom/Foo;", "bar", "(I)V"));
        let text = insn.to_string();
        assert_eq!(text, "invoke-virtual {v0, v1}, Lcom/Foo;->bar(I)V");
        assert_eq!(parse_instruction(&text).expect("parse"), insn);
    }

    #[test]
    fn range_regroups_wide_arguments() {
        let insn = parse_instruction("invoke-static/range {v3 .. v6}, LA;->f(JJ)V").expect("parse");
        assert_eq!(insn.family, OpFamily::Invoke(InvokeKind::Static));
        assert_eq!(insn.registers, vec![RegOperand::wide(3), RegOperand::wide(5)]);

        let split = parse_instruction("invoke-static {v3, v5}, LA;->f(J)V").unwrap_err();
        assert!(!split.is_internal());
    }

    #[test]
    fn two_address_forms() {
        let insn = parse_instruction("add-int/2addr v1, v2").expect("parse");
        assert_eq!(insn.registers, vec![RegOperand::single(1), RegOperand::single(1), RegOperand::single(2)]);
        assert_eq!(insn.to_string(), "add-int/2addr v1, v2");

        let three = Instruction::new(OpFamily::Binary(BinaryOperation::AddLong))
            .with_regs([RegOperand::wide(0), RegOperand::wide(2), RegOperand::wide(4)]);
        assert_eq!(three.to_string(), "add-long v0, v2, v4");
        assert_eq!(parse_instruction("add-long v0, v2, v4").expect("parse"), three);
    }

    #[test]
    fn literals_and_offsets() {
        let c = parse_instruction("const/16 v0, -0x8000").expect("parse");
        assert_eq!(c.literal, Some(-32768));
        assert_eq!(c.to_string(), "const/16 v0, -0x8000");

        let branch = Instruction::new(OpFamily::IfZ(TestType::Equal)).with_reg(RegOperand::single(0)).with_offset(4);
        assert_eq!(branch.to_string(), "if-eqz v0, +4");
        assert_eq!(parse_instruction("if-eqz v0, +4").expect("parse"), branch);
        assert_eq!(parse_instruction("goto -1").expect("parse").branch_offset, Some(-1));
    }

    #[test]
    fn strings_and_index_comments() {
        let mut insn = Instruction::new(OpFamily::ConstString)
            .with_reg(RegOperand::single(0))
            .with_constant(Constant::String("a\"b\n".into()));
        insn.constants[0].set_index(7).expect("index");
        let text = insn.to_string();
        assert_eq!(text, "const-string v0, \"a\\\"b\\n\"  # string@7");
        let parsed = parse_instruction(&text).expect("parse");
        assert_eq!(parsed.constants[0].constant(), &Constant::String("a\"b\n".into()));
        assert_eq!(parsed.constants[0].resolved(), None);
    }

    #[test]
    fn field_and_type_references() {
        let insn = parse_instruction("iget-wide v2, v0, LFoo;->count:J").expect("parse");
        assert_eq!(insn.registers, vec![RegOperand::wide(2), RegOperand::single(0)]);
        assert_eq!(
            insn.constants[0].constant(),
            &Constant::Field { class: "LFoo;".into(), name: "count".into(), descriptor: "J".into() }
        );
        let cast = parse_instruction("check-cast v1, [Ljava/lang/String;").expect("parse");
        assert_eq!(cast.constants[0].constant(), &Constant::Type("[Ljava/lang/String;".into()));
    }

    #[test]
    fn polymorphic_uses_the_call_prototype() {
        let insn = parse_instruction(
            "invoke-polymorphic {v0, v1, v2}, Ljava/lang/invoke/MethodHandle;->invoke([Ljava/lang/Object;)Ljava/lang/Object;, (J)V",
        )
        .expect("parse");
        assert_eq!(insn.registers, vec![RegOperand::single(0), RegOperand::wide(1)]);
        assert_eq!(insn.constants[1].constant(), &Constant::Proto("(J)V".into()));
    }

    #[test]
    fn bad_text_is_malformed() {
        for text in ["frobnicate v0", "const/4 v0, 0x1 junk", "invoke-static {v1 .. v0}, LA;->f()V"] {
            let e = parse_instruction(text).unwrap_err();
            assert!(!e.is_internal(), "{}", text);
        }
    }

    #[test]
    fn prototype_widths() {
        assert_eq!(proto_widths("(IJ[DLjava/lang/String;[[Lfoo;D)V").expect("proto"), vec![1, 2, 1, 1, 1, 2]);
    }
}
