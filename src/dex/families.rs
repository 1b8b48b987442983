//! Operation families: one logical Dalvik operation, many concrete encodings.
//!
//! A family lists its opcodes from most compact to widest. Format selection walks that
//! list and takes the first encoding that can hold the operands.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::dex::opcodes::{opcode_by_name, Opcode};

/// Register kind, picks between the plain, `-wide` and `-object` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegCategory {
    Single,
    Wide,
    Object,
}

impl RegCategory {
    const ALL: [RegCategory; 3] = [RegCategory::Single, RegCategory::Wide, RegCategory::Object];

    fn suffix(&self) -> &'static str {
        match self {
            RegCategory::Single => "",
            RegCategory::Wide => "-wide",
            RegCategory::Object => "-object",
        }
    }

    pub fn width(&self) -> u8 {
        if *self == RegCategory::Wide {
            2
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompareType {
    LessThanFloat,
    GreaterThanFloat,
    LessThanDouble,
    GreaterThanDouble,
    Long,
}

impl CompareType {
    const ALL: [CompareType; 5] = [
        CompareType::LessThanFloat,
        CompareType::GreaterThanFloat,
        CompareType::LessThanDouble,
        CompareType::GreaterThanDouble,
        CompareType::Long,
    ];
}

impl fmt::Display for CompareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareType::LessThanFloat => "cmpl-float",
            CompareType::GreaterThanFloat => "cmpg-float",
            CompareType::LessThanDouble => "cmpl-double",
            CompareType::GreaterThanDouble => "cmpg-double",
            CompareType::Long => "cmp-long",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TestType {
    Equal,
    NotEqual,
    LessThan,
    GreaterThanOrEqual,
    GreaterThan,
    LessThanOrEqual,
}

impl TestType {
    const ALL: [TestType; 6] = [
        TestType::Equal,
        TestType::NotEqual,
        TestType::LessThan,
        TestType::GreaterThanOrEqual,
        TestType::GreaterThan,
        TestType::LessThanOrEqual,
    ];
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestType::Equal => "eq",
            TestType::NotEqual => "ne",
            TestType::LessThan => "lt",
            TestType::GreaterThanOrEqual => "ge",
            TestType::GreaterThan => "gt",
            TestType::LessThanOrEqual => "le",
        };
        f.write_str(s)
    }
}

/// Element access for arrays, instance fields and static fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArrayOperation {
    Get,
    GetWide,
    GetObject,
    GetBoolean,
    GetByte,
    GetChar,
    GetShort,
    Put,
    PutWide,
    PutObject,
    PutBoolean,
    PutByte,
    PutChar,
    PutShort,
}

impl ArrayOperation {
    const ALL: [ArrayOperation; 14] = [
        ArrayOperation::Get,
        ArrayOperation::GetWide,
        ArrayOperation::GetObject,
        ArrayOperation::GetBoolean,
        ArrayOperation::GetByte,
        ArrayOperation::GetChar,
        ArrayOperation::GetShort,
        ArrayOperation::Put,
        ArrayOperation::PutWide,
        ArrayOperation::PutObject,
        ArrayOperation::PutBoolean,
        ArrayOperation::PutByte,
        ArrayOperation::PutChar,
        ArrayOperation::PutShort,
    ];

    pub fn is_get(&self) -> bool {
        matches!(
            self,
            ArrayOperation::Get
                | ArrayOperation::GetWide
                | ArrayOperation::GetObject
                | ArrayOperation::GetBoolean
                | ArrayOperation::GetByte
                | ArrayOperation::GetChar
                | ArrayOperation::GetShort
        )
    }
}

impl fmt::Display for ArrayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArrayOperation::Get => "get",
            ArrayOperation::GetWide => "get-wide",
            ArrayOperation::GetObject => "get-object",
            ArrayOperation::GetBoolean => "get-boolean",
            ArrayOperation::GetByte => "get-byte",
            ArrayOperation::GetChar => "get-char",
            ArrayOperation::GetShort => "get-short",
            ArrayOperation::Put => "put",
            ArrayOperation::PutWide => "put-wide",
            ArrayOperation::PutObject => "put-object",
            ArrayOperation::PutBoolean => "put-boolean",
            ArrayOperation::PutByte => "put-byte",
            ArrayOperation::PutChar => "put-char",
            ArrayOperation::PutShort => "put-short",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

impl InvokeKind {
    const ALL: [InvokeKind; 5] =
        [InvokeKind::Virtual, InvokeKind::Super, InvokeKind::Direct, InvokeKind::Static, InvokeKind::Interface];
}

impl fmt::Display for InvokeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvokeKind::Virtual => "virtual",
            InvokeKind::Super => "super",
            InvokeKind::Direct => "direct",
            InvokeKind::Static => "static",
            InvokeKind::Interface => "interface",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UnaryOperation {
    NegInt,
    NotInt,
    NegLong,
    NotLong,
    NegFloat,
    NegDouble,
    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToInt,
    LongToFloat,
    LongToDouble,
    FloatToInt,
    FloatToLong,
    FloatToDouble,
    DoubleToInt,
    DoubleToLong,
    DoubleToFloat,
    IntToByte,
    IntToChar,
    IntToShort,
}

impl UnaryOperation {
    const ALL: [UnaryOperation; 21] = [
        UnaryOperation::NegInt,
        UnaryOperation::NotInt,
        UnaryOperation::NegLong,
        UnaryOperation::NotLong,
        UnaryOperation::NegFloat,
        UnaryOperation::NegDouble,
        UnaryOperation::IntToLong,
        UnaryOperation::IntToFloat,
        UnaryOperation::IntToDouble,
        UnaryOperation::LongToInt,
        UnaryOperation::LongToFloat,
        UnaryOperation::LongToDouble,
        UnaryOperation::FloatToInt,
        UnaryOperation::FloatToLong,
        UnaryOperation::FloatToDouble,
        UnaryOperation::DoubleToInt,
        UnaryOperation::DoubleToLong,
        UnaryOperation::DoubleToFloat,
        UnaryOperation::IntToByte,
        UnaryOperation::IntToChar,
        UnaryOperation::IntToShort,
    ];
}

impl fmt::Display for UnaryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOperation::NegInt => "neg-int",
            UnaryOperation::NotInt => "not-int",
            UnaryOperation::NegLong => "neg-long",
            UnaryOperation::NotLong => "not-long",
            UnaryOperation::NegFloat => "neg-float",
            UnaryOperation::NegDouble => "neg-double",
            UnaryOperation::IntToLong => "int-to-long",
            UnaryOperation::IntToFloat => "int-to-float",
            UnaryOperation::IntToDouble => "int-to-double",
            UnaryOperation::LongToInt => "long-to-int",
            UnaryOperation::LongToFloat => "long-to-float",
            UnaryOperation::LongToDouble => "long-to-double",
            UnaryOperation::FloatToInt => "float-to-int",
            UnaryOperation::FloatToLong => "float-to-long",
            UnaryOperation::FloatToDouble => "float-to-double",
            UnaryOperation::DoubleToInt => "double-to-int",
            UnaryOperation::DoubleToLong => "double-to-long",
            UnaryOperation::DoubleToFloat => "double-to-float",
            UnaryOperation::IntToByte => "int-to-byte",
            UnaryOperation::IntToChar => "int-to-char",
            UnaryOperation::IntToShort => "int-to-short",
        };
        f.write_str(s)
    }
}

/// Binary arithmetic. Literal forms only exist for the int operations, and `SubInt`
/// with a literal is the reverse subtract `rsub-int`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinaryOperation {
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    RemInt,
    AndInt,
    OrInt,
    XorInt,
    ShlInt,
    ShrInt,
    UshrInt,
    AddLong,
    SubLong,
    MulLong,
    DivLong,
    RemLong,
    AndLong,
    OrLong,
    XorLong,
    ShlLong,
    ShrLong,
    UshrLong,
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    RemFloat,
    AddDouble,
    SubDouble,
    MulDouble,
    DivDouble,
    RemDouble,
}

impl BinaryOperation {
    const ALL: [BinaryOperation; 32] = [
        BinaryOperation::AddInt,
        BinaryOperation::SubInt,
        BinaryOperation::MulInt,
        BinaryOperation::DivInt,
        BinaryOperation::RemInt,
        BinaryOperation::AndInt,
        BinaryOperation::OrInt,
        BinaryOperation::XorInt,
        BinaryOperation::ShlInt,
        BinaryOperation::ShrInt,
        BinaryOperation::UshrInt,
        BinaryOperation::AddLong,
        BinaryOperation::SubLong,
        BinaryOperation::MulLong,
        BinaryOperation::DivLong,
        BinaryOperation::RemLong,
        BinaryOperation::AndLong,
        BinaryOperation::OrLong,
        BinaryOperation::XorLong,
        BinaryOperation::ShlLong,
        BinaryOperation::ShrLong,
        BinaryOperation::UshrLong,
        BinaryOperation::AddFloat,
        BinaryOperation::SubFloat,
        BinaryOperation::MulFloat,
        BinaryOperation::DivFloat,
        BinaryOperation::RemFloat,
        BinaryOperation::AddDouble,
        BinaryOperation::SubDouble,
        BinaryOperation::MulDouble,
        BinaryOperation::DivDouble,
        BinaryOperation::RemDouble,
    ];

    /// Name used by the `/lit8` and `/lit16` forms.
    fn literal_name(&self) -> String {
        match self {
            BinaryOperation::SubInt => "rsub-int".to_string(),
            other => other.to_string(),
        }
    }

    fn is_int(&self) -> bool {
        matches!(
            self,
            BinaryOperation::AddInt
                | BinaryOperation::SubInt
                | BinaryOperation::MulInt
                | BinaryOperation::DivInt
                | BinaryOperation::RemInt
                | BinaryOperation::AndInt
                | BinaryOperation::OrInt
                | BinaryOperation::XorInt
                | BinaryOperation::ShlInt
                | BinaryOperation::ShrInt
                | BinaryOperation::UshrInt
        )
    }

    fn is_shift(&self) -> bool {
        matches!(self, BinaryOperation::ShlInt | BinaryOperation::ShrInt | BinaryOperation::UshrInt)
    }
}

impl fmt::Display for BinaryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperation::AddInt => "add-int",
            BinaryOperation::SubInt => "sub-int",
            BinaryOperation::MulInt => "mul-int",
            BinaryOperation::DivInt => "div-int",
            BinaryOperation::RemInt => "rem-int",
            BinaryOperation::AndInt => "and-int",
            BinaryOperation::OrInt => "or-int",
            BinaryOperation::XorInt => "xor-int",
            BinaryOperation::ShlInt => "shl-int",
            BinaryOperation::ShrInt => "shr-int",
            BinaryOperation::UshrInt => "ushr-int",
            BinaryOperation::AddLong => "add-long",
            BinaryOperation::SubLong => "sub-long",
            BinaryOperation::MulLong => "mul-long",
            BinaryOperation::DivLong => "div-long",
            BinaryOperation::RemLong => "rem-long",
            BinaryOperation::AndLong => "and-long",
            BinaryOperation::OrLong => "or-long",
            BinaryOperation::XorLong => "xor-long",
            BinaryOperation::ShlLong => "shl-long",
            BinaryOperation::ShrLong => "shr-long",
            BinaryOperation::UshrLong => "ushr-long",
            BinaryOperation::AddFloat => "add-float",
            BinaryOperation::SubFloat => "sub-float",
            BinaryOperation::MulFloat => "mul-float",
            BinaryOperation::DivFloat => "div-float",
            BinaryOperation::RemFloat => "rem-float",
            BinaryOperation::AddDouble => "add-double",
            BinaryOperation::SubDouble => "sub-double",
            BinaryOperation::MulDouble => "mul-double",
            BinaryOperation::DivDouble => "div-double",
            BinaryOperation::RemDouble => "rem-double",
        };
        f.write_str(s)
    }
}

/// A logical Dalvik operation, independent of operand widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OpFamily {
    Nop,
    Move(RegCategory),
    MoveResult(RegCategory),
    MoveException,
    ReturnVoid,
    Return(RegCategory),
    Const,
    ConstWide,
    ConstString,
    ConstClass,
    ConstMethodHandle,
    ConstMethodType,
    MonitorEnter,
    MonitorExit,
    CheckCast,
    InstanceOf,
    ArrayLength,
    NewInstance,
    NewArray,
    FilledNewArray,
    FillArrayData,
    Throw,
    Goto,
    PackedSwitch,
    SparseSwitch,
    Compare(CompareType),
    If(TestType),
    IfZ(TestType),
    Array(ArrayOperation),
    Instance(ArrayOperation),
    Static(ArrayOperation),
    Invoke(InvokeKind),
    Unary(UnaryOperation),
    Binary(BinaryOperation),
    BinaryLit(BinaryOperation),
    InvokePolymorphic,
    InvokeCustom,
    InvokeLambda,
}

static CANDIDATES: Lazy<HashMap<OpFamily, Vec<&'static Opcode>>> = Lazy::new(|| {
    OpFamily::all()
        .into_iter()
        .map(|family| {
            let ops = family.candidate_names().iter().filter_map(|n| opcode_by_name(n)).collect();
            (family, ops)
        })
        .collect()
});

static FAMILY_BY_OPCODE: Lazy<HashMap<&'static str, OpFamily>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for family in OpFamily::all() {
        for op in family.candidates() {
            map.insert(op.name, family);
        }
    }
    map
});

impl OpFamily {
    /// Every family, in a stable order.
    pub fn all() -> Vec<OpFamily> {
        let mut all = vec![
            OpFamily::Nop,
            OpFamily::MoveException,
            OpFamily::ReturnVoid,
            OpFamily::Const,
            OpFamily::ConstWide,
            OpFamily::ConstString,
            OpFamily::ConstClass,
            OpFamily::ConstMethodHandle,
            OpFamily::ConstMethodType,
            OpFamily::MonitorEnter,
            OpFamily::MonitorExit,
            OpFamily::CheckCast,
            OpFamily::InstanceOf,
            OpFamily::ArrayLength,
            OpFamily::NewInstance,
            OpFamily::NewArray,
            OpFamily::FilledNewArray,
            OpFamily::FillArrayData,
            OpFamily::Throw,
            OpFamily::Goto,
            OpFamily::PackedSwitch,
            OpFamily::SparseSwitch,
            OpFamily::InvokePolymorphic,
            OpFamily::InvokeCustom,
            OpFamily::InvokeLambda,
        ];
        for c in RegCategory::ALL {
            all.extend([OpFamily::Move(c), OpFamily::MoveResult(c), OpFamily::Return(c)]);
        }
        all.extend(CompareType::ALL.map(OpFamily::Compare));
        all.extend(TestType::ALL.map(OpFamily::If));
        all.extend(TestType::ALL.map(OpFamily::IfZ));
        for op in ArrayOperation::ALL {
            all.extend([OpFamily::Array(op), OpFamily::Instance(op), OpFamily::Static(op)]);
        }
        all.extend(InvokeKind::ALL.map(OpFamily::Invoke));
        all.extend(UnaryOperation::ALL.map(OpFamily::Unary));
        all.extend(BinaryOperation::ALL.map(OpFamily::Binary));
        all.extend(BinaryOperation::ALL.iter().filter(|b| b.is_int()).map(|b| OpFamily::BinaryLit(*b)));
        all
    }

    /// The family a concrete opcode belongs to.
    pub fn of_opcode(name: &str) -> Option<OpFamily> {
        FAMILY_BY_OPCODE.get(name).copied()
    }

    fn candidate_names(&self) -> Vec<String> {
        let names: Vec<String> = match self {
            OpFamily::Nop => vec!["nop".into()],
            OpFamily::Move(c) => {
                let base = format!("move{}", c.suffix());
                vec![base.clone(), format!("{}/from16", base), format!("{}/16", base)]
            }
            OpFamily::MoveResult(c) => vec![format!("move-result{}", c.suffix())],
            OpFamily::MoveException => vec!["move-exception".into()],
            OpFamily::ReturnVoid => vec!["return-void".into()],
            OpFamily::Return(c) => vec![format!("return{}", c.suffix())],
            OpFamily::Const => vec!["const/4".into(), "const/16".into(), "const/high16".into(), "const".into()],
            OpFamily::ConstWide => vec![
                "const-wide/16".into(),
                "const-wide/high16".into(),
                "const-wide/32".into(),
                "const-wide".into(),
            ],
            OpFamily::ConstString => vec!["const-string".into(), "const-string/jumbo".into()],
            OpFamily::ConstClass => vec!["const-class".into()],
            OpFamily::ConstMethodHandle => vec!["const-method-handle".into()],
            OpFamily::ConstMethodType => vec!["const-method-type".into()],
            OpFamily::MonitorEnter => vec!["monitor-enter".into()],
            OpFamily::MonitorExit => vec!["monitor-exit".into()],
            OpFamily::CheckCast => vec!["check-cast".into()],
            OpFamily::InstanceOf => vec!["instance-of".into()],
            OpFamily::ArrayLength => vec!["array-length".into()],
            OpFamily::NewInstance => vec!["new-instance".into()],
            OpFamily::NewArray => vec!["new-array".into()],
            OpFamily::FilledNewArray => vec!["filled-new-array".into(), "filled-new-array/range".into()],
            OpFamily::FillArrayData => vec!["fill-array-data".into()],
            OpFamily::Throw => vec!["throw".into()],
            OpFamily::Goto => vec!["goto".into(), "goto/16".into(), "goto/32".into()],
            OpFamily::PackedSwitch => vec!["packed-switch".into()],
            OpFamily::SparseSwitch => vec!["sparse-switch".into()],
            OpFamily::Compare(t) => vec![t.to_string()],
            OpFamily::If(t) => vec![format!("if-{}", t)],
            OpFamily::IfZ(t) => vec![format!("if-{}z", t)],
            OpFamily::Array(op) => vec![format!("a{}", op)],
            OpFamily::Instance(op) => vec![format!("i{}", op)],
            OpFamily::Static(op) => vec![format!("s{}", op)],
            OpFamily::Invoke(k) => vec![format!("invoke-{}", k), format!("invoke-{}/range", k)],
            OpFamily::Unary(op) => vec![op.to_string()],
            OpFamily::Binary(op) => vec![format!("{}/2addr", op), op.to_string()],
            OpFamily::BinaryLit(op) => {
                let mut names = vec![format!("{}/lit8", op.literal_name())];
                if !op.is_shift() {
                    names.push(match op {
                        BinaryOperation::SubInt => op.literal_name(),
                        _ => format!("{}/lit16", op),
                    });
                }
                names
            }
            OpFamily::InvokePolymorphic => vec!["invoke-polymorphic".into(), "invoke-polymorphic/range".into()],
            OpFamily::InvokeCustom => vec!["invoke-custom".into(), "invoke-custom/range".into()],
            OpFamily::InvokeLambda => vec!["invoke-lambda".into()],
        };
        names
    }

    /// Concrete opcodes for this family, most compact first.
    pub fn candidates(&self) -> &'static [&'static Opcode] {
        CANDIDATES.get(self).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Name of the family, which is the name of its most compact opcode.
    pub fn name(&self) -> &'static str {
        self.candidates().first().map(|o| o.name).unwrap_or("<unknown>")
    }

    pub fn can_throw(&self) -> bool {
        self.candidates().first().is_some_and(|o| o.can_throw())
    }

    pub fn can_continue(&self) -> bool {
        self.candidates().first().map_or(true, |o| o.can_continue())
    }

    /// Takes a code-address target (a block or a payload).
    pub fn has_branch_target(&self) -> bool {
        matches!(
            self,
            OpFamily::Goto
                | OpFamily::If(_)
                | OpFamily::IfZ(_)
                | OpFamily::PackedSwitch
                | OpFamily::SparseSwitch
                | OpFamily::FillArrayData
        )
    }

    /// Operates on a register list and sends its words as outgoing arguments.
    pub fn is_invoke(&self) -> bool {
        matches!(
            self,
            OpFamily::Invoke(_) | OpFamily::InvokePolymorphic | OpFamily::InvokeCustom | OpFamily::InvokeLambda
        )
    }

    /// Register list families (35c/3rc shaped).
    pub fn takes_register_list(&self) -> bool {
        self.is_invoke() || *self == OpFamily::FilledNewArray
    }

    /// Width in words of each of the first `count` fixed register operands.
    ///
    /// Register lists are not covered; their widths come from the method prototype.
    pub fn register_widths(&self, count: usize) -> Vec<u8> {
        let known: Vec<u8> = match self {
            OpFamily::Move(RegCategory::Wide) | OpFamily::MoveResult(RegCategory::Wide) | OpFamily::Return(RegCategory::Wide) => {
                vec![2; count]
            }
            OpFamily::ConstWide => vec![2],
            OpFamily::Array(op) | OpFamily::Instance(op) | OpFamily::Static(op)
                if matches!(op, ArrayOperation::GetWide | ArrayOperation::PutWide) =>
            {
                vec![2]
            }
            OpFamily::Compare(CompareType::Long | CompareType::LessThanDouble | CompareType::GreaterThanDouble) => {
                vec![1, 2, 2]
            }
            OpFamily::Binary(op) => op.widths().to_vec(),
            OpFamily::Unary(op) => op.widths().to_vec(),
            _ => vec![],
        };
        (0..count).map(|i| known.get(i).copied().unwrap_or(1)).collect()
    }
}

impl UnaryOperation {
    /// Widths of the destination and source registers.
    pub fn widths(&self) -> [u8; 2] {
        use UnaryOperation::*;
        match self {
            NegLong | NotLong | NegDouble | LongToDouble | DoubleToLong => [2, 2],
            IntToLong | IntToDouble | FloatToLong | FloatToDouble => [2, 1],
            LongToInt | LongToFloat | DoubleToInt | DoubleToFloat => [1, 2],
            _ => [1, 1],
        }
    }
}

impl BinaryOperation {
    /// Widths of the destination and both sources.
    pub fn widths(&self) -> [u8; 3] {
        use BinaryOperation::*;
        match self {
            ShlLong | ShrLong | UshrLong => [2, 2, 1],
            AddLong | SubLong | MulLong | DivLong | RemLong | AndLong | OrLong | XorLong => [2, 2, 2],
            AddDouble | SubDouble | MulDouble | DivDouble | RemDouble => [2, 2, 2],
            _ => [1, 1, 1],
        }
    }
}

impl fmt::Display for OpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(family: OpFamily) -> Vec<&'static str> {
        family.candidates().iter().map(|o| o.name).collect()
    }

    #[test]
    fn every_family_has_candidates() {
        for family in OpFamily::all() {
            assert!(!family.candidates().is_empty(), "{:?} has no opcodes", family);
        }
    }

    #[test]
    fn candidate_order_is_compact_first() {
        assert_eq!(names(OpFamily::Move(RegCategory::Wide)), ["move-wide", "move-wide/from16", "move-wide/16"]);
        assert_eq!(names(OpFamily::Goto), ["goto", "goto/16", "goto/32"]);
        assert_eq!(names(OpFamily::Binary(BinaryOperation::XorLong)), ["xor-long/2addr", "xor-long"]);
        assert_eq!(names(OpFamily::BinaryLit(BinaryOperation::SubInt)), ["rsub-int/lit8", "rsub-int"]);
        assert_eq!(names(OpFamily::BinaryLit(BinaryOperation::ShlInt)), ["shl-int/lit8"]);
        assert_eq!(names(OpFamily::Instance(ArrayOperation::PutObject)), ["iput-object"]);
    }

    #[test]
    fn opcode_maps_back_to_family() {
        assert_eq!(OpFamily::of_opcode("move-object/16"), Some(OpFamily::Move(RegCategory::Object)));
        assert_eq!(OpFamily::of_opcode("invoke-static/range"), Some(OpFamily::Invoke(InvokeKind::Static)));
        assert_eq!(OpFamily::of_opcode("if-gez"), Some(OpFamily::IfZ(TestType::GreaterThanOrEqual)));
        assert_eq!(OpFamily::of_opcode("rsub-int"), Some(OpFamily::BinaryLit(BinaryOperation::SubInt)));
        assert_eq!(OpFamily::of_opcode("bogus"), None);
    }

    #[test]
    fn throwing_and_branching() {
        assert!(OpFamily::Invoke(InvokeKind::Virtual).can_throw());
        assert!(OpFamily::Binary(BinaryOperation::DivInt).can_throw());
        assert!(!OpFamily::Binary(BinaryOperation::AddInt).can_throw());
        assert!(!OpFamily::Goto.can_continue());
        assert!(OpFamily::IfZ(TestType::Equal).has_branch_target());
    }

    #[test]
    fn operand_widths() {
        assert_eq!(OpFamily::Binary(BinaryOperation::ShlLong).register_widths(3), [2, 2, 1]);
        assert_eq!(OpFamily::Unary(UnaryOperation::LongToInt).register_widths(2), [1, 2]);
        assert_eq!(OpFamily::Instance(ArrayOperation::PutWide).register_widths(2), [2, 1]);
        assert_eq!(OpFamily::Compare(CompareType::LessThanFloat).register_widths(3), [1, 1, 1]);
    }
}
