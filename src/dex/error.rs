use std::fmt;

macro_rules! err {
    ($base:ident, $msg:literal) => {
        DexError::with_context($base, $msg.to_string())
    };
    ($base:ident, $fmtstr:literal, $($args:tt)*) => {
        DexError::with_context($base, format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        DexError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        DexError::new(&format!($fmtstr, $($args)*))
    };
}

#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err(DexError::new($msg))
    };
    (($msg:literal), ($context:literal)) => {
        return Err(DexError::with_context(DexError::new($msg), $context.to_string()))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::new(&format!($fmtstr, $($args)*)))
    };
    (($fmtstr:literal, $($args:tt)*), ($contextfmt:literal, $($contextargs:tt)*)) => {
        return Err(DexError::with_context(DexError::new(&format!($fmtstr, $($args)*)), format!($contextfmt, $($contextargs)*)))
    };
}

/// The limit an instruction ran into when no candidate format could hold it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverflowLimit
{
    Register { register: u32 },
    PoolIndex { index: u32 },
    RegisterRange { first: u16, words: usize },
    BranchOffset { offset: i64 },
    Literal { value: i64 },
}

/// Structured diagnostic for programs that exceed the instruction set's addressing capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityOverflow
{
    pub opcode: String,
    pub limit: OverflowLimit,
}

impl fmt::Display for CapacityOverflow
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match &self.limit
        {
            OverflowLimit::Register { register } => {
                write!(f, "{}: register v{} is beyond every available format", self.opcode, register)
            }
            OverflowLimit::PoolIndex { index } => {
                write!(f, "{}: pool index 0x{:x} does not fit the index width", self.opcode, index)
            }
            OverflowLimit::RegisterRange { first, words } => {
                write!(f, "{}: register range v{} with {} words cannot be encoded", self.opcode, first, words)
            }
            OverflowLimit::BranchOffset { offset } => {
                write!(f, "{}: branch offset {} is out of range", self.opcode, offset)
            }
            OverflowLimit::Literal { value } => {
                write!(f, "{}: literal {} does not fit", self.opcode, value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DexErrorKind
{
    /// Contract violation inside the compiler (bad pass ordering, malformed CFG, ...).
    Internal,
    /// Inconsistent external data: truncated code units, unparsable listing text.
    Malformed,
    CapacityOverflow(CapacityOverflow),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DexError
{
    kind: DexErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub fn new(msg: &str) -> Self
    {
        DexError {
            kind: DexErrorKind::Internal,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub fn malformed(msg: &str) -> Self
    {
        DexError {
            kind: DexErrorKind::Malformed,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn capacity(overflow: CapacityOverflow) -> Self
    {
        DexError {
            msg: overflow.to_string(),
            kind: DexErrorKind::CapacityOverflow(overflow),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn with_context(base: DexError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        DexError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> &DexErrorKind
    {
        &self.kind
    }

    pub fn is_internal(&self) -> bool
    {
        self.kind == DexErrorKind::Internal
    }

    pub fn is_capacity_overflow(&self) -> bool
    {
        matches!(self.kind, DexErrorKind::CapacityOverflow(_))
    }

    /// The overflow diagnostic, when this error is one.
    pub fn overflow(&self) -> Option<&CapacityOverflow>
    {
        match &self.kind
        {
            DexErrorKind::CapacityOverflow(o) => Some(o),
            _ => None,
        }
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}
