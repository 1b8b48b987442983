use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;
use crate::dex::families::RegCategory;

pub const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

/// Value types carried by SSA definitions.
///
/// `Unresolved` is the bottom of the lattice used while phi types are being computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DexType {
    Unresolved,
    KnownNull,
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    /// Class type by descriptor, e.g. `Ljava/lang/String;`.
    Object(String),
    Array(Box<DexType>),
}

impl DexType {
    pub fn object() -> DexType {
        DexType::Object(OBJECT_DESCRIPTOR.to_string())
    }

    pub fn from_descriptor(desc: &str) -> Result<DexType, DexError> {
        let t = match desc.as_bytes().first() {
            Some(b'Z') if desc.len() == 1 => DexType::Boolean,
            Some(b'B') if desc.len() == 1 => DexType::Byte,
            Some(b'S') if desc.len() == 1 => DexType::Short,
            Some(b'C') if desc.len() == 1 => DexType::Char,
            Some(b'I') if desc.len() == 1 => DexType::Int,
            Some(b'J') if desc.len() == 1 => DexType::Long,
            Some(b'F') if desc.len() == 1 => DexType::Float,
            Some(b'D') if desc.len() == 1 => DexType::Double,
            Some(b'L') if desc.ends_with(';') && desc.len() > 2 => DexType::Object(desc.to_string()),
            Some(b'[') => DexType::Array(Box::new(DexType::from_descriptor(&desc[1..])?)),
            _ => return Err(DexError::malformed(&format!("bad type descriptor {:?}", desc))),
        };
        Ok(t)
    }

    /// Descriptor for debug info and listings. `None` for the unresolved type.
    pub fn descriptor(&self) -> Option<String> {
        let d = match self {
            DexType::Unresolved => return None,
            DexType::KnownNull => OBJECT_DESCRIPTOR.to_string(),
            DexType::Boolean => "Z".to_string(),
            DexType::Byte => "B".to_string(),
            DexType::Short => "S".to_string(),
            DexType::Char => "C".to_string(),
            DexType::Int => "I".to_string(),
            DexType::Long => "J".to_string(),
            DexType::Float => "F".to_string(),
            DexType::Double => "D".to_string(),
            DexType::Object(desc) => desc.clone(),
            DexType::Array(component) => format!("[{}", component.descriptor()?),
        };
        Some(d)
    }

    pub fn is_resolved(&self) -> bool {
        *self != DexType::Unresolved
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, DexType::KnownNull | DexType::Object(_) | DexType::Array(_))
    }

    /// Types that occupy an int-sized register and merge to `int`.
    pub fn is_int_like(&self) -> bool {
        matches!(self, DexType::Boolean | DexType::Byte | DexType::Short | DexType::Char | DexType::Int)
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, DexType::Long | DexType::Double)
    }

    /// Number of registers a value of this type occupies.
    pub fn category(&self) -> u8 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    pub fn reg_category(&self) -> RegCategory {
        if self.is_wide() {
            RegCategory::Wide
        } else if self.is_reference() {
            RegCategory::Object
        } else {
            RegCategory::Single
        }
    }

    /// Least upper bound of two types.
    ///
    /// Unresolved operands are absorbed, `null` joins any reference, int-like types join
    /// to `int`, and references with different classes join to `java.lang.Object`.
    /// Anything else (say `int` with `float`) is a typing bug upstream.
    pub fn merge(&self, other: &DexType) -> Result<DexType, DexError> {
        if self == other {
            return Ok(self.clone());
        }
        let merged = match (self, other) {
            (DexType::Unresolved, t) | (t, DexType::Unresolved) => t.clone(),
            (DexType::KnownNull, t) | (t, DexType::KnownNull) if t.is_reference() => t.clone(),
            (a, b) if a.is_int_like() && b.is_int_like() => DexType::Int,
            (DexType::Array(a), DexType::Array(b)) => {
                if a.is_reference() && b.is_reference() {
                    DexType::Array(Box::new(a.merge(b)?))
                } else {
                    DexType::object()
                }
            }
            (a, b) if a.is_reference() && b.is_reference() => DexType::object(),
            (a, b) => fail!("cannot merge types {} and {}", a, b),
        };
        Ok(merged)
    }
}

impl fmt::Display for DexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DexType::Unresolved => write!(f, "<unresolved>"),
            DexType::KnownNull => write!(f, "<null>"),
            other => write!(f, "{}", other.descriptor().unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(desc: &str) -> DexType {
        DexType::from_descriptor(desc).expect("descriptor")
    }

    #[test]
    fn descriptors_parse_and_print() {
        for desc in ["I", "J", "Z", "Ljava/lang/String;", "[[I", "[Ljava/lang/Object;"] {
            assert_eq!(t(desc).descriptor().as_deref(), Some(desc));
        }
        assert!(DexType::from_descriptor("Q").is_err());
        assert!(DexType::from_descriptor("Lfoo").is_err());
    }

    #[test]
    fn merge_rules() {
        assert_eq!(t("Z").merge(&t("C")).unwrap(), DexType::Int);
        assert_eq!(DexType::KnownNull.merge(&t("Ljava/lang/String;")).unwrap(), t("Ljava/lang/String;"));
        assert_eq!(t("Ljava/lang/String;").merge(&t("Ljava/lang/Integer;")).unwrap(), DexType::object());
        assert_eq!(t("[Ljava/lang/String;").merge(&t("[Ljava/lang/Integer;")).unwrap(), t("[Ljava/lang/Object;"));
        assert_eq!(t("[I").merge(&t("[J")).unwrap(), DexType::object());
        assert_eq!(DexType::Unresolved.merge(&t("J")).unwrap(), t("J"));
        assert!(t("I").merge(&t("F")).is_err());
        assert!(t("J").merge(&t("Ljava/lang/Object;")).is_err());
    }

    #[test]
    fn categories() {
        assert_eq!(t("J").category(), 2);
        assert_eq!(t("D").reg_category(), RegCategory::Wide);
        assert_eq!(DexType::KnownNull.reg_category(), RegCategory::Object);
        assert_eq!(t("F").reg_category(), RegCategory::Single);
    }
}
