use std::collections::HashMap;
use std::ops::RangeInclusive;

use bitflags::bitflags;
use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;

use crate::dex::format::Format;

/// Kind of pool constant an opcode refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodProto,
    MethodHandle,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const CAN_CONTINUE = 0x4;
        const SETS_RESULT = 0x8;
        const SETS_REGISTER = 0x10;
        const SETS_WIDE_REGISTER = 0x20;
        const STATIC_FIELD_ACCESSOR = 0x100;
        /// Only emitted when experimental opcodes are enabled.
        const EXPERIMENTAL = 0x800;
    }
}

/// An opcode with its encoding and the API/ART versions it exists in.
#[derive(Debug)]
pub struct Opcode {
    pub name: &'static str,
    pub reference_type: ReferenceType,
    pub reference_type2: Option<ReferenceType>,
    pub format: Format,
    pub flags: OpcodeFlags,
    pub api_to_value_map: RangeInclusiveMap<i32, u16>,
    pub art_version_to_value_map: RangeInclusiveMap<i32, u16>,
}

/// API and ART version ranges along with the opcode value used in them.
pub struct VersionConstraint {
    pub api_range: Option<RangeInclusive<i32>>,
    pub art_version_range: Option<RangeInclusive<i32>>,
    pub opcode_value: u16,
}

impl Opcode {
    pub(crate) fn new(
        version_constraints: Vec<VersionConstraint>,
        name: &'static str,
        reference_type: ReferenceType,
        reference_type2: Option<ReferenceType>,
        format: Format,
        flags: OpcodeFlags,
    ) -> Self {
        let mut api_to_value_map = RangeInclusiveMap::new();
        let mut art_version_to_value_map = RangeInclusiveMap::new();

        for vc in version_constraints.iter() {
            if let Some(api_range) = &vc.api_range {
                if !api_range.is_empty() {
                    api_to_value_map.insert(api_range.clone(), vc.opcode_value);
                }
            }
            if let Some(art_range) = &vc.art_version_range {
                if !art_range.is_empty() {
                    art_version_to_value_map.insert(art_range.clone(), vc.opcode_value);
                }
            }
        }

        Opcode {
            name,
            reference_type,
            reference_type2,
            format,
            flags,
            api_to_value_map,
            art_version_to_value_map,
        }
    }

    pub(crate) fn first_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: Some(api..=i32::MAX),
            art_version_range: None,
            opcode_value,
        }]
    }

    pub(crate) fn all_versions(opcode_value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: Some(i32::MIN..=i32::MAX),
            art_version_range: Some(i32::MIN..=i32::MAX),
            opcode_value,
        }]
    }

    pub(crate) fn all_art_versions(opcode_value: u16) -> Vec<VersionConstraint> {
        vec![VersionConstraint {
            api_range: None,
            art_version_range: Some(i32::MIN..=i32::MAX),
            opcode_value,
        }]
    }

    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    /// Determines if execution can continue to the next instruction.
    pub fn can_continue(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_CONTINUE)
    }

    /// Determines if the opcode sets the "hidden" result register.
    pub fn sets_result(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_RESULT)
    }

    pub fn sets_wide_register(&self) -> bool {
        self.flags.contains(OpcodeFlags::SETS_WIDE_REGISTER)
    }

    pub fn is_static_field_accessor(&self) -> bool {
        self.flags.contains(OpcodeFlags::STATIC_FIELD_ACCESSOR)
    }

    pub fn is_experimental(&self) -> bool {
        self.flags.contains(OpcodeFlags::EXPERIMENTAL)
    }

    /// Retrieves the opcode value based on API and ART version.
    pub fn get_opcode_value(&self, api: i32, art_version: i32) -> Option<u16> {
        // Priority: API mapping first, then ART version mapping
        if let Some(&value) = self.api_to_value_map.get(&api) {
            return Some(value);
        }
        if let Some(&value) = self.art_version_to_value_map.get(&art_version) {
            return Some(value);
        }
        None
    }
}

static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    use Format as F;
    use ReferenceType as R;

    let c = OpcodeFlags::CAN_CONTINUE;
    let t = OpcodeFlags::CAN_THROW;
    let r = OpcodeFlags::SETS_REGISTER;
    let w = OpcodeFlags::SETS_WIDE_REGISTER;
    let res = OpcodeFlags::SETS_RESULT;
    let st = OpcodeFlags::STATIC_FIELD_ACCESSOR;
    let x = OpcodeFlags::EXPERIMENTAL;
    let none = OpcodeFlags::empty();

    vec![
        Opcode::new(Opcode::all_versions(0x00), "nop", R::None, None, F::Format10x, c),
        Opcode::new(Opcode::all_versions(0x01), "move", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x02), "move/from16", R::None, None, F::Format22x, c | r),
        Opcode::new(Opcode::all_versions(0x03), "move/16", R::None, None, F::Format32x, c | r),
        Opcode::new(Opcode::all_versions(0x04), "move-wide", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x05), "move-wide/from16", R::None, None, F::Format22x, c | r | w),
        Opcode::new(Opcode::all_versions(0x06), "move-wide/16", R::None, None, F::Format32x, c | r | w),
        Opcode::new(Opcode::all_versions(0x07), "move-object", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x08), "move-object/from16", R::None, None, F::Format22x, c | r),
        Opcode::new(Opcode::all_versions(0x09), "move-object/16", R::None, None, F::Format32x, c | r),
        Opcode::new(Opcode::all_versions(0x0a), "move-result", R::None, None, F::Format11x, c | r),
        Opcode::new(Opcode::all_versions(0x0b), "move-result-wide", R::None, None, F::Format11x, c | r | w),
        Opcode::new(Opcode::all_versions(0x0c), "move-result-object", R::None, None, F::Format11x, c | r),
        Opcode::new(Opcode::all_versions(0x0d), "move-exception", R::None, None, F::Format11x, c | r),
        Opcode::new(Opcode::all_versions(0x0e), "return-void", R::None, None, F::Format10x, none),
        Opcode::new(Opcode::all_versions(0x0f), "return", R::None, None, F::Format11x, none),
        Opcode::new(Opcode::all_versions(0x10), "return-wide", R::None, None, F::Format11x, none),
        Opcode::new(Opcode::all_versions(0x11), "return-object", R::None, None, F::Format11x, none),
        Opcode::new(Opcode::all_versions(0x12), "const/4", R::None, None, F::Format11n, c | r),
        Opcode::new(Opcode::all_versions(0x13), "const/16", R::None, None, F::Format21s, c | r),
        Opcode::new(Opcode::all_versions(0x14), "const", R::None, None, F::Format31i, c | r),
        Opcode::new(Opcode::all_versions(0x15), "const/high16", R::None, None, F::Format21ih, c | r),
        Opcode::new(Opcode::all_versions(0x16), "const-wide/16", R::None, None, F::Format21s, c | r | w),
        Opcode::new(Opcode::all_versions(0x17), "const-wide/32", R::None, None, F::Format31i, c | r | w),
        Opcode::new(Opcode::all_versions(0x18), "const-wide", R::None, None, F::Format51l, c | r | w),
        Opcode::new(Opcode::all_versions(0x19), "const-wide/high16", R::None, None, F::Format21lh, c | r | w),
        Opcode::new(Opcode::all_versions(0x1a), "const-string", R::String, None, F::Format21c, t | c | r),
        Opcode::new(Opcode::all_versions(0x1b), "const-string/jumbo", R::String, None, F::Format31c, t | c | r),
        Opcode::new(Opcode::all_versions(0x1c), "const-class", R::Type, None, F::Format21c, t | c | r),
        Opcode::new(Opcode::all_versions(0x1d), "monitor-enter", R::None, None, F::Format11x, t | c),
        Opcode::new(Opcode::all_versions(0x1e), "monitor-exit", R::None, None, F::Format11x, t | c),
        Opcode::new(Opcode::all_versions(0x1f), "check-cast", R::Type, None, F::Format21c, t | c | r),
        Opcode::new(Opcode::all_versions(0x20), "instance-of", R::Type, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x21), "array-length", R::None, None, F::Format12x, t | c | r),
        Opcode::new(Opcode::all_versions(0x22), "new-instance", R::Type, None, F::Format21c, t | c | r),
        Opcode::new(Opcode::all_versions(0x23), "new-array", R::Type, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x24), "filled-new-array", R::Type, None, F::Format35c, t | c | res),
        Opcode::new(Opcode::all_versions(0x25), "filled-new-array/range", R::Type, None, F::Format3rc, t | c | res),
        Opcode::new(Opcode::all_versions(0x26), "fill-array-data", R::None, None, F::Format31t, t | c),
        Opcode::new(Opcode::all_versions(0x27), "throw", R::None, None, F::Format11x, t),
        Opcode::new(Opcode::all_versions(0x28), "goto", R::None, None, F::Format10t, none),
        Opcode::new(Opcode::all_versions(0x29), "goto/16", R::None, None, F::Format20t, none),
        Opcode::new(Opcode::all_versions(0x2a), "goto/32", R::None, None, F::Format30t, none),
        Opcode::new(Opcode::all_versions(0x2b), "packed-switch", R::None, None, F::Format31t, c),
        Opcode::new(Opcode::all_versions(0x2c), "sparse-switch", R::None, None, F::Format31t, c),
        Opcode::new(Opcode::all_versions(0x2d), "cmpl-float", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x2e), "cmpg-float", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x2f), "cmpl-double", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x30), "cmpg-double", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x31), "cmp-long", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x32), "if-eq", R::None, None, F::Format22t, c),
        Opcode::new(Opcode::all_versions(0x33), "if-ne", R::None, None, F::Format22t, c),
        Opcode::new(Opcode::all_versions(0x34), "if-lt", R::None, None, F::Format22t, c),
        Opcode::new(Opcode::all_versions(0x35), "if-ge", R::None, None, F::Format22t, c),
        Opcode::new(Opcode::all_versions(0x36), "if-gt", R::None, None, F::Format22t, c),
        Opcode::new(Opcode::all_versions(0x37), "if-le", R::None, None, F::Format22t, c),
        Opcode::new(Opcode::all_versions(0x38), "if-eqz", R::None, None, F::Format21t, c),
        Opcode::new(Opcode::all_versions(0x39), "if-nez", R::None, None, F::Format21t, c),
        Opcode::new(Opcode::all_versions(0x3a), "if-ltz", R::None, None, F::Format21t, c),
        Opcode::new(Opcode::all_versions(0x3b), "if-gez", R::None, None, F::Format21t, c),
        Opcode::new(Opcode::all_versions(0x3c), "if-gtz", R::None, None, F::Format21t, c),
        Opcode::new(Opcode::all_versions(0x3d), "if-lez", R::None, None, F::Format21t, c),
        Opcode::new(Opcode::all_versions(0x44), "aget", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x45), "aget-wide", R::None, None, F::Format23x, t | c | r | w),
        Opcode::new(Opcode::all_versions(0x46), "aget-object", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x47), "aget-boolean", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x48), "aget-byte", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x49), "aget-char", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x4a), "aget-short", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x4b), "aput", R::None, None, F::Format23x, t | c),
        Opcode::new(Opcode::all_versions(0x4c), "aput-wide", R::None, None, F::Format23x, t | c),
        Opcode::new(Opcode::all_versions(0x4d), "aput-object", R::None, None, F::Format23x, t | c),
        Opcode::new(Opcode::all_versions(0x4e), "aput-boolean", R::None, None, F::Format23x, t | c),
        Opcode::new(Opcode::all_versions(0x4f), "aput-byte", R::None, None, F::Format23x, t | c),
        Opcode::new(Opcode::all_versions(0x50), "aput-char", R::None, None, F::Format23x, t | c),
        Opcode::new(Opcode::all_versions(0x51), "aput-short", R::None, None, F::Format23x, t | c),
        Opcode::new(Opcode::all_versions(0x52), "iget", R::Field, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x53), "iget-wide", R::Field, None, F::Format22c, t | c | r | w),
        Opcode::new(Opcode::all_versions(0x54), "iget-object", R::Field, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x55), "iget-boolean", R::Field, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x56), "iget-byte", R::Field, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x57), "iget-char", R::Field, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x58), "iget-short", R::Field, None, F::Format22c, t | c | r),
        Opcode::new(Opcode::all_versions(0x59), "iput", R::Field, None, F::Format22c, t | c),
        Opcode::new(Opcode::all_versions(0x5a), "iput-wide", R::Field, None, F::Format22c, t | c),
        Opcode::new(Opcode::all_versions(0x5b), "iput-object", R::Field, None, F::Format22c, t | c),
        Opcode::new(Opcode::all_versions(0x5c), "iput-boolean", R::Field, None, F::Format22c, t | c),
        Opcode::new(Opcode::all_versions(0x5d), "iput-byte", R::Field, None, F::Format22c, t | c),
        Opcode::new(Opcode::all_versions(0x5e), "iput-char", R::Field, None, F::Format22c, t | c),
        Opcode::new(Opcode::all_versions(0x5f), "iput-short", R::Field, None, F::Format22c, t | c),
        Opcode::new(Opcode::all_versions(0x60), "sget", R::Field, None, F::Format21c, t | c | r | st),
        Opcode::new(Opcode::all_versions(0x61), "sget-wide", R::Field, None, F::Format21c, t | c | r | w | st),
        Opcode::new(Opcode::all_versions(0x62), "sget-object", R::Field, None, F::Format21c, t | c | r | st),
        Opcode::new(Opcode::all_versions(0x63), "sget-boolean", R::Field, None, F::Format21c, t | c | r | st),
        Opcode::new(Opcode::all_versions(0x64), "sget-byte", R::Field, None, F::Format21c, t | c | r | st),
        Opcode::new(Opcode::all_versions(0x65), "sget-char", R::Field, None, F::Format21c, t | c | r | st),
        Opcode::new(Opcode::all_versions(0x66), "sget-short", R::Field, None, F::Format21c, t | c | r | st),
        Opcode::new(Opcode::all_versions(0x67), "sput", R::Field, None, F::Format21c, t | c | st),
        Opcode::new(Opcode::all_versions(0x68), "sput-wide", R::Field, None, F::Format21c, t | c | st),
        Opcode::new(Opcode::all_versions(0x69), "sput-object", R::Field, None, F::Format21c, t | c | st),
        Opcode::new(Opcode::all_versions(0x6a), "sput-boolean", R::Field, None, F::Format21c, t | c | st),
        Opcode::new(Opcode::all_versions(0x6b), "sput-byte", R::Field, None, F::Format21c, t | c | st),
        Opcode::new(Opcode::all_versions(0x6c), "sput-char", R::Field, None, F::Format21c, t | c | st),
        Opcode::new(Opcode::all_versions(0x6d), "sput-short", R::Field, None, F::Format21c, t | c | st),
        Opcode::new(Opcode::all_versions(0x6e), "invoke-virtual", R::Method, None, F::Format35c, t | c | res),
        Opcode::new(Opcode::all_versions(0x6f), "invoke-super", R::Method, None, F::Format35c, t | c | res),
        Opcode::new(Opcode::all_versions(0x70), "invoke-direct", R::Method, None, F::Format35c, t | c | res),
        Opcode::new(Opcode::all_versions(0x71), "invoke-static", R::Method, None, F::Format35c, t | c | res),
        Opcode::new(Opcode::all_versions(0x72), "invoke-interface", R::Method, None, F::Format35c, t | c | res),
        Opcode::new(Opcode::all_versions(0x74), "invoke-virtual/range", R::Method, None, F::Format3rc, t | c | res),
        Opcode::new(Opcode::all_versions(0x75), "invoke-super/range", R::Method, None, F::Format3rc, t | c | res),
        Opcode::new(Opcode::all_versions(0x76), "invoke-direct/range", R::Method, None, F::Format3rc, t | c | res),
        Opcode::new(Opcode::all_versions(0x77), "invoke-static/range", R::Method, None, F::Format3rc, t | c | res),
        Opcode::new(Opcode::all_versions(0x78), "invoke-interface/range", R::Method, None, F::Format3rc, t | c | res),
        Opcode::new(Opcode::all_versions(0x7b), "neg-int", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x7c), "not-int", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x7d), "neg-long", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x7e), "not-long", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x7f), "neg-float", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x80), "neg-double", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x81), "int-to-long", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x82), "int-to-float", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x83), "int-to-double", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x84), "long-to-int", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x85), "long-to-float", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x86), "long-to-double", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x87), "float-to-int", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x88), "float-to-long", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x89), "float-to-double", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x8a), "double-to-int", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x8b), "double-to-long", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0x8c), "double-to-float", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x8d), "int-to-byte", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x8e), "int-to-char", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x8f), "int-to-short", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0x90), "add-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x91), "sub-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x92), "mul-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x93), "div-int", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x94), "rem-int", R::None, None, F::Format23x, t | c | r),
        Opcode::new(Opcode::all_versions(0x95), "and-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x96), "or-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x97), "xor-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x98), "shl-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x99), "shr-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x9a), "ushr-int", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0x9b), "add-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0x9c), "sub-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0x9d), "mul-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0x9e), "div-long", R::None, None, F::Format23x, t | c | r | w),
        Opcode::new(Opcode::all_versions(0x9f), "rem-long", R::None, None, F::Format23x, t | c | r | w),
        Opcode::new(Opcode::all_versions(0xa0), "and-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xa1), "or-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xa2), "xor-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xa3), "shl-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xa4), "shr-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xa5), "ushr-long", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xa6), "add-float", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0xa7), "sub-float", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0xa8), "mul-float", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0xa9), "div-float", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0xaa), "rem-float", R::None, None, F::Format23x, c | r),
        Opcode::new(Opcode::all_versions(0xab), "add-double", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xac), "sub-double", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xad), "mul-double", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xae), "div-double", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xaf), "rem-double", R::None, None, F::Format23x, c | r | w),
        Opcode::new(Opcode::all_versions(0xb0), "add-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xb1), "sub-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xb2), "mul-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xb3), "div-int/2addr", R::None, None, F::Format12x, t | c | r),
        Opcode::new(Opcode::all_versions(0xb4), "rem-int/2addr", R::None, None, F::Format12x, t | c | r),
        Opcode::new(Opcode::all_versions(0xb5), "and-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xb6), "or-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xb7), "xor-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xb8), "shl-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xb9), "shr-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xba), "ushr-int/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xbb), "add-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xbc), "sub-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xbd), "mul-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xbe), "div-long/2addr", R::None, None, F::Format12x, t | c | r | w),
        Opcode::new(Opcode::all_versions(0xbf), "rem-long/2addr", R::None, None, F::Format12x, t | c | r | w),
        Opcode::new(Opcode::all_versions(0xc0), "and-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xc1), "or-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xc2), "xor-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xc3), "shl-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xc4), "shr-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xc5), "ushr-long/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xc6), "add-float/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xc7), "sub-float/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xc8), "mul-float/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xc9), "div-float/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xca), "rem-float/2addr", R::None, None, F::Format12x, c | r),
        Opcode::new(Opcode::all_versions(0xcb), "add-double/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xcc), "sub-double/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xcd), "mul-double/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xce), "div-double/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xcf), "rem-double/2addr", R::None, None, F::Format12x, c | r | w),
        Opcode::new(Opcode::all_versions(0xd0), "add-int/lit16", R::None, None, F::Format22s, c | r),
        Opcode::new(Opcode::all_versions(0xd1), "rsub-int", R::None, None, F::Format22s, c | r),
        Opcode::new(Opcode::all_versions(0xd2), "mul-int/lit16", R::None, None, F::Format22s, c | r),
        Opcode::new(Opcode::all_versions(0xd3), "div-int/lit16", R::None, None, F::Format22s, t | c | r),
        Opcode::new(Opcode::all_versions(0xd4), "rem-int/lit16", R::None, None, F::Format22s, t | c | r),
        Opcode::new(Opcode::all_versions(0xd5), "and-int/lit16", R::None, None, F::Format22s, c | r),
        Opcode::new(Opcode::all_versions(0xd6), "or-int/lit16", R::None, None, F::Format22s, c | r),
        Opcode::new(Opcode::all_versions(0xd7), "xor-int/lit16", R::None, None, F::Format22s, c | r),
        Opcode::new(Opcode::all_versions(0xd8), "add-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xd9), "rsub-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xda), "mul-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xdb), "div-int/lit8", R::None, None, F::Format22b, t | c | r),
        Opcode::new(Opcode::all_versions(0xdc), "rem-int/lit8", R::None, None, F::Format22b, t | c | r),
        Opcode::new(Opcode::all_versions(0xdd), "and-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xde), "or-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xdf), "xor-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xe0), "shl-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xe1), "shr-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_versions(0xe2), "ushr-int/lit8", R::None, None, F::Format22b, c | r),
        Opcode::new(Opcode::all_art_versions(0xf3), "invoke-lambda", R::None, None, F::Format25x, t | c | res | x),
        Opcode::new(Opcode::first_api(0xfa, 26), "invoke-polymorphic", R::Method, Some(R::MethodProto), F::Format45cc, t | c | res),
        Opcode::new(Opcode::first_api(0xfb, 26), "invoke-polymorphic/range", R::Method, Some(R::MethodProto), F::Format4rcc, t | c | res),
        Opcode::new(Opcode::first_api(0xfc, 26), "invoke-custom", R::CallSite, None, F::Format35c, t | c | res),
        Opcode::new(Opcode::first_api(0xfd, 26), "invoke-custom/range", R::CallSite, None, F::Format3rc, t | c | res),
        Opcode::new(Opcode::first_api(0xfe, 28), "const-method-handle", R::MethodHandle, None, F::Format21c, t | c | r),
        Opcode::new(Opcode::first_api(0xff, 28), "const-method-type", R::MethodProto, None, F::Format21c, t | c | r),
    ]
});

static OPCODES_BY_NAME: Lazy<HashMap<&'static str, &'static Opcode>> =
    Lazy::new(|| OPCODES.iter().map(|o| (o.name, o)).collect());

// Global lazy cache for opcode maps keyed by (api, art_version)
static OPCODE_MAP_CACHE: Lazy<std::sync::Mutex<HashMap<(i32, i32), std::sync::Arc<HashMap<u16, &'static Opcode>>>>> =
    Lazy::new(|| std::sync::Mutex::new(HashMap::new()));

fn get_opcode_map(api: i32, art_version: i32) -> std::sync::Arc<HashMap<u16, &'static Opcode>> {
    let key = (api, art_version);
    let mut guard = match OPCODE_MAP_CACHE.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(m) = guard.get(&key) {
        return std::sync::Arc::clone(m);
    }
    let mut map: HashMap<u16, &'static Opcode> = HashMap::new();
    for o in OPCODES.iter() {
        if let Some(opcode) = o.get_opcode_value(api, art_version) {
            map.insert(opcode, o);
        }
    }
    let arc = std::sync::Arc::new(map);
    guard.insert(key, std::sync::Arc::clone(&arc));
    arc
}

pub fn opcode_by_name(name: &str) -> Option<&'static Opcode> {
    OPCODES_BY_NAME.get(name).copied()
}

/// The opcode encoded as `value` for the given API level and ART version.
pub fn opcode_by_value(value: u16, api: i32, art_version: i32) -> Option<&'static Opcode> {
    get_opcode_map(api, art_version).get(&value).copied()
}
