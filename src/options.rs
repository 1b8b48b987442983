//! Backend configuration.
//!
//! The surrounding compiler owns its configuration system; this crate only receives
//! the resolved values as plain booleans and integers.

use serde::{Deserialize, Serialize};

pub const DEFAULT_API_LEVEL: i32 = 33;
pub const DEFAULT_ART_VERSION: i32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendOptions {
    /// Target Android API level, used to pick opcode values and to gate newer opcodes.
    pub api_level: i32,
    pub art_version: i32,
    pub emit_line_numbers: bool,
    /// Emit debug locals for variables declared in source.
    pub emit_local_info: bool,
    /// Emit debug locals for compiler-introduced variables.
    pub emit_synthetic_local_info: bool,
    /// Run copy propagation and trivial phi elimination.
    pub optimize_copies: bool,
    /// Always use the 32-bit string index form of const-string.
    pub force_jumbo: bool,
    /// Allow the experimental invoke-lambda opcode.
    pub experimental_lambdas: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions {
            api_level: DEFAULT_API_LEVEL,
            art_version: DEFAULT_ART_VERSION,
            emit_line_numbers: true,
            emit_local_info: true,
            emit_synthetic_local_info: false,
            optimize_copies: true,
            force_jumbo: false,
            experimental_lambdas: false,
        }
    }
}

impl BackendOptions {
    /// Whether a local of the given kind must survive for debug-info emission.
    pub fn keeps_local(&self, synthetic: bool) -> bool {
        if synthetic {
            self.emit_synthetic_local_info
        } else {
            self.emit_local_info
        }
    }
}
