//! # dexlower
//!
//! Backend that turns register-allocated SSA method bodies into Dalvik code units and
//! dex debug info.
//!
//! A method goes through four stages, see [`lower::lower_method`]:
//!
//! 1. phi type resolution ([`ssa::resolve_phi_types`])
//! 2. copy propagation and trivial phi removal ([`ssa::propagate_copies`])
//! 3. instruction selection and encoding ([`dex::assembler::MethodAssembler`])
//! 4. local variable intervals and the serialized debug block ([`dex::debug_info`], [`dex::debug_encode`])
//!
//! Pool indices come from the caller through [`dex::assembler::IndexResolver`]. Methods
//! are independent, so [`lower::lower_methods`] lowers a batch in parallel.

#[macro_use]
pub mod dex;

pub mod dataflow;
pub mod ir;
pub mod listing;
pub mod lower;
pub mod options;
pub mod ssa;
#[cfg(test)]
mod tests;

pub use dex::error::{CapacityOverflow, DexError, DexErrorKind, OverflowLimit};
pub use lower::{collect_overflows, lower_method, lower_methods, LoweredMethod};
pub use options::BackendOptions;
