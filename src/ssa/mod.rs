//! SSA resolution passes run before instruction selection.

pub mod copy_prop;
pub mod defs;
pub mod phi_types;

pub use copy_prop::{propagate_copies, CopyPropStats};
pub use defs::{DefSite, SsaDefs, UseSite};
pub use phi_types::resolve_phi_types;
