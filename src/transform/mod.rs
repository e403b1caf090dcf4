//! Loop interchange: legality, rewrite and pass driver.

pub mod interchange;
pub mod legality;
pub mod pass;

pub use interchange::Interchange;
pub use legality::{swap_reverses, IllegalReason, Legality, PermutabilityChecker, StructuralIssue};
pub use pass::{
    create_pass, register_passes, registered_passes, FunctionPass, InterchangeOptions, LoopInterchangePass,
    PassPipeline, PassRegistry, PassReport, SlotSelection, INTERCHANGE_PASS_NAME,
};
