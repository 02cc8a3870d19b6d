pub mod evidence;
pub mod features;

pub use evidence::{
    compute, EngineDiagnostics, EngineReport, EvidencePost, OutcomeDef, ALGORITHM,
};
pub use features::extract;
