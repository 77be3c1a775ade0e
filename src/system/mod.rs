//! System module: host path resolution, sysfs knobs and post-provisioning verification

pub mod paths;
pub mod sysfs;
pub mod verification;

pub use paths::SystemPaths;
pub use sysfs::{read_knob, write_knob, KnobOutcome, ResourceScan};
pub use verification::{
    default_checks, ProcessToolProbe, ToolProbe, VerificationCheck, VerificationContext,
    VerificationEngine,
};
