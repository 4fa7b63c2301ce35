//! Variant execution: static profiling, plan capture and the runner

pub mod plan;
pub mod profile;
pub mod result;
pub mod runner;

pub use plan::{PlanNode, PlanSample, PlanSection, ScanStrategy};
pub use profile::QueryProfile;
pub use result::{ResultRow, VariantResult};
pub use runner::{QueryRunner, VariantRun};
