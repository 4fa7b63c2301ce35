pub mod comparator;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod generator;
pub mod report;
pub mod schema;
pub mod variants;

pub use comparator::{check_equivalence, ComparisonReport, EquivalenceReport, PlanComparator};
pub use config::HarnessConfig;
pub use error::{BenchError, Result};
pub use execution::{PlanSample, QueryRunner, ScanStrategy};
pub use generator::{DataLoader, FlowGenerator, FlowRecord};
pub use schema::{flow_table, loader::SchemaLoader, TableDef};
pub use variants::{builtin_variants, QueryVariant};
