//! Query Result - normalised tuples returned by a variant

use serde::{Deserialize, Serialize};

/// One output group of a variant
///
/// Values are kept as the text Postgres renders for them (averages rounded to
/// four places) so results from different plans compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResultRow {
    pub department: String,
    pub total_light: String,
    pub avg_heavy_imd: String,
}

/// Result set of one variant, ordered by department
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant: String,
    pub rows: Vec<ResultRow>,
}

impl VariantResult {
    pub fn new(variant: impl Into<String>, mut rows: Vec<ResultRow>) -> Self {
        rows.sort();
        Self {
            variant: variant.into(),
            rows,
        }
    }
}
