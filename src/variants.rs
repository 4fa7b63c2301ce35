//! Query variants
//!
//! A variant is one formulation of a logical question ("intent") together
//! with the indexes and derived columns it expects. The three built-in
//! variants answer the same question: light-vehicle totals and average heavy
//! IMD per department, for concession-run stations whose name ends in "sur",
//! during the first quarter of 2024.

use crate::config::is_identifier;
use crate::error::{BenchError, Result};
use crate::execution::profile::QueryProfile;
use crate::schema::TableDef;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const TABLE_PLACEHOLDER: &str = "{table}";

/// Columns every variant must return, in this order of meaning.
pub const RESULT_COLUMNS: [&str; 3] = ["department", "total_light", "avg_heavy_imd"];

pub const DEPARTMENT_INTENT: &str = "q1_2024_south_concession_by_department";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryVariant {
    pub name: String,

    /// Variants are only comparable with others of the same intent
    pub intent: String,

    #[serde(default)]
    pub description: String,

    /// SQL text; `{table}` expands to the qualified table name
    pub sql: String,

    pub group_key: String,

    #[serde(default)]
    pub required_indexes: Vec<String>,

    #[serde(default)]
    pub required_columns: Vec<String>,
}

impl QueryVariant {
    pub fn render(&self, table: &TableDef) -> String {
        self.sql.replace(TABLE_PLACEHOLDER, &table.qualified_name())
    }

    /// Check the definition against the table before anything runs.
    pub fn validate(&self, table: &TableDef) -> Result<QueryProfile> {
        let fail = |msg: String| BenchError::Config(format!("variant '{}': {}", self.name, msg));

        if !is_identifier(&self.name) {
            return Err(fail("name must be a lowercase identifier".to_string()));
        }
        if self.intent.trim().is_empty() {
            return Err(fail("intent is empty".to_string()));
        }

        let profile = QueryProfile::from_sql(&self.render(table)).map_err(|e| fail(e.to_string()))?;

        if !profile.tables.iter().any(|t| t == &table.name) {
            return Err(fail(format!("does not read {}", table.name)));
        }
        for column in RESULT_COLUMNS {
            if !profile.output_columns.iter().any(|c| c == column) {
                return Err(fail(format!("missing output column {}", column)));
            }
        }
        if !profile.group_by.iter().any(|g| g.ends_with(&self.group_key)) {
            return Err(fail(format!("does not group by {}", self.group_key)));
        }
        for index in &self.required_indexes {
            if table.index(index).is_none() {
                return Err(fail(format!("requires unknown index {}", index)));
            }
        }
        for column in &self.required_columns {
            if !table.has_column(column) {
                return Err(fail(format!("requires unknown column {}", column)));
            }
        }

        Ok(profile)
    }
}

/// Validate a whole experiment: unique names plus each definition.
pub fn validate_all(variants: &[QueryVariant], table: &TableDef) -> Result<Vec<QueryProfile>> {
    if variants.is_empty() {
        return Err(BenchError::Config("no variants selected".to_string()));
    }

    let mut seen = HashSet::new();
    for variant in variants {
        if !seen.insert(variant.name.as_str()) {
            return Err(BenchError::Config(format!(
                "variant name '{}' is defined twice",
                variant.name
            )));
        }
    }

    variants.iter().map(|v| v.validate(table)).collect()
}

/// Read variant definitions from a JSON array.
pub fn load_variants(path: &Path) -> Result<Vec<QueryVariant>> {
    let raw = std::fs::read_to_string(path)?;
    let variants: Vec<QueryVariant> = serde_json::from_str(&raw).map_err(|e| {
        BenchError::Config(format!("{}: invalid variant file: {}", path.display(), e))
    })?;
    Ok(variants)
}

/// Keep only the named variants, preserving `names` order.
pub fn select(variants: Vec<QueryVariant>, names: &[String]) -> Result<Vec<QueryVariant>> {
    if names.is_empty() {
        return Ok(variants);
    }
    names
        .iter()
        .map(|name| {
            variants
                .iter()
                .find(|v| &v.name == name)
                .cloned()
                .ok_or_else(|| BenchError::Config(format!("unknown variant '{}'", name)))
        })
        .collect()
}

pub fn builtin_variants() -> Vec<QueryVariant> {
    vec![
        QueryVariant {
            name: "baseline_correlated".to_string(),
            intent: DEPARTMENT_INTENT.to_string(),
            description: "Correlated subquery for the average, functions wrapped around every \
                          filtered column"
                .to_string(),
            sql: r#"SELECT f.department,
       SUM(f.light_total) AS total_light,
       (SELECT AVG(g.imd_heavy)
          FROM {table} g
         WHERE g.department = f.department
           AND UPPER(g.administrator) = 'CONCESION'
           AND UPPER(TRIM(g.toll_name)) LIKE '%SUR'
           AND SUBSTR(g.cutoff_date::text, 1, 6) BETWEEN '202401' AND '202403') AS avg_heavy_imd
  FROM {table} f
 WHERE UPPER(f.administrator) = 'CONCESION'
   AND UPPER(TRIM(f.toll_name)) LIKE '%SUR'
   AND SUBSTR(f.cutoff_date::text, 1, 6) BETWEEN '202401' AND '202403'
 GROUP BY f.department"#
                .to_string(),
            group_key: "department".to_string(),
            required_indexes: Vec::new(),
            required_columns: Vec::new(),
        },
        QueryVariant {
            name: "indexed_rewrite".to_string(),
            intent: DEPARTMENT_INTENT.to_string(),
            description: "Single pass aggregate, sargable equality and numeric date range \
                          served by the covering (administrator, cutoff_date) index"
                .to_string(),
            sql: r#"SELECT department,
       SUM(light_total) AS total_light,
       AVG(imd_heavy) AS avg_heavy_imd
  FROM {table}
 WHERE administrator = 'CONCESION'
   AND LOWER(TRIM(toll_name)) LIKE '%sur'
   AND cutoff_date BETWEEN 20240101 AND 20240331
 GROUP BY department"#
                .to_string(),
            group_key: "department".to_string(),
            required_indexes: vec![
                "idx_toll_flow_admin_cutoff_cov".to_string(),
                "idx_toll_flow_toll_name_trgm".to_string(),
            ],
            required_columns: Vec::new(),
        },
        QueryVariant {
            name: "region_native_date".to_string(),
            intent: DEPARTMENT_INTENT.to_string(),
            description: "Precomputed region column and native DATE cutoff, composite \
                          covering index leading on region"
                .to_string(),
            sql: r#"SELECT department,
       SUM(light_total) AS total_light,
       AVG(imd_heavy) AS avg_heavy_imd
  FROM {table}
 WHERE region = 'SUR'
   AND administrator = 'CONCESION'
   AND cutoff_day BETWEEN DATE '2024-01-01' AND DATE '2024-03-31'
 GROUP BY department"#
                .to_string(),
            group_key: "department".to_string(),
            required_indexes: vec!["idx_toll_flow_region_admin_day".to_string()],
            required_columns: vec!["region".to_string(), "cutoff_day".to_string()],
        },
    ]
}
