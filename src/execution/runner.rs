//! Query Runner
//!
//! Executes variants one at a time against the same table state and records
//! a `PlanSample` plus the result tuples for each.

use crate::db::backend::{QueryBackend, StateFingerprint};
use crate::error::{BenchError, Result};
use crate::execution::plan::PlanSample;
use crate::execution::result::VariantResult;
use crate::schema::TableDef;
use crate::variants::{validate_all, QueryVariant};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Everything captured for one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantRun {
    pub sample: PlanSample,
    pub result: VariantResult,
}

pub struct QueryRunner<'a> {
    backend: &'a dyn QueryBackend,
    table: &'a TableDef,
    warmup: usize,
    reference_state: Option<StateFingerprint>,
}

impl<'a> QueryRunner<'a> {
    pub fn new(backend: &'a dyn QueryBackend, table: &'a TableDef, warmup: usize) -> Self {
        Self {
            backend,
            table,
            warmup,
            reference_state: None,
        }
    }

    /// State every later variant is checked against, once the first has run.
    pub fn reference_state(&self) -> Option<&StateFingerprint> {
        self.reference_state.as_ref()
    }

    /// Validate every definition, then run them in order.
    pub async fn run_all(&mut self, variants: &[QueryVariant]) -> Result<Vec<VariantRun>> {
        validate_all(variants, self.table)?;

        let mut runs = Vec::with_capacity(variants.len());
        for variant in variants {
            runs.push(self.run(variant).await?);
        }
        Ok(runs)
    }

    pub async fn run(&mut self, variant: &QueryVariant) -> Result<VariantRun> {
        let profile = variant.validate(self.table)?;
        self.check_state(variant).await?;

        let sql = variant.render(self.table);
        let name = variant.name.as_str();
        info!("Running variant {}", name);
        debug!("{}", sql);

        for round in 0..self.warmup {
            let rows = self
                .backend
                .execute(&sql)
                .await
                .map_err(|e| BenchError::query(name, e))?;
            debug!("warmup {} of {} returned {} rows", round + 1, name, rows);
        }

        let document = self
            .backend
            .explain_analyze(&sql)
            .await
            .map_err(|e| BenchError::query(name, e))?;

        let sample = PlanSample::from_json(name, &variant.intent, &document)?;
        if profile.uses_correlated_subquery && !sample.correlated_subquery {
            warn!(
                "{}: correlated subquery in SQL but no SubPlan executed (planner flattened it)",
                name
            );
        }

        let rows = self
            .backend
            .fetch_rows(&sql)
            .await
            .map_err(|e| BenchError::query(name, e))?;

        info!(
            "{}: {} scan, cost {:.1}, planning {:.3} ms, execution {:.3} ms, {} groups",
            name,
            sample.scan_strategy,
            sample.estimated_cost,
            sample.planning_ms,
            sample.execution_ms,
            rows.len()
        );

        Ok(VariantRun {
            sample,
            result: VariantResult::new(name, rows),
        })
    }

    async fn check_state(&mut self, variant: &QueryVariant) -> Result<()> {
        let current = self
            .backend
            .fingerprint(self.table)
            .await
            .map_err(|e| BenchError::query(&variant.name, e))?;

        for index in &variant.required_indexes {
            if !current.indexes.contains(index) {
                return Err(BenchError::StateDrift {
                    variant: variant.name.clone(),
                    detail: format!("required index {} is not present", index),
                });
            }
        }

        match &self.reference_state {
            None => {
                debug!(
                    "reference state: {} rows, {} indexes",
                    current.row_count,
                    current.indexes.len()
                );
                self.reference_state = Some(current);
            }
            Some(reference) => {
                if let Some(detail) = reference.diff(&current) {
                    return Err(BenchError::StateDrift {
                        variant: variant.name.clone(),
                        detail,
                    });
                }
            }
        }
        Ok(())
    }
}
