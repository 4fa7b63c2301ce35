//! Plan Comparator
//!
//! Pure computation over captured samples: the first sample is the baseline,
//! every other sample is reported relative to it.

use crate::error::{BenchError, Result};
use crate::execution::plan::{PlanSample, ScanStrategy};
use crate::execution::result::VariantResult;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTransition {
    pub from: ScanStrategy,
    pub to: ScanStrategy,
}

impl ScanTransition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

impl fmt::Display for ScanTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.changed() {
            write!(f, "{} -> {}", self.from, self.to)
        } else {
            write!(f, "{} (unchanged)", self.from)
        }
    }
}

/// One candidate measured against the baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantDelta {
    pub variant: String,

    /// Baseline execution time / candidate execution time.
    /// `None` when the candidate reported zero time.
    pub speedup: Option<f64>,

    pub execution_ms: f64,
    pub execution_ms_saved: f64,
    pub planning_ms_delta: f64,

    /// Candidate estimated cost / baseline estimated cost
    pub cost_ratio: Option<f64>,

    pub scan_transition: ScanTransition,

    /// Baseline re-executed a SubPlan, candidate does not
    pub correlated_eliminated: bool,
    pub subplan_loops_removed: u64,

    pub heap_fetches: u64,
    pub shared_blocks_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub intent: String,
    pub baseline: String,
    pub baseline_scan: ScanStrategy,
    pub baseline_execution_ms: f64,
    pub baseline_subplan_loops: u64,
    pub deltas: Vec<VariantDelta>,
}

impl ComparisonReport {
    /// Candidate with the largest speed-up, if any beat the baseline.
    pub fn fastest(&self) -> Option<&VariantDelta> {
        self.deltas
            .iter()
            .filter(|d| d.speedup.map(|s| s > 1.0).unwrap_or(false))
            .max_by(|a, b| {
                a.speedup
                    .unwrap_or(0.0)
                    .partial_cmp(&b.speedup.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

pub struct PlanComparator;

impl PlanComparator {
    /// Compare `samples[1..]` against `samples[0]`.
    pub fn compare(samples: &[PlanSample]) -> Result<ComparisonReport> {
        let (baseline, candidates) = match samples {
            [baseline, candidates @ ..] if !candidates.is_empty() => (baseline, candidates),
            _ => {
                return Err(BenchError::Comparison(format!(
                    "need at least two samples, got {}",
                    samples.len()
                )))
            }
        };

        if let Some(other) = candidates.iter().find(|s| s.intent != baseline.intent) {
            return Err(BenchError::Comparison(format!(
                "variant '{}' answers '{}' but baseline '{}' answers '{}'",
                other.variant, other.intent, baseline.variant, baseline.intent
            )));
        }

        let deltas = candidates
            .iter()
            .map(|candidate| Self::delta(baseline, candidate))
            .collect();

        Ok(ComparisonReport {
            intent: baseline.intent.clone(),
            baseline: baseline.variant.clone(),
            baseline_scan: baseline.scan_strategy,
            baseline_execution_ms: baseline.execution_ms,
            baseline_subplan_loops: baseline.subplan_loops,
            deltas,
        })
    }

    fn delta(baseline: &PlanSample, candidate: &PlanSample) -> VariantDelta {
        let speedup = if candidate.execution_ms > 0.0 {
            Some(baseline.execution_ms / candidate.execution_ms)
        } else {
            None
        };
        let cost_ratio = if baseline.estimated_cost > 0.0 {
            Some(candidate.estimated_cost / baseline.estimated_cost)
        } else {
            None
        };

        let blocks = |s: &PlanSample| (s.shared_hit_blocks + s.shared_read_blocks) as i64;

        VariantDelta {
            variant: candidate.variant.clone(),
            speedup,
            execution_ms: candidate.execution_ms,
            execution_ms_saved: baseline.execution_ms - candidate.execution_ms,
            planning_ms_delta: candidate.planning_ms - baseline.planning_ms,
            cost_ratio,
            scan_transition: ScanTransition {
                from: baseline.scan_strategy,
                to: candidate.scan_strategy,
            },
            correlated_eliminated: baseline.correlated_subquery && !candidate.correlated_subquery,
            subplan_loops_removed: baseline.subplan_loops.saturating_sub(candidate.subplan_loops),
            heap_fetches: candidate.heap_fetches,
            shared_blocks_delta: blocks(candidate) - blocks(baseline),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    pub variant: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub reference: String,
    pub groups: usize,
    pub mismatches: Vec<Mismatch>,
}

impl EquivalenceReport {
    pub fn equivalent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Check that every variant returned the same tuples as the first.
pub fn check_equivalence(results: &[VariantResult]) -> Result<EquivalenceReport> {
    let (reference, others) = results.split_first().ok_or_else(|| {
        BenchError::Comparison("no results to check for equivalence".to_string())
    })?;

    let mut mismatches = Vec::new();
    for other in others {
        if let Some(detail) = first_difference(&reference.rows, &other.rows) {
            mismatches.push(Mismatch {
                variant: other.variant.clone(),
                detail,
            });
        }
    }

    Ok(EquivalenceReport {
        reference: reference.variant.clone(),
        groups: reference.rows.len(),
        mismatches,
    })
}

fn first_difference(
    expected: &[crate::execution::result::ResultRow],
    actual: &[crate::execution::result::ResultRow],
) -> Option<String> {
    for (e, a) in expected.iter().zip(actual.iter()) {
        if e != a {
            return Some(if e.department != a.department {
                format!("expected group {} but found {}", e.department, a.department)
            } else {
                format!(
                    "{}: ({}, {}) vs ({}, {})",
                    e.department, e.total_light, e.avg_heavy_imd, a.total_light, a.avg_heavy_imd
                )
            });
        }
    }
    if expected.len() != actual.len() {
        return Some(format!("{} groups vs {}", expected.len(), actual.len()));
    }
    None
}
