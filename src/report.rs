//! Benchmark report
//!
//! Text rendering for the terminal and a JSON artifact for later diffing.

use crate::comparator::{ComparisonReport, EquivalenceReport};
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::execution::plan::PlanSample;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use uuid::Uuid;

/// Settings that shaped the measured numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    pub database: String,
    pub schema: String,
    pub rows: u64,
    pub seed: u64,
    pub warmup: usize,
    pub parallel_disabled: bool,
}

impl From<&HarnessConfig> for RunSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            database: config.redacted_url(),
            schema: config.schema.clone(),
            rows: config.rows,
            seed: config.seed,
            warmup: config.warmup,
            parallel_disabled: config.disable_parallel,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub settings: Option<RunSettings>,
    pub samples: Vec<PlanSample>,
    pub comparison: ComparisonReport,
    pub equivalence: Option<EquivalenceReport>,
}

impl BenchReport {
    pub fn new(
        settings: Option<RunSettings>,
        samples: Vec<PlanSample>,
        comparison: ComparisonReport,
        equivalence: Option<EquivalenceReport>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            settings,
            samples,
            comparison,
            equivalence,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let c = &self.comparison;

        let _ = writeln!(out, "Intent: {}", c.intent);
        if let Some(settings) = &self.settings {
            let _ = writeln!(
                out,
                "Data:   {} rows (seed {}) in {}.{} on {}",
                settings.rows,
                settings.seed,
                settings.schema,
                crate::schema::TABLE_NAME,
                settings.database
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(
            out,
            "{:<22} {:>11} {:>10} {:>12} {:>12} {:>9} {:>8}",
            "variant", "scan", "cost", "planning ms", "exec ms", "subplan", "heap"
        );
        let _ = writeln!(out, "{}", "-".repeat(90));
        for s in &self.samples {
            let _ = writeln!(
                out,
                "{:<22} {:>11} {:>10.1} {:>12.3} {:>12.3} {:>9} {:>8}",
                s.variant,
                s.scan_strategy.to_string(),
                s.estimated_cost,
                s.planning_ms,
                s.execution_ms,
                s.subplan_loops,
                s.heap_fetches
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Against baseline {}:", c.baseline);
        for d in &c.deltas {
            let speedup = d
                .speedup
                .map(|s| format!("{:.1}x", s))
                .unwrap_or_else(|| "n/a".to_string());
            let mut notes = vec![d.scan_transition.to_string()];
            if d.correlated_eliminated {
                notes.push(format!(
                    "correlated subquery removed ({} loops)",
                    d.subplan_loops_removed
                ));
            }
            if let Some(ratio) = d.cost_ratio {
                notes.push(format!("cost x{:.3}", ratio));
            }
            let _ = writeln!(out, "  {:<22} {:>9}  {}", d.variant, speedup, notes.iter().join(", "));
        }

        if let Some(best) = c.fastest() {
            let _ = writeln!(out, "Fastest: {}", best.variant);
        }

        if let Some(eq) = &self.equivalence {
            let _ = writeln!(out);
            if eq.equivalent() {
                let _ = writeln!(
                    out,
                    "Results: all variants match {} ({} groups)",
                    eq.reference, eq.groups
                );
            } else {
                for m in &eq.mismatches {
                    let _ = writeln!(out, "Results: {} differs from {}: {}", m.variant, eq.reference, m.detail);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{check_equivalence, PlanComparator};
    use crate::execution::plan::ScanStrategy;
    use crate::execution::result::{ResultRow, VariantResult};

    fn sample(variant: &str, scan: ScanStrategy, ms: f64, correlated: bool) -> PlanSample {
        PlanSample {
            variant: variant.to_string(),
            intent: "by_department".to_string(),
            scan_strategy: scan,
            estimated_cost: 100.0,
            estimated_rows: 11.0,
            actual_rows: 11.0,
            planning_ms: 0.1,
            execution_ms: ms,
            correlated_subquery: correlated,
            subplan_loops: if correlated { 11 } else { 0 },
            subquery_scan: false,
            heap_fetches: 0,
            shared_hit_blocks: 0,
            shared_read_blocks: 0,
            nodes: Vec::new(),
            plan_text: String::new(),
        }
    }

    fn report() -> BenchReport {
        let samples = vec![
            sample("baseline_correlated", ScanStrategy::Sequential, 400.0, true),
            sample("indexed_rewrite", ScanStrategy::IndexOnly, 4.0, false),
        ];
        let comparison = PlanComparator::compare(&samples).unwrap();
        let rows = vec![ResultRow {
            department: "META".to_string(),
            total_light: "5".to_string(),
            avg_heavy_imd: "1.0000".to_string(),
        }];
        let equivalence = check_equivalence(&[
            VariantResult::new("baseline_correlated", rows.clone()),
            VariantResult::new("indexed_rewrite", rows),
        ])
        .unwrap();
        BenchReport::new(
            Some(RunSettings::from(&HarnessConfig::default())),
            samples,
            comparison,
            Some(equivalence),
        )
    }

    #[test]
    fn test_render_text() {
        let text = report().render_text();
        assert!(text.contains("indexed_rewrite"));
        assert!(text.contains("100.0x"));
        assert!(text.contains("sequential -> index-only"));
        assert!(text.contains("correlated subquery removed (11 loops)"));
        assert!(text.contains("all variants match baseline_correlated (1 groups)"));
        assert!(!text.contains("postgres:postgres"));
    }

    #[test]
    fn test_write_json_artifact() {
        let report = report();
        let path = std::env::temp_dir().join(format!("tollflow-report-{}.json", report.run_id));
        report.write_json(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["run_id"], report.run_id.to_string());
        assert_eq!(value["comparison"]["deltas"][0]["scan_transition"]["to"], "index-only");
        assert_eq!(value["settings"]["rows"], 2_000_000);
    }
}
