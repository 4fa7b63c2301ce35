use tollflow_bench::comparator::PlanComparator;
use tollflow_bench::execution::{PlanSample, PlanSection, ScanStrategy};
use tollflow_bench::report::BenchReport;
use tollflow_bench::variants::DEPARTMENT_INTENT;

const BASELINE: &str = include_str!("fixtures/plans/baseline_correlated.txt");
const REWRITE: &str = include_str!("fixtures/plans/indexed_rewrite.txt");
const REGION: &str = include_str!("fixtures/plans/region_native_date.txt");

fn captured_samples() -> Vec<PlanSample> {
    vec![
        PlanSample::from_text("baseline_correlated", DEPARTMENT_INTENT, BASELINE).unwrap(),
        PlanSample::from_text("indexed_rewrite", DEPARTMENT_INTENT, REWRITE).unwrap(),
        PlanSample::from_text("region_native_date", DEPARTMENT_INTENT, REGION).unwrap(),
    ]
}

#[test]
fn test_baseline_plan_runs_subplan_per_department() {
    let baseline = &captured_samples()[0];

    assert_eq!(baseline.scan_strategy, ScanStrategy::Sequential);
    assert!(baseline.correlated_subquery);
    assert_eq!(baseline.subplan_loops, 11);
    assert_eq!(baseline.planning_ms, 0.196);
    assert_eq!(baseline.execution_ms, 2744.607);
    assert_eq!(baseline.shared_hit_blocks, 499438);
    assert_eq!(baseline.shared_read_blocks, 0);
    assert_eq!(baseline.nodes[2].actual_rows, Some(32016.0));

    // The bitmap scan inside the SubPlan does not decide the outer strategy
    let inner: Vec<_> = baseline
        .scans()
        .filter(|n| n.section == PlanSection::SubPlan)
        .map(|n| n.node_type.as_str())
        .collect();
    assert_eq!(inner, vec!["Bitmap Heap Scan"]);
}

#[test]
fn test_rewrites_use_covering_indexes() {
    let samples = captured_samples();

    let rewrite = &samples[1];
    assert_eq!(rewrite.scan_strategy, ScanStrategy::IndexOnly);
    assert_eq!(rewrite.heap_fetches, 0);
    assert!(!rewrite.correlated_subquery);
    assert_eq!(
        rewrite.scans().next().and_then(|n| n.index_name.as_deref()),
        Some("idx_toll_flow_admin_cutoff_cov")
    );

    let region = &samples[2];
    assert_eq!(region.scan_strategy, ScanStrategy::IndexOnly);
    assert_eq!(region.heap_fetches, 0);
    assert_eq!(
        region.scans().next().and_then(|n| n.index_name.as_deref()),
        Some("idx_toll_flow_region_admin_day")
    );
}

#[test]
fn test_comparison_of_captured_plans() {
    let report = PlanComparator::compare(&captured_samples()).unwrap();

    assert_eq!(report.intent, DEPARTMENT_INTENT);
    assert_eq!(report.baseline, "baseline_correlated");
    assert_eq!(report.baseline_subplan_loops, 11);
    assert_eq!(report.deltas.len(), 2);

    for delta in &report.deltas {
        assert!(delta.speedup.unwrap() > 10.0, "{} too slow", delta.variant);
        assert!(delta.correlated_eliminated);
        assert_eq!(delta.subplan_loops_removed, 11);
        assert_eq!(delta.scan_transition.from, ScanStrategy::Sequential);
        assert_eq!(delta.scan_transition.to, ScanStrategy::IndexOnly);
        assert!(delta.shared_blocks_delta < 0);
    }

    assert_eq!(report.fastest().unwrap().variant, "region_native_date");
}

#[test]
fn test_report_from_captured_plans() {
    let samples = captured_samples();
    let comparison = PlanComparator::compare(&samples).unwrap();
    let text = BenchReport::new(None, samples, comparison, None).render_text();

    assert!(text.contains("Against baseline baseline_correlated"));
    assert!(text.contains("sequential -> index-only"));
    assert!(text.contains("Fastest: region_native_date"));
}
