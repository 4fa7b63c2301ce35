use chrono::NaiveDate;
use std::collections::HashSet;
use tollflow_bench::generator::{DateWindow, FlowGenerator, ADMINISTRATORS, DEPARTMENTS, TOLL_NAMES};
use tollflow_bench::HarnessConfig;

fn window() -> DateWindow {
    DateWindow::two_years_from(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()).unwrap()
}

#[test]
fn test_ids_unique_and_increasing() {
    let mut previous = 0;
    let mut seen = HashSet::new();
    for record in FlowGenerator::new(20_000, 42, window()) {
        assert!(record.id > previous, "id {} after {}", record.id, previous);
        assert!(seen.insert(record.id));
        previous = record.id;
    }
    assert_eq!(seen.len(), 20_000);
}

#[test]
fn test_cutoff_dates_inside_window() {
    let window = window();
    assert_eq!(window.end, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());

    for record in FlowGenerator::new(20_000, 7, window) {
        assert!(window.contains(record.cutoff_date), "{}", record.cutoff_date);
        let encoded = record.cutoff_yyyymmdd();
        assert!((20230101..20250101).contains(&encoded), "{}", encoded);
    }
}

#[test]
fn test_every_south_concession_department_is_reachable() {
    let rows = (ADMINISTRATORS.len() * DEPARTMENTS.len() * TOLL_NAMES.len()) as u64;
    let groups: HashSet<String> = FlowGenerator::new(rows, 42, window())
        .filter(|r| r.administrator == "CONCESION")
        .filter(|r| r.toll_name.trim().to_lowercase().ends_with("sur"))
        .map(|r| r.department)
        .collect();
    assert_eq!(groups.len(), DEPARTMENTS.len());
}

#[test]
fn test_same_seed_same_rows() {
    let config = HarnessConfig {
        rows: 500,
        ..HarnessConfig::default()
    };
    let first: Vec<_> = FlowGenerator::from_config(&config).unwrap().collect();
    let second: Vec<_> = FlowGenerator::from_config(&config).unwrap().collect();
    assert_eq!(first, second);
}
