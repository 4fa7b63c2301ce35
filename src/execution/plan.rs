//! Execution plan parsing
//!
//! PostgreSQL reports plans either as a JSON document
//! (`EXPLAIN (ANALYZE, FORMAT JSON)`) or as the indented text format people
//! paste into notes. Both are flattened into `PlanNode`s and summarised into a
//! `PlanSample`.

use crate::error::{BenchError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

/// How the executor reached the table rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanStrategy {
    Sequential,
    Bitmap,
    Index,
    IndexOnly,
    None,
}

impl ScanStrategy {
    pub fn from_node_type(node_type: &str) -> Self {
        match node_type {
            "Seq Scan" => ScanStrategy::Sequential,
            "Bitmap Heap Scan" => ScanStrategy::Bitmap,
            "Index Scan" => ScanStrategy::Index,
            "Index Only Scan" => ScanStrategy::IndexOnly,
            _ => ScanStrategy::None,
        }
    }

    /// Higher means more heap pages touched per qualifying row.
    fn weight(self) -> u8 {
        match self {
            ScanStrategy::Sequential => 4,
            ScanStrategy::Bitmap => 3,
            ScanStrategy::Index => 2,
            ScanStrategy::IndexOnly => 1,
            ScanStrategy::None => 0,
        }
    }
}

impl fmt::Display for ScanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanStrategy::Sequential => "sequential",
            ScanStrategy::Bitmap => "bitmap",
            ScanStrategy::Index => "index",
            ScanStrategy::IndexOnly => "index-only",
            ScanStrategy::None => "none",
        };
        f.write_str(label)
    }
}

/// Where a node sits relative to subplans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSection {
    Main,
    /// Correlated: re-executed per outer row
    SubPlan,
    /// Uncorrelated: executed once
    InitPlan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    /// Node type without the `Parallel ` prefix
    pub node_type: String,
    pub parallel: bool,
    pub depth: usize,
    pub section: PlanSection,
    /// First node of a SubPlan/InitPlan
    pub section_root: bool,
    pub relation: Option<String>,
    pub index_name: Option<String>,
    pub total_cost: f64,
    pub plan_rows: f64,
    pub actual_rows: Option<f64>,
    pub actual_loops: Option<u64>,
    pub heap_fetches: Option<u64>,
}

impl PlanNode {
    pub fn scan_strategy(&self) -> ScanStrategy {
        ScanStrategy::from_node_type(&self.node_type)
    }
}

/// Execution metrics of one variant run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSample {
    pub variant: String,
    pub intent: String,
    pub scan_strategy: ScanStrategy,
    pub estimated_cost: f64,
    pub estimated_rows: f64,
    pub actual_rows: f64,
    pub planning_ms: f64,
    pub execution_ms: f64,
    pub correlated_subquery: bool,
    /// Executions of the busiest SubPlan
    pub subplan_loops: u64,
    pub subquery_scan: bool,
    pub heap_fetches: u64,
    pub shared_hit_blocks: u64,
    pub shared_read_blocks: u64,
    pub nodes: Vec<PlanNode>,
    pub plan_text: String,
}

/// Top-level numbers that live outside the node tree
#[derive(Debug, Clone, Default)]
struct PlanTotals {
    planning_ms: f64,
    execution_ms: f64,
    shared_hit_blocks: u64,
    shared_read_blocks: u64,
}

impl PlanSample {
    /// Build from the document returned by `EXPLAIN (ANALYZE, FORMAT JSON)`.
    pub fn from_json(variant: &str, intent: &str, document: &Value) -> Result<Self> {
        let top = match document {
            Value::Array(items) => items.first(),
            other => Some(other),
        }
        .ok_or_else(|| BenchError::PlanParse("empty plan document".to_string()))?;

        let root = top
            .get("Plan")
            .ok_or_else(|| BenchError::PlanParse("plan document has no \"Plan\" key".to_string()))?;

        let mut nodes = Vec::new();
        flatten_json(root, 0, PlanSection::Main, false, &mut nodes)?;

        let totals = PlanTotals {
            planning_ms: top.get("Planning Time").and_then(Value::as_f64).unwrap_or(0.0),
            execution_ms: top.get("Execution Time").and_then(Value::as_f64).unwrap_or(0.0),
            shared_hit_blocks: root.get("Shared Hit Blocks").and_then(Value::as_u64).unwrap_or(0),
            shared_read_blocks: root.get("Shared Read Blocks").and_then(Value::as_u64).unwrap_or(0),
        };

        let plan_text = serde_json::to_string_pretty(document)?;
        Ok(Self::summarise(variant, intent, nodes, totals, plan_text))
    }

    /// Build from a plan in PostgreSQL's text format.
    pub fn from_text(variant: &str, intent: &str, text: &str) -> Result<Self> {
        let (nodes, totals) = parse_text(text)?;
        Ok(Self::summarise(variant, intent, nodes, totals, text.to_string()))
    }

    fn summarise(
        variant: &str,
        intent: &str,
        nodes: Vec<PlanNode>,
        totals: PlanTotals,
        plan_text: String,
    ) -> Self {
        let main_scans = nodes
            .iter()
            .filter(|n| n.section == PlanSection::Main)
            .map(PlanNode::scan_strategy);
        let scan_strategy = pick_dominant(main_scans)
            .or_else(|| pick_dominant(nodes.iter().map(PlanNode::scan_strategy)))
            .unwrap_or(ScanStrategy::None);

        let subplan_loops = nodes
            .iter()
            .filter(|n| n.section == PlanSection::SubPlan && n.section_root)
            .filter_map(|n| n.actual_loops)
            .max()
            .unwrap_or(0);

        let root = nodes.first();

        Self {
            variant: variant.to_string(),
            intent: intent.to_string(),
            scan_strategy,
            estimated_cost: root.map(|n| n.total_cost).unwrap_or(0.0),
            estimated_rows: root.map(|n| n.plan_rows).unwrap_or(0.0),
            actual_rows: root.and_then(|n| n.actual_rows).unwrap_or(0.0),
            planning_ms: totals.planning_ms,
            execution_ms: totals.execution_ms,
            correlated_subquery: nodes.iter().any(|n| n.section == PlanSection::SubPlan),
            subplan_loops,
            subquery_scan: nodes.iter().any(|n| n.node_type == "Subquery Scan"),
            heap_fetches: nodes.iter().filter_map(|n| n.heap_fetches).sum(),
            shared_hit_blocks: totals.shared_hit_blocks,
            shared_read_blocks: totals.shared_read_blocks,
            nodes,
            plan_text,
        }
    }

    /// Scan nodes, in plan order.
    pub fn scans(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes
            .iter()
            .filter(|n| n.scan_strategy() != ScanStrategy::None)
    }
}

fn pick_dominant(strategies: impl Iterator<Item = ScanStrategy>) -> Option<ScanStrategy> {
    strategies
        .filter(|s| *s != ScanStrategy::None)
        .max_by_key(|s| s.weight())
}

fn flatten_json(
    node: &Value,
    depth: usize,
    inherited: PlanSection,
    section_root: bool,
    out: &mut Vec<PlanNode>,
) -> Result<()> {
    let raw_type = node
        .get("Node Type")
        .and_then(Value::as_str)
        .ok_or_else(|| BenchError::PlanParse(format!("node at depth {} has no type", depth)))?;

    let str_field = |key: &str| node.get(key).and_then(Value::as_str).map(str::to_string);
    let (node_type, prefixed_parallel) = normalise_node_type(raw_type);

    out.push(PlanNode {
        node_type,
        parallel: prefixed_parallel
            || node.get("Parallel Aware").and_then(Value::as_bool).unwrap_or(false),
        depth,
        section: inherited,
        section_root,
        relation: str_field("Relation Name"),
        index_name: str_field("Index Name"),
        total_cost: node.get("Total Cost").and_then(Value::as_f64).unwrap_or(0.0),
        plan_rows: node.get("Plan Rows").and_then(Value::as_f64).unwrap_or(0.0),
        actual_rows: node.get("Actual Rows").and_then(Value::as_f64),
        actual_loops: node.get("Actual Loops").and_then(Value::as_u64),
        heap_fetches: node.get("Heap Fetches").and_then(Value::as_u64),
    });

    if let Some(children) = node.get("Plans").and_then(Value::as_array) {
        for child in children {
            let relationship = child.get("Parent Relationship").and_then(Value::as_str);
            let (section, is_root) = match relationship {
                Some("SubPlan") => (PlanSection::SubPlan, true),
                Some("InitPlan") => (PlanSection::InitPlan, true),
                _ => (inherited, false),
            };
            flatten_json(child, depth + 1, section, is_root, out)?;
        }
    }
    Ok(())
}

/// Drop the `Parallel ` prefix and the text format's ` Backward` suffix.
fn normalise_node_type(node_type: &str) -> (String, bool) {
    let (rest, parallel) = match node_type.strip_prefix("Parallel ") {
        Some(rest) => (rest, true),
        None => (node_type, false),
    };
    let rest = rest.strip_suffix(" Backward").unwrap_or(rest);
    (rest.to_string(), parallel)
}

fn node_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<indent>\s*)(?:->\s+)?(?P<kind>[A-Z][A-Za-z ]*?)(?: using (?P<index>\S+))?(?: on (?P<relation>\S+)(?: \S+)?)?\s+\(cost=[\d.]+\.\.(?P<cost>[\d.]+) rows=(?P<rows>\d+) width=\d+\)(?: \(actual time=[\d.]+\.\.[\d.]+ rows=(?P<arows>[\d.]+) loops=(?P<loops>\d+)\)| \((?P<never>never executed)\))?",
        )
        .expect("node line pattern is valid")
    })
}

fn section_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<indent>\s*)(?P<kind>SubPlan|InitPlan) \d+")
            .expect("section line pattern is valid")
    })
}

fn detail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?P<heap>Heap Fetches): (?P<fetches>\d+)|(?P<timing>Planning|Execution) [Tt]ime: (?P<ms>[\d.]+) ms|Buffers: shared(?: hit=(?P<hit>\d+))?(?: read=(?P<read>\d+))?)",
        )
        .expect("detail pattern is valid")
    })
}

fn parse_text(text: &str) -> Result<(Vec<PlanNode>, PlanTotals)> {
    let mut nodes: Vec<PlanNode> = Vec::new();
    let mut totals = PlanTotals::default();
    let mut buffers_seen = false;

    // Indent of the open SubPlan/InitPlan header, and whether its root node has been seen
    let mut open_section: Option<(usize, PlanSection, bool)> = None;

    for line in text.lines() {
        let line = line.trim_end().trim_start_matches('"').trim_end_matches('"');
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = section_line_re().captures(line) {
            let indent = caps["indent"].len();
            let section = if &caps["kind"] == "SubPlan" {
                PlanSection::SubPlan
            } else {
                PlanSection::InitPlan
            };
            open_section = Some((indent, section, false));
            continue;
        }

        if let Some(caps) = node_line_re().captures(line) {
            let indent = caps["indent"].len();
            let (section, section_root) = match open_section {
                Some((header, section, seen)) if indent > header => {
                    open_section = Some((header, section, true));
                    (section, !seen)
                }
                _ => {
                    open_section = None;
                    (enclosing_section(&nodes, indent), false)
                }
            };

            let (node_type, parallel) = normalise_node_type(caps["kind"].trim());
            let never = caps.name("never").is_some();

            nodes.push(PlanNode {
                node_type,
                parallel,
                depth: indent,
                section,
                section_root,
                relation: caps.name("relation").map(|m| m.as_str().to_string()),
                index_name: caps.name("index").map(|m| m.as_str().to_string()),
                total_cost: parse_f64(&caps["cost"])?,
                plan_rows: parse_f64(&caps["rows"])?,
                actual_rows: match caps.name("arows") {
                    Some(m) => Some(parse_f64(m.as_str())?),
                    None if never => Some(0.0),
                    None => None,
                },
                actual_loops: match caps.name("loops") {
                    Some(m) => Some(parse_u64(m.as_str())?),
                    None if never => Some(0),
                    None => None,
                },
                heap_fetches: None,
            });
            continue;
        }

        if let Some(caps) = detail_re().captures(line) {
            if caps.name("heap").is_some() {
                let fetches = parse_u64(&caps["fetches"])?;
                if let Some(last) = nodes.last_mut() {
                    last.heap_fetches = Some(fetches);
                }
            } else if let Some(kind) = caps.name("timing") {
                let ms = parse_f64(&caps["ms"])?;
                if kind.as_str() == "Planning" {
                    totals.planning_ms = ms;
                } else {
                    totals.execution_ms = ms;
                }
            } else if !buffers_seen && !nodes.is_empty() {
                buffers_seen = true;
                totals.shared_hit_blocks = caps.name("hit").map(|m| parse_u64(m.as_str())).transpose()?.unwrap_or(0);
                totals.shared_read_blocks = caps.name("read").map(|m| parse_u64(m.as_str())).transpose()?.unwrap_or(0);
            }
        }
    }

    if nodes.is_empty() {
        return Err(BenchError::PlanParse("no plan nodes found in text".to_string()));
    }
    Ok((nodes, totals))
}

/// A node continues the section of the nearest shallower node above it.
fn enclosing_section(nodes: &[PlanNode], indent: usize) -> PlanSection {
    nodes
        .iter()
        .rev()
        .find(|n| n.depth < indent)
        .map(|n| n.section)
        .unwrap_or(PlanSection::Main)
}

fn parse_f64(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| BenchError::PlanParse(format!("bad number '{}': {}", raw, e)))
}

fn parse_u64(raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|e| BenchError::PlanParse(format!("bad integer '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn correlated_json() -> Value {
        json!([{
            "Plan": {
                "Node Type": "Aggregate",
                "Strategy": "Hashed",
                "Total Cost": 98210.5,
                "Plan Rows": 11,
                "Actual Rows": 11,
                "Actual Loops": 1,
                "Shared Hit Blocks": 120,
                "Shared Read Blocks": 40000,
                "Plans": [
                    {
                        "Node Type": "Seq Scan",
                        "Parent Relationship": "Outer",
                        "Relation Name": "toll_flow",
                        "Alias": "f",
                        "Total Cost": 91000.0,
                        "Plan Rows": 5000,
                        "Actual Rows": 5100,
                        "Actual Loops": 1
                    },
                    {
                        "Node Type": "Aggregate",
                        "Parent Relationship": "SubPlan",
                        "Subplan Name": "SubPlan 1",
                        "Total Cost": 88000.0,
                        "Plan Rows": 1,
                        "Actual Rows": 1,
                        "Actual Loops": 11,
                        "Plans": [{
                            "Node Type": "Seq Scan",
                            "Parent Relationship": "Outer",
                            "Relation Name": "toll_flow",
                            "Alias": "g",
                            "Total Cost": 87000.0,
                            "Plan Rows": 460,
                            "Actual Rows": 463,
                            "Actual Loops": 11
                        }]
                    }
                ]
            },
            "Planning Time": 0.41,
            "Execution Time": 6120.9
        }])
    }

    #[test]
    fn test_json_correlated_subplan() {
        let sample = PlanSample::from_json("baseline", "by_department", &correlated_json()).unwrap();
        assert_eq!(sample.scan_strategy, ScanStrategy::Sequential);
        assert!(sample.correlated_subquery);
        assert_eq!(sample.subplan_loops, 11);
        assert!(!sample.subquery_scan);
        assert_eq!(sample.estimated_cost, 98210.5);
        assert_eq!(sample.actual_rows, 11.0);
        assert_eq!(sample.planning_ms, 0.41);
        assert_eq!(sample.execution_ms, 6120.9);
        assert_eq!(sample.shared_read_blocks, 40000);
        assert_eq!(sample.scans().count(), 2);
    }

    #[test]
    fn test_json_index_only_with_parallel_flag() {
        let doc = json!([{
            "Plan": {
                "Node Type": "Aggregate",
                "Total Cost": 310.2,
                "Plan Rows": 11,
                "Plans": [{
                    "Node Type": "Index Only Scan",
                    "Parent Relationship": "Outer",
                    "Parallel Aware": false,
                    "Index Name": "idx_toll_flow_admin_cutoff_cov",
                    "Relation Name": "toll_flow",
                    "Total Cost": 290.0,
                    "Plan Rows": 4800,
                    "Actual Rows": 4790,
                    "Actual Loops": 1,
                    "Heap Fetches": 2
                }]
            },
            "Planning Time": 0.2,
            "Execution Time": 12.5
        }]);
        let sample = PlanSample::from_json("rewrite", "by_department", &doc).unwrap();
        assert_eq!(sample.scan_strategy, ScanStrategy::IndexOnly);
        assert_eq!(sample.heap_fetches, 2);
        assert!(!sample.correlated_subquery);
        assert_eq!(
            sample.nodes[1].index_name.as_deref(),
            Some("idx_toll_flow_admin_cutoff_cov")
        );
    }

    #[test]
    fn test_json_initplan_is_not_correlated() {
        let doc = json!({
            "Plan": {
                "Node Type": "Seq Scan",
                "Relation Name": "toll_flow",
                "Total Cost": 10.0,
                "Plan Rows": 1,
                "Plans": [{
                    "Node Type": "Result",
                    "Parent Relationship": "InitPlan",
                    "Total Cost": 0.5,
                    "Plan Rows": 1,
                    "Actual Loops": 1
                }]
            }
        });
        let sample = PlanSample::from_json("v", "i", &doc).unwrap();
        assert!(!sample.correlated_subquery);
        assert_eq!(sample.subplan_loops, 0);
    }

    #[test]
    fn test_json_missing_plan_is_error() {
        let result = PlanSample::from_json("v", "i", &json!([{"Execution Time": 1.0}]));
        assert!(matches!(result, Err(BenchError::PlanParse(_))));
    }

    const TEXT_PLAN: &str = "\
HashAggregate  (cost=98210.50..98210.64 rows=11 width=72) (actual time=6120.101..6120.120 rows=11 loops=1)
  Group Key: f.department
  Buffers: shared hit=120 read=40000
  ->  Seq Scan on toll_flow f  (cost=0.00..91000.00 rows=5000 width=24) (actual time=0.031..5800.2 rows=5100 loops=1)
        Filter: (((administrator)::text = 'CONCESION'::text) AND (upper(TRIM(BOTH FROM toll_name)) ~~ '%SUR'::text))
        Rows Removed by Filter: 1994900
  SubPlan 1
    ->  Aggregate  (cost=88000.00..88000.01 rows=1 width=32) (actual time=530.2..530.2 rows=1 loops=11)
          ->  Seq Scan on toll_flow g  (cost=0.00..87000.00 rows=460 width=6) (actual time=0.02..529.9 rows=463 loops=11)
                Filter: ((department)::text = (f.department)::text)
Planning Time: 0.410 ms
Execution Time: 6120.900 ms";

    #[test]
    fn test_text_plan_with_subplan() {
        let sample = PlanSample::from_text("baseline", "by_department", TEXT_PLAN).unwrap();
        assert_eq!(sample.nodes.len(), 4);
        assert_eq!(sample.scan_strategy, ScanStrategy::Sequential);
        assert!(sample.correlated_subquery);
        assert_eq!(sample.subplan_loops, 11);
        assert_eq!(sample.nodes[1].relation.as_deref(), Some("toll_flow"));
        assert_eq!(sample.nodes[3].section, PlanSection::SubPlan);
        assert!(!sample.nodes[3].section_root);
        assert_eq!(sample.estimated_cost, 98210.64);
        assert_eq!(sample.execution_ms, 6120.9);
        assert_eq!(sample.shared_hit_blocks, 120);
        assert_eq!(sample.shared_read_blocks, 40000);
    }

    #[test]
    fn test_text_index_only_scan() {
        let text = "\
GroupAggregate  (cost=0.43..310.20 rows=11 width=72) (actual time=0.9..12.1 rows=11 loops=1)
  ->  Index Only Scan using idx_toll_flow_admin_cutoff_cov on toll_flow  (cost=0.43..290.00 rows=4800 width=30) (actual time=0.02..10.4 rows=4790 loops=1)
        Index Cond: ((administrator = 'CONCESION'::text) AND (cutoff_date >= '20240101'::numeric))
        Heap Fetches: 3
Planning Time: 0.2 ms
Execution Time: 12.5 ms";
        let sample = PlanSample::from_text("rewrite", "by_department", text).unwrap();
        assert_eq!(sample.scan_strategy, ScanStrategy::IndexOnly);
        assert_eq!(sample.heap_fetches, 3);
        assert_eq!(
            sample.nodes[1].index_name.as_deref(),
            Some("idx_toll_flow_admin_cutoff_cov")
        );
        assert!(!sample.correlated_subquery);
    }

    #[test]
    fn test_text_parallel_seq_scan_normalised() {
        let text = "\
Gather  (cost=1000.00..50000.00 rows=10 width=8) (actual time=1.0..900.0 rows=10 loops=1)
  ->  Parallel Seq Scan on toll_flow  (cost=0.00..48000.00 rows=4 width=8) (actual time=0.5..890.0 rows=3 loops=3)
Execution Time: 901.0 ms";
        let sample = PlanSample::from_text("v", "i", text).unwrap();
        assert_eq!(sample.nodes[1].node_type, "Seq Scan");
        assert!(sample.nodes[1].parallel);
        assert_eq!(sample.scan_strategy, ScanStrategy::Sequential);
    }

    #[test]
    fn test_text_backward_index_only_scan() {
        let text = "\
Limit  (cost=0.43..1.20 rows=10 width=12) (actual time=0.02..0.05 rows=10 loops=1)
  ->  Index Only Scan Backward using idx_toll_flow_admin_cutoff_cov on toll_flow  (cost=0.43..5223.54 rows=30883 width=12) (actual time=0.02..0.04 rows=10 loops=1)
        Heap Fetches: 0
Execution Time: 0.1 ms";
        let sample = PlanSample::from_text("latest", "i", text).unwrap();
        assert_eq!(sample.nodes[1].node_type, "Index Only Scan");
        assert!(!sample.nodes[1].parallel);
        assert_eq!(
            sample.nodes[1].index_name.as_deref(),
            Some("idx_toll_flow_admin_cutoff_cov")
        );
        assert_eq!(sample.scan_strategy, ScanStrategy::IndexOnly);
    }

    #[test]
    fn test_text_without_nodes_is_error() {
        assert!(PlanSample::from_text("v", "i", "Planning Time: 1.0 ms").is_err());
    }
}
