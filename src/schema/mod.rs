//! Flow table definition
//!
//! Describes the `toll_flow` table, its derived columns and the indexes the
//! query variants depend on. The loader in `loader` turns these definitions
//! into DDL.

pub mod loader;

pub use loader::SchemaLoader;

use serde::{Deserialize, Serialize};

pub const TABLE_NAME: &str = "toll_flow";

/// Number of columns written by the generator.
pub const BASE_COLUMN_COUNT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    #[serde(default)]
    pub primary_key: bool,
}

/// Stored generated column computed from base columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedColumnDef {
    pub name: String,
    pub sql_type: String,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    SingleColumn,
    Composite,
    Covering,
    Trigram,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexKind,

    /// Key columns, or a single expression for trigram indexes
    pub keys: Vec<String>,

    /// Non-key payload columns (`INCLUDE`)
    #[serde(default)]
    pub include: Vec<String>,
}

impl IndexDef {
    /// Render the `CREATE INDEX` statement against `qualified_table`.
    pub fn create_sql(&self, qualified_table: &str) -> String {
        match self.kind {
            IndexKind::Trigram => format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING gin (({}) gin_trgm_ops)",
                self.name,
                qualified_table,
                self.keys.join(", ")
            ),
            _ => {
                let mut sql = format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    self.name,
                    qualified_table,
                    self.keys.join(", ")
                );
                if !self.include.is_empty() {
                    sql.push_str(&format!(" INCLUDE ({})", self.include.join(", ")));
                }
                sql
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub derived_columns: Vec<DerivedColumnDef>,
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                if c.primary_key {
                    format!("    {} {} PRIMARY KEY", c.name, c.sql_type)
                } else {
                    format!("    {} {}", c.name, c.sql_type)
                }
            })
            .collect();
        format!(
            "CREATE TABLE {} (\n{}\n)",
            self.qualified_name(),
            columns.join(",\n")
        )
    }

    pub fn derived_column_sql(&self, derived: &DerivedColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {} GENERATED ALWAYS AS ({}) STORED",
            self.qualified_name(),
            derived.name,
            derived.sql_type,
            derived.expression
        )
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
            || self.derived_columns.iter().any(|d| d.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

fn column(name: &str, sql_type: &str) -> ColumnDef {
    ColumnDef {
        name: name.to_string(),
        sql_type: sql_type.to_string(),
        primary_key: false,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// The traffic-flow table used by every experiment.
pub fn flow_table(schema: &str) -> TableDef {
    let mut columns = vec![ColumnDef {
        name: "id".to_string(),
        sql_type: "NUMERIC(12)".to_string(),
        primary_key: true,
    }];
    columns.extend([
        column("administrator", "VARCHAR(30)"),
        column("department", "VARCHAR(60)"),
        column("toll_name", "VARCHAR(80)"),
        column("toll_code", "VARCHAR(12)"),
        column("route_code", "VARCHAR(12)"),
        column("light_total", "NUMERIC(12)"),
        column("bus_total", "NUMERIC(12)"),
        column("truck_c2", "NUMERIC(12)"),
        column("truck_c3", "NUMERIC(12)"),
        column("truck_c4", "NUMERIC(12)"),
        column("truck_c5", "NUMERIC(12)"),
        column("heavy_total", "NUMERIC(12)"),
        column("exempt_total", "NUMERIC(12)"),
        column("total_vehicles", "NUMERIC(12)"),
        column("imd_light", "NUMERIC(12,2)"),
        column("imd_bus", "NUMERIC(12,2)"),
        column("imd_heavy", "NUMERIC(12,2)"),
        column("imd_total", "NUMERIC(12,2)"),
        column("cutoff_date", "NUMERIC(8)"),
    ]);

    let derived_columns = vec![
        DerivedColumnDef {
            name: "region".to_string(),
            sql_type: "VARCHAR(10)".to_string(),
            expression: "CASE \
                WHEN lower(trim(toll_name)) LIKE '%sur' THEN 'SUR' \
                WHEN lower(trim(toll_name)) LIKE '%norte' THEN 'NORTE' \
                ELSE 'CENTRO' END"
                .to_string(),
        },
        DerivedColumnDef {
            name: "cutoff_day".to_string(),
            sql_type: "DATE".to_string(),
            expression: "make_date(\
                div(cutoff_date, 10000)::int, \
                (div(cutoff_date, 100) % 100)::int, \
                (cutoff_date % 100)::int)"
                .to_string(),
        },
    ];

    let indexes = vec![
        IndexDef {
            name: "idx_toll_flow_department".to_string(),
            kind: IndexKind::SingleColumn,
            keys: strings(&["department"]),
            include: Vec::new(),
        },
        IndexDef {
            name: "idx_toll_flow_admin_cutoff".to_string(),
            kind: IndexKind::Composite,
            keys: strings(&["administrator", "cutoff_date"]),
            include: Vec::new(),
        },
        IndexDef {
            name: "idx_toll_flow_admin_cutoff_cov".to_string(),
            kind: IndexKind::Covering,
            keys: strings(&["administrator", "cutoff_date"]),
            include: strings(&["toll_name", "department", "light_total", "imd_heavy"]),
        },
        IndexDef {
            name: "idx_toll_flow_toll_name_trgm".to_string(),
            kind: IndexKind::Trigram,
            keys: strings(&["lower(trim(toll_name))"]),
            include: Vec::new(),
        },
        IndexDef {
            name: "idx_toll_flow_region_admin_day".to_string(),
            kind: IndexKind::Covering,
            keys: strings(&["region", "administrator", "cutoff_day"]),
            include: strings(&["department", "light_total", "imd_heavy"]),
        },
    ];

    TableDef {
        schema: schema.to_string(),
        name: TABLE_NAME.to_string(),
        columns,
        derived_columns,
        indexes,
    }
}
