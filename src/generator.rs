//! Synthetic Data Generator
//!
//! Produces `FlowRecord`s with sequential identifiers, categorical fields
//! picked cyclically from small vocabularies and bounded pseudo-random
//! numeric fields. A seed and a row count fully determine the output.

use crate::config::HarnessConfig;
use crate::error::{BenchError, Result};
use crate::schema::TableDef;
use chrono::{Datelike, Duration, Months, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Instant;
use tracing::{debug, info};

pub const ADMINISTRATORS: [&str; 3] = ["CONCESION", "INVIAS", "ANI"];

pub const DEPARTMENTS: [&str; 11] = [
    "ANTIOQUIA",
    "ATLANTICO",
    "BOLIVAR",
    "BOYACA",
    "CAUCA",
    "CUNDINAMARCA",
    "HUILA",
    "META",
    "NARINO",
    "SANTANDER",
    "VALLE DEL CAUCA",
];

/// Mixed case and padding on purpose: only a trimmed, lowered comparison
/// finds every station ending in "sur".
pub const TOLL_NAMES: [&str; 13] = [
    "Circasia Sur",
    "PAPIROS",
    " El Triunfo SUR ",
    "Chusaca sur",
    "Los Patios Norte",
    "Amaga",
    "Turbaco Sur  ",
    "La Caimanera",
    "Pipiral",
    "Siberia NORTE",
    "Betania Sur",
    "Mamonal",
    "Neiva Centro",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub id: i64,
    pub administrator: String,
    pub department: String,
    pub toll_name: String,
    pub toll_code: String,
    pub route_code: String,
    pub light_total: i64,
    pub bus_total: i64,
    pub truck_c2: i64,
    pub truck_c3: i64,
    pub truck_c4: i64,
    pub truck_c5: i64,
    pub heavy_total: i64,
    pub exempt_total: i64,
    pub total_vehicles: i64,
    pub imd_light: f64,
    pub imd_bus: f64,
    pub imd_heavy: f64,
    pub imd_total: f64,
    pub cutoff_date: NaiveDate,
}

impl FlowRecord {
    /// Cutoff encoded the way the table stores it.
    pub fn cutoff_yyyymmdd(&self) -> i64 {
        encode_yyyymmdd(self.cutoff_date)
    }
}

pub fn encode_yyyymmdd(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

/// Half-open `[start, end)` range of allowed cutoff dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Two calendar years starting at `start`.
    pub fn two_years_from(start: NaiveDate) -> Result<Self> {
        let end = start.checked_add_months(Months::new(24)).ok_or_else(|| {
            BenchError::Config(format!("window start {} is out of range", start))
        })?;
        Ok(Self { start, end })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

/// Deterministic stream of synthetic rows
pub struct FlowGenerator {
    rng: StdRng,
    window: DateWindow,
    next_id: i64,
    remaining: u64,
}

impl FlowGenerator {
    pub fn new(rows: u64, seed: u64, window: DateWindow) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            window,
            next_id: 1,
            remaining: rows,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        let window = DateWindow::two_years_from(config.window_start)?;
        Ok(Self::new(config.rows, config.seed, window))
    }

    fn make_record(&mut self, id: i64) -> FlowRecord {
        let i = (id - 1) as usize;
        let toll_index = i % TOLL_NAMES.len();

        let light_total = self.rng.gen_range(0..=5_000);
        let bus_total = self.rng.gen_range(0..=800);
        let truck_c2 = self.rng.gen_range(0..=1_200);
        let truck_c3 = self.rng.gen_range(0..=600);
        let truck_c4 = self.rng.gen_range(0..=400);
        let truck_c5 = self.rng.gen_range(0..=300);
        let heavy_total = truck_c2 + truck_c3 + truck_c4 + truck_c5;
        let exempt_total = self.rng.gen_range(0..=150);
        let total_vehicles = light_total + bus_total + heavy_total + exempt_total;

        let imd_light = round2(self.rng.gen_range(0.0..2_000.0));
        let imd_bus = round2(self.rng.gen_range(0.0..300.0));
        let imd_heavy = round2(self.rng.gen_range(0.0..900.0));
        let imd_total = round2(imd_light + imd_bus + imd_heavy);

        let offset = self.rng.gen_range(0..self.window.days());
        let cutoff_date = self.window.start + Duration::days(offset);

        FlowRecord {
            id,
            administrator: ADMINISTRATORS[i % ADMINISTRATORS.len()].to_string(),
            department: DEPARTMENTS[i % DEPARTMENTS.len()].to_string(),
            toll_name: TOLL_NAMES[toll_index].to_string(),
            toll_code: format!("PJ{:03}", toll_index + 1),
            route_code: format!("RN{:02}", (i % 7) * 5 + 25),
            light_total,
            bus_total,
            truck_c2,
            truck_c3,
            truck_c4,
            truck_c5,
            heavy_total,
            exempt_total,
            total_vehicles,
            imd_light,
            imd_bus,
            imd_heavy,
            imd_total,
            cutoff_date,
        }
    }
}

impl Iterator for FlowGenerator {
    type Item = FlowRecord;

    fn next(&mut self) -> Option<FlowRecord> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let id = self.next_id;
        self.next_id += 1;
        Some(self.make_record(id))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Writes generated rows in multi-row INSERT batches inside one transaction.
pub struct DataLoader {
    pool: PgPool,
    batch_size: usize,
}

impl DataLoader {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self { pool, batch_size }
    }

    /// Insert every record from `generator`. Any failure rolls back the whole load.
    pub async fn insert_all(&self, table: &TableDef, generator: FlowGenerator) -> Result<u64> {
        let started = Instant::now();
        let expected = generator.size_hint().0;
        info!("Generating {} rows into {}", expected, table.qualified_name());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BenchError::Generation(format!("Failed to open transaction: {}", e)))?;

        let mut inserted: u64 = 0;
        let mut batch = Vec::with_capacity(self.batch_size);

        for record in generator {
            batch.push(record);
            if batch.len() == self.batch_size {
                inserted += insert_batch(&mut tx, table, &batch).await?;
                batch.clear();
                if inserted % 100_000 < self.batch_size as u64 {
                    debug!("{} rows inserted", inserted);
                }
            }
        }
        if !batch.is_empty() {
            inserted += insert_batch(&mut tx, table, &batch).await?;
        }

        tx.commit()
            .await
            .map_err(|e| BenchError::Generation(format!("Failed to commit rows: {}", e)))?;

        info!(
            "Inserted {} rows in {:.1}s",
            inserted,
            started.elapsed().as_secs_f64()
        );
        Ok(inserted)
    }
}

async fn insert_batch(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    table: &TableDef,
    batch: &[FlowRecord],
) -> Result<u64> {
    let base_columns: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        table.qualified_name(),
        base_columns.join(", ")
    ));

    builder.push_values(batch, |mut row, r| {
        row.push_bind(r.id)
            .push_bind(r.administrator.as_str())
            .push_bind(r.department.as_str())
            .push_bind(r.toll_name.as_str())
            .push_bind(r.toll_code.as_str())
            .push_bind(r.route_code.as_str())
            .push_bind(r.light_total)
            .push_bind(r.bus_total)
            .push_bind(r.truck_c2)
            .push_bind(r.truck_c3)
            .push_bind(r.truck_c4)
            .push_bind(r.truck_c5)
            .push_bind(r.heavy_total)
            .push_bind(r.exempt_total)
            .push_bind(r.total_vehicles)
            .push_bind(r.imd_light)
            .push_bind(r.imd_bus)
            .push_bind(r.imd_heavy)
            .push_bind(r.imd_total)
            .push_bind(r.cutoff_yyyymmdd());
    });

    let result = builder.build().execute(&mut **tx).await.map_err(|e| {
        let first = batch.first().map(|r| r.id).unwrap_or_default();
        BenchError::Generation(format!("Batch starting at id {} failed: {}", first, e))
    })?;

    Ok(result.rows_affected())
}
