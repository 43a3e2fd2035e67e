//! Additive package steps
//!
//! After creation a package only ever grows: new layers, new CVAP columns,
//! new overlay columns. Each growth step is a [`MigrationStep`] that declares
//! the precondition under which it still has work to do. When the precondition
//! no longer holds the step has already been applied and is skipped, never
//! retried, which makes every pipeline pass safe to re-run.
//!
//! Applied steps are recorded in `rdpkg_provenance` with a JSON summary. A
//! column step counts as applied only when its columns exist and its
//! provenance row was written, so a step interrupted between adding columns
//! and filling them is run again from the start.

use crate::db::schema_sync::SchemaIntrospector;
use crate::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::future::Future;
use tracing::{info, warn};

/// What must still be true for a step to have work to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The table does not exist yet
    TableAbsent { table: String },
    /// At least one of the columns is missing from an existing table
    ColumnsAbsent { table: String, columns: Vec<String> },
}

/// An additive, idempotent package change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    /// Provenance key, e.g. `cvap:tract20`
    pub name: String,
    pub precondition: Precondition,
}

/// Result of running a step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Applied(T),
    AlreadyApplied,
}

impl<T> StepOutcome<T> {
    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

impl MigrationStep {
    pub fn table_absent(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            precondition: Precondition::TableAbsent {
                table: table.into(),
            },
        }
    }

    pub fn columns_absent(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            precondition: Precondition::ColumnsAbsent {
                table: table.into(),
                columns: columns.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Whether the step's precondition no longer holds
    pub async fn is_applied(&self, pool: &SqlitePool) -> Result<bool> {
        match &self.precondition {
            Precondition::TableAbsent { table } => {
                SchemaIntrospector::table_exists(pool, table).await
            }
            Precondition::ColumnsAbsent { table, columns } => {
                if !SchemaIntrospector::table_exists(pool, table).await? {
                    return Err(Error::NotFound(format!("table '{}'", table)));
                }
                let existing = SchemaIntrospector::column_names(pool, table).await?;
                if !columns.iter().all(|c| existing.contains(c)) {
                    return Ok(false);
                }
                if provenance_recorded(pool, &self.name).await? {
                    return Ok(true);
                }
                warn!(step = %self.name, table = %table, "Columns present but step never completed, re-applying");
                Ok(false)
            }
        }
    }
}

/// Run `apply` unless the step is already applied, then record provenance
pub async fn run_step<T, E, F, Fut>(
    pool: &SqlitePool,
    step: &MigrationStep,
    apply: F,
) -> std::result::Result<StepOutcome<T>, E>
where
    T: Serialize,
    E: From<Error>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    if step.is_applied(pool).await? {
        info!(step = %step.name, "Step already applied, skipping");
        return Ok(StepOutcome::AlreadyApplied);
    }

    let value = apply().await?;
    record_provenance(pool, &step.name, &value).await?;
    info!(step = %step.name, "Step applied");
    Ok(StepOutcome::Applied(value))
}

/// Upsert a provenance row for `step`
pub async fn record_provenance<T: Serialize>(pool: &SqlitePool, step: &str, details: &T) -> Result<()> {
    let details = serde_json::to_string(details)
        .map_err(|e| Error::Internal(format!("provenance serialization failed: {}", e)))?;
    sqlx::query(
        r#"
        INSERT INTO rdpkg_provenance (step, applied_at, details)
        VALUES (?, ?, ?)
        ON CONFLICT(step) DO UPDATE SET applied_at = excluded.applied_at, details = excluded.details
        "#,
    )
    .bind(step)
    .bind(chrono::Utc::now())
    .bind(details)
    .execute(pool)
    .await?;
    Ok(())
}

/// Whether `step` has a provenance row
pub async fn provenance_recorded(pool: &SqlitePool, step: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM rdpkg_provenance WHERE step = ?")
        .bind(step)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

/// Provenance details of every step whose name starts with `prefix`
pub async fn provenance_details(pool: &SqlitePool, prefix: &str) -> Result<Vec<(String, serde_json::Value)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT step, details FROM rdpkg_provenance WHERE substr(step, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .fetch_all(pool)
            .await?;
    rows.into_iter()
        .map(|(step, details)| {
            let value = serde_json::from_str(&details)
                .map_err(|e| Error::Internal(format!("provenance for '{}' is not JSON: {}", step, e)))?;
            Ok((step, value))
        })
        .collect()
}

/// Steps recorded so far, oldest first
pub async fn applied_steps(pool: &SqlitePool) -> Result<Vec<String>> {
    let steps = sqlx::query_scalar("SELECT step FROM rdpkg_provenance ORDER BY applied_at, step")
        .fetch_all(pool)
        .await?;
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_core_tables;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_core_tables(&pool).await.unwrap();
        sqlx::query("CREATE TABLE block20 (geoid TEXT, pop_total INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_columns_absent_runs_once() {
        let pool = setup_test_db().await;
        let step = MigrationStep::columns_absent("cvap:block20", "block20", ["cvap_total"]);

        let writer = pool.clone();
        let first: StepOutcome<usize> = run_step(&pool, &step, move || async move {
            sqlx::query("ALTER TABLE block20 ADD COLUMN cvap_total REAL")
                .execute(&writer)
                .await
                .map_err(Error::from)?;
            Ok::<_, Error>(3)
        })
        .await
        .unwrap();
        assert_eq!(first, StepOutcome::Applied(3));

        let second: StepOutcome<usize> = run_step(&pool, &step, || async {
            Err::<usize, Error>(Error::Internal("must not run".into()))
        })
        .await
        .unwrap();
        assert_eq!(second, StepOutcome::AlreadyApplied);

        assert_eq!(applied_steps(&pool).await.unwrap(), vec!["cvap:block20".to_string()]);
    }

    #[tokio::test]
    async fn test_table_absent_precondition() {
        let pool = setup_test_db().await;
        assert!(MigrationStep::table_absent("layer:block20", "block20")
            .is_applied(&pool)
            .await
            .unwrap());
        assert!(!MigrationStep::table_absent("layer:tract20", "tract20")
            .is_applied(&pool)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_columns_absent_on_missing_table_is_not_found() {
        let pool = setup_test_db().await;
        let step = MigrationStep::columns_absent("x", "nope", ["a"]);
        assert!(matches!(step.is_applied(&pool).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_interrupted_step_is_reapplied() {
        let pool = setup_test_db().await;
        let step = MigrationStep::columns_absent("voter:block20", "block20", ["reg_total"]);

        // Columns added, then the step stopped before completing
        let writer = pool.clone();
        let interrupted: std::result::Result<StepOutcome<()>, Error> = run_step(&pool, &step, move || async move {
            sqlx::query("ALTER TABLE block20 ADD COLUMN reg_total INTEGER")
                .execute(&writer)
                .await
                .map_err(Error::from)?;
            Err(Error::Internal("stopped".into()))
        })
        .await;
        assert!(interrupted.is_err());
        assert!(!step.is_applied(&pool).await.unwrap());

        let resumed: StepOutcome<u8> = run_step(&pool, &step, || async { Ok::<_, Error>(1) }).await.unwrap();
        assert_eq!(resumed, StepOutcome::Applied(1));
        assert!(step.is_applied(&pool).await.unwrap());
        assert!(provenance_recorded(&pool, "voter:block20").await.unwrap());
    }

    #[tokio::test]
    async fn test_provenance_details_by_prefix() {
        let pool = setup_test_db().await;
        record_provenance(&pool, "equivalency:block20:a.csv", &serde_json::json!({"columns": ["district"]}))
            .await
            .unwrap();
        record_provenance(&pool, "voter:block20", &serde_json::json!({"rows": 3})).await.unwrap();

        let found = provenance_details(&pool, "equivalency:block20:").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1["columns"][0], "district");
    }

    #[tokio::test]
    async fn test_failed_step_records_nothing() {
        let pool = setup_test_db().await;
        let step = MigrationStep::columns_absent("voter:block20", "block20", ["reg_total"]);
        let result: std::result::Result<StepOutcome<()>, Error> =
            run_step(&pool, &step, || async { Err(Error::Internal("boom".into())) }).await;
        assert!(result.is_err());
        assert!(applied_steps(&pool).await.unwrap().is_empty());
    }
}
