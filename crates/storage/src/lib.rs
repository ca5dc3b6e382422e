//! Storage layer: SQLite persistence of scan results.
//!
//! Holds DB pool setup, the migration runner and scan/finding queries.

pub mod models;

use codeguard_core::models::ScanResult;
use models::{FindingRow, ScanOverview, ScanRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
pub use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        url = format!("sqlite://{norm}");
    }
    let opts = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let max_connections = if url.contains("memory") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts or replaces a scan together with its findings.
pub async fn save_scan(pool: &SqlitePool, result: &ScanResult) -> anyhow::Result<()> {
    let row = ScanRow::from_result(result)?;
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO scans (scan_id, status, repository_source, started_at, completed_at, total_files, scanned_files, summary_json)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(scan_id) DO UPDATE SET
           status = excluded.status,
           repository_source = excluded.repository_source,
           started_at = excluded.started_at,
           completed_at = excluded.completed_at,
           total_files = excluded.total_files,
           scanned_files = excluded.scanned_files,
           summary_json = excluded.summary_json",
    )
    .bind(&row.scan_id)
    .bind(&row.status)
    .bind(&row.repository_source)
    .bind(&row.started_at)
    .bind(&row.completed_at)
    .bind(row.total_files)
    .bind(row.scanned_files)
    .bind(&row.summary_json)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM findings WHERE scan_id = ?")
        .bind(&row.scan_id)
        .execute(&mut *tx)
        .await?;

    for (position, finding) in result.findings.iter().enumerate() {
        let f = FindingRow::from_finding(&result.scan_id, position, finding);
        sqlx::query(
            "INSERT INTO findings (id, scan_id, position, kind, severity, title, description, file_path,
                                   start_line, end_line, function_name, rule_id, cwe_id, owasp_category,
                                   suggestion, code_snippet, fixed_code)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(f.id)
        .bind(f.scan_id)
        .bind(f.position)
        .bind(f.kind)
        .bind(f.severity)
        .bind(f.title)
        .bind(f.description)
        .bind(f.file_path)
        .bind(f.start_line)
        .bind(f.end_line)
        .bind(f.function_name)
        .bind(f.rule_id)
        .bind(f.cwe_id)
        .bind(f.owasp_category)
        .bind(f.suggestion)
        .bind(f.code_snippet)
        .bind(f.fixed_code)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    debug!(scan_id = %result.scan_id, findings = result.findings.len(), "scan saved");
    Ok(())
}

pub async fn get_scan(pool: &SqlitePool, scan_id: &str) -> anyhow::Result<Option<ScanResult>> {
    let row: Option<ScanRow> = sqlx::query_as("SELECT * FROM scans WHERE scan_id = ?")
        .bind(scan_id)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let finding_rows: Vec<FindingRow> =
        sqlx::query_as("SELECT * FROM findings WHERE scan_id = ? ORDER BY position")
            .bind(scan_id)
            .fetch_all(pool)
            .await?;
    let findings = finding_rows
        .into_iter()
        .map(FindingRow::into_finding)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Some(row.into_overview()?.with_findings(findings)))
}

/// Newest first.
pub async fn list_scans(pool: &SqlitePool, limit: i64, offset: i64) -> anyhow::Result<Vec<ScanOverview>> {
    let rows: Vec<ScanRow> = sqlx::query_as("SELECT * FROM scans ORDER BY started_at DESC LIMIT ? OFFSET ?")
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(ScanRow::into_overview).collect()
}

/// Returns `false` when no such scan was stored.
pub async fn delete_scan(pool: &SqlitePool, scan_id: &str) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM findings WHERE scan_id = ?")
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;
    let res = sqlx::query("DELETE FROM scans WHERE scan_id = ?")
        .bind(scan_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(res.rows_affected() > 0)
}
