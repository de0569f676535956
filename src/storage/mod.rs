use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::models::{ProcessRecord, ScanReport};

const REPORTS_DIR: &str = "reports";
const LOGS_DIR: &str = "logs";
const AUDIT_DB: &str = "monitoring_audit.db";

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path_for(&self, report: &ScanReport) -> PathBuf {
        self.dir.join(format!(
            "detection_report_{}.json",
            report.timestamp.format("%Y%m%d_%H%M%S")
        ))
    }

    pub fn write(&self, report: &ScanReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed creating report directory {}", self.dir.display())
        })?;

        let path = self.path_for(report);
        let payload =
            serde_json::to_string_pretty(report).context("failed serializing scan report")?;
        fs::write(&path, payload)
            .with_context(|| format!("failed writing scan report to {}", path.display()))?;
        Ok(path)
    }

    /// Re-reads a persisted report. Only the tests consume reports today.
    #[cfg(test)]
    pub fn load(path: &Path) -> Result<ScanReport> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read scan report from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing scan report {}", path.display()))
    }
}

/// Append-only record of sampled processes, one row per process per cycle.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub timestamp_utc: String,
    pub pid: u32,
    pub name: String,
    pub path: String,
}

impl AuditLog {
    pub fn open(path: PathBuf) -> Result<Self> {
        let log = Self { path };
        log.init()?;
        Ok(log)
    }

    pub fn append(&self, timestamp: DateTime<Utc>, records: &[ProcessRecord]) -> Result<usize> {
        let mut conn = self.open_connection()?;
        let tx = conn
            .transaction()
            .context("failed starting audit log transaction")?;
        let stamp = timestamp.to_rfc3339();
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO process_audit (timestamp_utc, pid, name, path)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .context("failed preparing audit insert")?;
            for record in records {
                stmt.execute(params![
                    stamp,
                    record.pid,
                    record.name,
                    record.executable_path.as_deref().unwrap_or("N/A")
                ])
                .with_context(|| format!("failed inserting audit row for pid {}", record.pid))?;
            }
        }
        tx.commit().context("failed committing audit log rows")?;
        Ok(records.len())
    }

    #[cfg(test)]
    pub fn rows(&self) -> Result<Vec<AuditRow>> {
        let conn = self.open_connection()?;
        let mut stmt = conn
            .prepare("SELECT timestamp_utc, pid, name, path FROM process_audit ORDER BY id ASC")
            .context("failed preparing audit row query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AuditRow {
                    timestamp_utc: row.get(0)?,
                    pid: row.get(1)?,
                    name: row.get(2)?,
                    path: row.get(3)?,
                })
            })
            .context("failed querying audit rows")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed reading audit rows")
    }

    fn init(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating audit log directory {}", parent.display())
            })?;
        }

        let conn = self.open_connection()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS process_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_utc TEXT NOT NULL,
                pid INTEGER NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_process_audit_timestamp ON process_audit(timestamp_utc);
            ",
        )
        .context("failed initializing sqlite audit log schema")?;
        Ok(())
    }

    fn open_connection(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .with_context(|| format!("failed opening sqlite audit log {}", self.path.display()))
    }
}

/// Where each cycle's report and audit sample end up.
#[derive(Debug, Clone)]
pub struct ReportSink {
    reports: ReportStore,
    audit_path: PathBuf,
}

impl ReportSink {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            reports: ReportStore::new(output_dir.join(REPORTS_DIR)),
            audit_path: output_dir.join(LOGS_DIR).join(AUDIT_DB),
        }
    }

    pub fn write_report(&self, report: &ScanReport) -> Result<PathBuf> {
        self.reports.write(report)
    }

    pub fn append_audit(&self, timestamp: DateTime<Utc>, records: &[ProcessRecord]) -> Result<usize> {
        AuditLog::open(self.audit_path.clone())?.append(timestamp, records)
    }

    #[cfg(test)]
    pub fn audit_log(&self) -> Result<AuditLog> {
        AuditLog::open(self.audit_path.clone())
    }
}
