pub mod paths;
pub mod process_collector;
pub mod service_collector;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::detection::aggregator::{aggregate, build_report, ReportInput};
use crate::detection::{self, Snapshot};
use crate::models::{
    Alert, CollectionStats, ProcessRecord, RunOptions, ScanReport, ServiceRecord, Severity,
};
use crate::storage::ReportSink;

/// Items returned by one enumeration pass plus the number of entries that
/// could not be read and were left out.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub skipped: usize,
}

impl<T> Collected<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            skipped: 0,
        }
    }
}

impl<T> Default for Collected<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// Point-in-time source of process and service records.
pub trait SnapshotCollector {
    fn enumerate_processes(&mut self) -> Collected<ProcessRecord>;
    fn enumerate_services(&mut self) -> Collected<ServiceRecord>;
}

fn collect_snapshot<C>(collector: &mut C) -> Snapshot
where
    C: SnapshotCollector + ?Sized,
{
    let taken_at = Utc::now();
    let processes = collector.enumerate_processes();
    let services = collector.enumerate_services();

    if processes.skipped > 0 || services.skipped > 0 {
        warn!(
            component = "collector",
            skipped_processes = processes.skipped,
            skipped_services = services.skipped,
            "partial snapshot, some entries could not be read"
        );
    }
    debug!(
        component = "collector",
        processes = processes.items.len(),
        services = services.items.len(),
        "snapshot collected"
    );

    Snapshot {
        taken_at,
        collection: CollectionStats {
            skipped_processes: processes.skipped,
            skipped_services: services.skipped,
        },
        processes: processes.items,
        services: services.items,
    }
}

fn log_alert(alert: &Alert) {
    match alert.severity {
        Severity::High => warn!(
            component = "aggregator",
            alert_id = %alert.id,
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            subject = %alert.subject,
            "alert raised"
        ),
        Severity::Medium | Severity::Low => info!(
            component = "aggregator",
            alert_id = %alert.id,
            alert_type = alert.alert_type.as_str(),
            severity = alert.severity.as_str(),
            subject = %alert.subject,
            "alert raised"
        ),
    }
}

/// Runs one full cycle: collect, detect, aggregate, report. Collection and
/// persistence run on the blocking pool. Sink failures are logged and the
/// report is still returned to the caller.
pub async fn run_scan_cycle<C>(
    collector: &Arc<Mutex<C>>,
    config: &Arc<AgentConfig>,
    sink: &ReportSink,
) -> Result<ScanReport>
where
    C: SnapshotCollector + Send + 'static,
{
    let collector = collector.clone();
    let snapshot = tokio::task::spawn_blocking(move || {
        let mut collector = collector
            .lock()
            .map_err(|_| anyhow!("snapshot collector lock poisoned"))?;
        Ok::<_, anyhow::Error>(collect_snapshot(&mut *collector))
    })
    .await
    .context("snapshot collection task failed")??;

    let snapshot = Arc::new(snapshot);
    let findings = detection::detect_concurrently(snapshot.clone(), config.clone()).await?;
    let alerts = aggregate(findings, Utc::now());
    for alert in &alerts {
        log_alert(alert);
    }

    let report = Arc::new(build_report(
        ReportInput {
            timestamp: snapshot.taken_at,
            processes: &snapshot.processes,
            total_services: snapshot.services.len(),
            collection: snapshot.collection,
            sample_size: config.report_sample_size,
        },
        alerts,
    ));

    let audit_len = config.audit_sample_size.min(snapshot.processes.len());
    let audit_sample = snapshot.processes[..audit_len].to_vec();
    let taken_at = snapshot.taken_at;
    let persisted = {
        let sink = sink.clone();
        let report = report.clone();
        tokio::task::spawn_blocking(move || {
            match sink.write_report(&report) {
                Ok(path) => debug!(component = "sink", path = %path.display(), "report written"),
                Err(err) => error!(component = "sink", "failed to persist scan report: {err:#}"),
            }
            if let Err(err) = sink.append_audit(taken_at, &audit_sample) {
                error!(component = "sink", "failed to append audit records: {err:#}");
            }
        })
        .await
    };
    if let Err(err) = persisted {
        error!(component = "sink", "persistence task failed: {err}");
    }
    let report = Arc::unwrap_or_clone(report);

    let histogram = &report.summary.severity_histogram;
    info!(
        component = "scheduler",
        processes = report.summary.total_processes,
        services = report.summary.total_services,
        alerts = report.summary.total_alerts,
        high = histogram.high,
        medium = histogram.medium,
        low = histogram.low,
        "scan cycle complete"
    );
    Ok(report)
}

/// Drives scan cycles until single-shot completion or shutdown. The shutdown
/// flag is only consulted between cycles; a running cycle always finishes.
/// Returns the number of completed cycles.
pub async fn start_monitoring<C>(
    options: &RunOptions,
    collector: Arc<Mutex<C>>,
    config: Arc<AgentConfig>,
    sink: &ReportSink,
    mut shutdown: watch::Receiver<bool>,
) -> usize
where
    C: SnapshotCollector + Send + 'static,
{
    let interval = Duration::from_secs(options.interval_seconds);
    let mut cycles = 0usize;

    loop {
        if *shutdown.borrow() {
            info!(component = "scheduler", cycles, "shutdown requested, stopping");
            break;
        }

        match run_scan_cycle(&collector, &config, sink).await {
            Ok(_) => cycles += 1,
            Err(err) => error!(component = "scheduler", "scan cycle failed: {err:#}"),
        }

        if !options.continuous {
            break;
        }

        let sleep = tokio::time::sleep(interval);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => {}
            changed = shutdown.changed() => {
                // Sender gone: nobody can request shutdown any more, keep the cadence.
                if changed.is_err() {
                    (&mut sleep).await;
                }
            }
        }
    }

    cycles
}
