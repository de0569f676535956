use chrono::{DateTime, Utc};

use crate::models::{
    Alert, AlertDetails, AlertSubject, AlertType, AnomalyFinding, AuthorizationFinding, Classification,
    CollectionStats, LineageMatch, ProcessRecord, ReportSummary, ScanReport, ServiceAlert, Severity,
    SeverityHistogram,
};

/// Anomaly scores at or above this value are reported as HIGH.
pub const HIGH_ANOMALY_SCORE: f64 = 0.8;

/// Raw output of every detector for one scan cycle.
#[derive(Debug, Clone, Default)]
pub struct DetectorFindings {
    pub lineage: Vec<LineageMatch>,
    pub authorization: Vec<AuthorizationFinding>,
    pub anomalies: Vec<AnomalyFinding>,
    pub services: Vec<ServiceAlert>,
}

impl DetectorFindings {
    pub fn len(&self) -> usize {
        self.lineage.len() + self.authorization.len() + self.anomalies.len() + self.services.len()
    }
}

pub fn authorization_severity(classification: Classification) -> Severity {
    match classification {
        Classification::Blacklisted => Severity::High,
        Classification::Unauthorized => Severity::Medium,
        Classification::Authorized => Severity::Low,
    }
}

pub fn anomaly_severity(score: f64) -> Severity {
    if score >= HIGH_ANOMALY_SCORE {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Turns detector output into alerts, in detector order. Nothing is deduplicated:
/// a pid flagged by several detectors yields one alert per detector.
pub fn aggregate(findings: DetectorFindings, detected_at: DateTime<Utc>) -> Vec<Alert> {
    let mut alerts = Vec::with_capacity(findings.len());
    let mut push = |alert_type: AlertType, severity: Severity, subject: AlertSubject, details: AlertDetails| {
        let id = format!(
            "{}-{:04}-{}",
            alert_type.as_str(),
            alerts.len(),
            detected_at.timestamp_millis()
        );
        alerts.push(Alert {
            id,
            alert_type,
            severity,
            subject,
            details,
            detected_at,
        });
    };

    for chain in findings.lineage {
        push(
            AlertType::SuspiciousLineage,
            chain.risk_level,
            AlertSubject::Process {
                pid: chain.child_pid,
            },
            AlertDetails::Lineage(chain),
        );
    }

    for finding in findings.authorization {
        push(
            AlertType::UnauthorizedProcess,
            authorization_severity(finding.classification),
            AlertSubject::Process { pid: finding.pid },
            AlertDetails::Authorization(finding),
        );
    }

    for finding in findings.anomalies {
        push(
            AlertType::AnomalousBehavior,
            anomaly_severity(finding.score.score),
            AlertSubject::Process {
                pid: finding.score.pid,
            },
            AlertDetails::Anomaly(finding),
        );
    }

    for finding in findings.services {
        push(
            AlertType::SuspiciousServicePath,
            finding.severity,
            AlertSubject::Service {
                name: finding.service.clone(),
            },
            AlertDetails::ServicePath(finding),
        );
    }

    alerts
}

pub fn severity_histogram(alerts: &[Alert]) -> SeverityHistogram {
    let mut histogram = SeverityHistogram::default();
    for alert in alerts {
        histogram.record(alert.severity);
    }
    histogram
}

/// Inputs for one report. `sample_size` bounds the process prefix carried in it.
pub struct ReportInput<'a> {
    pub timestamp: DateTime<Utc>,
    pub processes: &'a [ProcessRecord],
    pub total_services: usize,
    pub collection: CollectionStats,
    pub sample_size: usize,
}

pub fn build_report(input: ReportInput<'_>, alerts: Vec<Alert>) -> ScanReport {
    let severity_histogram = severity_histogram(&alerts);
    ScanReport {
        timestamp: input.timestamp,
        summary: ReportSummary {
            total_processes: input.processes.len(),
            total_services: input.total_services,
            total_alerts: alerts.len(),
            severity_histogram,
        },
        collection: input.collection,
        alerts,
        sample_processes: input
            .processes
            .iter()
            .take(input.sample_size)
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnomalyScore, PathAnnotation};

    fn lineage(child_pid: u32, risk_level: Severity) -> LineageMatch {
        LineageMatch {
            parent_pid: 1,
            parent_name: "cmd.exe".to_string(),
            child_pid,
            child_name: "winword.exe".to_string(),
            risk_level,
        }
    }

    fn unauthorized(pid: u32, classification: Classification) -> AuthorizationFinding {
        AuthorizationFinding {
            pid,
            name: "tool.exe".to_string(),
            executable_path: None,
            classification,
            path_annotation: PathAnnotation::Unchecked,
        }
    }

    fn anomaly(pid: u32, score: f64) -> AnomalyFinding {
        AnomalyFinding {
            name: "tool.exe".to_string(),
            executable_path: None,
            score: AnomalyScore {
                pid,
                score,
                contributing_factors: Vec::new(),
            },
        }
    }

    fn service(name: &str) -> ServiceAlert {
        ServiceAlert {
            service: name.to_string(),
            executable_path: "C:\\Temp\\svc.exe".to_string(),
            run_as: "LocalSystem".to_string(),
            matched_fragment: "temp".to_string(),
            severity: Severity::High,
        }
    }

    #[test]
    fn alerts_follow_detector_order_and_severity_mapping() {
        let findings = DetectorFindings {
            lineage: vec![lineage(90, Severity::High)],
            authorization: vec![
                unauthorized(90, Classification::Unauthorized),
                unauthorized(91, Classification::Blacklisted),
            ],
            anomalies: vec![anomaly(90, 0.65), anomaly(91, 0.85)],
            services: vec![service("Updater")],
        };
        let alerts = aggregate(findings, Utc::now());

        let summary: Vec<(AlertType, Severity, String)> = alerts
            .iter()
            .map(|alert| (alert.alert_type, alert.severity, alert.subject.to_string()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (AlertType::SuspiciousLineage, Severity::High, "pid:90".to_string()),
                (AlertType::UnauthorizedProcess, Severity::Medium, "pid:90".to_string()),
                (AlertType::UnauthorizedProcess, Severity::High, "pid:91".to_string()),
                (AlertType::AnomalousBehavior, Severity::Medium, "pid:90".to_string()),
                (AlertType::AnomalousBehavior, Severity::High, "pid:91".to_string()),
                (AlertType::SuspiciousServicePath, Severity::High, "service:Updater".to_string()),
            ]
        );

        let mut ids: Vec<&str> = alerts.iter().map(|alert| alert.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), alerts.len());
    }

    #[test]
    fn histogram_counts_three_high_one_medium() {
        let findings = DetectorFindings {
            lineage: vec![lineage(5, Severity::High), lineage(6, Severity::High)],
            authorization: vec![unauthorized(7, Classification::Unauthorized)],
            anomalies: Vec::new(),
            services: vec![service("Updater")],
        };
        let timestamp = Utc::now();
        let alerts = aggregate(findings, timestamp);
        let report = build_report(
            ReportInput {
                timestamp,
                processes: &[],
                total_services: 1,
                collection: CollectionStats::default(),
                sample_size: 10,
            },
            alerts,
        );

        assert_eq!(
            report.summary.severity_histogram,
            SeverityHistogram {
                high: 3,
                medium: 1,
                low: 0
            }
        );
        assert_eq!(report.summary.total_alerts, 4);
    }

    #[test]
    fn report_is_deterministic_and_samples_a_prefix() {
        let timestamp = Utc::now();
        let processes: Vec<ProcessRecord> = (0..25u32)
            .map(|pid| ProcessRecord::new(pid, None, "proc", None, timestamp))
            .collect();
        let build = || {
            let alerts = aggregate(
                DetectorFindings {
                    lineage: vec![lineage(3, Severity::Medium)],
                    ..Default::default()
                },
                timestamp,
            );
            build_report(
                ReportInput {
                    timestamp,
                    processes: &processes,
                    total_services: 0,
                    collection: CollectionStats {
                        skipped_processes: 2,
                        skipped_services: 0,
                    },
                    sample_size: 10,
                },
                alerts,
            )
        };

        let first = build();
        assert_eq!(first, build());
        assert_eq!(first.summary.total_processes, 25);
        assert_eq!(first.sample_processes.len(), 10);
        assert_eq!(first.sample_processes[9].pid, 9);
        assert_eq!(first.collection.skipped_processes, 2);
    }

    #[test]
    fn lenient_severity_parsing_defaults_to_low() {
        let parsed: Vec<Severity> = serde_json::from_str(r#"["HIGH","medium","CRITICAL",""]"#).unwrap();
        assert_eq!(
            parsed,
            vec![Severity::High, Severity::Medium, Severity::Low, Severity::Low]
        );
        let mut histogram = SeverityHistogram::default();
        for severity in parsed {
            histogram.record(severity);
        }
        assert_eq!(histogram.low, 2);
    }
}
