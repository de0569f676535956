use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert priority bucket. Unrecognized labels collapse to `Low`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_uppercase().as_str() {
            "HIGH" => Self::High,
            "MEDIUM" => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Low
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Authorized,
    Unauthorized,
    Blacklisted,
}

/// Audit-only outcome of comparing an observed path with the configured one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PathAnnotation {
    Unchecked,
    Expected,
    Unexpected,
}

impl Default for PathAnnotation {
    fn default() -> Self {
        Self::Unchecked
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent_pid: Option<u32>,
    pub name: String,
    pub executable_path: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl ProcessRecord {
    pub fn new(
        pid: u32,
        parent_pid: Option<u32>,
        name: &str,
        executable_path: Option<&str>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pid,
            parent_pid,
            name: name.trim().to_lowercase(),
            executable_path: executable_path
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string),
            captured_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub executable_path: Option<String>,
    pub run_as: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineageMatch {
    pub parent_pid: u32,
    pub parent_name: String,
    pub child_pid: u32,
    pub child_name: String,
    pub risk_level: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorizationFinding {
    pub pid: u32,
    pub name: String,
    pub executable_path: Option<String>,
    pub classification: Classification,
    pub path_annotation: PathAnnotation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyFactor {
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyScore {
    pub pid: u32,
    pub score: f64,
    pub contributing_factors: Vec<AnomalyFactor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyFinding {
    pub name: String,
    pub executable_path: Option<String>,
    pub score: AnomalyScore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceAlert {
    pub service: String,
    pub executable_path: String,
    pub run_as: String,
    pub matched_fragment: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    SuspiciousLineage,
    UnauthorizedProcess,
    AnomalousBehavior,
    SuspiciousServicePath,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuspiciousLineage => "suspicious_lineage",
            Self::UnauthorizedProcess => "unauthorized_process",
            Self::AnomalousBehavior => "anomalous_behavior",
            Self::SuspiciousServicePath => "suspicious_service_path",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSubject {
    Process { pid: u32 },
    Service { name: String },
}

impl fmt::Display for AlertSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process { pid } => write!(f, "pid:{pid}"),
            Self::Service { name } => write!(f, "service:{name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertDetails {
    Lineage(LineageMatch),
    Authorization(AuthorizationFinding),
    Anomaly(AnomalyFinding),
    ServicePath(ServiceAlert),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub subject: AlertSubject,
    pub details: AlertDetails,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SeverityHistogram {
    #[serde(rename = "HIGH")]
    pub high: usize,
    #[serde(rename = "MEDIUM")]
    pub medium: usize,
    #[serde(rename = "LOW")]
    pub low: usize,
}

impl SeverityHistogram {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub total_processes: usize,
    pub total_services: usize,
    pub total_alerts: usize,
    pub severity_histogram: SeverityHistogram,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub skipped_processes: usize,
    pub skipped_services: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub timestamp: DateTime<Utc>,
    pub summary: ReportSummary,
    #[serde(default)]
    pub collection: CollectionStats,
    pub alerts: Vec<Alert>,
    pub sample_processes: Vec<ProcessRecord>,
}

/// Parameters the CLI hands to the scheduler.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub continuous: bool,
    pub interval_seconds: u64,
    pub config_path: PathBuf,
    pub output_dir: PathBuf,
}
