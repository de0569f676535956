use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::detection::anomaly::{self, AnomalyScorer, FeatureRuleConfig};
use crate::detection::authorization::AllowDenyList;
use crate::detection::lineage::LineageRules;
use crate::detection::services::ServicePathAuditor;
use crate::models::Severity;

pub const WHITELIST_FILE: &str = "whitelist.json";
pub const RULES_FILE: &str = "detection_rules.yaml";

const DEFAULT_REPORT_SAMPLE_SIZE: usize = 10;
const DEFAULT_AUDIT_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration path {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("configuration directory {path} cannot be read")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WhitelistFile {
    processes: Vec<String>,
    blacklist: Vec<String>,
    paths: HashMap<String, String>,
}

fn default_rule_risk() -> Severity {
    Severity::High
}

#[derive(Debug, Deserialize)]
struct LineageRuleConfig {
    parent: String,
    #[serde(default)]
    children: Vec<String>,
    #[serde(default = "default_rule_risk")]
    risk: Severity,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetectionRulesFile {
    threshold: Option<f64>,
    lineage: Option<Vec<LineageRuleConfig>>,
    anomaly_rules: Option<Vec<FeatureRuleConfig>>,
    suspicious_service_paths: Option<Vec<String>>,
    report_sample_size: Option<usize>,
    audit_sample_size: Option<usize>,
}

/// Immutable detection state for the whole agent lifetime.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub authorization: AllowDenyList,
    pub lineage: LineageRules,
    pub scorer: AnomalyScorer,
    pub service_auditor: ServicePathAuditor,
    pub report_sample_size: usize,
    pub audit_sample_size: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            authorization: AllowDenyList::with_defaults(),
            lineage: LineageRules::with_defaults(),
            scorer: AnomalyScorer::default(),
            service_auditor: ServicePathAuditor::default(),
            report_sample_size: DEFAULT_REPORT_SAMPLE_SIZE,
            audit_sample_size: DEFAULT_AUDIT_SAMPLE_SIZE,
        }
    }
}

impl AgentConfig {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        match fs::metadata(dir) {
            Ok(metadata) if !metadata.is_dir() => {
                return Err(ConfigError::NotADirectory(dir.to_path_buf()));
            }
            Ok(_) => {
                fs::read_dir(dir).map_err(|source| ConfigError::Unreadable {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(
                    component = "config",
                    path = %dir.display(),
                    "configuration directory not found, using built-in defaults"
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Unreadable {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }

        let mut config = Self::default();

        let whitelist_path = dir.join(WHITELIST_FILE);
        if let Some(whitelist) = read_config_file(&whitelist_path, |raw| {
            serde_json::from_str::<WhitelistFile>(raw).context("invalid whitelist json")
        }) {
            config
                .authorization
                .merge(whitelist.processes, whitelist.blacklist, whitelist.paths);
        }

        let rules_path = dir.join(RULES_FILE);
        if let Some(rules) = read_config_file(&rules_path, |raw| {
            if raw.trim().is_empty() {
                return Ok(DetectionRulesFile::default());
            }
            serde_yaml::from_str::<DetectionRulesFile>(raw).context("invalid detection rules yaml")
        }) {
            config.apply_rules(rules);
        }

        info!(
            component = "config",
            path = %dir.display(),
            allowed = config.authorization.allowed_count(),
            denied = config.authorization.denied_count(),
            lineage_rules = config.lineage.len(),
            anomaly_rules = config.scorer.rules().len(),
            threshold = config.scorer.threshold(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn apply_rules(&mut self, rules: DetectionRulesFile) {
        let threshold = match rules.threshold {
            Some(value) if value.is_finite() && value > 0.0 && value <= 1.0 => value,
            Some(value) => {
                warn!(
                    component = "config",
                    threshold = value,
                    "threshold must be within (0, 1], keeping {}",
                    anomaly::DEFAULT_THRESHOLD
                );
                anomaly::DEFAULT_THRESHOLD
            }
            None => anomaly::DEFAULT_THRESHOLD,
        };

        for rule in rules.lineage.unwrap_or_default() {
            let children = rule.children.iter().map(String::as_str);
            if !self.lineage.insert(&rule.parent, children, rule.risk) {
                warn!(
                    component = "config",
                    parent = %rule.parent,
                    "ignoring lineage rule without a parent or children"
                );
            }
        }

        self.scorer = match rules.anomaly_rules {
            Some(configs) => {
                let scorer = AnomalyScorer::from_configs(&configs, threshold);
                if scorer.rules().is_empty() && !configs.is_empty() {
                    warn!(
                        component = "config",
                        "no usable anomaly rules configured, keeping built-in feature table"
                    );
                    AnomalyScorer::from_configs(&anomaly::default_feature_rules(), threshold)
                } else {
                    scorer
                }
            }
            None => AnomalyScorer::from_configs(&anomaly::default_feature_rules(), threshold),
        };

        if let Some(fragments) = rules.suspicious_service_paths {
            let auditor = ServicePathAuditor::new(fragments);
            if auditor.fragments().is_empty() {
                warn!(
                    component = "config",
                    "suspicious_service_paths is empty, keeping built-in fragments"
                );
            } else {
                self.service_auditor = auditor;
            }
        }

        if let Some(size) = rules.report_sample_size {
            self.report_sample_size = size;
        }
        if let Some(size) = rules.audit_sample_size {
            self.audit_sample_size = size;
        }
    }
}

fn read_config_file<T>(path: &Path, parse: impl FnOnce(&str) -> anyhow::Result<T>) -> Option<T> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(component = "config", path = %path.display(), "configuration file not found, using defaults");
            return None;
        }
        Err(err) => {
            warn!(component = "config", path = %path.display(), "failed reading configuration file: {err}");
            return None;
        }
    };

    match parse(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(component = "config", path = %path.display(), "malformed configuration, using defaults: {err:#}");
            None
        }
    }
}
