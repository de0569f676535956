use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::detection::authorization::AllowDenyList;
use crate::detection::lineage::LineageRules;
use crate::detection::tree::{ProcessIndex, ProcessTree};
use crate::models::{AnomalyFactor, AnomalyFinding, AnomalyScore, Classification, ProcessRecord};
use crate::monitoring::paths;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

const TEMP_DIRECTORY_PATTERN: &str = r"\\(temp|tmp)\\";
const USER_WRITABLE_PATTERN: &str =
    r"\\appdata\\roaming\\|\\users\\public\\|\\downloads\\|\\dev\\shm\\";

const CRITICAL_SYSTEM_NAMES: &[&str] = &[
    "system",
    "smss.exe",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "winlogon.exe",
    "svchost.exe",
    "explorer.exe",
];

/// Condition a feature rule tests against one process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeatureCondition {
    PathMatches { pattern: String },
    Classification { equals: Classification },
    LineageChild,
    SystemNameOutsideSystemDir {
        #[serde(default)]
        names: Vec<String>,
    },
    Orphaned,
    MissingExecutablePath,
}

/// Serialized form of a weighted feature rule, as authored in `detection_rules.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureRuleConfig {
    pub name: String,
    pub weight: f64,
    pub when: FeatureCondition,
}

#[derive(Debug, Clone)]
enum CompiledCondition {
    PathMatches(Regex),
    Classification(Classification),
    LineageChild,
    SystemNameOutsideSystemDir(Vec<String>),
    Orphaned,
    MissingExecutablePath,
}

#[derive(Debug, Clone)]
pub struct FeatureRule {
    name: String,
    weight: f64,
    condition: CompiledCondition,
}

impl FeatureRule {
    pub fn compile(config: &FeatureRuleConfig) -> anyhow::Result<Self> {
        let name = config.name.trim();
        if name.is_empty() {
            anyhow::bail!("feature rule name is empty");
        }
        if !config.weight.is_finite() || config.weight < 0.0 {
            anyhow::bail!("feature rule {name} has invalid weight {}", config.weight);
        }

        let condition = match &config.when {
            FeatureCondition::PathMatches { pattern } => CompiledCondition::PathMatches(
                Regex::new(&pattern.to_lowercase())
                    .map_err(|err| anyhow::anyhow!("feature rule {name} has invalid pattern: {err}"))?,
            ),
            FeatureCondition::Classification { equals } => CompiledCondition::Classification(*equals),
            FeatureCondition::LineageChild => CompiledCondition::LineageChild,
            FeatureCondition::SystemNameOutsideSystemDir { names } => {
                let names: Vec<String> = if names.is_empty() {
                    CRITICAL_SYSTEM_NAMES.iter().map(|n| n.to_string()).collect()
                } else {
                    names.iter().filter_map(|n| paths::normalize_name(n)).collect()
                };
                CompiledCondition::SystemNameOutsideSystemDir(names)
            }
            FeatureCondition::Orphaned => CompiledCondition::Orphaned,
            FeatureCondition::MissingExecutablePath => CompiledCondition::MissingExecutablePath,
        };

        Ok(Self {
            name: name.to_string(),
            weight: config.weight,
            condition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    fn triggers(&self, record: &ProcessRecord, context: &ScoringContext<'_>) -> bool {
        let path = record.executable_path.as_deref().and_then(paths::normalize_path);
        match &self.condition {
            CompiledCondition::PathMatches(regex) => {
                path.as_deref().is_some_and(|value| regex.is_match(value))
            }
            CompiledCondition::Classification(expected) => {
                context.authorization.classify(record) == *expected
            }
            CompiledCondition::LineageChild => context
                .index
                .parent_of(record)
                .is_some_and(|parent| context.lineage.risk_for(&parent.name, &record.name).is_some()),
            CompiledCondition::SystemNameOutsideSystemDir(names) => {
                path.is_some()
                    && names.iter().any(|name| *name == record.name)
                    && !paths::is_system_path(record.executable_path.as_deref())
            }
            CompiledCondition::Orphaned => {
                record.parent_pid.is_some_and(|ppid| ppid != record.pid)
                    && context.tree.is_unlinked(record.pid)
            }
            CompiledCondition::MissingExecutablePath => path.is_none(),
        }
    }
}

pub fn default_feature_rules() -> Vec<FeatureRuleConfig> {
    let rule = |name: &str, weight: f64, when: FeatureCondition| FeatureRuleConfig {
        name: name.to_string(),
        weight,
        when,
    };
    vec![
        rule(
            "temp_directory_execution",
            0.30,
            FeatureCondition::PathMatches {
                pattern: TEMP_DIRECTORY_PATTERN.to_string(),
            },
        ),
        rule(
            "user_writable_directory",
            0.15,
            FeatureCondition::PathMatches {
                pattern: USER_WRITABLE_PATTERN.to_string(),
            },
        ),
        rule(
            "blacklisted_name",
            0.20,
            FeatureCondition::Classification {
                equals: Classification::Blacklisted,
            },
        ),
        rule(
            "unauthorized_name",
            0.05,
            FeatureCondition::Classification {
                equals: Classification::Unauthorized,
            },
        ),
        rule("suspicious_lineage", 0.15, FeatureCondition::LineageChild),
        rule(
            "system_name_outside_system_dir",
            0.10,
            FeatureCondition::SystemNameOutsideSystemDir { names: Vec::new() },
        ),
        rule("orphaned_process", 0.05, FeatureCondition::Orphaned),
    ]
}

/// Read-only views a feature rule may consult.
pub struct ScoringContext<'a> {
    pub tree: &'a ProcessTree,
    pub index: &'a ProcessIndex<'a>,
    pub authorization: &'a AllowDenyList,
    pub lineage: &'a LineageRules,
}

#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    rules: Vec<FeatureRule>,
    threshold: f64,
}

impl Default for AnomalyScorer {
    fn default() -> Self {
        Self::from_configs(&default_feature_rules(), DEFAULT_THRESHOLD)
    }
}

impl AnomalyScorer {
    pub fn new(rules: Vec<FeatureRule>, threshold: f64) -> Self {
        Self { rules, threshold }
    }

    /// Compiles each rule, dropping (and logging) the ones that fail.
    pub fn from_configs(configs: &[FeatureRuleConfig], threshold: f64) -> Self {
        let rules = configs
            .iter()
            .filter_map(|config| match FeatureRule::compile(config) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    warn!(component = "anomaly", rule = %config.name, "skipping feature rule: {err:#}");
                    None
                }
            })
            .collect();
        Self::new(rules, threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn rules(&self) -> &[FeatureRule] {
        &self.rules
    }

    pub fn score(&self, record: &ProcessRecord, context: &ScoringContext<'_>) -> AnomalyScore {
        let contributing_factors: Vec<AnomalyFactor> = self
            .rules
            .iter()
            .filter(|rule| rule.triggers(record, context))
            .map(|rule| AnomalyFactor {
                name: rule.name().to_string(),
                weight: rule.weight(),
            })
            .collect();
        let total: f64 = contributing_factors.iter().map(|factor| factor.weight).sum();

        AnomalyScore {
            pid: record.pid,
            score: total.clamp(0.0, 1.0),
            contributing_factors,
        }
    }

    pub fn is_flagged(&self, score: &AnomalyScore) -> bool {
        !score.contributing_factors.is_empty() && score.score > self.threshold
    }

    /// Flagged processes in snapshot order.
    pub fn detect(&self, records: &[ProcessRecord], context: &ScoringContext<'_>) -> Vec<AnomalyFinding> {
        records
            .iter()
            .filter_map(|record| {
                let score = self.score(record, context);
                self.is_flagged(&score).then(|| AnomalyFinding {
                    name: record.name.clone(),
                    executable_path: record.executable_path.clone(),
                    score,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn record(pid: u32, ppid: Option<u32>, name: &str, path: Option<&str>) -> ProcessRecord {
        ProcessRecord::new(pid, ppid, name, path, Utc::now())
    }

    fn factor_names(score: &AnomalyScore) -> Vec<&str> {
        score
            .contributing_factors
            .iter()
            .map(|factor| factor.name.as_str())
            .collect()
    }

    #[test]
    fn default_weights_do_not_exceed_one() {
        let total: f64 = default_feature_rules().iter().map(|rule| rule.weight).sum();
        assert!(total <= 1.0 + f64::EPSILON);
        assert_eq!(AnomalyScorer::default().rules().len(), default_feature_rules().len());
    }

    #[test]
    fn process_without_triggers_scores_zero_and_is_never_flagged() {
        let records = vec![record(4, None, "explorer.exe", Some("C:\\Windows\\explorer.exe"))];
        let index = ProcessIndex::new(&records);
        let tree = ProcessTree::build(&records);
        let authorization = AllowDenyList::with_defaults();
        let lineage = LineageRules::with_defaults();
        let context = ScoringContext {
            tree: &tree,
            index: &index,
            authorization: &authorization,
            lineage: &lineage,
        };

        for threshold in [0.0001, 0.5, 0.99] {
            let scorer = AnomalyScorer::from_configs(&default_feature_rules(), threshold);
            let score = scorer.score(&records[0], &context);
            assert_eq!(score.score, 0.0);
            assert!(score.contributing_factors.is_empty());
            assert!(scorer.detect(&records, &context).is_empty());
        }
    }

    #[test]
    fn temp_binary_spawned_by_lineage_rule_is_flagged() {
        let records = vec![
            record(55, None, "cmd.exe", Some("C:\\Windows\\System32\\cmd.exe")),
            record(
                90,
                Some(55),
                "winword.exe",
                Some("C:\\Users\\bob\\AppData\\Local\\Temp\\winword.exe"),
            ),
        ];
        let index = ProcessIndex::new(&records);
        let tree = ProcessTree::build(&records);
        let authorization = AllowDenyList::with_defaults();
        let lineage = LineageRules::with_defaults();
        let context = ScoringContext {
            tree: &tree,
            index: &index,
            authorization: &authorization,
            lineage: &lineage,
        };
        let scorer = AnomalyScorer::default();

        let score = scorer.score(&records[1], &context);
        assert_eq!(
            factor_names(&score),
            vec!["temp_directory_execution", "unauthorized_name", "suspicious_lineage"]
        );
        assert!((score.score - 0.50).abs() < 1e-9);
        let strict = AnomalyScorer::from_configs(&default_feature_rules(), 0.6);
        assert!(!strict.is_flagged(&score));

        let mut denied = AllowDenyList::with_defaults();
        denied.merge(Vec::new(), vec!["winword.exe".to_string()], HashMap::new());
        let context = ScoringContext {
            tree: &tree,
            index: &index,
            authorization: &denied,
            lineage: &lineage,
        };
        let findings = scorer.detect(&records, &context);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].score.pid, 90);
        assert!((findings[0].score.score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn masquerading_system_name_and_orphan_are_detected() {
        let records = vec![record(
            77,
            Some(4040),
            "svchost.exe",
            Some("C:\\Users\\Public\\svchost.exe"),
        )];
        let index = ProcessIndex::new(&records);
        let tree = ProcessTree::build(&records);
        let authorization = AllowDenyList::with_defaults();
        let lineage = LineageRules::with_defaults();
        let context = ScoringContext {
            tree: &tree,
            index: &index,
            authorization: &authorization,
            lineage: &lineage,
        };
        let score = AnomalyScorer::default().score(&records[0], &context);
        assert_eq!(
            factor_names(&score),
            vec!["user_writable_directory", "system_name_outside_system_dir", "orphaned_process"]
        );
    }

    #[test]
    fn scores_are_clamped_to_unit_interval() {
        let heavy = vec![
            FeatureRuleConfig {
                name: "no_path".to_string(),
                weight: 0.9,
                when: FeatureCondition::MissingExecutablePath,
            },
            FeatureRuleConfig {
                name: "unknown".to_string(),
                weight: 0.9,
                when: FeatureCondition::Classification {
                    equals: Classification::Unauthorized,
                },
            },
        ];
        let records = vec![record(1, None, "ghost", None)];
        let index = ProcessIndex::new(&records);
        let tree = ProcessTree::build(&records);
        let authorization = AllowDenyList::with_defaults();
        let lineage = LineageRules::default();
        let context = ScoringContext {
            tree: &tree,
            index: &index,
            authorization: &authorization,
            lineage: &lineage,
        };
        let score = AnomalyScorer::from_configs(&heavy, 0.5).score(&records[0], &context);
        assert_eq!(score.score, 1.0);
        assert_eq!(score.contributing_factors.len(), 2);
    }

    #[test]
    fn score_equal_to_threshold_is_not_flagged() {
        let configs = vec![FeatureRuleConfig {
            name: "orphan".to_string(),
            weight: 0.5,
            when: FeatureCondition::Orphaned,
        }];
        let records = vec![record(3, Some(2), "child", None)];
        let index = ProcessIndex::new(&records);
        let tree = ProcessTree::build(&records);
        let authorization = AllowDenyList::with_defaults();
        let lineage = LineageRules::default();
        let context = ScoringContext {
            tree: &tree,
            index: &index,
            authorization: &authorization,
            lineage: &lineage,
        };
        let scorer = AnomalyScorer::from_configs(&configs, 0.5);
        let score = scorer.score(&records[0], &context);
        assert_eq!(score.score, 0.5);
        assert!(!scorer.is_flagged(&score));
        assert!(AnomalyScorer::from_configs(&configs, 0.4).is_flagged(&score));
    }

    #[test]
    fn invalid_rules_are_dropped() {
        let configs = vec![
            FeatureRuleConfig {
                name: "bad_regex".to_string(),
                weight: 0.2,
                when: FeatureCondition::PathMatches {
                    pattern: "(unclosed".to_string(),
                },
            },
            FeatureRuleConfig {
                name: "negative".to_string(),
                weight: -0.1,
                when: FeatureCondition::Orphaned,
            },
            FeatureRuleConfig {
                name: "ok".to_string(),
                weight: 0.1,
                when: FeatureCondition::Orphaned,
            },
        ];
        let scorer = AnomalyScorer::from_configs(&configs, 0.5);
        let names: Vec<&str> = scorer.rules().iter().map(FeatureRule::name).collect();
        assert_eq!(names, vec!["ok"]);
    }

    #[test]
    fn feature_rules_parse_from_yaml() {
        let raw = r#"
- name: temp
  weight: 0.4
  when:
    type: path_matches
    pattern: '\\temp\\'
- name: denied
  weight: 0.3
  when:
    type: classification
    equals: blacklisted
- name: lineage
  weight: 0.2
  when:
    type: lineage_child
"#;
        let configs: Vec<FeatureRuleConfig> = serde_yaml::from_str(raw).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(
            configs[1].when,
            FeatureCondition::Classification {
                equals: Classification::Blacklisted
            }
        );
        assert_eq!(AnomalyScorer::from_configs(&configs, 0.5).rules().len(), 3);
    }
}
