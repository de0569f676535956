use std::collections::{BTreeMap, BTreeSet};

use crate::detection::tree::{ProcessIndex, ProcessTree};
use crate::models::{LineageMatch, Severity};
use crate::monitoring::paths;

const DEFAULT_RULES: &[(&str, &[&str], Severity)] = &[
    ("cmd.exe", &["winword.exe", "excel.exe", "acrobat.exe"], Severity::High),
    ("powershell.exe", &["winword.exe", "excel.exe"], Severity::High),
    ("cscript.exe", &["explorer.exe", "svchost.exe"], Severity::High),
    ("wscript.exe", &["explorer.exe", "svchost.exe"], Severity::High),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageRule {
    pub parent: String,
    pub children: BTreeSet<String>,
    pub risk_level: Severity,
}

/// Risky (parent name -> child names) table, fixed for the lifetime of the agent.
#[derive(Debug, Clone, Default)]
pub struct LineageRules {
    rules: BTreeMap<String, LineageRule>,
}

impl LineageRules {
    pub fn with_defaults() -> Self {
        let mut rules = Self::default();
        for (parent, children, risk) in DEFAULT_RULES {
            rules.insert(parent, children.iter().copied(), *risk);
        }
        rules
    }

    /// Adds or replaces the rule keyed by `parent`. Returns false when the
    /// parent name or every child name is blank.
    pub fn insert<'a, I>(&mut self, parent: &str, children: I, risk_level: Severity) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let Some(parent) = paths::normalize_name(parent) else {
            return false;
        };
        let children: BTreeSet<String> = children
            .into_iter()
            .filter_map(paths::normalize_name)
            .collect();
        if children.is_empty() {
            return false;
        }
        self.rules.insert(
            parent.clone(),
            LineageRule {
                parent,
                children,
                risk_level,
            },
        );
        true
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn rule_for(&self, parent_name: &str) -> Option<&LineageRule> {
        paths::normalize_name(parent_name).and_then(|key| self.rules.get(&key))
    }

    pub fn risk_for(&self, parent_name: &str, child_name: &str) -> Option<Severity> {
        let rule = self.rule_for(parent_name)?;
        let child = paths::normalize_name(child_name)?;
        rule.children
            .contains(&child)
            .then_some(rule.risk_level)
    }

    /// Walks every resolved edge of `tree`. Edges whose parent or child can no
    /// longer be resolved through `index` are skipped.
    pub fn find_suspicious_chains(
        &self,
        tree: &ProcessTree,
        index: &ProcessIndex<'_>,
    ) -> Vec<LineageMatch> {
        if self.rules.is_empty() {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for (parent_pid, child_pid) in tree.edges() {
            let (Some(parent_name), Some(child_name)) =
                (index.name_of(parent_pid), index.name_of(child_pid))
            else {
                continue;
            };
            if let Some(risk_level) = self.risk_for(parent_name, child_name) {
                matches.push(LineageMatch {
                    parent_pid,
                    parent_name: parent_name.to_lowercase(),
                    child_pid,
                    child_name: child_name.to_lowercase(),
                    risk_level,
                });
            }
        }
        matches
    }
}
