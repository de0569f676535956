use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::models::{AuthorizationFinding, Classification, PathAnnotation, ProcessRecord};
use crate::monitoring::paths;

const DEFAULT_ALLOWED: &[&str] = &[
    "explorer.exe",
    "svchost.exe",
    "csrss.exe",
    "services.exe",
    "lsass.exe",
    "wininit.exe",
    "winlogon.exe",
    "dwm.exe",
    "searchindexer.exe",
    "chrome.exe",
    "firefox.exe",
    "notepad.exe",
];

/// Allow and deny sets keyed by normalized process name, plus optional
/// expected paths used only to annotate findings.
#[derive(Debug, Clone, Default)]
pub struct AllowDenyList {
    allow: BTreeSet<String>,
    deny: BTreeSet<String>,
    expected_paths: HashMap<String, String>,
}

impl AllowDenyList {
    pub fn with_defaults() -> Self {
        let mut list = Self::default();
        list.allow
            .extend(DEFAULT_ALLOWED.iter().map(|name| name.to_string()));
        list
    }

    /// Unions external entries into the current sets. Existing entries are never removed.
    pub fn merge<A, D>(&mut self, allow: A, deny: D, expected_paths: HashMap<String, String>)
    where
        A: IntoIterator<Item = String>,
        D: IntoIterator<Item = String>,
    {
        self.allow
            .extend(allow.into_iter().filter_map(|name| paths::normalize_name(&name)));
        self.deny
            .extend(deny.into_iter().filter_map(|name| paths::normalize_name(&name)));
        for (name, path) in expected_paths {
            let (Some(name), Some(path)) = (paths::normalize_name(&name), paths::normalize_path(&path))
            else {
                continue;
            };
            self.expected_paths.insert(name, path);
        }

        for name in self.conflicts() {
            warn!(
                component = "authorization",
                name = %name,
                "process name is both allowed and denied, treating as blacklisted"
            );
        }
    }

    pub fn conflicts(&self) -> Vec<String> {
        self.allow.intersection(&self.deny).cloned().collect()
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        paths::normalize_name(name).is_some_and(|key| self.allow.contains(&key))
    }

    pub fn is_denied(&self, name: &str) -> bool {
        paths::normalize_name(name).is_some_and(|key| self.deny.contains(&key))
    }

    pub fn allowed_count(&self) -> usize {
        self.allow.len()
    }

    pub fn denied_count(&self) -> usize {
        self.deny.len()
    }

    pub fn classify(&self, record: &ProcessRecord) -> Classification {
        if self.is_denied(&record.name) {
            Classification::Blacklisted
        } else if self.is_allowed(&record.name) {
            Classification::Authorized
        } else {
            Classification::Unauthorized
        }
    }

    pub fn annotate_path(&self, record: &ProcessRecord) -> PathAnnotation {
        let Some(name) = paths::normalize_name(&record.name) else {
            return PathAnnotation::Unchecked;
        };
        let Some(expected) = self.expected_paths.get(&name) else {
            return PathAnnotation::Unchecked;
        };
        match record.executable_path.as_deref().and_then(paths::normalize_path) {
            Some(observed) if &observed == expected => PathAnnotation::Expected,
            Some(_) => PathAnnotation::Unexpected,
            None => PathAnnotation::Unchecked,
        }
    }

    /// Findings for every record that is not authorized, in snapshot order.
    pub fn evaluate(&self, records: &[ProcessRecord]) -> Vec<AuthorizationFinding> {
        records
            .iter()
            .filter_map(|record| {
                let classification = self.classify(record);
                if classification == Classification::Authorized {
                    return None;
                }
                Some(AuthorizationFinding {
                    pid: record.pid,
                    name: record.name.clone(),
                    executable_path: record.executable_path.clone(),
                    classification,
                    path_annotation: self.annotate_path(record),
                })
            })
            .collect()
    }
}
