use crate::models::{ServiceAlert, ServiceRecord, Severity};
use crate::monitoring::paths;

const DEFAULT_SUSPICIOUS_FRAGMENTS: &[&str] = &[
    "windows\\temp",
    "temp",
    "appdata",
    "users\\public",
    "\\tmp\\",
    "\\dev\\shm\\",
];

/// Flags services whose binary lives under a writable or temporary directory.
#[derive(Debug, Clone)]
pub struct ServicePathAuditor {
    fragments: Vec<String>,
}

impl Default for ServicePathAuditor {
    fn default() -> Self {
        Self::new(DEFAULT_SUSPICIOUS_FRAGMENTS.iter().map(|fragment| fragment.to_string()))
    }
}

impl ServicePathAuditor {
    /// Fragments keep their configured order; the first hit wins.
    pub fn new<I>(fragments: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for fragment in fragments {
            if let Some(value) = paths::normalize_path(&fragment) {
                if !normalized.contains(&value) {
                    normalized.push(value);
                }
            }
        }
        Self {
            fragments: normalized,
        }
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn matched_fragment(&self, executable_path: &str) -> Option<&str> {
        let path = paths::normalize_path(executable_path)?;
        self.fragments
            .iter()
            .find(|fragment| path.contains(fragment.as_str()))
            .map(String::as_str)
    }

    pub fn audit(&self, services: &[ServiceRecord]) -> Vec<ServiceAlert> {
        services
            .iter()
            .filter_map(|service| {
                let path = service.executable_path.as_deref()?;
                let fragment = self.matched_fragment(path)?;
                Some(ServiceAlert {
                    service: service.name.clone(),
                    executable_path: path.to_string(),
                    run_as: service.run_as.clone(),
                    matched_fragment: fragment.to_string(),
                    severity: Severity::High,
                })
            })
            .collect()
    }
}
