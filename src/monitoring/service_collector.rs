#[cfg(not(target_os = "windows"))]
use std::collections::HashSet;
#[cfg(not(target_os = "windows"))]
use std::fs;
#[cfg(not(target_os = "windows"))]
use std::path::Path;

use crate::models::ServiceRecord;
use crate::monitoring::{paths, Collected};

#[cfg(target_os = "windows")]
use winreg::{enums::*, RegKey};

#[cfg(target_os = "windows")]
const SERVICES_KEY: &str = "SYSTEM\\CurrentControlSet\\Services";

/// Win32 own-process and share-process service types. Drivers are skipped.
#[cfg(target_os = "windows")]
const WIN32_SERVICE_MASK: u32 = 0x30;

#[cfg(not(target_os = "windows"))]
const UNIT_DIRS: &[&str] = &[
    "/etc/systemd/system",
    "/lib/systemd/system",
    "/usr/lib/systemd/system",
];

#[cfg(not(target_os = "windows"))]
const DEFAULT_UNIT_USER: &str = "root";

#[cfg(target_os = "windows")]
pub fn collect_services() -> Collected<ServiceRecord> {
    let mut collected = Collected::default();
    let root = RegKey::predef(HKEY_LOCAL_MACHINE);
    let Ok(services) = root.open_subkey(SERVICES_KEY) else {
        tracing::warn!(component = "collector", key = SERVICES_KEY, "service registry key unavailable");
        return collected;
    };

    for name in services.enum_keys() {
        let Ok(name) = name else {
            collected.skipped += 1;
            continue;
        };
        let Ok(key) = services.open_subkey(&name) else {
            collected.skipped += 1;
            continue;
        };
        let service_type = key.get_value::<u32, _>("Type").unwrap_or_default();
        if service_type & WIN32_SERVICE_MASK == 0 {
            continue;
        }
        let executable_path = key
            .get_value::<String, _>("ImagePath")
            .ok()
            .and_then(|command| paths::extract_executable_from_command(&command));
        let run_as = key
            .get_value::<String, _>("ObjectName")
            .unwrap_or_else(|_| "LocalSystem".to_string());

        collected.items.push(ServiceRecord {
            name,
            executable_path,
            run_as,
        });
    }

    collected.items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    collected
}

#[cfg(not(target_os = "windows"))]
pub fn collect_services() -> Collected<ServiceRecord> {
    let dirs: Vec<&Path> = UNIT_DIRS.iter().map(Path::new).collect();
    collect_from_dirs(&dirs)
}

/// Walks unit directories in priority order. A unit in an earlier directory
/// shadows the same unit further down; entries that cannot be read are counted.
#[cfg(not(target_os = "windows"))]
pub fn collect_from_dirs(dirs: &[&Path]) -> Collected<ServiceRecord> {
    let mut collected = Collected::default();
    let mut seen = HashSet::new();

    for dir in dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        for entry in entries {
            let Ok(entry) = entry else {
                collected.skipped += 1;
                continue;
            };
            let path = entry.path();
            let Some(unit) = path
                .file_name()
                .and_then(|value| value.to_str())
                .and_then(|value| value.strip_suffix(".service"))
            else {
                continue;
            };
            if !seen.insert(unit.to_string()) {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(contents) => collected.items.push(parse_unit_file(unit, &contents)),
                Err(err) => {
                    tracing::debug!(component = "collector", unit, "unreadable unit file: {err}");
                    collected.skipped += 1;
                }
            }
        }
    }

    collected.items.sort_by(|a, b| a.name.cmp(&b.name));
    collected
}

/// Reads the `[Service]` section of a systemd unit. The last `ExecStart=` and
/// `User=` win, as they do for systemd itself.
#[cfg(not(target_os = "windows"))]
pub fn parse_unit_file(name: &str, contents: &str) -> ServiceRecord {
    let mut in_service = false;
    let mut exec_start = None;
    let mut user = None;

    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_service = line.eq_ignore_ascii_case("[service]");
            continue;
        }
        if !in_service {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ExecStart" => exec_start = paths::extract_executable_from_command(value),
            "User" => {
                let value = value.trim();
                user = (!value.is_empty()).then(|| value.to_string());
            }
            _ => {}
        }
    }

    ServiceRecord {
        name: name.to_string(),
        executable_path: exec_start,
        run_as: user.unwrap_or_else(|| DEFAULT_UNIT_USER.to_string()),
    }
}
