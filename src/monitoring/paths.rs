/// Lowercases and trims a process or file name. Empty input yields `None`.
pub fn normalize_name(value: &str) -> Option<String> {
    let normalized = value.trim().trim_matches('"').trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    Some(normalized)
}

const EXECUTABLE_EXTENSIONS: &[&str] = &[".exe", ".dll", ".sys", ".bat", ".cmd"];

/// Canonical form used for every path comparison: lowercase, backslash
/// separators, verbatim and `\SystemRoot\` style prefixes resolved, runs of
/// separators collapsed.
pub fn normalize_path(value: &str) -> Option<String> {
    let lower = value.trim().trim_matches('"').replace('/', "\\").to_lowercase();
    let lower = lower
        .strip_prefix("\\??\\")
        .or_else(|| lower.strip_prefix("\\\\?\\"))
        .unwrap_or(&lower);

    let expanded = if let Some(rest) = lower
        .strip_prefix("\\systemroot\\")
        .or_else(|| lower.strip_prefix("%systemroot%\\"))
        .or_else(|| lower.strip_prefix("%windir%\\"))
    {
        format!("c:\\windows\\{rest}")
    } else {
        lower.to_string()
    };

    let mut normalized = String::with_capacity(expanded.len());
    for ch in expanded.chars() {
        if ch == '\\' && normalized.ends_with('\\') {
            continue;
        }
        normalized.push(ch);
    }

    (!normalized.is_empty()).then_some(normalized)
}

pub fn is_system_path(path: Option<&str>) -> bool {
    let Some(lower) = path.and_then(normalize_path) else {
        return false;
    };
    lower.starts_with("c:\\windows\\")
        || lower.contains("\\windows\\system32\\")
        || lower.contains("\\windows\\syswow64\\")
        || ["\\usr\\bin\\", "\\usr\\sbin\\", "\\bin\\", "\\sbin\\", "\\usr\\lib\\", "\\lib\\"]
            .iter()
            .any(|prefix| lower.starts_with(prefix))
}

/// Pulls the executable out of a service command line such as
/// `"C:\Program Files\App\svc.exe" -k netsvcs` or `-/usr/bin/daemon --flag`.
///
/// Unquoted lines may contain spaces inside the path. The shortest prefix that
/// ends on a whitespace boundary with an executable extension wins, matching
/// how Windows resolves unquoted image paths. Without such a prefix the first
/// token is used.
pub fn extract_executable_from_command(command: &str) -> Option<String> {
    let raw = command
        .trim()
        .trim_start_matches(['-', '@', '+', '!', ':']);
    if raw.is_empty() {
        return None;
    }

    let cleaned = raw
        .split_once(',')
        .map(|(prefix, _)| prefix.trim())
        .unwrap_or(raw);

    if let Some(rest) = cleaned.strip_prefix('"') {
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    if let Some(candidate) = first_executable_prefix(cleaned) {
        return Some(candidate.to_string());
    }

    cleaned
        .split_whitespace()
        .next()
        .map(|value| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn has_executable_extension(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    EXECUTABLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn first_executable_prefix(line: &str) -> Option<&str> {
    let mut boundaries: Vec<usize> = line
        .char_indices()
        .zip(line.chars().skip(1))
        .filter(|((_, current), next)| !current.is_whitespace() && next.is_whitespace())
        .map(|((index, current), _)| index + current.len_utf8())
        .collect();
    boundaries.push(line.len());

    boundaries
        .into_iter()
        .map(|end| &line[..end])
        .find(|prefix| has_executable_extension(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_unifies_separators_and_case() {
        assert_eq!(
            normalize_path("\\\\?\\C:/Users/Bob/AppData").as_deref(),
            Some("c:\\users\\bob\\appdata")
        );
        assert_eq!(normalize_path("/tmp/x").as_deref(), Some("\\tmp\\x"));
        assert_eq!(normalize_path("   "), None);
    }

    #[test]
    fn system_paths_cover_windows_and_unix_layouts() {
        assert!(is_system_path(Some("C:\\Windows\\System32\\svchost.exe")));
        assert!(is_system_path(Some("/usr/sbin/sshd")));
        assert!(!is_system_path(Some("C:\\Users\\bob\\svchost.exe")));
        assert!(!is_system_path(None));
    }

    #[test]
    fn extracts_quoted_and_prefixed_executables() {
        assert_eq!(
            extract_executable_from_command("\"C:\\Program Files\\App\\svc.exe\" -k netsvcs").as_deref(),
            Some("C:\\Program Files\\App\\svc.exe")
        );
        assert_eq!(
            extract_executable_from_command("-/usr/bin/daemon --flag").as_deref(),
            Some("/usr/bin/daemon")
        );
        assert_eq!(extract_executable_from_command("  "), None);
    }

    #[test]
    fn normalize_path_resolves_system_root_and_collapses_separators() {
        assert_eq!(
            normalize_path("\\SystemRoot\\System32\\svchost.exe").as_deref(),
            Some("c:\\windows\\system32\\svchost.exe")
        );
        assert_eq!(
            normalize_path("%SystemRoot%\\system32\\drivers\\x.sys").as_deref(),
            Some("c:\\windows\\system32\\drivers\\x.sys")
        );
        assert_eq!(
            normalize_path("\\??\\C:\\Tools//agent.exe").as_deref(),
            Some("c:\\tools\\agent.exe")
        );
        assert!(is_system_path(Some("\\SystemRoot\\System32\\lsass.exe")));
    }

    #[test]
    fn unquoted_paths_with_spaces_keep_the_whole_executable() {
        assert_eq!(
            extract_executable_from_command("C:\\Users\\John Smith\\AppData\\Local\\Temp\\svc.exe -k run")
                .as_deref(),
            Some("C:\\Users\\John Smith\\AppData\\Local\\Temp\\svc.exe")
        );
        assert_eq!(
            extract_executable_from_command("C:\\Program Files\\Vendor Tool\\launch.bat /quiet /log x.cmd")
                .as_deref(),
            Some("C:\\Program Files\\Vendor Tool\\launch.bat")
        );
        assert_eq!(
            extract_executable_from_command("C:\\Windows\\System32\\svchost.exe -k netsvcs -p").as_deref(),
            Some("C:\\Windows\\System32\\svchost.exe")
        );
        assert_eq!(
            extract_executable_from_command("/usr/bin/python3 /opt/agent/run.py").as_deref(),
            Some("/usr/bin/python3")
        );
    }
}
